//! Cheap change detection over the mail store's read-only index.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mailbridge_state::DetectedMeta;
use sqlx::{Row, sqlite::SqlitePoolOptions};

use crate::error::{RadarError, Result};

/// What the Scheduler needs from the mail store's index: the current
/// high-water mark, and newly appeared rows above a prior mark.
///
/// Never touches message bodies and never scans by mailbox; every query
/// against a real index must project only the columns named in the
/// external-interfaces contract.
#[async_trait]
pub trait RadarIndex: Send + Sync {
    async fn current_max_row_id(&self) -> Result<i64>;
    async fn new_rows_since(&self, last_max: i64) -> Result<Vec<DetectedMeta>>;
}

/// Adapter over a `messages`/`subjects`/`addresses`/`mailboxes` schema,
/// opened on a dedicated read-only connection so the mail application's
/// own writers are never blocked by this component.
#[derive(Debug, Clone)]
pub struct SqliteRadarIndex {
    pool: sqlx::SqlitePool,
}

impl SqliteRadarIndex {
    /// Open `path` read-only, with a short busy timeout and a small retry
    /// budget for transient lock contention from the host mail application.
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=ro", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await?;
        sqlx::query("PRAGMA busy_timeout=2000").execute(&pool).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub const fn from_pool(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RadarIndex for SqliteRadarIndex {
    async fn current_max_row_id(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(MAX(ROWID), 0) AS max_id FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("max_id")?)
    }

    async fn new_rows_since(&self, last_max: i64) -> Result<Vec<DetectedMeta>> {
        let rows = sqlx::query(
            r"
            SELECT
                messages.ROWID AS internal_id,
                subjects.subject AS subject,
                addresses.address AS sender_address,
                addresses.comment AS sender_display,
                messages.date_received AS date_received,
                messages.read AS is_read,
                messages.flagged AS is_flagged,
                mailboxes.url AS mailbox_url
            FROM messages
            JOIN subjects ON messages.subject = subjects.ROWID
            JOIN addresses ON messages.sender = addresses.ROWID
            JOIN mailboxes ON messages.mailbox = mailboxes.ROWID
            WHERE messages.ROWID > ? AND messages.deleted = 0
            ORDER BY messages.ROWID ASC
            ",
        )
        .bind(last_max)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let internal_id: i64 = row.try_get("internal_id")?;
                let subject: String = row.try_get("subject")?;
                let sender_address: String = row.try_get("sender_address")?;
                let sender_display: Option<String> = row.try_get("sender_display")?;
                let date_received: i64 = row.try_get("date_received")?;
                let is_read: bool = row.try_get("is_read")?;
                let is_flagged: bool = row.try_get("is_flagged")?;
                let mailbox_url: String = row.try_get("mailbox_url")?;

                Ok(DetectedMeta {
                    internal_id,
                    subject,
                    sender_address,
                    sender_display: sender_display.unwrap_or_default(),
                    date_received: unix_seconds_to_utc(date_received),
                    is_read,
                    is_flagged,
                    mailbox: decode_mailbox_name(&mailbox_url)?,
                })
            })
            .collect()
    }
}

fn unix_seconds_to_utc(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_else(Utc::now)
}

/// Decode the mail-store's URL-percent-encoded mailbox path into the
/// human-meaningful name the scripting channel expects, passed through
/// verbatim per the spec's mailbox-vocabulary design note: never
/// canonicalize it further.
fn decode_mailbox_name(url: &str) -> Result<String> {
    let path = url.rsplit('/').next().unwrap_or(url);
    let decoded =
        urlencoding::decode(path).map_err(|source| RadarError::MailboxUrl { url: url.to_string(), source })?;
    Ok(decoded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_percent_encoded_mailbox_path() {
        let decoded = decode_mailbox_name("imap://account/INBOX%2FArchive").unwrap();
        assert_eq!(decoded, "INBOX/Archive");
    }

    #[test]
    fn leaves_plain_mailbox_names_untouched() {
        let decoded = decode_mailbox_name("Sent%20Messages").unwrap();
        assert_eq!(decoded, "Sent Messages");
    }
}
