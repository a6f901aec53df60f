//! The durable State Store: the authoritative per-message record table and
//! the scalar checkpoints, plus the work-queue queries the Scheduler uses
//! to decide what to do next (spec §4.1).

use std::{collections::HashMap, path::Path, str::FromStr as _};

use chrono::Utc;
use sqlx::{Row, sqlite::SqlitePoolOptions};

use crate::{
    error::{Result, StateError},
    record::{DetectedMeta, HeaderSummary, MessageRecord, SyncStatus},
};

const LAST_MAX_ROW_ID_KEY: &str = "last_max_row_id";

/// Durable, crash-safe storage of message records and scalar checkpoints.
///
/// Accessed only from the scheduler task (single-writer, per spec §5); the
/// pool itself tolerates concurrent readers, but this type makes no claim
/// about safe concurrent *writers* beyond what SQLite's own locking gives
/// for free.
#[derive(Debug, Clone)]
pub struct StateStore {
    pool: sqlx::SqlitePool,
}

impl StateStore {
    /// Open (creating if absent) the state database at `path`, applying
    /// embedded migrations, with WAL journaling so the Radar's unrelated
    /// read-only connection to the *mail store* index is never blocked by
    /// this store's writes.
    pub async fn open(path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new().max_connections(4).connect(&url).await?;
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout=5000").execute(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Build a store around an already-open pool (used by in-memory tests).
    #[must_use]
    pub const fn from_pool(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a record keyed by `internal_id` with status `pending`.
    /// Idempotent: a pre-existing row is left untouched (I1).
    pub async fn upsert_on_detect(&self, meta: &DetectedMeta) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r"
            INSERT INTO message_records
                (internal_id, subject, sender_address, sender_display, to_list, cc_list,
                 date_received, mailbox, is_read, is_flagged, has_attachments, sync_status,
                 retry_count, created_at, updated_at)
            VALUES (?, ?, ?, '', '', '', ?, ?, ?, ?, 0, 'pending', 0, ?, ?)
            ON CONFLICT(internal_id) DO NOTHING
            ",
        )
        .bind(meta.internal_id)
        .bind(&meta.subject)
        .bind(&meta.sender_address)
        .bind(meta.date_received)
        .bind(&meta.mailbox)
        .bind(meta.is_read)
        .bind(meta.is_flagged)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite header-derived columns with Fetcher-supplied values,
    /// treated as authoritative, and transition to `fetched`.
    pub async fn update_after_fetch(&self, internal_id: i64, header: &HeaderSummary) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r"
            UPDATE message_records SET
                message_id = ?, thread_id = ?, subject = ?, sender_address = ?,
                sender_display = ?, to_list = ?, cc_list = ?, date_received = ?,
                is_read = ?, is_flagged = ?, has_attachments = ?,
                sync_status = 'fetched', next_retry_at = NULL, last_error = NULL,
                updated_at = ?
            WHERE internal_id = ?
            ",
        )
        .bind(&header.message_id)
        .bind(&header.thread_id)
        .bind(&header.subject)
        .bind(&header.sender_address)
        .bind(&header.sender_display)
        .bind(&header.to_list)
        .bind(&header.cc_list)
        .bind(header.date_received)
        .bind(header.is_read)
        .bind(header.is_flagged)
        .bind(header.has_attachments)
        .bind(now)
        .bind(internal_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StateError::NotFound(internal_id));
        }
        Ok(())
    }

    /// Terminal success (I3: requires `remote_page_id` and `message_id`).
    pub async fn mark_synced(&self, internal_id: i64, remote_page_id: &str) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r"
            UPDATE message_records SET
                sync_status = 'synced', remote_page_id = ?, next_retry_at = NULL,
                last_error = NULL, updated_at = ?
            WHERE internal_id = ?
            ",
        )
        .bind(remote_page_id)
        .bind(now)
        .bind(internal_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StateError::NotFound(internal_id));
        }
        Ok(())
    }

    /// Record a Fetcher failure, applying the backoff/dead-letter policy.
    pub async fn mark_fetch_failed(&self, internal_id: i64, reason: &str, max_retries: u32) -> Result<()> {
        self.mark_failure(internal_id, reason, max_retries, SyncStatus::FetchFailed).await
    }

    /// Record a Projector failure, applying the backoff/dead-letter policy.
    pub async fn mark_failed(&self, internal_id: i64, reason: &str, max_retries: u32) -> Result<()> {
        self.mark_failure(internal_id, reason, max_retries, SyncStatus::Failed).await
    }

    async fn mark_failure(
        &self,
        internal_id: i64,
        reason: &str,
        max_retries: u32,
        failure_status: SyncStatus,
    ) -> Result<()> {
        let now = Utc::now();
        let record = self.get(internal_id).await?.ok_or(StateError::NotFound(internal_id))?;
        let retry_count = record.retry_count + 1;

        let (status, next_retry_at) = if u32::try_from(retry_count).unwrap_or(u32::MAX) >= max_retries {
            (SyncStatus::DeadLetter, None)
        } else {
            let delay = mailbridge_common::config::backoff_for_attempt(
                u32::try_from(retry_count).unwrap_or(u32::MAX),
            );
            (failure_status, Some(now + chrono::Duration::from_std(delay).unwrap_or_default()))
        };

        sqlx::query(
            r"
            UPDATE message_records SET
                sync_status = ?, last_error = ?, retry_count = ?, next_retry_at = ?, updated_at = ?
            WHERE internal_id = ?
            ",
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(now)
        .bind(internal_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal: the message's date precedes the configured sync horizon.
    pub async fn mark_skipped(&self, internal_id: i64, reason: &str) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r"
            UPDATE message_records SET
                sync_status = 'skipped', last_error = ?, next_retry_at = NULL, updated_at = ?
            WHERE internal_id = ?
            ",
        )
        .bind(reason)
        .bind(now)
        .bind(internal_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StateError::NotFound(internal_id));
        }
        Ok(())
    }

    /// Records in `{fetch_failed, failed}` whose `next_retry_at` has
    /// arrived, ordered by `next_retry_at` ascending, capped at `limit`.
    pub async fn ready_for_retry(&self, limit: i64) -> Result<Vec<MessageRecord>> {
        let now = Utc::now();
        let rows = sqlx::query_as::<_, MessageRecord>(
            r"
            SELECT * FROM message_records
            WHERE sync_status IN ('fetch_failed', 'failed') AND next_retry_at <= ?
            ORDER BY next_retry_at ASC
            LIMIT ?
            ",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Records awaiting projection.
    pub async fn fetched_pending(&self) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM message_records WHERE sync_status = 'fetched' ORDER BY internal_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Records just detected, awaiting the Fetcher.
    pub async fn pending(&self) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM message_records WHERE sync_status = 'pending' ORDER BY internal_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Index lookup by RFC 5322 `Message-ID`.
    pub async fn find_by_message_id(&self, message_id: &str) -> Result<Option<MessageRecord>> {
        let row = sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM message_records WHERE message_id = ?",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Fetch a single record by `internal_id`.
    pub async fn get(&self, internal_id: i64) -> Result<Option<MessageRecord>> {
        let row = sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM message_records WHERE internal_id = ?",
        )
        .bind(internal_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Remove a record (duplicate resolution, or the mail store reports
    /// the message vanished).
    pub async fn delete(&self, internal_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM message_records WHERE internal_id = ?")
            .bind(internal_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The largest internal identifier the Radar has ingested so far.
    pub async fn get_last_max_row_id(&self) -> Result<i64> {
        let row = sqlx::query("SELECT value FROM checkpoints WHERE key = ?")
            .bind(LAST_MAX_ROW_ID_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map_or(Ok(0), |r| r.try_get::<String, _>("value")?.parse::<i64>().map_err(|_| {
            StateError::UnknownStatus("non-integer last_max_row_id checkpoint".to_string())
        }))?)
    }

    /// Persist the checkpoint. Callers must only ever pass a value
    /// `>=` the current one (I6); this method does not itself enforce
    /// monotonicity so that a restart recovering from a known-good value
    /// can reset cleanly during tests.
    pub async fn set_last_max_row_id(&self, n: i64) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO checkpoints (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            ",
        )
        .bind(LAST_MAX_ROW_ID_KEY)
        .bind(n.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a `thread_id` as unresolvable from the mail store.
    pub async fn remember_unresolvable_anchor(&self, thread_id: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO unresolvable_anchors (thread_id, recorded_at) VALUES (?, ?)
            ON CONFLICT(thread_id) DO NOTHING
            ",
        )
        .bind(thread_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether `thread_id` is in the unresolvable-anchor negative cache.
    pub async fn is_unresolvable_anchor(&self, thread_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM unresolvable_anchors WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Clear a negative-cache entry once its anchor has since been
    /// resolved, so invariant I7 can be re-established for future replies.
    pub async fn prune_unresolvable_anchor(&self, thread_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM unresolvable_anchors WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Count records by `sync_status`, for operator visibility and logging.
    pub async fn count_by_status(&self) -> Result<HashMap<SyncStatus, i64>> {
        let rows = sqlx::query("SELECT sync_status, COUNT(*) AS n FROM message_records GROUP BY sync_status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.try_get("sync_status")?;
            let n: i64 = row.try_get("n")?;
            if let Ok(status) = SyncStatus::from_str(&status) {
                counts.insert(status, n);
            }
        }
        Ok(counts)
    }
}

#[allow(dead_code)]
fn _assert_send_sync<T: Send + Sync>() {}
const _: fn() = || _assert_send_sync::<StateStore>();
