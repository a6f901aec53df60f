//! The per-message record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `sync_status`, per spec §3/§4.1.
///
/// The enum is the single source of truth for "what to do next with this
/// record" — failures are recorded as transitions into `FetchFailed`/
/// `Failed`/`DeadLetter` plus `last_error`, never as propagated exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    FetchFailed,
    Fetched,
    Synced,
    Failed,
    Skipped,
    DeadLetter,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::FetchFailed => "fetch_failed",
            Self::Fetched => "fetched",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::DeadLetter => "dead_letter",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Synced | Self::Skipped | Self::DeadLetter)
    }

    #[must_use]
    pub const fn is_retryable_failure(self) -> bool {
        matches!(self, Self::FetchFailed | Self::Failed)
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = crate::error::StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "fetch_failed" => Self::FetchFailed,
            "fetched" => Self::Fetched,
            "synced" => Self::Synced,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            "dead_letter" => Self::DeadLetter,
            other => return Err(crate::error::StateError::UnknownStatus(other.to_string())),
        })
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata Radar observed for a newly-detected row, the input to
/// `upsert_on_detect`.
#[derive(Debug, Clone)]
pub struct DetectedMeta {
    pub internal_id: i64,
    pub subject: String,
    pub sender_address: String,
    pub sender_display: String,
    pub date_received: DateTime<Utc>,
    pub is_read: bool,
    pub is_flagged: bool,
    pub mailbox: String,
}

/// Authoritative header summary the Fetcher returns, the input to
/// `update_after_fetch`. Supersedes whatever Radar guessed.
#[derive(Debug, Clone)]
pub struct HeaderSummary {
    pub message_id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub sender_address: String,
    pub sender_display: String,
    pub to_list: String,
    pub cc_list: String,
    pub date_received: DateTime<Utc>,
    pub is_read: bool,
    pub is_flagged: bool,
    pub has_attachments: bool,
}

/// The single row per observed message (spec §3).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MessageRecord {
    pub internal_id: i64,
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub subject: String,
    pub sender_address: String,
    pub sender_display: String,
    pub to_list: String,
    pub cc_list: String,
    pub date_received: DateTime<Utc>,
    pub mailbox: String,
    pub is_read: bool,
    pub is_flagged: bool,
    pub has_attachments: bool,
    pub sync_status: String,
    pub remote_page_id: Option<String>,
    pub last_error: Option<String>,
    pub retry_count: i64,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Parsed `sync_status`.
    ///
    /// # Panics
    /// Only if the database contains a value outside the enum, which would
    /// indicate schema corruption rather than a reachable runtime state.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.sync_status
            .parse()
            .expect("sync_status column holds a value outside SyncStatus")
    }
}
