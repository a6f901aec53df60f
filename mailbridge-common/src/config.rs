//! Unified configuration for the synchronization core.
//!
//! Every option enumerated in the system's external-interfaces contract is
//! a field here, constructed once at startup and passed by reference to
//! every component — the "dynamic config objects become explicit structs"
//! design note. Each nested `*Config` groups options for one component,
//! following the teacher's pattern of one `#[derive(Deserialize)]` struct
//! per concern with `#[serde(default = "...")]` fields instead of scattered
//! primitives.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration, loaded once from a TOML file plus environment
/// overrides for secrets.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Path to the mail store's read-only index database.
    pub mail_index_path: PathBuf,

    /// Path to the State Store's SQLite database file.
    pub state_db_path: PathBuf,

    /// Account selector passed to the scripting channel.
    pub mail_account_name: String,

    /// Mailbox names the Radar is allowed to emit detections for.
    pub sync_mailboxes: Vec<String>,

    /// Messages received before this instant are marked `skipped` rather
    /// than fetched.
    pub sync_start_date: chrono::DateTime<chrono::Utc>,

    /// Identifies the viewing user in remote page properties.
    pub user_email: String,

    /// Authentication credential for the remote database. Prefer the
    /// `MAILBRIDGE_REMOTE_TOKEN` environment variable over storing this in
    /// the file on disk.
    #[serde(default)]
    pub remote_token: Option<String>,

    /// Target database for email pages.
    pub email_database_id: String,

    /// Target database for calendar pages.
    pub calendar_database_id: String,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub parse: ParseConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment
    /// variable overrides for secrets, then validate.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw)?;

        if let Ok(token) = std::env::var("MAILBRIDGE_REMOTE_TOKEN") {
            config.remote_token = Some(token);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_mailboxes.is_empty() {
            return Err(ConfigError::Invalid {
                field: "sync_mailboxes",
                reason: "must name at least one mailbox".to_string(),
            });
        }
        if self.remote_token.as_deref().unwrap_or_default().is_empty() {
            return Err(ConfigError::MissingRequired("remote_token"));
        }
        if self.email_database_id.is_empty() {
            return Err(ConfigError::MissingRequired("email_database_id"));
        }
        Ok(())
    }

    #[must_use]
    pub fn remote_token(&self) -> &str {
        self.remote_token.as_deref().unwrap_or_default()
    }
}

/// Scheduler cadence and per-cycle caps.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "defaults::poll_interval_s")]
    pub poll_interval_s: u64,

    /// Maximum detections processed per cycle at cold start.
    #[serde(default = "defaults::init_batch_size")]
    pub init_batch_size: usize,

    /// Cap on retry-eligible records processed per cycle.
    #[serde(default = "defaults::retry_batch_size")]
    pub retry_batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_s: defaults::poll_interval_s(),
            init_batch_size: defaults::init_batch_size(),
            retry_batch_size: defaults::retry_batch_size(),
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_s)
    }
}

/// Fetcher invocation limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "defaults::script_timeout_s")]
    pub script_timeout_s: u64,

    /// Path to the scripting channel executable. Invoked with the account
    /// name, mailbox name, and internal id as three positional arguments
    /// (`command account_name mailbox_name internal_id`), not a template.
    #[serde(default = "defaults::script_command")]
    pub script_command: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            script_timeout_s: defaults::script_timeout_s(),
            script_command: defaults::script_command(),
        }
    }
}

impl FetchConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_s)
    }
}

/// Parser gates for attachments and inline images.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParseConfig {
    #[serde(default = "defaults::max_attachment_bytes")]
    pub max_attachment_bytes: u64,

    #[serde(default = "defaults::allowed_attachment_exts")]
    pub allowed_attachment_exts: Vec<String>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            max_attachment_bytes: defaults::max_attachment_bytes(),
            allowed_attachment_exts: defaults::allowed_attachment_exts(),
        }
    }
}

/// Remote database client timeouts and rate limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default = "defaults::remote_timeout_s")]
    pub request_timeout_s: u64,

    #[serde(default = "defaults::writes_per_second")]
    pub writes_per_second: f64,

    #[serde(default = "defaults::max_consecutive_auth_failures")]
    pub max_consecutive_auth_failures: u32,

    /// Bound on in-request retries for a single transient HTTP call
    /// (connection errors, 429/5xx), independent of the State Store's
    /// dead-letter threshold in [`RetryConfig::max_retries`].
    #[serde(default = "defaults::max_transient_retries")]
    pub max_transient_retries: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            request_timeout_s: defaults::remote_timeout_s(),
            writes_per_second: defaults::writes_per_second(),
            max_consecutive_auth_failures: defaults::max_consecutive_auth_failures(),
            max_transient_retries: defaults::max_transient_retries(),
        }
    }
}

impl RemoteConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_s)
    }
}

/// Retry/backoff schedule and dead-letter threshold.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
        }
    }
}

/// The fixed backoff schedule from spec §4.1: `{60s, 5min, 15min, 1h, 2h}`,
/// with the last value repeated for any further attempt.
#[must_use]
pub fn backoff_schedule() -> &'static [Duration] {
    const SCHEDULE: [Duration; 5] = [
        Duration::from_secs(60),
        Duration::from_secs(5 * 60),
        Duration::from_secs(15 * 60),
        Duration::from_secs(60 * 60),
        Duration::from_secs(2 * 60 * 60),
    ];
    &SCHEDULE
}

/// Compute the backoff delay for the given 1-indexed retry attempt.
#[must_use]
pub fn backoff_for_attempt(retry_count: u32) -> Duration {
    let schedule = backoff_schedule();
    let index = (retry_count.saturating_sub(1) as usize).min(schedule.len() - 1);
    schedule[index]
}

mod defaults {
    pub const fn poll_interval_s() -> u64 {
        5
    }

    pub const fn init_batch_size() -> usize {
        500
    }

    pub const fn retry_batch_size() -> usize {
        3
    }

    pub const fn script_timeout_s() -> u64 {
        200
    }

    pub fn script_command() -> String {
        "mailstore-script".to_string()
    }

    pub const fn max_attachment_bytes() -> u64 {
        20 * 1024 * 1024
    }

    pub fn allowed_attachment_exts() -> Vec<String> {
        Vec::new()
    }

    pub const fn remote_timeout_s() -> u64 {
        30
    }

    pub const fn writes_per_second() -> f64 {
        3.0
    }

    pub const fn max_consecutive_auth_failures() -> u32 {
        5
    }

    pub const fn max_transient_retries() -> u32 {
        3
    }

    pub const fn max_retries() -> u32 {
        5
    }
}
