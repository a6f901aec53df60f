//! Error types for the mailbridge-state crate.

use thiserror::Error;

/// Top-level state-store error type.
#[derive(Debug, Error)]
pub enum StateError {
    /// The underlying SQLite database returned an error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration failed to apply.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// No record exists for the given internal id.
    #[error("no record for internal_id {0}")]
    NotFound(i64),

    /// The `sync_status` column held a value outside the `SyncStatus` enum.
    #[error("unknown sync_status value: {0}")]
    UnknownStatus(String),
}

/// Specialized `Result` type for state-store operations.
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_includes_id() {
        let err = StateError::NotFound(42);
        assert_eq!(err.to_string(), "no record for internal_id 42");
    }
}
