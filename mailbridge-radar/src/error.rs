//! Error types for the mailbridge-radar crate.

use thiserror::Error;

/// Errors surfaced while sampling the mail store's index.
#[derive(Debug, Error)]
pub enum RadarError {
    /// The read-only index connection failed or a query errored.
    #[error("mail-store index error: {0}")]
    Index(#[from] sqlx::Error),

    /// The mailbox URL stored in the index was not valid percent-encoding.
    #[error("malformed mailbox url {url:?}: {source}")]
    MailboxUrl {
        url: String,
        source: std::string::FromUtf8Error,
    },
}

/// Specialized `Result` type for radar operations.
pub type Result<T> = std::result::Result<T, RadarError>;
