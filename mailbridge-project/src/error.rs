//! Error types for the mailbridge-project crate.

use thiserror::Error;

/// How a remote-database failure should be handled, per the error
/// handling policy table: transient failures are retried in-request,
/// authentication failures escalate after repeated occurrence, and
/// validation failures are permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Authentication,
    Validation,
}

/// Errors surfaced while projecting one message into the remote database.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// The HTTP transport itself failed (connect, TLS, timeout).
    #[error("remote request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote API returned a non-2xx status after exhausting retries.
    #[error("remote API returned {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    /// The HTML-to-block conversion could not proceed.
    #[error("block conversion failed: {0}")]
    BlockConversion(String),

    /// The calendar part could not be decoded as iCalendar data.
    #[error("calendar parse failed: {0}")]
    Calendar(String),

    /// A file could not be read for upload.
    #[error("failed to read {path} for upload: {source}")]
    ReadForUpload { path: String, source: std::io::Error },
}

impl ProjectError {
    /// Classify this error per the policy table in spec §7.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transport(_) => FailureClass::Transient,
            Self::RemoteStatus { status, .. } if *status == 401 || *status == 403 => {
                FailureClass::Authentication
            }
            Self::RemoteStatus { status, .. } if *status == 429 || *status >= 500 => {
                FailureClass::Transient
            }
            Self::RemoteStatus { .. } | Self::BlockConversion(_) | Self::Calendar(_) | Self::ReadForUpload { .. } => {
                FailureClass::Validation
            }
        }
    }
}

/// Specialized `Result` type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectError>;
