//! Error types for the mailbridge-fetch crate.

use thiserror::Error;

/// Errors surfaced while invoking the mail store's scripting channel.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The subprocess could not be spawned.
    #[error("failed to launch scripting channel: {0}")]
    Spawn(#[source] std::io::Error),

    /// The call exceeded `script_timeout_s`.
    #[error("scripting channel timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The subprocess exited with a non-zero status.
    #[error("scripting channel exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },

    /// The response envelope did not match the expected delimited shape.
    #[error("malformed scripting channel response: {0}")]
    MalformedResponse(String),

    /// The response's `source` field was not valid base64.
    #[error("invalid base64 source: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The response was not valid UTF-8 where text was expected.
    #[error("invalid utf-8 in response: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Specialized `Result` type for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;
