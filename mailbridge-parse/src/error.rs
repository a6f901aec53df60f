//! Error types for the mailbridge-parse crate.

use thiserror::Error;

/// Errors surfaced while turning an RFC 5322 source into the Projector's
/// input shape.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The source could not be parsed as MIME at all.
    #[error("malformed MIME source: {0}")]
    Mime(#[from] mailparse::MailParseError),

    /// A part claimed to be readable but its body could not be decoded.
    #[error("unreadable part body: {0}")]
    UnreadablePart(String),

    /// Writing an extracted part to the per-message temp directory failed.
    #[error("failed to persist part to {path}: {source}")]
    PersistPart { path: String, source: std::io::Error },
}

/// Specialized `Result` type for parse operations.
pub type Result<T> = std::result::Result<T, ParseError>;
