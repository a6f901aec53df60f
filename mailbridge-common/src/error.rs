//! Error types shared across the synchronization pipeline.
//!
//! Each component crate defines its own `thiserror`-derived error enum for
//! its own failure modes; this module only holds the few error shapes that
//! are genuinely cross-cutting: configuration loading and the exit-code
//! mapping used by the binary.

use std::io;

use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("could not read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The configuration file was not valid TOML, or failed schema
    /// validation during deserialization.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required field was present in the file but failed semantic
    /// validation (e.g. an empty `sync_mailboxes` list).
    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// A required secret (e.g. the remote API token) was not supplied by
    /// either the config file or its environment variable override.
    #[error("missing required configuration: {0}")]
    MissingRequired(&'static str),
}

/// Process exit codes, per spec: 0 clean shutdown, 2 configuration error,
/// 3 persistent remote-authentication failure, 1 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Clean = 0,
    Generic = 1,
    Configuration = 2,
    RemoteAuthentication = 3,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(i32::from(ExitCode::Clean), 0);
        assert_eq!(i32::from(ExitCode::Generic), 1);
        assert_eq!(i32::from(ExitCode::Configuration), 2);
        assert_eq!(i32::from(ExitCode::RemoteAuthentication), 3);
    }
}
