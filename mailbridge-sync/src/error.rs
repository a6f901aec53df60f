//! Error types for the scheduler loop.

use mailbridge_common::error::ExitCode;
use thiserror::Error;

/// Failures that can abort a single cycle early. None of these mutate
/// state beyond what already committed before the failure; the next
/// cycle simply tries again.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The mail-store index could not be read this cycle; the cycle is
    /// deferred and no detections are lost (the checkpoint is unchanged).
    #[error("radar sweep failed: {0}")]
    Radar(#[from] mailbridge_radar::RadarError),

    /// The State Store could not be read or written.
    #[error("state store operation failed: {0}")]
    State(#[from] mailbridge_state::StateError),

    /// A persistent condition (e.g. repeated remote-authentication
    /// failure) requires the process to exit rather than continue
    /// scheduling further cycles.
    #[error("scheduler requesting shutdown with exit code {0:?}")]
    ExitRequested(ExitCode),
}

/// Specialized `Result` type for scheduler operations.
pub type Result<T> = std::result::Result<T, CycleError>;
