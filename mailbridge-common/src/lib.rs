//! Shared configuration, error, and logging scaffolding for the
//! mailbridge synchronization core.

pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use tracing;

/// Cooperative shutdown signal broadcast to every long-running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop accepting new cycles; finish in-flight work, then exit.
    Shutdown,
}
