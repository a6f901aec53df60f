//! Tracing subscriber setup shared by the `mailbridge` binary.
//!
//! Library crates in this workspace only ever emit `tracing` events; this
//! module is the single place a global subscriber is installed, matching
//! the rest of the pipeline's single-writer conventions.

use tracing_subscriber::{EnvFilter, fmt};

/// Install a global `tracing` subscriber.
///
/// `explicit_level`, when set, takes priority over `RUST_LOG`. Falls back to
/// `info` for release builds and `debug` for debug builds when neither is
/// set.
pub fn init(explicit_level: Option<&str>) {
    let default_level = if cfg!(debug_assertions) { "debug" } else { "info" };

    let filter = explicit_level.map_or_else(
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        EnvFilter::new,
    );

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .compact()
        .init();
}
