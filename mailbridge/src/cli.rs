//! Command-line surface for the `mailbridge` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "mailbridge")]
#[command(about = "Synchronize a local mail store into a remote document database", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file. Overrides `MAILBRIDGE_CONFIG` and the
    /// default search path.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the tracing level (e.g. "info", "debug"). Takes priority
    /// over `RUST_LOG`.
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler loop until shutdown (the default if no subcommand
    /// is given).
    Run,
    /// Load and validate configuration, then exit without starting the
    /// scheduler.
    CheckConfig,
}

/// Find the configuration file using the following precedence:
/// 1. `--config` CLI flag
/// 2. `MAILBRIDGE_CONFIG` environment variable
/// 3. `./mailbridge.toml` (current working directory)
/// 4. `/etc/mailbridge/mailbridge.toml` (system-wide config)
pub fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Ok(env_path) = std::env::var("MAILBRIDGE_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("MAILBRIDGE_CONFIG points to non-existent file: {}", path.display());
    }

    let default_paths = [PathBuf::from("./mailbridge.toml"), PathBuf::from("/etc/mailbridge/mailbridge.toml")];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths.iter().map(|p| format!("  - {}", p.display())).collect::<Vec<_>>().join("\n");
    anyhow::bail!("No configuration file found. Tried:\n  - --config flag\n  - MAILBRIDGE_CONFIG environment variable\n{paths_tried}")
}
