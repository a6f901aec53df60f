#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

mod cli;
mod controller;

use clap::Parser;
use cli::{Cli, Commands};
use mailbridge_common::{Config, error::ExitCode, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref());

    let config_path = cli::find_config_file(cli.config.clone())?;
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, path = %config_path.display(), "failed to load configuration");
            std::process::exit(i32::from(ExitCode::Configuration));
        }
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!("configuration at {} is valid", config_path.display());
            Ok(())
        }
        Commands::Run => {
            let exit_code = controller::run(config).await?;
            std::process::exit(i32::from(exit_code));
        }
    }
}
