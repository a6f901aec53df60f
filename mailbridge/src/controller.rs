//! Wires the configured components into a [`Scheduler`] and runs it until
//! a shutdown signal arrives or the scheduler itself requests an exit.

use std::sync::{Arc, LazyLock};

use mailbridge_common::{Config, Signal, error::ExitCode};
use mailbridge_fetch::SubprocessScriptChannel;
use mailbridge_project::{NotionLikeClient, Projector, RateLimiter, SimpleHtmlBlockConverter};
use mailbridge_radar::SqliteRadarIndex;
use mailbridge_state::StateStore;
use mailbridge_sync::Scheduler;
use tokio::sync::broadcast;

/// Process-wide shutdown broadcast, subscribed to by the scheduler and the
/// signal-handling task.
pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(16);
    sender
});

/// Wait for SIGINT or SIGTERM, then broadcast [`Signal::Shutdown`] and wait
/// for a second signal (to allow a forced exit) or for every subscriber to
/// drop its receiver.
async fn wait_for_shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down after the current cycle");
        }
        _ = terminate.recv() => {
            tracing::info!("SIGTERM received, shutting down after the current cycle");
        }
    }

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();
    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|err| anyhow::anyhow!("failed to broadcast shutdown: {err}"))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("shutdown broadcast observed: {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(err) => tracing::debug!("shutdown broadcast lagging: {err:?}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("second interrupt received, forcing immediate exit");
                std::process::exit(i32::from(ExitCode::Generic));
            }
        }
    }

    Ok(())
}

/// Build every component from `config` and run the scheduler loop until
/// shutdown. Returns the process exit code.
pub async fn run(config: Config) -> anyhow::Result<ExitCode> {
    let config = Arc::new(config);

    let state = Arc::new(StateStore::open(&config.state_db_path).await?);
    let radar = Arc::new(SqliteRadarIndex::open(&config.mail_index_path).await?);
    let fetcher = Arc::new(SubprocessScriptChannel::new(
        config.fetch.script_command.clone(),
        config.mail_account_name.clone(),
        config.fetch.timeout(),
    ));
    let remote = Arc::new(NotionLikeClient::new(
        config.remote_token(),
        "https://api.notion.com/v1".to_string(),
        config.remote.timeout(),
        config.remote.max_transient_retries,
    )?);
    let rate_limiter = Arc::new(RateLimiter::new(config.remote.writes_per_second));
    let converter = Arc::new(SimpleHtmlBlockConverter);

    let projector = Arc::new(Projector::new(
        remote,
        converter,
        fetcher.clone(),
        state.clone(),
        rate_limiter,
        config.user_email.clone(),
        config.email_database_id.clone(),
        config.calendar_database_id.clone(),
    ));

    let temp_root = std::env::temp_dir().join("mailbridge");
    tokio::fs::create_dir_all(&temp_root).await?;

    let scheduler = Scheduler::new(config, state, radar, fetcher, projector, temp_root);

    let exit_code = tokio::select! {
        code = scheduler.run(SHUTDOWN_BROADCAST.subscribe()) => code,
        result = wait_for_shutdown() => {
            result?;
            ExitCode::Clean
        }
    };

    Ok(exit_code)
}
