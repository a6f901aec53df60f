//! The single-process cycle loop: Radar sweep, then drain pending,
//! fetched, and retry-eligible work sets in that order.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use mailbridge_common::{Config, Signal, error::ExitCode};
use mailbridge_fetch::{FetchOutcome, ScriptChannel};
use mailbridge_project::{FailureClass, ProjectError, Projector, RecordFlags};
use mailbridge_radar::RadarIndex;
use mailbridge_state::{HeaderSummary, MessageRecord, StateStore, SyncStatus};

use crate::error::{CycleError, Result};

/// Tally of what one cycle did, surfaced for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub detected: usize,
    pub synced: usize,
    pub failed: usize,
    pub deleted: usize,
    pub skipped: usize,
}

pub struct Scheduler {
    config: Arc<Config>,
    state: Arc<StateStore>,
    radar: Arc<dyn RadarIndex>,
    fetcher: Arc<dyn ScriptChannel>,
    projector: Arc<Projector>,
    temp_root: PathBuf,
    consecutive_auth_failures: AtomicU32,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        state: Arc<StateStore>,
        radar: Arc<dyn RadarIndex>,
        fetcher: Arc<dyn ScriptChannel>,
        projector: Arc<Projector>,
        temp_root: PathBuf,
    ) -> Self {
        Self { config, state, radar, fetcher, projector, temp_root, consecutive_auth_failures: AtomicU32::new(0) }
    }

    /// Run cycles on `poll_interval` until `shutdown` fires or a cycle
    /// requests an exit. In-flight work for the current cycle always
    /// finishes before this returns.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<Signal>) -> ExitCode {
        let mut ticker = tokio::time::interval(self.config.scheduler.poll_interval());
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => {
                            tracing::debug!(?report, "cycle complete");
                        }
                        Err(CycleError::ExitRequested(code)) => {
                            tracing::error!(?code, "scheduler exiting");
                            return code;
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "cycle deferred");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            tracing::info!("shutdown signal received, stopping after current cycle");
                            return ExitCode::Clean;
                        }
                        Err(_) => return ExitCode::Clean,
                    }
                }
            }
        }
    }

    /// Run exactly one cycle: sweep, then drain pending, fetched, and
    /// retry-eligible work sets, in that order (spec §5).
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        self.sweep(&mut report).await?;

        for record in self.state.pending().await?.into_iter().take(self.config.scheduler.init_batch_size) {
            self.process_record(record, &mut report).await?;
        }

        for record in self.state.fetched_pending().await? {
            self.process_record(record, &mut report).await?;
        }

        let retry_limit = i64::try_from(self.config.scheduler.retry_batch_size).unwrap_or(i64::MAX);
        for record in self.state.ready_for_retry(retry_limit).await? {
            self.process_record(record, &mut report).await?;
        }

        Ok(report)
    }

    /// Observe new rows above the last checkpoint, filter to configured
    /// mailboxes, apply the sync-horizon gate, and upsert. Ascending
    /// `internal_id` order is preserved throughout.
    async fn sweep(&self, report: &mut CycleReport) -> Result<()> {
        let last_max = self.state.get_last_max_row_id().await?;
        let current_max = self.radar.current_max_row_id().await?;
        if current_max <= last_max {
            return Ok(());
        }

        let detections = self.radar.new_rows_since(last_max).await?;
        let mut advanced_to = last_max;

        for meta in detections.into_iter().take(self.config.scheduler.init_batch_size) {
            advanced_to = meta.internal_id;

            if !self.config.sync_mailboxes.iter().any(|mailbox| mailbox == &meta.mailbox) {
                continue;
            }

            let internal_id = meta.internal_id;
            let date_received = meta.date_received;
            self.state.upsert_on_detect(&meta).await?;
            report.detected += 1;

            if date_received < self.config.sync_start_date {
                self.state.mark_skipped(internal_id, "before configured sync horizon").await?;
                report.skipped += 1;
            }
        }

        self.state.set_last_max_row_id(advanced_to).await?;
        Ok(())
    }

    /// Ensure a record has an authoritative header summary (fetching if
    /// necessary) and attempt projection. Every exit path leaves the
    /// record in a state consistent with spec §7's policy table.
    ///
    /// Shared by the pending/fetched/retry drains, since all three need
    /// exactly the same fetch-then-project pipeline — a record's source
    /// bytes are never persisted, so a retry after a crash re-fetches.
    pub async fn process_record(&self, record: MessageRecord, report: &mut CycleReport) -> Result<()> {
        let fetched = match self.fetcher.fetch(record.internal_id, &record.mailbox).await {
            Ok(FetchOutcome::Found(message)) => message,
            Ok(FetchOutcome::Vanished) => {
                self.state.delete(record.internal_id).await?;
                report.deleted += 1;
                return Ok(());
            }
            Err(err) => {
                self.state.mark_fetch_failed(record.internal_id, &err.to_string(), self.config.retry.max_retries).await?;
                report.failed += 1;
                return Ok(());
            }
        };

        let parsed = match mailbridge_parse::parse_message(&fetched.source, &self.temp_root, &self.config.parse) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.state.mark_failed(record.internal_id, &err.to_string(), self.config.retry.max_retries).await?;
                report.failed += 1;
                return Ok(());
            }
        };

        if self.resolve_duplicate(&record, &parsed).await? {
            report.deleted += 1;
            return Ok(());
        }

        let header = HeaderSummary {
            message_id: parsed.message_id.clone(),
            thread_id: parsed.thread_id.clone(),
            subject: parsed.subject.clone(),
            sender_address: parsed.sender_address.clone(),
            sender_display: parsed.sender_display.clone(),
            to_list: parsed.to_list.clone(),
            cc_list: parsed.cc_list.clone(),
            date_received: record.date_received,
            is_read: fetched.is_read,
            is_flagged: fetched.is_flagged,
            has_attachments: parsed.has_attachments(),
        };
        self.state.update_after_fetch(record.internal_id, &header).await?;

        let flags = RecordFlags {
            is_read: fetched.is_read,
            is_flagged: fetched.is_flagged,
            mailbox: record.mailbox.clone(),
            date_received: record.date_received,
        };

        match self.projector.project(&parsed, &flags, &fetched.source).await {
            Ok(outcome) => {
                self.state.mark_synced(record.internal_id, &outcome.remote_page_id).await?;
                self.consecutive_auth_failures.store(0, Ordering::Relaxed);
                report.synced += 1;
            }
            Err(err) => self.handle_project_error(record.internal_id, &err, report).await?,
        }

        Ok(())
    }

    /// If the Fetcher revealed a `message_id` already tracked under a
    /// different `internal_id`, resolve per spec §4.5: keep the synced
    /// record, drop the other. Returns `true` if `record` itself was the
    /// one deleted (so the caller must stop processing it further).
    async fn resolve_duplicate(&self, record: &MessageRecord, parsed: &mailbridge_parse::ParsedMessage) -> Result<bool> {
        if parsed.message_id.is_empty() {
            return Ok(false);
        }
        let Some(existing) = self.state.find_by_message_id(&parsed.message_id).await? else {
            return Ok(false);
        };
        if existing.internal_id == record.internal_id {
            return Ok(false);
        }

        if existing.status() == SyncStatus::Synced {
            self.state.delete(record.internal_id).await?;
            Ok(true)
        } else {
            self.state.delete(existing.internal_id).await?;
            Ok(false)
        }
    }

    async fn handle_project_error(&self, internal_id: i64, err: &ProjectError, report: &mut CycleReport) -> Result<()> {
        if err.class() == FailureClass::Authentication {
            let failures = self.consecutive_auth_failures.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::error!(error = %err, failures, "remote authentication failure");
            if failures >= self.config.remote.max_consecutive_auth_failures {
                return Err(CycleError::ExitRequested(ExitCode::RemoteAuthentication));
            }
            return Ok(());
        }

        self.state.mark_failed(internal_id, &err.to_string(), self.config.retry.max_retries).await?;
        report.failed += 1;
        Ok(())
    }
}
