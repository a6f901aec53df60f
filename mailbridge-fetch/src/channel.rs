//! Subprocess-based scripting channel to the host mail application.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use tokio::{process::Command, sync::Mutex};

use crate::error::{FetchError, Result};

const FIELD_SEPARATOR: &str = "|||";
const VANISHED_MARKER: &str = "VANISHED";

/// The authoritative header summary plus raw source for one message,
/// exactly as the scripting channel reports it — supersedes whatever
/// Radar guessed from the index.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub date: DateTime<Utc>,
    pub is_read: bool,
    pub is_flagged: bool,
    pub source: Vec<u8>,
}

/// The result of one fetch attempt: a message, or a signal that the mail
/// store no longer has anything at that `internal_id`.
#[derive(Debug)]
pub enum FetchOutcome {
    Found(FetchedMessage),
    Vanished,
}

/// Obtains the full RFC 5322 source and header summary for exactly one
/// message. Invocations must be serialized: the host application is known
/// to become unresponsive under concurrent scripting load (P7).
#[async_trait]
pub trait ScriptChannel: Send + Sync {
    async fn fetch(&self, internal_id: i64, mailbox: &str) -> Result<FetchOutcome>;

    /// Look up a message by its RFC 5322 `Message-ID` rather than integer
    /// id. Reserved for the rare thread-anchor resolution lookup (spec
    /// §4.5) — the string path is a linear scan and must never be used in
    /// steady-state operation.
    async fn fetch_by_message_id(&self, message_id: &str, mailbox: &str) -> Result<FetchOutcome>;
}

/// Shells out to a configured command template once per call, serialized
/// behind a mutex so at most one scripting request is ever outstanding.
pub struct SubprocessScriptChannel {
    command: String,
    account_name: String,
    timeout: Duration,
    in_flight: Mutex<()>,
}

impl SubprocessScriptChannel {
    #[must_use]
    pub fn new(command: String, account_name: String, timeout: Duration) -> Self {
        Self { command, account_name, timeout, in_flight: Mutex::new(()) }
    }
}

#[async_trait]
impl ScriptChannel for SubprocessScriptChannel {
    async fn fetch(&self, internal_id: i64, mailbox: &str) -> Result<FetchOutcome> {
        let _guard = self.in_flight.lock().await;

        let call = Command::new(&self.command)
            .arg(&self.account_name)
            .arg(mailbox)
            .arg(internal_id.to_string())
            .output();

        let output = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(FetchError::Spawn)?;

        if !output.status.success() {
            return Err(FetchError::NonZeroExit {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8(output.stdout)?;
        parse_response(stdout.trim())
    }

    async fn fetch_by_message_id(&self, message_id: &str, mailbox: &str) -> Result<FetchOutcome> {
        let _guard = self.in_flight.lock().await;

        let call = Command::new(&self.command)
            .arg(&self.account_name)
            .arg(mailbox)
            .arg(format!("message-id:{message_id}"))
            .output();

        let output = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(FetchError::Spawn)?;

        if !output.status.success() {
            return Err(FetchError::NonZeroExit {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8(output.stdout)?;
        parse_response(stdout.trim())
    }
}

fn parse_response(body: &str) -> Result<FetchOutcome> {
    if body == VANISHED_MARKER {
        return Ok(FetchOutcome::Vanished);
    }

    let fields: Vec<&str> = body.splitn(7, FIELD_SEPARATOR).collect();
    let [message_id, subject, sender, date, read, flagged, source_b64] = fields.as_slice() else {
        return Err(FetchError::MalformedResponse(format!(
            "expected 7 {FIELD_SEPARATOR}-delimited fields, found {}",
            fields.len()
        )));
    };

    let date_epoch: i64 = date
        .parse()
        .map_err(|_| FetchError::MalformedResponse(format!("non-integer date field {date:?}")))?;
    let date = Utc.timestamp_opt(date_epoch, 0).single().ok_or_else(|| {
        FetchError::MalformedResponse(format!("date field {date_epoch} out of range"))
    })?;

    let source = base64::engine::general_purpose::STANDARD.decode(source_b64)?;

    Ok(FetchOutcome::Found(FetchedMessage {
        message_id: (*message_id).to_string(),
        subject: (*subject).to_string(),
        sender: (*sender).to_string(),
        date,
        is_read: *read == "1",
        is_flagged: *flagged == "1",
        source,
    }))
}
