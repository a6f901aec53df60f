use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mailbridge_common::config::Config;
use mailbridge_fetch::{FetchOutcome, FetchedMessage, ScriptChannel};
use mailbridge_project::{Block, BlockConverter, Projector, RateLimiter, RemoteDatabase};
use mailbridge_radar::RadarIndex;
use mailbridge_state::{DetectedMeta, StateStore, SyncStatus};
use mailbridge_sync::{CycleReport, Scheduler};
use serde_json::Value;

#[derive(Default)]
struct FakeRadar {
    rows: Vec<DetectedMeta>,
}

#[async_trait]
impl RadarIndex for FakeRadar {
    async fn current_max_row_id(&self) -> mailbridge_radar::Result<i64> {
        Ok(self.rows.iter().map(|r| r.internal_id).max().unwrap_or(0))
    }

    async fn new_rows_since(&self, last_max: i64) -> mailbridge_radar::Result<Vec<DetectedMeta>> {
        let mut rows: Vec<_> = self.rows.iter().filter(|r| r.internal_id > last_max).cloned().collect();
        rows.sort_by_key(|r| r.internal_id);
        Ok(rows)
    }
}

#[derive(Default)]
struct FakeScript {
    responses: Mutex<HashMap<i64, VecDeque<mailbridge_fetch::Result<FetchOutcome>>>>,
}

impl FakeScript {
    fn push(&self, internal_id: i64, outcome: mailbridge_fetch::Result<FetchOutcome>) {
        self.responses.lock().unwrap().entry(internal_id).or_default().push_back(outcome);
    }
}

#[async_trait]
impl ScriptChannel for FakeScript {
    async fn fetch(&self, internal_id: i64, _mailbox: &str) -> mailbridge_fetch::Result<FetchOutcome> {
        let mut responses = self.responses.lock().unwrap();
        responses.get_mut(&internal_id).and_then(VecDeque::pop_front).unwrap_or(Ok(FetchOutcome::Vanished))
    }

    async fn fetch_by_message_id(&self, _message_id: &str, _mailbox: &str) -> mailbridge_fetch::Result<FetchOutcome> {
        Ok(FetchOutcome::Vanished)
    }
}

#[derive(Default)]
struct FakeRemote {
    pages: Mutex<HashMap<(String, String, String), String>>,
    properties: Mutex<HashMap<String, Value>>,
    next_id: Mutex<u64>,
    updates: Mutex<u32>,
}

impl FakeRemote {
    fn property_text(properties: &Value, property: &str) -> Option<String> {
        properties
            .get(property)
            .and_then(|p| p.get("rich_text"))
            .and_then(|rt| rt.get(0))
            .and_then(|entry| entry.get("text"))
            .and_then(|text| text.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn parent_item_of(&self, page_id: &str) -> Option<String> {
        let properties = self.properties.lock().unwrap();
        properties.get(page_id)?.get("Parent Item")?.get("relation")?.get(0)?.get("id")?.as_str().map(str::to_string)
    }
}

#[async_trait]
impl RemoteDatabase for FakeRemote {
    async fn find_page_by_property(&self, database_id: &str, property: &str, value: &str) -> mailbridge_project::Result<Option<String>> {
        let pages = self.pages.lock().unwrap();
        Ok(pages.get(&(database_id.to_string(), property.to_string(), value.to_string())).cloned())
    }

    async fn create_page(&self, database_id: &str, properties: Value, _children: &[Block]) -> mailbridge_project::Result<String> {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let page_id = format!("page-{next_id}");
        drop(next_id);

        let mut pages = self.pages.lock().unwrap();
        for property in ["Message ID", "Event ID"] {
            if let Some(value) = Self::property_text(&properties, property) {
                pages.insert((database_id.to_string(), property.to_string(), value), page_id.clone());
            }
        }
        drop(pages);

        self.properties.lock().unwrap().insert(page_id.clone(), properties);
        Ok(page_id)
    }

    async fn update_page(&self, page_id: &str, properties: Value) -> mailbridge_project::Result<()> {
        *self.updates.lock().unwrap() += 1;
        self.properties.lock().unwrap().insert(page_id.to_string(), properties);
        Ok(())
    }

    async fn append_blocks(&self, _page_id: &str, _children: &[Block]) -> mailbridge_project::Result<()> {
        Ok(())
    }

    async fn upload_file(&self, filename: &str, _media_type: &str, _bytes: Vec<u8>) -> mailbridge_project::Result<String> {
        Ok(format!("upload-{filename}"))
    }
}

struct NoopConverter;
impl BlockConverter for NoopConverter {
    fn convert(&self, _html: &str, _cid_uploads: &HashMap<String, String>) -> Vec<Block> {
        Vec::new()
    }
}

fn detected(internal_id: i64, subject: &str, mailbox: &str) -> DetectedMeta {
    DetectedMeta {
        internal_id,
        subject: subject.to_string(),
        sender_address: "alice@example.com".to_string(),
        sender_display: "Alice".to_string(),
        date_received: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        is_read: false,
        is_flagged: false,
        mailbox: mailbox.to_string(),
    }
}

fn source_with_headers(message_id: &str, in_reply_to: Option<&str>, extra: &str) -> Vec<u8> {
    let reply_header = in_reply_to.map(|id| format!("In-Reply-To: <{id}>\r\n")).unwrap_or_default();
    format!(
        "From: Alice <alice@example.com>\r\nTo: bob@example.com\r\nSubject: hello\r\nMessage-ID: <{message_id}>\r\n{reply_header}Date: Mon, 1 Jan 2024 12:00:00 +0000\r\n{extra}"
    )
    .into_bytes()
}

async fn open_state(name: &str) -> Arc<StateStore> {
    let path = std::env::temp_dir().join(format!("mailbridge-sync-test-{name}-{}.sqlite3", std::process::id()));
    let _ = std::fs::remove_file(&path);
    Arc::new(StateStore::open(&path).await.expect("open state store"))
}

fn base_config() -> Config {
    let mut config: Config = toml::from_str(
        r#"
        mail_index_path = "/dev/null"
        state_db_path = "/dev/null"
        mail_account_name = "test"
        sync_mailboxes = ["INBOX"]
        sync_start_date = "1970-01-01T00:00:00Z"
        user_email = "user@example.com"
        email_database_id = "email-db"
        calendar_database_id = "calendar-db"
        "#,
    )
    .expect("valid test config");
    config.remote_token = Some("test-token".to_string());
    config
}

fn build_scheduler(
    config: Config,
    state: Arc<StateStore>,
    radar: FakeRadar,
    script: Arc<FakeScript>,
    remote: Arc<FakeRemote>,
) -> Scheduler {
    let projector = Arc::new(Projector::new(
        remote,
        Arc::new(NoopConverter),
        script.clone(),
        state.clone(),
        Arc::new(RateLimiter::new(1_000.0)),
        config.user_email.clone(),
        config.email_database_id.clone(),
        config.calendar_database_id.clone(),
    ));
    Scheduler::new(Arc::new(config), state, Arc::new(radar), script, projector, std::env::temp_dir())
}

#[tokio::test]
async fn fresh_detection_of_a_plain_email_is_synced_with_no_parent() {
    let state = open_state("fresh").await;
    let remote = Arc::new(FakeRemote::default());
    let script = Arc::new(FakeScript::default());
    script.push(100, Ok(FetchOutcome::Found(FetchedMessage {
        message_id: "m1@x".to_string(),
        subject: "hello".to_string(),
        sender: "alice@example.com".to_string(),
        date: Utc::now(),
        is_read: false,
        is_flagged: false,
        source: source_with_headers("m1@x", None, "Content-Type: text/plain\r\n\r\nhello"),
    })));

    let radar = FakeRadar { rows: vec![detected(100, "hello", "INBOX")] };
    let scheduler = build_scheduler(base_config(), state.clone(), radar, script, remote.clone());

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report, CycleReport { detected: 1, synced: 1, failed: 0, deleted: 0, skipped: 0 });

    let record = state.get(100).await.unwrap().expect("record exists");
    assert_eq!(record.status(), SyncStatus::Synced);
    assert_eq!(record.message_id.as_deref(), Some("m1@x"));
    assert_eq!(record.thread_id, None);
    assert!(remote.parent_item_of(record.remote_page_id.as_deref().unwrap()).is_none());
    assert_eq!(state.get_last_max_row_id().await.unwrap(), 100);
}

#[tokio::test]
async fn a_reply_whose_anchor_is_absent_falls_back() {
    let state = open_state("reply-absent-anchor").await;
    let remote = Arc::new(FakeRemote::default());
    let script = Arc::new(FakeScript::default());
    script.push(101, Ok(FetchOutcome::Found(FetchedMessage {
        message_id: "r1@x".to_string(),
        subject: "Re: hello".to_string(),
        sender: "bob@example.com".to_string(),
        date: Utc::now(),
        is_read: false,
        is_flagged: false,
        source: source_with_headers("r1@x", Some("anchor@x"), "Content-Type: text/plain\r\n\r\nreplying"),
    })));

    let radar = FakeRadar { rows: vec![detected(101, "Re: hello", "INBOX")] };
    let scheduler = build_scheduler(base_config(), state.clone(), radar, script, remote.clone());

    scheduler.run_cycle().await.unwrap();

    assert!(state.is_unresolvable_anchor("anchor@x").await.unwrap());
    let record = state.get(101).await.unwrap().expect("record exists");
    assert_eq!(record.status(), SyncStatus::Synced);
    let parent = remote.parent_item_of(record.remote_page_id.as_deref().unwrap()).expect("linked to fallback");
    let fallback_page = remote
        .find_page_by_property("email-db", "Message ID", "mailbridge-fallback-anchor")
        .await
        .unwrap()
        .expect("fallback anchor page exists");
    assert_eq!(parent, fallback_page);
}

#[tokio::test]
async fn anchor_and_reply_detected_in_the_same_cycle_link_correctly() {
    let state = open_state("anchor-same-cycle").await;
    let remote = Arc::new(FakeRemote::default());
    let script = Arc::new(FakeScript::default());
    script.push(200, Ok(FetchOutcome::Found(FetchedMessage {
        message_id: "a@x".to_string(),
        subject: "hello".to_string(),
        sender: "alice@example.com".to_string(),
        date: Utc::now(),
        is_read: false,
        is_flagged: false,
        source: source_with_headers("a@x", None, "Content-Type: text/plain\r\n\r\nhello"),
    })));
    script.push(201, Ok(FetchOutcome::Found(FetchedMessage {
        message_id: "b@x".to_string(),
        subject: "Re: hello".to_string(),
        sender: "bob@example.com".to_string(),
        date: Utc::now(),
        is_read: false,
        is_flagged: false,
        source: source_with_headers("b@x", Some("a@x"), "Content-Type: text/plain\r\n\r\nreplying"),
    })));

    let radar = FakeRadar { rows: vec![detected(200, "hello", "INBOX"), detected(201, "Re: hello", "INBOX")] };
    let scheduler = build_scheduler(base_config(), state.clone(), radar, script, remote.clone());

    scheduler.run_cycle().await.unwrap();

    let anchor = state.get(200).await.unwrap().unwrap();
    let reply = state.get(201).await.unwrap().unwrap();
    assert_eq!(anchor.status(), SyncStatus::Synced);
    assert_eq!(reply.status(), SyncStatus::Synced);

    let parent = remote.parent_item_of(reply.remote_page_id.as_deref().unwrap()).expect("reply links to anchor");
    assert_eq!(parent, anchor.remote_page_id.unwrap());
}

#[tokio::test]
async fn an_oversize_attachment_is_dropped_but_the_message_still_syncs() {
    let state = open_state("oversize-attachment").await;
    let remote = Arc::new(FakeRemote::default());
    let script = Arc::new(FakeScript::default());

    let body = "x".repeat(64);
    let mime = format!(
        "From: Alice <alice@example.com>\r\nTo: bob@example.com\r\nSubject: with attachment\r\nMessage-ID: <att@x>\r\nDate: Mon, 1 Jan 2024 12:00:00 +0000\r\nContent-Type: multipart/mixed; boundary=\"B\"\r\n\r\n--B\r\nContent-Type: text/plain\r\n\r\nbody\r\n--B\r\nContent-Type: application/octet-stream\r\nContent-Disposition: attachment; filename=\"big.bin\"\r\n\r\n{body}\r\n--B--\r\n"
    );
    script.push(400, Ok(FetchOutcome::Found(FetchedMessage {
        message_id: "att@x".to_string(),
        subject: "with attachment".to_string(),
        sender: "alice@example.com".to_string(),
        date: Utc::now(),
        is_read: false,
        is_flagged: false,
        source: mime.into_bytes(),
    })));

    let mut config = base_config();
    config.parse.max_attachment_bytes = 8;
    let radar = FakeRadar { rows: vec![detected(400, "with attachment", "INBOX")] };
    let scheduler = build_scheduler(config, state.clone(), radar, script, remote);

    scheduler.run_cycle().await.unwrap();

    let record = state.get(400).await.unwrap().unwrap();
    assert_eq!(record.status(), SyncStatus::Synced);
    assert!(!record.has_attachments);
}

#[tokio::test]
async fn a_fetch_timeout_is_recorded_for_retry_then_recovers() {
    let state = open_state("timeout-recovery").await;
    let remote = Arc::new(FakeRemote::default());
    let script = Arc::new(FakeScript::default());
    script.push(300, Err(mailbridge_fetch::FetchError::Timeout(std::time::Duration::from_secs(200))));

    let radar = FakeRadar { rows: vec![detected(300, "slow one", "INBOX")] };
    let scheduler = build_scheduler(base_config(), state.clone(), radar, script.clone(), remote);

    scheduler.run_cycle().await.unwrap();

    let record = state.get(300).await.unwrap().unwrap();
    assert_eq!(record.status(), SyncStatus::FetchFailed);
    assert_eq!(record.retry_count, 1);
    assert!(record.next_retry_at.is_some());

    script.push(300, Ok(FetchOutcome::Found(FetchedMessage {
        message_id: "slow@x".to_string(),
        subject: "slow one".to_string(),
        sender: "alice@example.com".to_string(),
        date: Utc::now(),
        is_read: false,
        is_flagged: false,
        source: source_with_headers("slow@x", None, "Content-Type: text/plain\r\n\r\nfinally"),
    })));

    let mut report = CycleReport::default();
    let record = state.get(300).await.unwrap().unwrap();
    scheduler.process_record(record, &mut report).await.unwrap();

    let record = state.get(300).await.unwrap().unwrap();
    assert_eq!(record.status(), SyncStatus::Synced);
    assert!(record.next_retry_at.is_none());
    assert!(record.last_error.is_none());
}

#[tokio::test]
async fn two_invites_with_the_same_uid_coalesce_into_one_calendar_page() {
    let state = open_state("calendar-coalesce").await;
    let remote = Arc::new(FakeRemote::default());
    let script = Arc::new(FakeScript::default());

    let invite = |message_id: &str, title: &str| {
        format!(
            "From: Alice <alice@example.com>\r\nTo: bob@example.com\r\nSubject: Invite\r\nMessage-ID: <{message_id}>\r\nDate: Mon, 1 Jan 2024 12:00:00 +0000\r\nContent-Type: multipart/mixed; boundary=\"B\"\r\n\r\n--B\r\nContent-Type: text/plain\r\n\r\nSee invite\r\n--B\r\nContent-Type: text/calendar\r\n\r\nBEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:u1\r\nSUMMARY:{title}\r\nDTSTART:20240101T120000Z\r\nDTEND:20240101T130000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n\r\n--B--\r\n"
        ).into_bytes()
    };

    script.push(500, Ok(FetchOutcome::Found(FetchedMessage {
        message_id: "inv1@x".to_string(),
        subject: "Invite".to_string(),
        sender: "alice@example.com".to_string(),
        date: Utc::now(),
        is_read: false,
        is_flagged: false,
        source: invite("inv1@x", "Planning sync"),
    })));
    script.push(501, Ok(FetchOutcome::Found(FetchedMessage {
        message_id: "inv2@x".to_string(),
        subject: "Invite".to_string(),
        sender: "alice@example.com".to_string(),
        date: Utc::now(),
        is_read: false,
        is_flagged: false,
        source: invite("inv2@x", "Planning sync (updated)"),
    })));

    let radar = FakeRadar { rows: vec![detected(500, "Invite", "INBOX"), detected(501, "Invite", "INBOX")] };
    let scheduler = build_scheduler(base_config(), state.clone(), radar, script, remote.clone());

    scheduler.run_cycle().await.unwrap();

    let calendar_page =
        remote.find_page_by_property("calendar-db", "Event ID", "u1").await.unwrap().expect("one calendar page");
    assert_eq!(*remote.updates.lock().unwrap(), 1);
    let _ = calendar_page;
}

#[tokio::test]
async fn replaying_a_cycle_with_no_new_mail_makes_no_further_remote_writes() {
    let state = open_state("idempotent-rerun").await;
    let remote = Arc::new(FakeRemote::default());
    let script = Arc::new(FakeScript::default());
    script.push(600, Ok(FetchOutcome::Found(FetchedMessage {
        message_id: "once@x".to_string(),
        subject: "hello".to_string(),
        sender: "alice@example.com".to_string(),
        date: Utc::now(),
        is_read: false,
        is_flagged: false,
        source: source_with_headers("once@x", None, "Content-Type: text/plain\r\n\r\nhello"),
    })));

    let radar = FakeRadar { rows: vec![detected(600, "hello", "INBOX")] };
    let scheduler = build_scheduler(base_config(), state.clone(), radar, script, remote.clone());

    scheduler.run_cycle().await.unwrap();
    let pages_after_first = remote.pages.lock().unwrap().len();

    let second = scheduler.run_cycle().await.unwrap();
    assert_eq!(second, CycleReport::default());
    assert_eq!(remote.pages.lock().unwrap().len(), pages_after_first);
}
