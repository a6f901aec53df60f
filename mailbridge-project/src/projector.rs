//! Idempotent creation of exactly one remote page per message, with
//! thread linkage, attachments, inline images, and calendar projection.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use mailbridge_fetch::{FetchOutcome, ScriptChannel};
use mailbridge_parse::ParsedMessage;
use mailbridge_state::StateStore;
use serde_json::{Value, json};

use crate::{
    blocks::{Block, BlockConverter},
    calendar,
    error::{ProjectError, Result},
    rate_limiter::RateLimiter,
    remote::RemoteDatabase,
};

const MESSAGE_ID_PROPERTY: &str = "Message ID";
const EVENT_ID_PROPERTY: &str = "Event ID";
const FALLBACK_ANCHOR_MESSAGE_ID: &str = "mailbridge-fallback-anchor";
const FALLBACK_ANCHOR_TITLE: &str = "(Unresolved thread)";

/// Static header fields the Parser can't fill in from source alone: the
/// mail-store-reported flags, and which mailbox the record came from.
#[derive(Debug, Clone)]
pub struct RecordFlags {
    pub is_read: bool,
    pub is_flagged: bool,
    pub mailbox: String,
    pub date_received: DateTime<Utc>,
}

/// Outcome of projecting one message.
#[derive(Debug, Clone)]
pub struct ProjectOutcome {
    pub remote_page_id: String,
}

pub struct Projector {
    remote: Arc<dyn RemoteDatabase>,
    converter: Arc<dyn BlockConverter>,
    script: Arc<dyn ScriptChannel>,
    state: Arc<StateStore>,
    rate_limiter: Arc<RateLimiter>,
    user_email: String,
    email_database_id: String,
    calendar_database_id: String,
}

impl Projector {
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteDatabase>,
        converter: Arc<dyn BlockConverter>,
        script: Arc<dyn ScriptChannel>,
        state: Arc<StateStore>,
        rate_limiter: Arc<RateLimiter>,
        user_email: String,
        email_database_id: String,
        calendar_database_id: String,
    ) -> Self {
        Self { remote, converter, script, state, rate_limiter, user_email, email_database_id, calendar_database_id }
    }

    /// Idempotently project one message. Returns the remote page id,
    /// whether freshly created or already present from a prior run (P9).
    pub async fn project(&self, parsed: &ParsedMessage, flags: &RecordFlags, source: &[u8]) -> Result<ProjectOutcome> {
        if let Some(existing) = self.find_email_page(&parsed.message_id).await? {
            return Ok(ProjectOutcome { remote_page_id: existing });
        }

        let parent_page_id = self.resolve_thread_anchor(parsed, flags).await?;

        let mut cid_uploads = HashMap::new();
        for (cid, inline) in &parsed.inline_images {
            self.rate_limiter.acquire().await;
            let bytes = std::fs::read(&inline.path)
                .map_err(|source| ProjectError::ReadForUpload { path: inline.path.display().to_string(), source })?;
            let upload_id = self.remote.upload_file(cid, &inline.media_type, bytes).await?;
            cid_uploads.insert(cid.clone(), upload_id);
        }

        let html = parsed.body_html.clone().or_else(|| parsed.body_text.clone().map(|text| format!("<p>{text}</p>")));
        let mut children = html.map(|html| self.converter.convert(&html, &cid_uploads)).unwrap_or_default();

        let mut attachment_section = Vec::new();
        for attachment in &parsed.attachments {
            self.rate_limiter.acquire().await;
            let bytes = std::fs::read(&attachment.path)
                .map_err(|source| ProjectError::ReadForUpload { path: attachment.path.display().to_string(), source })?;
            let upload_id = self.remote.upload_file(&attachment.filename, &attachment.media_type, bytes).await?;
            attachment_section.push(if attachment.is_image {
                Block::Image { upload_id }
            } else {
                Block::Paragraph { text: format!("📎 {} ({})", attachment.filename, upload_id) }
            });
        }
        if !attachment_section.is_empty() {
            attachment_section.insert(0, Block::Heading { level: 2, text: "Attachments".to_string() });
            attachment_section.append(&mut children);
            children = attachment_section;
        }

        self.rate_limiter.acquire().await;
        let eml_upload_id = self.remote.upload_file("original.eml", "message/rfc822", source.to_vec()).await?;

        let properties = self.email_properties(parsed, flags, parent_page_id.as_deref(), &eml_upload_id);

        self.rate_limiter.acquire().await;
        let page_id = self.remote.create_page(&self.email_database_id, properties, &children).await?;

        if let Some(calendar_part) = parsed.calendar_parts.first() {
            if let Err(err) = self.project_calendar_invite(&calendar_part.raw).await {
                tracing::warn!(error = %err, "calendar projection failed; email projection still succeeds");
            }
        }

        Ok(ProjectOutcome { remote_page_id: page_id })
    }

    async fn find_email_page(&self, message_id: &str) -> Result<Option<String>> {
        if message_id.is_empty() {
            return Ok(None);
        }
        self.remote.find_page_by_property(&self.email_database_id, MESSAGE_ID_PROPERTY, message_id).await
    }

    /// Resolve (or create) the parent page for a reply, per spec §4.5.
    /// Returns `None` when the message is its own thread anchor.
    async fn resolve_thread_anchor(&self, parsed: &ParsedMessage, flags: &RecordFlags) -> Result<Option<String>> {
        let Some(thread_id) = parsed.thread_id.as_deref() else { return Ok(None) };
        if thread_id == parsed.message_id {
            return Ok(None);
        }

        if let Some(page_id) = self.find_email_page(thread_id).await? {
            return Ok(Some(page_id));
        }

        if self.state.is_unresolvable_anchor(thread_id).await.unwrap_or(false) {
            return Ok(Some(self.fallback_anchor_page_id().await?));
        }

        match self.script.fetch_by_message_id(thread_id, &flags.mailbox).await {
            Ok(FetchOutcome::Found(anchor)) => {
                match mailbridge_parse::parse_message(&anchor.source, std::env::temp_dir().join("mailbridge").as_path(), &mailbridge_common::config::ParseConfig::default()) {
                    Ok(anchor_parsed) => {
                        let anchor_flags = RecordFlags {
                            is_read: anchor.is_read,
                            is_flagged: anchor.is_flagged,
                            mailbox: flags.mailbox.clone(),
                            date_received: anchor.date,
                        };
                        // Depth-bounded to 1: the anchor's own anchor is never resolved.
                        let outcome = Box::pin(self.project_without_anchor_resolution(&anchor_parsed, &anchor_flags, &anchor.source)).await?;
                        Ok(Some(outcome.remote_page_id))
                    }
                    Err(_) => {
                        self.state.remember_unresolvable_anchor(thread_id).await.ok();
                        Ok(Some(self.fallback_anchor_page_id().await?))
                    }
                }
            }
            _ => {
                self.state.remember_unresolvable_anchor(thread_id).await.ok();
                Ok(Some(self.fallback_anchor_page_id().await?))
            }
        }
    }

    /// Project a message without attempting to resolve its own thread
    /// anchor; used only for the depth-1 anchor lookup above.
    async fn project_without_anchor_resolution(&self, parsed: &ParsedMessage, flags: &RecordFlags, source: &[u8]) -> Result<ProjectOutcome> {
        if let Some(existing) = self.find_email_page(&parsed.message_id).await? {
            return Ok(ProjectOutcome { remote_page_id: existing });
        }
        let html = parsed.body_html.clone().or_else(|| parsed.body_text.clone().map(|text| format!("<p>{text}</p>")));
        let children = html.map(|html| self.converter.convert(&html, &HashMap::new())).unwrap_or_default();
        let properties = self.email_properties(parsed, flags, None, "");

        self.rate_limiter.acquire().await;
        let page_id = self.remote.create_page(&self.email_database_id, properties, &children).await?;
        Ok(ProjectOutcome { remote_page_id: page_id })
    }

    async fn fallback_anchor_page_id(&self) -> Result<String> {
        if let Some(page_id) = self.find_email_page(FALLBACK_ANCHOR_MESSAGE_ID).await? {
            return Ok(page_id);
        }
        let properties = json!({
            "Subject": { "title": [{ "text": { "content": FALLBACK_ANCHOR_TITLE } }] },
            MESSAGE_ID_PROPERTY: { "rich_text": [{ "text": { "content": FALLBACK_ANCHOR_MESSAGE_ID } }] },
        });
        self.rate_limiter.acquire().await;
        self.remote.create_page(&self.email_database_id, properties, &[]).await
    }

    fn email_properties(&self, parsed: &ParsedMessage, flags: &RecordFlags, parent_page_id: Option<&str>, eml_upload_id: &str) -> Value {
        let subject = if parsed.subject.is_empty() { "(No Subject)" } else { &parsed.subject };
        let mut properties = json!({
            "Subject": { "title": [{ "text": { "content": subject } }] },
            MESSAGE_ID_PROPERTY: { "rich_text": [{ "text": { "content": parsed.message_id } }] },
            "Thread ID": { "rich_text": [{ "text": { "content": parsed.thread_id.clone().unwrap_or_default() } }] },
            "From": { "email": parsed.sender_address },
            "From Name": { "rich_text": [{ "text": { "content": parsed.sender_display } }] },
            "To": { "rich_text": [{ "text": { "content": parsed.to_list } }] },
            "CC": { "rich_text": [{ "text": { "content": parsed.cc_list } }] },
            "Date": { "date": { "start": flags.date_received.to_rfc3339() } },
            "Mailbox": { "select": { "name": flags.mailbox } },
            "Is Read": { "checkbox": flags.is_read },
            "Is Flagged": { "checkbox": flags.is_flagged },
            "Has Attachments": { "checkbox": parsed.has_attachments() },
            "Viewer": { "email": self.user_email },
        });
        if let Some(parent_page_id) = parent_page_id {
            properties["Parent Item"] = json!({ "relation": [{ "id": parent_page_id }] });
        }
        if !eml_upload_id.is_empty() {
            properties["Original EML"] = json!({ "files": [{ "file_upload": { "id": eml_upload_id } }] });
        }
        properties
    }

    /// Create or update the calendar page for an embedded invite; keyed
    /// by `event_uid` so re-observing the same UID updates one page.
    async fn project_calendar_invite(&self, raw: &[u8]) -> Result<()> {
        let invite = calendar::decode_invite(raw)?;

        if let Some(existing) = self
            .remote
            .find_page_by_property(&self.calendar_database_id, EVENT_ID_PROPERTY, &invite.event_uid)
            .await?
        {
            self.rate_limiter.acquire().await;
            self.remote.update_page(&existing, self.calendar_properties(&invite)).await?;
            return Ok(());
        }

        self.rate_limiter.acquire().await;
        self.remote.create_page(&self.calendar_database_id, self.calendar_properties(&invite), &[]).await?;
        Ok(())
    }

    fn calendar_properties(&self, invite: &calendar::CalendarInvite) -> Value {
        json!({
            "Title": { "title": [{ "text": { "content": invite.title } }] },
            EVENT_ID_PROPERTY: { "rich_text": [{ "text": { "content": invite.event_uid } }] },
            "Start": { "date": { "start": invite.start.map(|d| d.to_rfc3339()) } },
            "End": { "date": { "start": invite.end.map(|d| d.to_rfc3339()) } },
            "All Day": { "checkbox": invite.all_day },
            "Organizer": { "rich_text": [{ "text": { "content": invite.organizer.clone().unwrap_or_default() } }] },
            "Location": { "rich_text": [{ "text": { "content": invite.location.clone().unwrap_or_default() } }] },
            "Join URL": { "url": invite.join_url },
        })
    }
}
