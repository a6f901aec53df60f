//! Turns an RFC 5322 source into the shape the Projector consumes.

use std::{collections::HashMap, path::{Path, PathBuf}};

use chrono::{DateTime, Utc};
use mailbridge_common::config::ParseConfig;
use mailparse::{MailHeaderMap, ParsedMail};

use crate::{content::{digest_dir_name, sniff_image}, error::{ParseError, Result}};

/// One inline image part, keyed by the `cid` it is referenced by in HTML.
#[derive(Debug, Clone)]
pub struct InlinePart {
    pub content_id: String,
    pub path: PathBuf,
    pub media_type: String,
}

/// One non-inline attachment, already size/type gated.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub media_type: String,
    pub size: u64,
    pub path: PathBuf,
    pub is_image: bool,
}

/// A raw `text/calendar` part; decoding is the Projector's job (spec
/// models the calendar-invite parser as an external collaborator).
#[derive(Debug, Clone)]
pub struct CalendarPart {
    pub media_type: String,
    pub raw: Vec<u8>,
}

/// Everything the Projector needs about one message, minus the flags
/// (`is_read`/`is_flagged`) that only the Fetcher's raw response carries.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub message_id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub sender_address: String,
    pub sender_display: String,
    pub to_list: String,
    pub cc_list: String,
    pub date: Option<DateTime<Utc>>,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub inline_images: HashMap<String, InlinePart>,
    pub attachments: Vec<Attachment>,
    pub calendar_parts: Vec<CalendarPart>,
}

impl ParsedMessage {
    #[must_use]
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// Parse `source` into a [`ParsedMessage`], persisting inline images and
/// attachments under `temp_root/<digest(message_id)>/`.
///
/// This is pure CPU-bound work; per the concurrency model, parsing never
/// suspends and file writes here are synchronous.
pub fn parse_message(source: &[u8], temp_root: &Path, config: &ParseConfig) -> Result<ParsedMessage> {
    let parsed = mailparse::parse_mail(source)?;

    let message_id = header_value(&parsed, "Message-ID")
        .map(|v| strip_angle_brackets(&v).to_string())
        .unwrap_or_default();
    let thread_id = extract_thread_anchor(&parsed);
    let subject = header_value(&parsed, "Subject").unwrap_or_default();
    let (sender_address, sender_display) = split_address(header_value(&parsed, "From").unwrap_or_default());
    let to_list = join_addresses(header_value(&parsed, "To").unwrap_or_default());
    let cc_list = join_addresses(header_value(&parsed, "Cc").unwrap_or_default());
    let date = header_value(&parsed, "Date").and_then(|v| mailparse::dateparse(&v).ok()).and_then(|secs| {
        chrono::DateTime::from_timestamp(secs, 0)
    });

    let mut leaves = Vec::new();
    collect_leaves(&parsed, &mut leaves);

    let body_html = first_body(&leaves, "text/html")?;
    let body_text = first_body(&leaves, "text/plain")?;

    let referenced_cids = body_html.as_deref().map(extract_cid_references).unwrap_or_default();
    let temp_dir = temp_root.join(digest_dir_name(&message_id));

    let mut inline_images = HashMap::new();
    let mut attachments = Vec::new();
    let mut calendar_parts = Vec::new();

    for leaf in &leaves {
        let mimetype = leaf.ctype.mimetype.to_ascii_lowercase();
        if mimetype == "text/calendar" {
            calendar_parts.push(CalendarPart {
                media_type: mimetype.clone(),
                raw: leaf.get_body_raw().map_err(|e| ParseError::UnreadablePart(e.to_string()))?,
            });
            continue;
        }
        if body_html.is_some() && is_same_part(leaf, &leaves, "text/html")
            || body_text.is_some() && body_html.is_none() && is_same_part(leaf, &leaves, "text/plain")
        {
            continue;
        }

        let content_id = header_value(leaf, "Content-ID").map(|v| strip_angle_brackets(&v).to_string());
        let filename = part_filename(leaf);
        let is_inline = content_id.is_some()
            || filename.as_deref().is_some_and(|name| referenced_cids.contains(name));

        let body = leaf.get_body_raw().map_err(|e| ParseError::UnreadablePart(e.to_string()))?;
        if body.is_empty() {
            continue;
        }

        if is_inline && mimetype.starts_with("image/") {
            let cid = content_id
                .or_else(|| filename.clone())
                .unwrap_or_else(|| format!("part-{}", inline_images.len()));
            let path = persist_part(&temp_dir, &cid, &body)?;
            inline_images.insert(cid.clone(), InlinePart { content_id: cid, path, media_type: mimetype });
            continue;
        }

        let is_attachment = header_value(leaf, "Content-Disposition")
            .is_some_and(|v| v.to_ascii_lowercase().starts_with("attachment"))
            || filename.is_some();
        if !is_attachment {
            continue;
        }

        let filename = filename.unwrap_or_else(|| "attachment".to_string());
        let size = body.len() as u64;
        if size > config.max_attachment_bytes {
            tracing::warn!(filename = %filename, size, limit = config.max_attachment_bytes, "dropping oversize attachment");
            continue;
        }

        let ext = filename.rsplit('.').next().filter(|e| *e != filename).map(str::to_ascii_lowercase);
        let is_image = ext.is_none() && sniff_image(&body) || mimetype.starts_with("image/");
        if !is_image {
            match &ext {
                Some(ext) => {
                    if !config.allowed_attachment_exts.is_empty()
                        && !config.allowed_attachment_exts.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext))
                    {
                        tracing::warn!(filename = %filename, extension = %ext, "dropping disallowed attachment extension");
                        continue;
                    }
                }
                None => {
                    tracing::warn!(filename = %filename, "dropping extension-less non-image attachment");
                    continue;
                }
            }
        }

        let path = persist_part(&temp_dir, &filename, &body)?;
        attachments.push(Attachment { filename, media_type: mimetype, size, path, is_image });
    }

    Ok(ParsedMessage {
        message_id,
        thread_id,
        subject,
        sender_address,
        sender_display,
        to_list,
        cc_list,
        date,
        body_html,
        body_text,
        inline_images,
        attachments,
        calendar_parts,
    })
}

fn header_value(part: &ParsedMail, name: &str) -> Option<String> {
    part.headers.get_first_value(name)
}

fn strip_angle_brackets(value: &str) -> &str {
    value.trim().trim_start_matches('<').trim_end_matches('>')
}

/// First entry of `References`, else `In-Reply-To`, else `None`.
fn extract_thread_anchor(parsed: &ParsedMail) -> Option<String> {
    if let Some(references) = header_value(parsed, "References") {
        if let Some(first) = references.split_whitespace().next() {
            return Some(strip_angle_brackets(first).to_string());
        }
    }
    header_value(parsed, "In-Reply-To").map(|v| strip_angle_brackets(v.split_whitespace().next().unwrap_or(&v)).to_string())
}

fn split_address(header: String) -> (String, String) {
    match mailparse::addrparse(&header) {
        Ok(addrs) => match addrs.first() {
            Some(mailparse::MailAddr::Single(info)) => {
                (info.addr.clone(), info.display_name.clone().unwrap_or_default())
            }
            _ => (header, String::new()),
        },
        Err(_) => (header, String::new()),
    }
}

fn join_addresses(header: String) -> String {
    match mailparse::addrparse(&header) {
        Ok(addrs) => addrs
            .iter()
            .filter_map(|addr| match addr {
                mailparse::MailAddr::Single(info) => Some(info.addr.clone()),
                mailparse::MailAddr::Group(group) => {
                    Some(group.addrs.iter().map(|i| i.addr.clone()).collect::<Vec<_>>().join(", "))
                }
            })
            .collect::<Vec<_>>()
            .join(", "),
        Err(_) => header,
    }
}

fn collect_leaves<'a>(part: &'a ParsedMail<'a>, out: &mut Vec<&'a ParsedMail<'a>>) {
    if part.subparts.is_empty() {
        out.push(part);
    } else {
        for sub in &part.subparts {
            collect_leaves(sub, out);
        }
    }
}

fn is_same_part(candidate: &ParsedMail, leaves: &[&ParsedMail], mimetype: &str) -> bool {
    leaves
        .iter()
        .find(|p| p.ctype.mimetype.eq_ignore_ascii_case(mimetype))
        .is_some_and(|first| std::ptr::eq(*first, candidate))
}

fn first_body(leaves: &[&ParsedMail], mimetype: &str) -> Result<Option<String>> {
    let Some(part) = leaves.iter().find(|p| p.ctype.mimetype.eq_ignore_ascii_case(mimetype)) else {
        return Ok(None);
    };
    Ok(Some(part.get_body().map_err(|e| ParseError::UnreadablePart(e.to_string()))?))
}

fn part_filename(part: &ParsedMail) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned())
}

fn extract_cid_references(html: &str) -> std::collections::HashSet<String> {
    let mut refs = std::collections::HashSet::new();
    let mut rest = html;
    while let Some(idx) = rest.find("cid:") {
        let after = &rest[idx + 4..];
        let end = after.find(|c: char| c == '"' || c == '\'' || c == ')' || c.is_whitespace()).unwrap_or(after.len());
        refs.insert(after[..end].to_string());
        rest = &after[end..];
    }
    refs
}

fn persist_part(temp_dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(temp_dir)
        .map_err(|source| ParseError::PersistPart { path: temp_dir.display().to_string(), source })?;
    let safe_name = name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' }).collect::<String>();
    let path = temp_dir.join(safe_name);
    std::fs::write(&path, bytes)
        .map_err(|source| ParseError::PersistPart { path: path.display().to_string(), source })?;
    Ok(path)
}
