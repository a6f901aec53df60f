//! HTML-to-block conversion and the remote store's rich-text limits.
//!
//! Not a full HTML5 renderer: a pragmatic conversion sufficient to
//! exercise the 100-block-per-request and UTF-16-span-length invariants.

use std::collections::HashMap;

/// Per-span limit on the remote store's rich text, in UTF-16 code units.
pub const MAX_SPAN_UTF16_UNITS: usize = 2_000;

/// Maximum blocks accepted by a single page-create request; anything
/// beyond this is appended via follow-on patch calls.
pub const MAX_BLOCKS_PER_CREATE: usize = 100;

/// One structural unit of a remote page body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph { text: String },
    BulletItem { text: String },
    Image { upload_id: String },
    Code { text: String, language: Option<String> },
}

/// Converts an HTML fragment plus a content-id to upload-handle map into
/// an ordered block sequence, substituting `cid:` image references with
/// the real upload handles.
pub trait BlockConverter: Send + Sync {
    fn convert(&self, html: &str, cid_uploads: &HashMap<String, String>) -> Vec<Block>;
}

/// Tag-driven line-oriented converter: walks `<h1-6>`, `<p>`, `<li>`,
/// `<img src="cid:...">`, and `<pre><code>` elements one per line of the
/// (already-normalized) HTML source.
#[derive(Debug, Default)]
pub struct SimpleHtmlBlockConverter;

impl BlockConverter for SimpleHtmlBlockConverter {
    fn convert(&self, html: &str, cid_uploads: &HashMap<String, String>) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut cursor = html;

        while let Some(tag_start) = cursor.find('<') {
            let Some(tag_end) = cursor[tag_start..].find('>') else { break };
            let tag = &cursor[tag_start + 1..tag_start + tag_end];
            let rest = &cursor[tag_start + tag_end + 1..];

            if let Some(block) = block_for_tag(tag, rest, cid_uploads) {
                blocks.push(block.0);
                cursor = block.1;
            } else {
                cursor = rest;
            }
        }

        blocks
    }
}

fn block_for_tag<'a>(tag: &str, rest: &'a str, cid_uploads: &HashMap<String, String>) -> Option<(Block, &'a str)> {
    let tag_lower = tag.to_ascii_lowercase();

    if let Some(level) = tag_lower.strip_prefix('h').and_then(|n| n.chars().next()).and_then(|c| c.to_digit(10)) {
        if (1..=6).contains(&level) {
            let close = format!("</h{level}>");
            let (text, after) = split_on_close(rest, &close);
            #[allow(clippy::cast_possible_truncation)]
            let level = level as u8;
            return Some((Block::Heading { level, text: truncate_utf16(&text) }, after));
        }
    }

    if tag_lower == "p" {
        let (text, after) = split_on_close(rest, "</p>");
        return Some((Block::Paragraph { text: truncate_utf16(&text) }, after));
    }

    if tag_lower == "li" {
        let (text, after) = split_on_close(rest, "</li>");
        return Some((Block::BulletItem { text: truncate_utf16(&text) }, after));
    }

    if tag_lower.starts_with("img") {
        if let Some(src) = extract_attr(&tag_lower, "src") {
            let upload_id = src
                .strip_prefix("cid:")
                .and_then(|cid| cid_uploads.get(cid))
                .cloned()
                .unwrap_or(src);
            return Some((Block::Image { upload_id }, rest));
        }
    }

    if tag_lower == "code" {
        let (text, after) = split_on_close(rest, "</code>");
        return Some((Block::Code { text: truncate_utf16(&text), language: None }, after));
    }

    None
}

fn split_on_close<'a>(rest: &'a str, close_tag: &str) -> (String, &'a str) {
    rest.find(close_tag).map_or_else(
        || (rest.to_string(), ""),
        |idx| (rest[..idx].to_string(), &rest[idx + close_tag.len()..]),
    )
}

fn extract_attr(tag: &str, attr: &str) -> Option<String> {
    let needle = format!("{attr}=\"");
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

/// Truncate `text` on a UTF-16 code-unit boundary to
/// [`MAX_SPAN_UTF16_UNITS`] (P8), never splitting a surrogate pair.
#[must_use]
pub fn truncate_utf16(text: &str) -> String {
    let mut units = 0usize;
    for (byte_idx, ch) in text.char_indices() {
        let ch_units = ch.len_utf16();
        if units + ch_units > MAX_SPAN_UTF16_UNITS {
            return text[..byte_idx].to_string();
        }
        units += ch_units;
    }
    text.to_string()
}
