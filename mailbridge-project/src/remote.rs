//! HTTPS JSON client for the remote document database.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::{
    blocks::Block,
    error::{FailureClass, ProjectError, Result},
    retry::with_retry,
};

/// The operations the Projector needs from the remote document database:
/// page creation with typed properties and block children, property
/// queries, and the three-step file upload protocol.
#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    async fn find_page_by_property(&self, database_id: &str, property: &str, value: &str) -> Result<Option<String>>;
    async fn create_page(&self, database_id: &str, properties: Value, children: &[Block]) -> Result<String>;
    async fn update_page(&self, page_id: &str, properties: Value) -> Result<()>;
    async fn append_blocks(&self, page_id: &str, children: &[Block]) -> Result<()>;
    async fn upload_file(&self, filename: &str, media_type: &str, bytes: Vec<u8>) -> Result<String>;
}

/// `reqwest`-backed client for a Notion-shaped document-database API:
/// bearer auth, page/database/block/file-upload endpoints, transient
/// failures retried with jittered backoff, all writes gated by the
/// caller's [`crate::rate_limiter::RateLimiter`].
pub struct NotionLikeClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl NotionLikeClient {
    pub fn new(token: &str, base_url: String, request_timeout: Duration, max_retries: u32) -> reqwest::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
            .unwrap_or_else(|_| reqwest::header::HeaderValue::from_static(""));
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { http, base_url, max_retries })
    }

    async fn send_with_retry(&self, build: impl Fn() -> reqwest::RequestBuilder) -> Result<Value> {
        with_retry(
            self.max_retries,
            |err: &ProjectError| err.class() == FailureClass::Transient,
            |_attempt| async {
                let response = build().send().await?;
                let status = response.status();
                if status.is_success() {
                    return response.json::<Value>().await.map_err(ProjectError::from);
                }
                let body = response.text().await.unwrap_or_default();
                Err(ProjectError::RemoteStatus { status: status.as_u16(), body })
            },
        )
        .await
    }
}

#[async_trait]
impl RemoteDatabase for NotionLikeClient {
    async fn find_page_by_property(&self, database_id: &str, property: &str, value: &str) -> Result<Option<String>> {
        let url = format!("{}/databases/{database_id}/query", self.base_url);
        let filter = json!({ "filter": { "property": property, "rich_text": { "equals": value } } });

        let body = self.send_with_retry(|| self.http.post(&url).json(&filter)).await?;
        Ok(body
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|page| page.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn create_page(&self, database_id: &str, properties: Value, children: &[Block]) -> Result<String> {
        let url = format!("{}/pages", self.base_url);
        let first_batch = &children[..children.len().min(crate::blocks::MAX_BLOCKS_PER_CREATE)];
        let payload = json!({
            "parent": { "database_id": database_id },
            "properties": properties,
            "children": first_batch.iter().map(block_to_json).collect::<Vec<_>>(),
        });

        let body = self.send_with_retry(|| self.http.post(&url).json(&payload)).await?;
        let page_id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProjectError::RemoteStatus { status: StatusCode::OK.as_u16(), body: "missing page id in response".to_string() })?
            .to_string();

        if children.len() > crate::blocks::MAX_BLOCKS_PER_CREATE {
            self.append_blocks(&page_id, &children[crate::blocks::MAX_BLOCKS_PER_CREATE..]).await?;
        }

        Ok(page_id)
    }

    async fn update_page(&self, page_id: &str, properties: Value) -> Result<()> {
        let url = format!("{}/pages/{page_id}", self.base_url);
        let payload = json!({ "properties": properties });
        self.send_with_retry(|| self.http.patch(&url).json(&payload)).await?;
        Ok(())
    }

    async fn append_blocks(&self, page_id: &str, children: &[Block]) -> Result<()> {
        for batch in children.chunks(crate::blocks::MAX_BLOCKS_PER_CREATE) {
            let url = format!("{}/blocks/{page_id}/children", self.base_url);
            let payload = json!({ "children": batch.iter().map(block_to_json).collect::<Vec<_>>() });
            self.send_with_retry(|| self.http.patch(&url).json(&payload)).await?;
        }
        Ok(())
    }

    async fn upload_file(&self, filename: &str, media_type: &str, bytes: Vec<u8>) -> Result<String> {
        let create_url = format!("{}/file_uploads", self.base_url);
        let create_payload = json!({ "filename": filename, "content_type": media_type });
        let created = self.send_with_retry(|| self.http.post(&create_url).json(&create_payload)).await?;
        let upload_id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProjectError::RemoteStatus { status: StatusCode::OK.as_u16(), body: "missing upload id".to_string() })?
            .to_string();

        let send_url = format!("{}/file_uploads/{upload_id}/send", self.base_url);
        let bytes_for_send = bytes.clone();
        self.send_with_retry(|| {
            self.http
                .post(&send_url)
                .header(reqwest::header::CONTENT_TYPE, media_type)
                .body(bytes_for_send.clone())
        })
        .await?;

        Ok(upload_id)
    }
}

fn block_to_json(block: &Block) -> Value {
    match block {
        Block::Heading { level, text } => json!({ "type": format!("heading_{level}"), "text": text }),
        Block::Paragraph { text } => json!({ "type": "paragraph", "text": text }),
        Block::BulletItem { text } => json!({ "type": "bulleted_list_item", "text": text }),
        Block::Image { upload_id } => json!({ "type": "image", "file_upload_id": upload_id }),
        Block::Code { text, language } => json!({ "type": "code", "text": text, "language": language }),
    }
}
