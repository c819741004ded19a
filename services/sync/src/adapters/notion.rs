//! services/sync/src/adapters/notion.rs
//!
//! This module contains the adapter for the Notion document tree. It
//! implements the `DocumentTreeService` port from the `core` crate over the
//! Notion REST API.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use flashforge_core::ports::{
    BlockKind, ChildBlock, DocumentTreeService, PortError, PortResult,
};
use serde_json::Value;

const NOTION_API_BASE: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

/// Notion reports `last_edited_time` in this fixed format, truncated to the
/// minute (the fractional part is always `.000`).
const LAST_EDITED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `DocumentTreeService` against the Notion API.
#[derive(Clone)]
pub struct NotionTreeAdapter {
    http: reqwest::Client,
    token: String,
}

impl NotionTreeAdapter {
    /// Creates a new `NotionTreeAdapter`.
    pub fn new(token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
        }
    }

    /// Fetches every child block of a container, following pagination.
    async fn fetch_all_blocks(&self, container_id: &str) -> PortResult<Vec<Value>> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let url = format!("{NOTION_API_BASE}/blocks/{container_id}/children");
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .header("Notion-Version", NOTION_VERSION)
                .query(&[("page_size", "100")]);
            if let Some(cursor) = &cursor {
                request = request.query(&[("start_cursor", cursor.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| PortError::Source(e.to_string()))?;
            if !response.status().is_success() {
                return Err(PortError::Source(format!(
                    "Notion returned {} for block {}",
                    response.status(),
                    container_id
                )));
            }
            let body: Value = response
                .json()
                .await
                .map_err(|e| PortError::Source(e.to_string()))?;

            let results = body
                .get("results")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    PortError::Source("Notion block list had no 'results' array".to_string())
                })?;
            blocks.extend(results.iter().cloned());

            let has_more = body.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            if !has_more {
                return Ok(blocks);
            }
            cursor = body
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(blocks);
            }
        }
    }
}

//=========================================================================================
// Response parsing helpers
//=========================================================================================

/// Parses Notion's minute-truncated `last_edited_time` string.
pub(crate) fn parse_last_edited(raw: &str) -> PortResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, LAST_EDITED_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| PortError::Source(format!("bad last_edited_time '{raw}': {e}")))
}

/// Converts one raw block into a `ChildBlock`, if it has the expected keys.
fn to_child_block(block: &Value) -> PortResult<ChildBlock> {
    let id = block
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| PortError::Source("block without an 'id'".to_string()))?;
    let last_edited = block
        .get("last_edited_time")
        .and_then(Value::as_str)
        .ok_or_else(|| PortError::Source(format!("block {id} without 'last_edited_time'")))?;

    let (kind, title) = match block.get("type").and_then(Value::as_str) {
        Some("child_page") => {
            let title = block
                .pointer("/child_page/title")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            (BlockKind::ChildPage, title)
        }
        _ => (BlockKind::Other, String::new()),
    };

    Ok(ChildBlock {
        id: id.to_string(),
        title,
        last_modified: parse_last_edited(last_edited)?,
        kind,
    })
}

/// Flattens the text-bearing blocks of a page into plain text, one block per
/// paragraph.
pub(crate) fn plain_text_of(blocks: &[Value]) -> String {
    let mut paragraphs = Vec::new();
    for block in blocks {
        let Some(kind) = block.get("type").and_then(Value::as_str) else {
            continue;
        };
        let Some(rich_text) = block
            .pointer(&format!("/{kind}/rich_text"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        let text: String = rich_text
            .iter()
            .filter_map(|span| span.get("plain_text").and_then(Value::as_str))
            .collect();
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }
    paragraphs.join("\n\n")
}

//=========================================================================================
// `DocumentTreeService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentTreeService for NotionTreeAdapter {
    async fn list_children(&self, container_id: &str) -> PortResult<Vec<ChildBlock>> {
        let blocks = self.fetch_all_blocks(container_id).await?;
        blocks.iter().map(to_child_block).collect()
    }

    async fn export_as_text(&self, page_id: &str) -> PortResult<String> {
        let blocks = self.fetch_all_blocks(page_id).await?;
        Ok(plain_text_of(&blocks))
    }
}
