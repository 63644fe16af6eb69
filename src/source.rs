//! Document source client.
//!
//! Fetches pages from a Notion-style block API: page metadata for the
//! title, then the child block list (cursor-paginated, 100 per request),
//! flattened to plain text. Headings, list items, and to-dos keep a
//! lightweight markdown-ish prefix so the chunker can treat them as
//! paragraph boundaries.

use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::{Error, Result};

const API_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

pub struct PageClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl PageClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .or_else(|| std::env::var("NOTION_TOKEN").ok())
            .ok_or_else(|| {
                Error::Config("source token not set (config or NOTION_TOKEN)".into())
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Source(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    /// Fetch a page and render it as plain text: `# title` followed by
    /// the flattened block content.
    pub async fn get_page_content(&self, page_id: &str) -> Result<String> {
        let page = self.get_json(&format!("{}/pages/{}", self.base_url, page_id)).await?;
        let title = extract_title(&page).unwrap_or_else(|| "Untitled".to_string());

        let blocks = self.get_block_children(page_id).await?;
        let content = extract_text_from_blocks(&blocks);
        debug!(page_id, chars = content.len(), "fetched page content");

        Ok(format!("# {}\n\n{}", title, content))
    }

    /// Walk the cursor-paginated block children endpoint to completion.
    async fn get_block_children(&self, block_id: &str) -> Result<Vec<Value>> {
        let url = format!("{}/blocks/{}/children", self.base_url, block_id);
        let mut all_blocks = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&url)
                .query(&[("page_size", PAGE_SIZE.to_string())]);
            if let Some(ref c) = cursor {
                request = request.query(&[("start_cursor", c.as_str())]);
            }

            let data = self.send(request).await?;

            if let Some(results) = data.get("results").and_then(|r| r.as_array()) {
                all_blocks.extend(results.iter().cloned());
            }

            let has_more = data.get("has_more").and_then(|h| h.as_bool()).unwrap_or(false);
            cursor = data
                .get("next_cursor")
                .and_then(|c| c.as_str())
                .map(|s| s.to_string());
            if !has_more || cursor.is_none() {
                break;
            }
        }

        Ok(all_blocks)
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        self.send(self.client.get(url)).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| Error::Source(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Source(format!("source API error {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Source(e.to_string()))
    }
}

/// Pull the page title out of whichever property carries type "title".
fn extract_title(page: &Value) -> Option<String> {
    let properties = page.get("properties")?.as_object()?;
    for prop in properties.values() {
        if prop.get("type").and_then(|t| t.as_str()) == Some("title") {
            let text = prop
                .get("title")?
                .as_array()?
                .first()?
                .get("plain_text")?
                .as_str()?;
            return Some(text.to_string());
        }
    }
    None
}

/// Flatten supported block types to text, one entry per block, joined
/// with blank lines. Unsupported block types are skipped.
pub fn extract_text_from_blocks(blocks: &[Value]) -> String {
    let mut parts = Vec::new();

    for block in blocks {
        let Some(block_type) = block.get("type").and_then(|t| t.as_str()) else {
            continue;
        };
        let Some(text) = rich_text_of(block, block_type) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }

        let rendered = match block_type {
            "paragraph" => text,
            "heading_1" => format!("# {}", text),
            "heading_2" => format!("## {}", text),
            "heading_3" => format!("### {}", text),
            "bulleted_list_item" => format!("- {}", text),
            "numbered_list_item" => format!("1. {}", text),
            "to_do" => {
                let checked = block
                    .get("to_do")
                    .and_then(|t| t.get("checked"))
                    .and_then(|c| c.as_bool())
                    .unwrap_or(false);
                format!("[{}] {}", if checked { "x" } else { " " }, text)
            }
            _ => continue,
        };
        parts.push(rendered);
    }

    parts.join("\n\n")
}

fn rich_text_of(block: &Value, block_type: &str) -> Option<String> {
    let spans = block.get(block_type)?.get("rich_text")?.as_array()?;
    Some(
        spans
            .iter()
            .filter_map(|s| s.get("plain_text").and_then(|t| t.as_str()))
            .collect::<String>(),
    )
}
