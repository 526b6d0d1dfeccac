//! Built-in `web:fetch` tool.

use serde_json::json;

use crate::tools::errors::ToolError;
use crate::tools::types::{ToolCategory, ToolDescriptor, ToolResult};

pub const FETCH: &str = "builtin:web:fetch";

/// Default cap on returned body bytes.
const DEFAULT_FETCH_LIMIT: usize = 64 * 1024;

pub(super) fn descriptors() -> Vec<ToolDescriptor> {
    vec![ToolDescriptor::new(FETCH, "Fetch a URL over HTTP(S) and return the body text.")
        .category(ToolCategory::Read)
        .requires_network()
        .parameters(json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"},
                "max_bytes": {"type": "integer", "minimum": 1}
            },
            "required": ["url"]
        }))]
}

/// Only plain http(s) URLs are fetched.
pub(super) fn validate_url(url: &str) -> Result<reqwest::Url, ToolError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| ToolError::InvalidArguments {
        tool: FETCH.to_string(),
        reason: format!("invalid url '{url}': {e}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ToolError::InvalidArguments {
            tool: FETCH.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

pub(super) async fn fetch(
    http: &reqwest::Client,
    url: &str,
    max_bytes: Option<usize>,
) -> Result<ToolResult, ToolError> {
    let url = validate_url(url)?;
    let response = http.get(url.clone()).send().await?;
    let status = response.status();
    let body = response.text().await?;
    let limit = max_bytes.unwrap_or(DEFAULT_FETCH_LIMIT);
    let mut end = body.len().min(limit);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    let text = body[..end].to_string();

    let result = if status.is_success() {
        ToolResult::ok(text)
    } else {
        let mut failed = ToolResult::failure(format!("HTTP {}", status.as_u16()));
        failed.content = text;
        failed
    };
    Ok(result
        .with_metadata("url", json!(url.as_str()))
        .with_metadata("status", json!(status.as_u16()))
        .with_metadata("truncated", json!(body.len() > limit)))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
