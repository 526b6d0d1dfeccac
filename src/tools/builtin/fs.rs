//! Built-in filesystem tools: `list_dir`, `read_text`, `write_text`.

use std::path::Path;

use serde_json::json;
use tokio::io::AsyncWriteExt;

use crate::tools::errors::ToolError;
use crate::tools::types::{Artifact, ToolCategory, ToolDescriptor, ToolResult};

pub const LIST_DIR: &str = "builtin:fs:list_dir";
pub const READ_TEXT: &str = "builtin:fs:read_text";
pub const WRITE_TEXT: &str = "builtin:fs:write_text";

/// Default cap on bytes returned by `read_text`.
const DEFAULT_READ_LIMIT: usize = 64 * 1024;

pub(super) fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(LIST_DIR, "List the entries of a directory.")
            .category(ToolCategory::Read)
            .path_params(&["path"])
            .parameters(json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory to list"}
                },
                "required": ["path"]
            })),
        ToolDescriptor::new(READ_TEXT, "Read a UTF-8 text file.")
            .category(ToolCategory::Read)
            .path_params(&["path"])
            .parameters(json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "max_bytes": {"type": "integer", "minimum": 1}
                },
                "required": ["path"]
            })),
        ToolDescriptor::new(WRITE_TEXT, "Write or append UTF-8 text to a file.")
            .category(ToolCategory::Write)
            .mutates_state()
            .path_params(&["path"])
            .parameters(json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                    "mode": {"type": "string", "enum": ["overwrite", "append"]}
                },
                "required": ["path", "content"]
            })),
    ]
}

/// Sorted entries, directories suffixed with `/`.
pub(super) async fn list_dir(path: &Path) -> Result<ToolResult, ToolError> {
    let mut reader = tokio::fs::read_dir(path).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        entries.push(if is_dir { format!("{name}/") } else { name });
    }
    entries.sort();
    let count = entries.len();
    let content = if entries.is_empty() {
        "(empty directory)".to_string()
    } else {
        entries.join("\n")
    };
    Ok(ToolResult::ok(content)
        .with_metadata("path", json!(path.display().to_string()))
        .with_metadata("entries", json!(count)))
}

pub(super) async fn read_text(path: &Path, max_bytes: Option<usize>) -> Result<ToolResult, ToolError> {
    let bytes = tokio::fs::read(path).await?;
    let limit = max_bytes.unwrap_or(DEFAULT_READ_LIMIT);
    let truncated = bytes.len() > limit;
    let text = String::from_utf8_lossy(&bytes[..bytes.len().min(limit)]).into_owned();
    Ok(ToolResult::ok(text)
        .with_metadata("path", json!(path.display().to_string()))
        .with_metadata("bytes", json!(bytes.len()))
        .with_metadata("truncated", json!(truncated)))
}

pub(super) async fn write_text(path: &Path, content: &str, append: bool) -> Result<ToolResult, ToolError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let existed = path.exists();
    if append {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
    } else {
        tokio::fs::write(path, content).await?;
    }
    let shown = path.display().to_string();
    let verb = match (append, existed) {
        (true, _) => "Appended",
        (false, true) => "Overwrote",
        (false, false) => "Created",
    };
    Ok(ToolResult::ok(format!("{verb} {shown} ({} bytes)", content.len()))
        .with_metadata("path", json!(shown))
        .with_metadata("existed", json!(existed))
        .with_artifact(Artifact::new(shown, "file")))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
