//! Built-in tool provider.
//!
//! - `fs`: `builtin:fs:list_dir`, `builtin:fs:read_text`, `builtin:fs:write_text`
//! - `shell`: `builtin:shell:run`, `start`, `read`, `stop`
//! - `web`: `builtin:web:fetch`
//!
//! Every path argument is checked again here against the paths the gateway
//! approved for the call; the provider never trusts the caller's arguments.

pub mod fs;
pub mod shell;
pub mod web;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::errors::ToolError;
use super::provider::ToolProvider;
use super::types::{ToolAudit, ToolDescriptor, ToolResult};
use crate::governance::paths::{canonicalize_lenient, resolve_path};
use crate::inference::types::{ToolCall, ToolDefinition};

use shell::ProcessTable;

/// HTTP timeout for `web:fetch`.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Alternate names the engine and models use for the process tools.
const ALIASES: &[(&str, &str)] = &[
    ("run_command", shell::RUN),
    ("start_process", shell::START),
    ("read_process_output", shell::READ),
    ("process_read", shell::READ),
    ("read_process", shell::READ),
    ("stop_process", shell::STOP),
    ("terminate_process", shell::STOP),
    ("kill_process", shell::STOP),
    ("write_file", fs::WRITE_TEXT),
    ("read_file", fs::READ_TEXT),
];

/// The built-in filesystem, shell and web tools rooted at one directory.
pub struct BuiltinTools {
    root: PathBuf,
    tools: Vec<ToolDescriptor>,
    processes: ProcessTable,
    http: reqwest::Client,
}

impl BuiltinTools {
    pub fn new(root: &Path) -> Self {
        let mut tools = fs::descriptors();
        tools.extend(shell::descriptors());
        tools.extend(web::descriptors());
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            root: canonicalize_lenient(root),
            tools,
            processes: ProcessTable::new(),
            http,
        }
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// Resolve a path argument and check it against `allowed`
    /// (defaults to the provider root).
    fn permitted_path(
        &self,
        tool: &str,
        args: &serde_json::Value,
        param: &str,
        allowed: Option<&[PathBuf]>,
    ) -> Result<PathBuf, ToolError> {
        let raw = args.get(param).and_then(|v| v.as_str()).unwrap_or(".");
        if raw.trim().is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: tool.to_string(),
                reason: format!("'{param}' must not be empty"),
            });
        }
        let resolved = resolve_path(raw, &self.root);
        let default_roots = [self.root.clone()];
        let roots = allowed.unwrap_or(&default_roots);
        if roots.iter().any(|root| resolved.starts_with(root)) {
            Ok(resolved)
        } else {
            Err(ToolError::PathRejected {
                path: resolved.display().to_string(),
                reason: "not within the approved paths for this call".into(),
            })
        }
    }

    fn required_str<'a>(tool: &str, args: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
        args.get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: tool.to_string(),
                reason: format!("missing string argument '{key}'"),
            })
    }

    async fn dispatch(
        &self,
        tool: &ToolDescriptor,
        args: &serde_json::Value,
        allowed: Option<&[PathBuf]>,
    ) -> Result<ToolResult, ToolError> {
        let id = tool.qualified_id.as_str();
        let max_bytes = args
            .get("max_bytes")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize);
        match id {
            fs::LIST_DIR => fs::list_dir(&self.permitted_path(id, args, "path", allowed)?).await,
            fs::READ_TEXT => {
                let path = self.permitted_path(id, args, "path", allowed)?;
                fs::read_text(&path, max_bytes).await
            }
            fs::WRITE_TEXT => {
                Self::required_str(id, args, "path")?;
                let path = self.permitted_path(id, args, "path", allowed)?;
                let content = Self::required_str(id, args, "content")?;
                let append = args
                    .get("mode")
                    .and_then(|m| m.as_str())
                    .is_some_and(|m| m.eq_ignore_ascii_case("append"));
                fs::write_text(&path, content, append).await
            }
            shell::RUN => {
                let argv = shell::parse_argv(id, args)?;
                let cwd = self.permitted_path(id, args, "cwd", allowed)?;
                let timeout = args.get("timeout_seconds").and_then(|v| v.as_u64());
                shell::run(&argv, &cwd, timeout).await
            }
            shell::START => {
                let argv = shell::parse_argv(id, args)?;
                let cwd = self.permitted_path(id, args, "cwd", allowed)?;
                self.processes.start(&argv, &cwd).await
            }
            shell::READ => {
                let process_id = Self::required_str(id, args, "process_id")?;
                self.processes.read(process_id).await
            }
            shell::STOP => {
                let process_id = Self::required_str(id, args, "process_id")?;
                self.processes.stop(process_id).await
            }
            web::FETCH => {
                let url = Self::required_str(id, args, "url")?;
                web::fetch(&self.http, url, max_bytes).await
            }
            other => Err(ToolError::UnknownTool {
                name: other.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ToolProvider for BuiltinTools {
    fn resolve(&self, name: &str) -> Result<ToolDescriptor, ToolError> {
        let name = name.trim();
        if let Some(tool) = self.tools.iter().find(|t| t.qualified_id == name) {
            return Ok(tool.clone());
        }
        if let Some((_, target)) = ALIASES.iter().find(|(alias, _)| *alias == name) {
            if let Some(tool) = self.tools.iter().find(|t| t.qualified_id == *target) {
                return Ok(tool.clone());
            }
        }
        // A bare short name resolves only when it is unambiguous.
        let mut matches = self.tools.iter().filter(|t| t.name == name);
        match (matches.next(), matches.next()) {
            (Some(tool), None) => Ok(tool.clone()),
            _ => Err(ToolError::UnknownTool {
                name: name.to_string(),
            }),
        }
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolDescriptor::definition).collect()
    }

    async fn run_tool(
        &self,
        tool: &ToolDescriptor,
        call: &ToolCall,
        allowed_paths: Option<&[PathBuf]>,
    ) -> (ToolResult, ToolAudit) {
        let started = Instant::now();
        let result = match self.dispatch(tool, &call.arguments, allowed_paths).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %tool.qualified_id, error = %e, "builtin tool failed");
                ToolResult::failure(e.to_string())
            }
        };
        let audit = ToolAudit {
            input: call.arguments.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        (result, audit)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn test_resolve_qualified_alias_and_short_name() {
        let dir = tempfile::tempdir().unwrap();
        let tools = BuiltinTools::new(dir.path());
        assert_eq!(tools.resolve(fs::LIST_DIR).unwrap().qualified_id, fs::LIST_DIR);
        assert_eq!(tools.resolve("stop_process").unwrap().qualified_id, shell::STOP);
        assert_eq!(tools.resolve("read_text").unwrap().qualified_id, fs::READ_TEXT);
        assert!(matches!(
            tools.resolve("format_disk"),
            Err(ToolError::UnknownTool { .. })
        ));
    }

    #[test]
    fn test_definitions_cover_every_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tools = BuiltinTools::new(dir.path());
        let names: Vec<String> = tools
            .tool_definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&web::FETCH.to_string()));
    }

    #[tokio::test]
    async fn test_write_and_read_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let tools = BuiltinTools::new(dir.path());
        let write = tools.resolve(fs::WRITE_TEXT).unwrap();
        let (result, audit) = tools
            .run_tool(&write, &call(fs::WRITE_TEXT, json!({"path": "a.txt", "content": "hi"})), None)
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(audit.input["path"], "a.txt");

        let read = tools.resolve(fs::READ_TEXT).unwrap();
        let (result, _) = tools
            .run_tool(&read, &call(fs::READ_TEXT, json!({"path": "a.txt"})), None)
            .await;
        assert_eq!(result.content, "hi");
    }

    #[tokio::test]
    async fn test_path_outside_root_is_rejected_unless_approved() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("ws");
        std::fs::create_dir(&ws).unwrap();
        let outside = dir.path().join("outside.txt");
        std::fs::write(&outside, "secret").unwrap();
        let tools = BuiltinTools::new(&ws);
        let read = tools.resolve(fs::READ_TEXT).unwrap();
        let args = json!({"path": outside.display().to_string()});

        let (denied, _) = tools.run_tool(&read, &call(fs::READ_TEXT, args.clone()), None).await;
        assert!(!denied.success);
        assert!(denied.error.unwrap().contains("not permitted"));

        let approved = vec![canonicalize_lenient(&outside)];
        let (allowed, _) = tools
            .run_tool(&read, &call(fs::READ_TEXT, args), Some(&approved))
            .await;
        assert_eq!(allowed.content, "secret");
    }

    #[tokio::test]
    async fn test_missing_argument_is_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let tools = BuiltinTools::new(dir.path());
        let write = tools.resolve(fs::WRITE_TEXT).unwrap();
        let (result, _) = tools
            .run_tool(&write, &call(fs::WRITE_TEXT, json!({"path": "a.txt"})), None)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("content"));
    }
}
