//! Risk classification for proposed tool calls.
//!
//! [`classify_risk`] is a pure function of the tool descriptor, the call
//! arguments and the workspace root (used only to stat the destination of a
//! file write). Precedence, first match wins:
//!
//! 1. explicit per-tool risk override
//! 2. declared network requirement → `NETWORK`
//! 3. built-in file write → `WRITE_DESTRUCTIVE` if the destination exists or
//!    mode is append, else `WRITE_SAFE`
//! 4. declared category: read / write / exec
//! 5. declared shell requirement → `EXEC_USERSPACE`
//! 6. `EXEC_USERSPACE`

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::paths::resolve_path;
use crate::tools::types::{ToolCategory, ToolDescriptor};

/// Provider prefix of the built-in tools.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// How dangerous a proposed action is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DesktopRisk {
    ReadOnly,
    WriteSafe,
    WriteDestructive,
    ExecUserspace,
    ExecPrivileged,
    Network,
}

impl DesktopRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            DesktopRisk::ReadOnly => "READ_ONLY",
            DesktopRisk::WriteSafe => "WRITE_SAFE",
            DesktopRisk::WriteDestructive => "WRITE_DESTRUCTIVE",
            DesktopRisk::ExecUserspace => "EXEC_USERSPACE",
            DesktopRisk::ExecPrivileged => "EXEC_PRIVILEGED",
            DesktopRisk::Network => "NETWORK",
        }
    }

    /// Risks whose approvals are worth reporting in the run summary.
    pub fn is_high_impact(&self) -> bool {
        matches!(
            self,
            DesktopRisk::WriteDestructive | DesktopRisk::ExecPrivileged | DesktopRisk::Network
        )
    }
}

impl std::fmt::Display for DesktopRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a call. See the module docs for the precedence.
pub fn classify_risk(tool: &ToolDescriptor, args: &serde_json::Value, root: &Path) -> DesktopRisk {
    if let Some(risk) = tool.risk_override {
        return risk;
    }
    if tool.requires_network {
        return DesktopRisk::Network;
    }
    if is_file_write_tool(tool) {
        return classify_file_write(args, root);
    }
    match tool.category {
        Some(ToolCategory::Read) => return DesktopRisk::ReadOnly,
        Some(ToolCategory::Write) if tool.mutates_state => return DesktopRisk::WriteDestructive,
        Some(ToolCategory::Write) => return DesktopRisk::WriteSafe,
        Some(ToolCategory::Exec) => return DesktopRisk::ExecUserspace,
        None => {}
    }
    // Shell requirement and the default land on the same risk.
    DesktopRisk::ExecUserspace
}

/// Whether `tool` is the built-in "write a file" action.
pub fn is_file_write_tool(tool: &ToolDescriptor) -> bool {
    tool.qualified_id.starts_with(BUILTIN_PREFIX)
        && matches!(tool.name.as_str(), "write_text" | "write_file")
}

fn classify_file_write(args: &serde_json::Value, root: &Path) -> DesktopRisk {
    let append = args
        .get("mode")
        .and_then(|m| m.as_str())
        .is_some_and(|m| m.eq_ignore_ascii_case("append"));
    if append {
        return DesktopRisk::WriteDestructive;
    }
    let exists = args
        .get("path")
        .and_then(|p| p.as_str())
        .is_some_and(|p| resolve_path(p, root).exists());
    if exists {
        DesktopRisk::WriteDestructive
    } else {
        DesktopRisk::WriteSafe
    }
}

/// The command string of a shell-like call, if any.
///
/// Accepts a `command` string or an `argv` array (joined with spaces).
pub fn command_argument(tool: &ToolDescriptor, args: &serde_json::Value) -> Option<String> {
    let shell_like = tool.requires_shell || tool.category == Some(ToolCategory::Exec);
    if !shell_like {
        return None;
    }
    if let Some(command) = args.get("command").and_then(|c| c.as_str()) {
        return Some(command.trim().to_string());
    }
    let argv = args.get("argv")?.as_array()?;
    let parts: Vec<&str> = argv.iter().filter_map(|a| a.as_str()).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// `qualified_id` or `qualified_id:command`, the string matched against the allowlist.
pub fn allowlist_key(tool: &ToolDescriptor, args: &serde_json::Value) -> String {
    match command_argument(tool, args) {
        Some(command) => format!("{}:{command}", tool.qualified_id),
        None => tool.qualified_id.clone(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
