//! Tool error types.
//!
//! These never escape a provider's `run_tool`: they are converted into failed
//! [`ToolResult`](super::types::ToolResult)s at the provider seam.

use thiserror::Error;

/// Errors raised while resolving or executing a tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with this name is registered.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Arguments did not match the tool's expectations.
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A path argument fell outside the paths this call was approved for.
    #[error("path not permitted: {path} ({reason})")]
    PathRejected { path: String, reason: String },

    /// A child process could not be spawned.
    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    /// A process id that the provider does not track.
    #[error("unknown process: '{process_id}'")]
    UnknownProcess { process_id: String },

    /// A command exceeded its time limit.
    #[error("'{command}' timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    /// HTTP request failed.
    #[error("http error: {reason}")]
    Http { reason: String },

    /// Filesystem error.
    #[error("io error: {reason}")]
    Io { reason: String },
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::Io {
            reason: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        ToolError::Http {
            reason: e.to_string(),
        }
    }
}
