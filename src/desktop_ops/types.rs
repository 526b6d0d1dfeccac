//! Result and process-handle types for Desktop Ops runs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::condenser::OutputCondenser;
use crate::audit::events::AuditEvent;
use crate::tools::types::Artifact;

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    /// Ended without explicit success; recoverable by the operator.
    Stopped,
    /// Retry exhaustion or an unrecoverable error.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Stopped => "stopped",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        *self == RunStatus::Completed
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `run()` hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesktopOpsResult {
    pub status: RunStatus,
    /// Rendered run report in the configured format.
    pub summary: String,
    pub audit_log: Vec<AuditEvent>,
    pub artifacts: Vec<Artifact>,
    /// Persisted audit record; `None` when it could not be written.
    pub audit_log_path: Option<PathBuf>,
}

/// A supervised long-running process.
#[derive(Debug)]
pub struct ProcessHandle {
    /// Unique within the run.
    pub process_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub last_output_at: tokio::time::Instant,
    pub last_output_text: String,
    /// Verbatim archive of every chunk read.
    pub raw_log_path: Option<PathBuf>,
    pub condenser: OutputCondenser,
}

impl ProcessHandle {
    pub fn new(
        process_id: &str,
        raw_log_path: Option<PathBuf>,
        max_bytes: usize,
        max_lines: usize,
    ) -> Self {
        Self {
            process_id: process_id.to_string(),
            started_at: chrono::Utc::now(),
            last_output_at: tokio::time::Instant::now(),
            last_output_text: String::new(),
            raw_log_path,
            condenser: OutputCondenser::new(max_bytes, max_lines),
        }
    }
}
