//! Persisted per-run audit record.
//!
//! One JSON document per run, written to the workspace artifact directory as
//! `desktop_ops_<YYYYmmdd_HHMMSS>_<run8>.json`. The record carries the outcome
//! so a report can be rebuilt from the file alone.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::events::AuditEvent;
use super::summary::{RunReport, SummaryOutcome};
use crate::config::DesktopOpsMode;
use crate::desktop_ops::errors::EngineError;
use crate::desktop_ops::types::RunStatus;
use crate::tools::types::Artifact;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub goal: String,
    pub mode: DesktopOpsMode,
    pub cwd: String,
    #[serde(default)]
    pub repo_root: Option<String>,
    #[serde(default)]
    pub virtualenv: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub reason: Option<String>,
    /// Artifacts collected during the run (also present as `artifact` events).
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    pub audit_log: Vec<AuditEvent>,
}

impl RunRecord {
    /// File name for a run started now.
    pub fn file_name(run_id: &str) -> String {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let short: String = run_id.chars().filter(|c| *c != '-').take(8).collect();
        format!("desktop_ops_{stamp}_{short}.json")
    }

    /// Write the record under `dir`, creating it if needed.
    pub fn write(&self, dir: &Path, run_id: &str) -> Result<PathBuf, EngineError> {
        std::fs::create_dir_all(dir).map_err(|e| EngineError::AuditPersist {
            reason: format!("cannot create {}: {e}", dir.display()),
        })?;
        let path = dir.join(Self::file_name(run_id));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|e| EngineError::AuditPersist {
            reason: format!("cannot write {}: {e}", path.display()),
        })?;
        tracing::info!(path = %path.display(), events = self.audit_log.len(), "audit record written");
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| EngineError::AuditPersist {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        serde_json::from_str(&raw).map_err(|e| EngineError::AuditPersist {
            reason: format!("malformed audit record {}: {e}", path.display()),
        })
    }

    /// Rebuild the run report from this record.
    pub fn report(&self) -> RunReport {
        RunReport::build(
            self.mode,
            &self.audit_log,
            &self.artifacts,
            SummaryOutcome {
                status: self.status,
                reason: self.reason.clone(),
            },
        )
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RunRecord {
        RunRecord {
            goal: "list files".into(),
            mode: DesktopOpsMode::Commander,
            cwd: "/work".into(),
            repo_root: Some("/work".into()),
            virtualenv: None,
            status: RunStatus::Stopped,
            reason: Some("Max steps reached.".into()),
            artifacts: vec![Artifact::new("/work/a.txt", "file")],
            audit_log: vec![AuditEvent::Nudge { step: 0, count: 1 }],
        }
    }

    #[test]
    fn test_file_name_shape() {
        let name = RunRecord::file_name("1234abcd-ef00-0000-0000-000000000000");
        assert!(name.starts_with("desktop_ops_"));
        assert!(name.ends_with("_1234abcd.json"));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let original = record();
        let path = original.write(&dir.path().join("nested"), "run-id").unwrap();
        assert!(path.exists());
        let loaded = RunRecord::load(&path).unwrap();
        assert_eq!(loaded, original);

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["status"], "stopped");
        assert_eq!(value["audit_log"][0]["event"], "nudge");
    }

    #[test]
    fn test_load_malformed_is_persist_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            RunRecord::load(&path),
            Err(EngineError::AuditPersist { .. })
        ));
    }
}
