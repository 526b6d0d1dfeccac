//! Per-run state.
//!
//! One [`RunContext`] per `run()` / `plan()` call. Approvals, caches, active
//! processes and the audit log all live here and die with the run; nothing
//! is shared between runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::types::ProcessHandle;
use crate::audit::events::{AuditEvent, AuditLog};
use crate::config::{DesktopOpsConfig, DesktopOpsMode};
use crate::governance::approval::ApprovalLedger;
use crate::governance::paths::{PathCache, PathPolicy};
use crate::governance::policy_cache::PolicyCache;
use crate::tools::types::Artifact;

#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub goal: String,
    pub cwd: PathBuf,
    /// Nearest ancestor of `cwd` containing `.git`.
    pub repo_root: Option<PathBuf>,
    /// Name of the active virtualenv, from `VIRTUAL_ENV`.
    pub virtualenv: Option<String>,
    pub mode: DesktopOpsMode,
    pub approvals: ApprovalLedger,
    pub active_processes: HashMap<String, ProcessHandle>,
    pub audit: AuditLog,
    pub path_policy: PathPolicy,
    pub policy_cache: PolicyCache,
    pub path_cache: PathCache,
    /// Current loop step (model turn).
    pub step_index: usize,
    /// Artifacts collected so far, in order of appearance.
    pub artifacts: Vec<Artifact>,
    /// Tool calls that ran and succeeded.
    pub successful_calls: usize,
}

impl RunContext {
    pub fn new(goal: &str, cwd: &Path, mode: DesktopOpsMode, config: &DesktopOpsConfig) -> Self {
        let path_policy = PathPolicy::new(cwd, &config.allowed_roots, &config.denied_roots);
        let cwd = path_policy.workspace_root().to_path_buf();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            goal: goal.to_string(),
            repo_root: find_repo_root(&cwd),
            virtualenv: virtualenv_name(std::env::var("VIRTUAL_ENV").ok().as_deref()),
            cwd,
            mode,
            approvals: ApprovalLedger::new(),
            active_processes: HashMap::new(),
            audit: AuditLog::new(),
            path_policy,
            policy_cache: PolicyCache::new(),
            path_cache: PathCache::new(),
            step_index: 0,
            artifacts: Vec::new(),
            successful_calls: 0,
        }
    }

    pub fn push(&mut self, event: AuditEvent) {
        self.audit.push(event);
    }

    /// Record an artifact: kept for the result and logged as an `artifact` event.
    pub fn add_artifact(&mut self, artifact: Artifact) {
        if !self.artifacts.contains(&artifact) {
            self.artifacts.push(artifact.clone());
        }
        self.audit.push(AuditEvent::Artifact { artifact });
    }

    /// First eight hex characters of the run id, used in file names.
    pub fn short_id(&self) -> String {
        self.run_id.chars().filter(|c| *c != '-').take(8).collect()
    }
}

/// Walk up from `start` looking for a `.git` entry.
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Basename of a `VIRTUAL_ENV` value.
pub fn virtualenv_name(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    Path::new(raw)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
