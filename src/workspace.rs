//! Workspace collaborator: root directory, artifact directory, artifact registry.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Where a run operates and where it leaves its artifacts.
pub trait Workspace: Send + Sync {
    /// Root directory relative paths resolve against.
    fn root(&self) -> PathBuf;

    /// Directory for audit logs and process logs.
    fn artifact_dir(&self) -> PathBuf;

    /// Tell the workspace about a file produced during a run.
    fn register_artifact_hint(&self, path: &Path, source: &str);
}

/// One registered artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHint {
    pub path: PathBuf,
    pub source: String,
    pub registered_at: String,
}

/// A directory-backed workspace with an in-memory artifact registry.
pub struct LocalWorkspace {
    root: PathBuf,
    artifact_dir: PathBuf,
    hints: Mutex<Vec<ArtifactHint>>,
}

impl LocalWorkspace {
    /// Workspace at `root` with artifacts under `root/.desktop_ops/artifacts`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let artifact_dir = root.join(".desktop_ops").join("artifacts");
        Self::with_artifact_dir(root, artifact_dir)
    }

    pub fn with_artifact_dir(root: impl Into<PathBuf>, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            artifact_dir: artifact_dir.into(),
            hints: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of everything registered so far.
    pub fn artifact_hints(&self) -> Vec<ArtifactHint> {
        match self.hints.lock() {
            Ok(hints) => hints.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Workspace for LocalWorkspace {
    fn root(&self) -> PathBuf {
        self.root.clone()
    }

    fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone()
    }

    fn register_artifact_hint(&self, path: &Path, source: &str) {
        let hint = ArtifactHint {
            path: path.to_path_buf(),
            source: source.to_string(),
            registered_at: chrono::Utc::now().to_rfc3339(),
        };
        tracing::debug!(path = %path.display(), source, "artifact registered");
        match self.hints.lock() {
            Ok(mut hints) => hints.push(hint),
            Err(poisoned) => poisoned.into_inner().push(hint),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
