//! Path validation against the workspace root, allowed roots and denied roots.
//!
//! Validation never fails with an `Err` at the call site that matters: the
//! [`PathCache`] turns every lookup into a [`PathValidationResult`] so one
//! call with several path arguments can report all of them at once.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::policy_cache::stable_hash;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Why a path was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Path denied by policy: {path}")]
    Denied { path: String },

    #[error("Relative path escapes workspace: {path}")]
    EscapesWorkspace { path: String },

    #[error("Path outside allowed locations: {path}")]
    OutsideAllowed { path: String },
}

impl PathError {
    pub fn violation(&self) -> PathViolation {
        match self {
            PathError::Denied { .. } => PathViolation::Denied,
            PathError::EscapesWorkspace { .. } => PathViolation::EscapesWorkspace,
            PathError::OutsideAllowed { .. } => PathViolation::OutsideAllowed,
        }
    }
}

/// Machine-readable category of a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathViolation {
    Denied,
    EscapesWorkspace,
    OutsideAllowed,
}

impl PathViolation {
    /// Violations the operator may override for a single call.
    pub fn is_overridable(&self) -> bool {
        !matches!(self, PathViolation::Denied)
    }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Expand a leading `~` to the user's home directory.
pub fn expand_user(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Collapse `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve `raw` to an absolute path: `~` expansion, relative paths joined to
/// `root`, symlinks resolved for the longest existing prefix.
///
/// Works for paths that do not exist yet (the destination of a write).
pub fn resolve_path(raw: &str, root: &Path) -> PathBuf {
    let expanded = expand_user(raw.trim());
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    };
    canonicalize_lenient(&joined)
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
pub fn canonicalize_lenient(path: &Path) -> PathBuf {
    let path = normalize_lexically(path);
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = std::fs::canonicalize(&existing) {
            let mut out = canonical;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path,
        }
    }
}

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Resolved roots for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPolicy {
    workspace_root: PathBuf,
    allowed_roots: Vec<PathBuf>,
    denied_roots: Vec<PathBuf>,
}

impl PathPolicy {
    /// Resolve every root once, up front.
    pub fn new(workspace_root: &Path, allowed_roots: &[String], denied_roots: &[String]) -> Self {
        let workspace_root = canonicalize_lenient(workspace_root);
        let resolve_all = |roots: &[String]| -> Vec<PathBuf> {
            roots
                .iter()
                .filter(|r| !r.trim().is_empty())
                .map(|r| resolve_path(r, &workspace_root))
                .collect()
        };
        Self {
            allowed_roots: resolve_all(allowed_roots),
            denied_roots: resolve_all(denied_roots),
            workspace_root,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn denied_roots(&self) -> &[PathBuf] {
        &self.denied_roots
    }

    /// Workspace root followed by the configured allowed roots.
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.workspace_root.clone()];
        for root in &self.allowed_roots {
            if !roots.contains(root) {
                roots.push(root.clone());
            }
        }
        roots
    }

    /// Resolve and check one raw path argument.
    pub fn validate(&self, raw: &str) -> Result<PathBuf, PathError> {
        let resolved = resolve_path(raw, &self.workspace_root);
        let shown = resolved.display().to_string();

        if self.denied_roots.iter().any(|d| resolved.starts_with(d)) {
            return Err(PathError::Denied { path: shown });
        }

        let expanded = expand_user(raw.trim());
        if expanded.is_relative() && !resolved.starts_with(&self.workspace_root) {
            return Err(PathError::EscapesWorkspace { path: shown });
        }

        if self.roots().iter().any(|root| resolved.starts_with(root)) {
            Ok(resolved)
        } else {
            Err(PathError::OutsideAllowed { path: shown })
        }
    }

    /// Stable fingerprint of the allowed-roots set.
    pub fn roots_version(&self) -> String {
        let roots: Vec<String> = self.roots().iter().map(|r| r.display().to_string()).collect();
        stable_hash(&serde_json::json!(roots))
    }

    /// Stable fingerprint of the denied-roots set.
    pub fn denylist_version(&self) -> String {
        let denied: Vec<String> = self
            .denied_roots
            .iter()
            .map(|r| r.display().to_string())
            .collect();
        stable_hash(&serde_json::json!(denied))
    }
}

// ─── Results + cache ─────────────────────────────────────────────────────────

/// Structured outcome of validating one path argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathValidationResult {
    /// The raw argument value.
    pub value: String,
    pub resolved: Option<String>,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation: Option<PathViolation>,
    /// `true` when served from the path cache.
    #[serde(default)]
    pub cached: bool,
}

/// Per-run cache of path validations keyed by (path, roots).
#[derive(Debug, Default)]
pub struct PathCache {
    entries: HashMap<String, PathValidationResult>,
    hits: u64,
    misses: u64,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `raw` under `policy`, reusing a previous result when possible.
    pub fn validate(&mut self, policy: &PathPolicy, raw: &str) -> PathValidationResult {
        let key = stable_hash(&serde_json::json!({
            "path": raw.trim(),
            "workspace": policy.workspace_root.display().to_string(),
            "roots": policy.roots_version(),
            "denied": policy.denylist_version(),
        }));

        if let Some(entry) = self.entries.get(&key) {
            self.hits += 1;
            let mut hit = entry.clone();
            hit.cached = true;
            return hit;
        }

        self.misses += 1;
        let result = match policy.validate(raw) {
            Ok(resolved) => PathValidationResult {
                value: raw.to_string(),
                resolved: Some(resolved.display().to_string()),
                allowed: true,
                error: None,
                violation: None,
                cached: false,
            },
            Err(err) => {
                tracing::debug!(path = raw, error = %err, "path rejected");
                PathValidationResult {
                    value: raw.to_string(),
                    resolved: Some(resolve_path(raw, &policy.workspace_root).display().to_string()),
                    allowed: false,
                    error: Some(err.to_string()),
                    violation: Some(err.violation()),
                    cached: false,
                }
            }
        };
        self.entries.insert(key, result.clone());
        result
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(dir: &Path) -> PathPolicy {
        PathPolicy::new(dir, &[], &[])
    }

    #[test]
    fn test_relative_path_inside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let resolved = policy.validate("notes/a.txt").unwrap();
        assert!(resolved.starts_with(policy.workspace_root()));
        assert!(resolved.ends_with("notes/a.txt"));
    }

    #[test]
    fn test_relative_escape_rejected_even_if_allowed_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("ws");
        std::fs::create_dir(&ws).unwrap();
        let sibling = dir.path().join("other");
        std::fs::create_dir(&sibling).unwrap();
        let policy = PathPolicy::new(&ws, &[sibling.display().to_string()], &[]);

        let err = policy.validate("../other/x.txt").unwrap_err();
        assert_eq!(err.violation(), PathViolation::EscapesWorkspace);
        // The same location is fine when named absolutely.
        assert!(policy.validate(&sibling.join("x.txt").display().to_string()).is_ok());
    }

    #[test]
    fn test_absolute_outside_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("ws");
        std::fs::create_dir(&ws).unwrap();
        let policy = policy(&ws);
        let err = policy
            .validate(&dir.path().join("elsewhere.txt").display().to_string())
            .unwrap_err();
        assert!(err.to_string().starts_with("Path outside allowed locations"));
        assert!(err.violation().is_overridable());
    }

    #[test]
    fn test_denied_root_wins_inside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("secrets")).unwrap();
        let policy = PathPolicy::new(dir.path(), &[], &["secrets".to_string()]);
        let err = policy.validate("secrets/key.pem").unwrap_err();
        assert_eq!(err.violation(), PathViolation::Denied);
        assert!(!err.violation().is_overridable());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("ws");
        let outside = dir.path().join("outside");
        std::fs::create_dir(&ws).unwrap();
        std::fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, ws.join("link")).unwrap();
        let policy = policy(&ws);
        let err = policy.validate("link/file.txt").unwrap_err();
        assert_eq!(err.violation(), PathViolation::EscapesWorkspace);
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }

    #[test]
    fn test_cache_marks_second_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let mut cache = PathCache::new();
        let first = cache.validate(&policy, "a.txt");
        let second = cache.validate(&policy, "a.txt");
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.resolved, second.resolved);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn test_cache_key_changes_with_roots() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = PathCache::new();
        let narrow = policy(dir.path());
        let wide = PathPolicy::new(dir.path(), &["/tmp".to_string()], &[]);
        cache.validate(&narrow, "a.txt");
        let result = cache.validate(&wide, "a.txt");
        assert!(!result.cached);
        assert_ne!(narrow.roots_version(), wide.roots_version());
    }

    #[test]
    fn test_rejected_result_is_structured() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let mut cache = PathCache::new();
        let result = cache.validate(&policy, "../../etc/passwd");
        assert!(!result.allowed);
        assert_eq!(result.violation, Some(PathViolation::EscapesWorkspace));
        assert!(result.error.unwrap().contains("escapes workspace"));
    }
}
