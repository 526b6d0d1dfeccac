//! Content-addressed cache of policy decisions.
//!
//! Keys are SHA-256 hashes of a stable serialization of every input the
//! decision depends on: qualified tool id, normalized arguments, mode, and
//! the allowlist / denylist / allowed-roots versions. There is no
//! invalidation step; a changed input produces a different key. Leaving an
//! input out of the key would make stale hits possible.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::paths::PathValidationResult;
use super::risk::DesktopRisk;
use crate::config::DesktopOpsMode;

/// Hex SHA-256 of the JSON serialization of `value`.
///
/// `serde_json::Map` keeps keys sorted, so equal values hash equally
/// regardless of insertion order.
pub fn stable_hash(value: &serde_json::Value) -> String {
    let serialized = value.to_string();
    format!("{:x}", Sha256::digest(serialized.as_bytes()))
}

/// Order-insensitive version string of a list such as the allowlist.
pub fn list_version(items: &[String]) -> String {
    let mut sorted: Vec<&String> = items.iter().collect();
    sorted.sort();
    sorted.dedup();
    stable_hash(&serde_json::json!(sorted))
}

/// Every input a policy decision depends on.
#[derive(Debug, Clone)]
pub struct PolicyKey<'a> {
    pub tool_id: &'a str,
    pub args: &'a serde_json::Value,
    pub mode: DesktopOpsMode,
    pub allowlist_version: &'a str,
    pub denylist_version: &'a str,
    pub roots_version: &'a str,
}

impl PolicyKey<'_> {
    pub fn digest(&self) -> String {
        stable_hash(&serde_json::json!({
            "tool_id": self.tool_id,
            "args": self.args,
            "mode": self.mode.as_str(),
            "allowlist": self.allowlist_version,
            "denylist": self.denylist_version,
            "roots": self.roots_version,
        }))
    }
}

/// The cached part of a gateway decision. Never includes the human answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyCacheEntry {
    pub risk: DesktopRisk,
    pub approval_required: bool,
    pub allowlist_match: bool,
    pub denylist_match: bool,
    pub paths_validated: BTreeMap<String, PathValidationResult>,
}

/// Per-run policy cache.
#[derive(Debug, Default)]
pub struct PolicyCache {
    entries: HashMap<String, PolicyCacheEntry>,
    hits: u64,
    misses: u64,
}

impl PolicyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`; a hit returns the entry with every path result marked cached.
    pub fn get(&mut self, key: &str) -> Option<PolicyCacheEntry> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits += 1;
                let mut hit = entry.clone();
                for result in hit.paths_validated.values_mut() {
                    result.cached = true;
                }
                Some(hit)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: String, entry: PolicyCacheEntry) {
        self.entries.insert(key, entry);
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
