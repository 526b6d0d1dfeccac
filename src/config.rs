//! Desktop Ops configuration loading and validation.
//!
//! Reads a YAML document (typically `desktop_ops.yaml`) into
//! [`DesktopOpsConfig`]. Every field has a default so an empty document is a
//! valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::desktop_ops::errors::EngineError;
use crate::governance::risk::DesktopRisk;

// ─── Public Types ────────────────────────────────────────────────────────────

/// Operating posture controlling how much risk is auto-approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesktopOpsMode {
    /// Human confirms the plan up front; safe writes are auto-approved.
    Guide,
    /// Default posture: read-only and safe writes run unattended.
    Commander,
    /// Every call, including reads, needs explicit approval.
    Strict,
}

impl DesktopOpsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DesktopOpsMode::Guide => "guide",
            DesktopOpsMode::Commander => "commander",
            DesktopOpsMode::Strict => "strict",
        }
    }
}

impl std::fmt::Display for DesktopOpsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of the end-of-run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryFormat {
    #[default]
    Text,
    Markdown,
    Json,
}

/// Backoff and budget parameters for supervised process polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessPollConfig {
    /// First delay between reads of process output.
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    /// Cap for the doubling delay.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    /// Seconds without new output before the process counts as stalled.
    #[serde(default = "default_max_idle_seconds")]
    pub max_idle_seconds: f64,
    /// Total supervision budget in seconds.
    #[serde(default = "default_max_total_seconds")]
    pub max_total_seconds: f64,
    /// Byte cap applied by the output condenser.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// Line cap applied by the output condenser.
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

impl Default for ProcessPollConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
            max_idle_seconds: default_max_idle_seconds(),
            max_total_seconds: default_max_total_seconds(),
            max_bytes: default_max_bytes(),
            max_lines: default_max_lines(),
        }
    }
}

/// Top-level Desktop Ops configuration (mirrors `desktop_ops.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesktopOpsConfig {
    #[serde(default = "default_mode")]
    pub mode: DesktopOpsMode,
    /// Model name passed through to the chat client.
    #[serde(default = "default_model")]
    pub model: String,
    /// Upper bound on model turns per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Failures tolerated per tool name before the run fails.
    #[serde(default = "default_max_retries")]
    pub max_retries_per_step: u32,
    #[serde(default)]
    pub process_poll: ProcessPollConfig,
    /// Exact-match entries of the form `tool_id` or `tool_id:command`.
    #[serde(default)]
    pub auto_exec_allowlist: Vec<String>,
    /// Extra filesystem roots tools may touch besides the workspace root.
    #[serde(default)]
    pub allowed_roots: Vec<String>,
    /// Roots that are always off limits, even inside an allowed root.
    #[serde(default)]
    pub denied_roots: Vec<String>,
    /// Risk kinds that need confirmation unless allowlisted.
    #[serde(default = "default_require_approval_for")]
    pub require_approval_for: Vec<DesktopRisk>,
    #[serde(default)]
    pub summary_format: SummaryFormat,
    /// Optional extras installed by the python bootstrap recipe (`.[dev,test]`).
    #[serde(default)]
    pub python_bootstrap_extras: Vec<String>,
}

impl Default for DesktopOpsConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            model: default_model(),
            max_steps: default_max_steps(),
            max_retries_per_step: default_max_retries(),
            process_poll: ProcessPollConfig::default(),
            auto_exec_allowlist: Vec::new(),
            allowed_roots: Vec::new(),
            denied_roots: Vec::new(),
            require_approval_for: default_require_approval_for(),
            summary_format: SummaryFormat::default(),
            python_bootstrap_extras: Vec::new(),
        }
    }
}

fn default_mode() -> DesktopOpsMode {
    DesktopOpsMode::Commander
}
fn default_model() -> String {
    "default".to_string()
}
fn default_max_steps() -> usize {
    20
}
fn default_max_retries() -> u32 {
    2
}
fn default_initial_ms() -> u64 {
    250
}
fn default_max_ms() -> u64 {
    2000
}
fn default_max_idle_seconds() -> f64 {
    30.0
}
fn default_max_total_seconds() -> f64 {
    300.0
}
fn default_max_bytes() -> usize {
    4000
}
fn default_max_lines() -> usize {
    40
}
fn default_require_approval_for() -> Vec<DesktopRisk> {
    vec![
        DesktopRisk::WriteDestructive,
        DesktopRisk::ExecPrivileged,
        DesktopRisk::Network,
    ]
}

// ─── Loading ─────────────────────────────────────────────────────────────────

impl DesktopOpsConfig {
    /// Parse a configuration from YAML text and validate it.
    pub fn from_yaml_str(raw: &str) -> Result<Self, EngineError> {
        // An empty document deserializes to unit, not to a mapping.
        let config: DesktopOpsConfig = if raw.trim().is_empty() {
            DesktopOpsConfig::default()
        } else {
            serde_yaml::from_str(raw).map_err(|e| EngineError::Config {
                reason: format!("failed to parse config: {e}"),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config = Self::from_yaml_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            mode = %config.mode,
            max_steps = config.max_steps,
            "loaded desktop ops config"
        );
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_steps == 0 {
            return Err(EngineError::Config {
                reason: "max_steps must be greater than zero".into(),
            });
        }
        let poll = &self.process_poll;
        if poll.initial_ms == 0 {
            return Err(EngineError::Config {
                reason: "process_poll.initial_ms must be greater than zero".into(),
            });
        }
        if poll.max_ms < poll.initial_ms {
            return Err(EngineError::Config {
                reason: format!(
                    "process_poll.max_ms ({}) is below initial_ms ({})",
                    poll.max_ms, poll.initial_ms
                ),
            });
        }
        if poll.max_idle_seconds <= 0.0 || poll.max_total_seconds <= 0.0 {
            return Err(EngineError::Config {
                reason: "process_poll budgets must be positive".into(),
            });
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = DesktopOpsConfig::from_yaml_str("").unwrap();
        assert_eq!(config, DesktopOpsConfig::default());
        assert_eq!(config.mode, DesktopOpsMode::Commander);
        assert_eq!(config.max_steps, 20);
        assert_eq!(
            config.require_approval_for,
            vec![
                DesktopRisk::WriteDestructive,
                DesktopRisk::ExecPrivileged,
                DesktopRisk::Network
            ]
        );
    }

    #[test]
    fn test_partial_document_overrides_fields() {
        let raw = r#"
mode: strict
max_retries_per_step: 0
auto_exec_allowlist: ["builtin:shell:run:git status"]
require_approval_for: [NETWORK]
summary_format: markdown
process_poll:
  initial_ms: 10
  max_idle_seconds: 1.5
"#;
        let config = DesktopOpsConfig::from_yaml_str(raw).unwrap();
        assert_eq!(config.mode, DesktopOpsMode::Strict);
        assert_eq!(config.max_retries_per_step, 0);
        assert_eq!(config.auto_exec_allowlist.len(), 1);
        assert_eq!(config.require_approval_for, vec![DesktopRisk::Network]);
        assert_eq!(config.summary_format, SummaryFormat::Markdown);
        assert_eq!(config.process_poll.initial_ms, 10);
        assert_eq!(config.process_poll.max_ms, 2000);
        assert!((config.process_poll.max_idle_seconds - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejects_inverted_poll_delays() {
        let raw = "process_poll:\n  initial_ms: 500\n  max_ms: 100\n";
        let err = DesktopOpsConfig::from_yaml_str(raw).unwrap_err();
        assert!(err.to_string().contains("max_ms"));
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(DesktopOpsConfig::from_yaml_str("mode: yolo").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desktop_ops.yaml");
        std::fs::write(&path, "mode: guide\nmax_steps: 5\n").unwrap();
        let config = DesktopOpsConfig::load(&path).unwrap();
        assert_eq!(config.mode, DesktopOpsMode::Guide);
        assert_eq!(config.max_steps, 5);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = DesktopOpsConfig::load(Path::new("/nonexistent/desktop_ops.yaml")).unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }
}
