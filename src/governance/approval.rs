//! Approval Gateway: mode policy, allowlist, and operator approvals.
//!
//! Two independent gates run for every call:
//! - **Path override**: a path argument outside the allowed roots needs its
//!   own yes, asked every time and recorded as a `path_override` event.
//!   Paths under a denied root are blocked outright.
//! - **Risk gate**: when the mode and risk require approval, a `session`
//!   grant for that risk satisfies it; otherwise the operator is asked.
//!
//! The ledger keeps at most one [`ApprovalRecord`] per risk kind.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::{PathValidationResult, PathViolation};
use super::policy_cache::list_version;
use super::prompt::OperatorPrompt;
use super::risk::{allowlist_key, DesktopRisk};
use crate::config::{DesktopOpsConfig, DesktopOpsMode};
use crate::tools::types::ToolDescriptor;

// ─── Types ──────────────────────────────────────────────────────────────────

/// How long an operator's answer stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    /// Single use; becomes `Denied` as soon as it is consumed.
    Once,
    /// Valid for the rest of the run.
    Session,
    Denied,
}

/// Why a call was or was not allowed to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalReason {
    /// No approval was required.
    Auto,
    /// The operator said yes just now.
    OperatorApproved,
    /// An earlier session-scoped yes for the same risk.
    SessionGrant,
    OperatorDenied,
    /// The operator refused a path outside the workspace.
    PathOutsideWorkspace,
    /// A path fell under a denied root.
    PathDenied,
}

impl ApprovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalReason::Auto => "auto",
            ApprovalReason::OperatorApproved => "operator_approved",
            ApprovalReason::SessionGrant => "session_grant",
            ApprovalReason::OperatorDenied => "operator_denied",
            ApprovalReason::PathOutsideWorkspace => "path_outside_workspace",
            ApprovalReason::PathDenied => "path_denied",
        }
    }
}

impl std::fmt::Display for ApprovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operator's latest answer for one risk kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub risk: DesktopRisk,
    pub approved: bool,
    pub scope: ApprovalScope,
    pub reason: ApprovalReason,
    /// RFC 3339 time of the answer.
    pub timestamp: String,
}

/// Per-run approval records, one per risk kind.
#[derive(Debug, Default)]
pub struct ApprovalLedger {
    records: HashMap<DesktopRisk, ApprovalRecord>,
}

impl ApprovalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, risk: DesktopRisk) -> Option<&ApprovalRecord> {
        self.records.get(&risk)
    }

    /// Whether an approved session-scoped record exists for `risk`.
    pub fn session_approved(&self, risk: DesktopRisk) -> bool {
        self.records
            .get(&risk)
            .is_some_and(|r| r.approved && r.scope == ApprovalScope::Session)
    }

    fn record(&mut self, risk: DesktopRisk, scope: ApprovalScope) {
        let approved = scope != ApprovalScope::Denied;
        let reason = if approved {
            ApprovalReason::OperatorApproved
        } else {
            ApprovalReason::OperatorDenied
        };
        self.records.insert(
            risk,
            ApprovalRecord {
                risk,
                approved,
                scope,
                reason,
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        );
        tracing::info!(risk = %risk, scope = ?scope, approved, "approval recorded");
    }

    /// Spend a `once` record: it turns into a denial.
    fn consume_once(&mut self, risk: DesktopRisk) {
        if let Some(record) = self.records.get_mut(&risk) {
            if record.scope == ApprovalScope::Once {
                record.scope = ApprovalScope::Denied;
                record.approved = false;
            }
        }
    }
}

/// Map an operator answer to a scope.
///
/// `y`/`yes`/`s`/`session` grant the risk for the rest of the run,
/// `o`/`once` grant it for this call only, anything else denies.
pub fn parse_approval_answer(answer: &str) -> ApprovalScope {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" | "s" | "session" => ApprovalScope::Session,
        "o" | "once" => ApprovalScope::Once,
        _ => ApprovalScope::Denied,
    }
}

/// Inputs to one gateway check.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalRequest<'a> {
    pub tool: &'a ToolDescriptor,
    pub args: &'a serde_json::Value,
    pub risk: DesktopRisk,
    pub approval_required: bool,
    pub paths: &'a BTreeMap<String, PathValidationResult>,
}

/// Outcome of the path-override gate, recorded as its own audit event.
#[derive(Debug, Clone, PartialEq)]
pub struct PathOverrideDecision {
    pub approved: bool,
    /// Raw values of the out-of-bounds paths that were asked about.
    pub paths: Vec<String>,
}

/// Outcome of [`ApprovalGateway::check_approval`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub reason: ApprovalReason,
    pub path_override: Option<PathOverrideDecision>,
    /// Resolved out-of-bounds paths the operator approved for this call.
    pub override_paths: Vec<PathBuf>,
}

impl ApprovalDecision {
    fn denied(reason: ApprovalReason, path_override: Option<PathOverrideDecision>) -> Self {
        Self {
            approved: false,
            reason,
            path_override,
            override_paths: Vec::new(),
        }
    }
}

// ─── ApprovalGateway ────────────────────────────────────────────────────────

/// Decides which calls need a human and asks for them.
#[derive(Debug, Clone)]
pub struct ApprovalGateway {
    mode: DesktopOpsMode,
    allowlist: Vec<String>,
    require_approval_for: Vec<DesktopRisk>,
}

impl ApprovalGateway {
    pub fn new(
        mode: DesktopOpsMode,
        allowlist: Vec<String>,
        require_approval_for: Vec<DesktopRisk>,
    ) -> Self {
        Self {
            mode,
            allowlist,
            require_approval_for,
        }
    }

    pub fn from_config(config: &DesktopOpsConfig) -> Self {
        Self::new(
            config.mode,
            config.auto_exec_allowlist.clone(),
            config.require_approval_for.clone(),
        )
    }

    pub fn mode(&self) -> DesktopOpsMode {
        self.mode
    }

    /// Replace the allowlist; the version (and so every cache key) changes with it.
    pub fn set_allowlist(&mut self, allowlist: Vec<String>) {
        self.allowlist = allowlist;
    }

    pub fn allowlist_version(&self) -> String {
        list_version(&self.allowlist)
    }

    /// Exact match of `qualified_id[:command]` against the allowlist.
    pub fn allowlisted(&self, tool: &ToolDescriptor, args: &serde_json::Value) -> bool {
        let key = allowlist_key(tool, args);
        self.allowlist.iter().any(|entry| entry == &key)
    }

    /// Whether a call at `risk` needs the operator.
    pub fn requires_approval(
        &self,
        risk: DesktopRisk,
        tool: &ToolDescriptor,
        args: &serde_json::Value,
    ) -> bool {
        if self.mode == DesktopOpsMode::Strict {
            return true;
        }
        let allowlisted = self.allowlisted(tool, args);
        if self.require_approval_for.contains(&risk) {
            return !allowlisted;
        }
        match risk {
            DesktopRisk::ReadOnly => false,
            DesktopRisk::ExecUserspace if allowlisted => false,
            DesktopRisk::WriteSafe => false,
            DesktopRisk::WriteDestructive
            | DesktopRisk::ExecUserspace
            | DesktopRisk::ExecPrivileged
            | DesktopRisk::Network => true,
        }
    }

    /// Run both gates for one call, prompting as needed.
    pub async fn check_approval(
        &self,
        ledger: &mut ApprovalLedger,
        request: ApprovalRequest<'_>,
        prompt: &dyn OperatorPrompt,
    ) -> ApprovalDecision {
        let tool_id = request.tool.qualified_id.as_str();

        let denied = request
            .paths
            .values()
            .any(|r| r.violation == Some(PathViolation::Denied));
        if denied {
            tracing::warn!(tool = tool_id, "path under denied root, call blocked");
            return ApprovalDecision::denied(ApprovalReason::PathDenied, None);
        }

        let outside: Vec<&PathValidationResult> = request
            .paths
            .values()
            .filter(|r| r.violation.is_some_and(|v| v.is_overridable()))
            .collect();

        let mut path_override = None;
        let mut override_paths = Vec::new();
        if !outside.is_empty() {
            let text = format!("Path outside workspace requested by {tool_id}. Allow? [y/N]: ");
            let answer = prompt.get_user_input(&text).await;
            let approved = parse_approval_answer(&answer) != ApprovalScope::Denied;
            let decision = PathOverrideDecision {
                approved,
                paths: outside.iter().map(|r| r.value.clone()).collect(),
            };
            tracing::info!(tool = tool_id, approved, paths = ?decision.paths, "path override");
            if !approved {
                return ApprovalDecision::denied(
                    ApprovalReason::PathOutsideWorkspace,
                    Some(decision),
                );
            }
            override_paths = outside
                .iter()
                .filter_map(|r| r.resolved.as_ref().map(PathBuf::from))
                .collect();
            path_override = Some(decision);
        }

        if !request.approval_required {
            return ApprovalDecision {
                approved: true,
                reason: ApprovalReason::Auto,
                path_override,
                override_paths,
            };
        }

        if ledger.session_approved(request.risk) {
            tracing::debug!(tool = tool_id, risk = %request.risk, "session grant reused");
            return ApprovalDecision {
                approved: true,
                reason: ApprovalReason::SessionGrant,
                path_override,
                override_paths,
            };
        }

        let text = format!("Approve {} for {tool_id}? [y/N]: ", request.risk);
        let scope = parse_approval_answer(&prompt.get_user_input(&text).await);
        ledger.record(request.risk, scope);

        match scope {
            ApprovalScope::Denied => {
                ApprovalDecision::denied(ApprovalReason::OperatorDenied, path_override)
            }
            ApprovalScope::Once | ApprovalScope::Session => {
                ledger.consume_once(request.risk);
                ApprovalDecision {
                    approved: true,
                    reason: ApprovalReason::OperatorApproved,
                    path_override,
                    override_paths,
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPrompt;
    use crate::tools::types::ToolCategory;
    use serde_json::json;

    const ALL_RISKS: [DesktopRisk; 6] = [
        DesktopRisk::ReadOnly,
        DesktopRisk::WriteSafe,
        DesktopRisk::WriteDestructive,
        DesktopRisk::ExecUserspace,
        DesktopRisk::ExecPrivileged,
        DesktopRisk::Network,
    ];

    fn shell() -> ToolDescriptor {
        ToolDescriptor::new("shell", "run a command").requires_shell()
    }

    fn gateway(mode: DesktopOpsMode, allowlist: &[&str]) -> ApprovalGateway {
        let config = DesktopOpsConfig {
            mode,
            auto_exec_allowlist: allowlist.iter().map(|s| s.to_string()).collect(),
            ..DesktopOpsConfig::default()
        };
        ApprovalGateway::from_config(&config)
    }

    fn outside_path(value: &str) -> BTreeMap<String, PathValidationResult> {
        let mut paths = BTreeMap::new();
        paths.insert(
            "path".to_string(),
            PathValidationResult {
                value: value.to_string(),
                resolved: Some(value.to_string()),
                allowed: false,
                error: Some("Path outside allowed locations".into()),
                violation: Some(PathViolation::OutsideAllowed),
                cached: false,
            },
        );
        paths
    }

    #[test]
    fn test_strict_requires_everything_even_allowlisted() {
        let gw = gateway(DesktopOpsMode::Strict, &["shell:echo ok"]);
        let args = json!({"command": "echo ok"});
        for risk in ALL_RISKS {
            assert!(gw.requires_approval(risk, &shell(), &args), "{risk}");
        }
    }

    #[test]
    fn test_commander_matrix() {
        let gw = gateway(DesktopOpsMode::Commander, &["shell:echo ok"]);
        let allowed = json!({"command": "echo ok"});
        let other = json!({"command": "rm -rf build"});
        let tool = shell();

        assert!(!gw.requires_approval(DesktopRisk::ReadOnly, &tool, &other));
        assert!(!gw.requires_approval(DesktopRisk::WriteSafe, &tool, &other));
        assert!(!gw.requires_approval(DesktopRisk::ExecUserspace, &tool, &allowed));
        assert!(gw.requires_approval(DesktopRisk::ExecUserspace, &tool, &other));
        for risk in [
            DesktopRisk::WriteDestructive,
            DesktopRisk::ExecPrivileged,
            DesktopRisk::Network,
        ] {
            assert!(gw.requires_approval(risk, &tool, &other), "{risk}");
            assert!(!gw.requires_approval(risk, &tool, &allowed), "{risk}");
        }
    }

    #[test]
    fn test_guide_auto_approves_safe_writes() {
        let gw = gateway(DesktopOpsMode::Guide, &[]);
        let tool = ToolDescriptor::new("builtin:fs:write_text", "").category(ToolCategory::Write);
        assert!(!gw.requires_approval(DesktopRisk::WriteSafe, &tool, &json!({})));
        assert!(gw.requires_approval(DesktopRisk::WriteDestructive, &tool, &json!({})));
    }

    #[test]
    fn test_allowlist_is_exact_match() {
        let gw = gateway(DesktopOpsMode::Commander, &["shell:echo ok"]);
        assert!(gw.allowlisted(&shell(), &json!({"command": "echo ok"})));
        assert!(!gw.allowlisted(&shell(), &json!({"command": "echo ok; rm -rf /"})));
        assert!(!gw.allowlisted(&shell(), &json!({"command": "echo"})));
    }

    #[test]
    fn test_parse_approval_answer() {
        assert_eq!(parse_approval_answer("y"), ApprovalScope::Session);
        assert_eq!(parse_approval_answer("YES"), ApprovalScope::Session);
        assert_eq!(parse_approval_answer("once"), ApprovalScope::Once);
        assert_eq!(parse_approval_answer(""), ApprovalScope::Denied);
        assert_eq!(parse_approval_answer("nope"), ApprovalScope::Denied);
    }

    #[tokio::test]
    async fn test_no_prompt_when_not_required() {
        let gw = gateway(DesktopOpsMode::Commander, &[]);
        let prompt = ScriptedPrompt::new(&[]);
        let mut ledger = ApprovalLedger::new();
        let paths = BTreeMap::new();
        let args = json!({});
        let request = ApprovalRequest {
            tool: &shell(),
            args: &args,
            risk: DesktopRisk::ReadOnly,
            approval_required: false,
            paths: &paths,
        };
        let decision = gw.check_approval(&mut ledger, request, &prompt).await;
        assert!(decision.approved);
        assert_eq!(decision.reason, ApprovalReason::Auto);
        assert!(prompt.asked().is_empty());
    }

    #[tokio::test]
    async fn test_session_grant_prompts_once() {
        let gw = gateway(DesktopOpsMode::Commander, &[]);
        let prompt = ScriptedPrompt::new(&["y"]);
        let mut ledger = ApprovalLedger::new();
        let paths = BTreeMap::new();
        let tool = shell();
        let args = json!({"command": "make"});
        let request = ApprovalRequest {
            tool: &tool,
            args: &args,
            risk: DesktopRisk::ExecUserspace,
            approval_required: true,
            paths: &paths,
        };

        let first = gw.check_approval(&mut ledger, request, &prompt).await;
        let second = gw.check_approval(&mut ledger, request, &prompt).await;

        assert_eq!(first.reason, ApprovalReason::OperatorApproved);
        assert_eq!(second.reason, ApprovalReason::SessionGrant);
        assert!(second.approved);
        assert_eq!(prompt.asked().len(), 1);
        assert!(prompt.asked()[0].starts_with("Approve EXEC_USERSPACE for shell?"));
    }

    #[tokio::test]
    async fn test_once_grant_is_consumed() {
        let gw = gateway(DesktopOpsMode::Commander, &[]);
        let prompt = ScriptedPrompt::new(&["once", "n"]);
        let mut ledger = ApprovalLedger::new();
        let paths = BTreeMap::new();
        let tool = shell();
        let args = json!({"command": "make"});
        let request = ApprovalRequest {
            tool: &tool,
            args: &args,
            risk: DesktopRisk::ExecUserspace,
            approval_required: true,
            paths: &paths,
        };

        let first = gw.check_approval(&mut ledger, request, &prompt).await;
        assert!(first.approved);
        let record = ledger.get(DesktopRisk::ExecUserspace).unwrap();
        assert_eq!(record.scope, ApprovalScope::Denied);
        assert!(!record.approved);

        let second = gw.check_approval(&mut ledger, request, &prompt).await;
        assert!(!second.approved);
        assert_eq!(second.reason, ApprovalReason::OperatorDenied);
        assert_eq!(prompt.asked().len(), 2);
    }

    #[tokio::test]
    async fn test_path_override_denied_blocks_call() {
        let gw = gateway(DesktopOpsMode::Commander, &[]);
        let prompt = ScriptedPrompt::new(&["n"]);
        let mut ledger = ApprovalLedger::new();
        let paths = outside_path("/etc/hosts");
        let tool = ToolDescriptor::new("builtin:fs:read_text", "").category(ToolCategory::Read);
        let args = json!({"path": "/etc/hosts"});
        let request = ApprovalRequest {
            tool: &tool,
            args: &args,
            risk: DesktopRisk::ReadOnly,
            approval_required: false,
            paths: &paths,
        };

        let decision = gw.check_approval(&mut ledger, request, &prompt).await;
        assert!(!decision.approved);
        assert_eq!(decision.reason, ApprovalReason::PathOutsideWorkspace);
        let override_decision = decision.path_override.unwrap();
        assert!(!override_decision.approved);
        assert_eq!(override_decision.paths, vec!["/etc/hosts".to_string()]);
        assert!(prompt.asked()[0].starts_with("Path outside workspace requested by builtin:fs:read_text"));
    }

    #[tokio::test]
    async fn test_path_override_approved_then_risk_gate() {
        let gw = gateway(DesktopOpsMode::Commander, &[]);
        let prompt = ScriptedPrompt::new(&["y", "y"]);
        let mut ledger = ApprovalLedger::new();
        let paths = outside_path("/srv/data.txt");
        let tool = ToolDescriptor::new("builtin:fs:write_text", "")
            .category(ToolCategory::Write)
            .mutates_state();
        let args = json!({"path": "/srv/data.txt"});
        let request = ApprovalRequest {
            tool: &tool,
            args: &args,
            risk: DesktopRisk::WriteDestructive,
            approval_required: true,
            paths: &paths,
        };

        let decision = gw.check_approval(&mut ledger, request, &prompt).await;
        assert!(decision.approved);
        assert_eq!(decision.override_paths, vec![PathBuf::from("/srv/data.txt")]);
        assert_eq!(prompt.asked().len(), 2);
    }

    #[tokio::test]
    async fn test_denied_root_never_prompts() {
        let gw = gateway(DesktopOpsMode::Commander, &[]);
        let prompt = ScriptedPrompt::new(&["y"]);
        let mut ledger = ApprovalLedger::new();
        let mut paths = outside_path("secrets/key");
        if let Some(result) = paths.get_mut("path") {
            result.violation = Some(PathViolation::Denied);
        }
        let tool = ToolDescriptor::new("builtin:fs:read_text", "").category(ToolCategory::Read);
        let args = json!({"path": "secrets/key"});
        let request = ApprovalRequest {
            tool: &tool,
            args: &args,
            risk: DesktopRisk::ReadOnly,
            approval_required: false,
            paths: &paths,
        };
        let decision = gw.check_approval(&mut ledger, request, &prompt).await;
        assert_eq!(decision.reason, ApprovalReason::PathDenied);
        assert!(prompt.asked().is_empty());
    }
}
