//! Gated tool dispatch.
//!
//! Every call, whether the model, a recipe, a dry-run probe or the process
//! supervisor issued it, runs through [`DesktopOps::execute_tool_call_with_policy`]:
//! classify (or reuse the cached decision), validate paths, ask the gateway,
//! audit, then execute.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::context::RunContext;
use super::controller::DesktopOps;
use crate::audit::events::{AuditEvent, PolicyCheckEvent, ToolCallEvent};
use crate::governance::approval::{ApprovalDecision, ApprovalRequest};
use crate::governance::paths::PathViolation;
use crate::governance::policy_cache::{PolicyCacheEntry, PolicyKey};
use crate::governance::risk::{classify_risk, DesktopRisk};
use crate::inference::types::ToolCall;
use crate::tools::types::{ToolDescriptor, ToolResult};

/// Where a call came from, for audit attribution.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOrigin<'a> {
    pub recipe: Option<&'a str>,
    pub step: Option<&'a str>,
    /// Dry-run probe issued by `plan()`.
    pub probe: bool,
    /// Supervision budget for a process this call starts.
    pub max_total_seconds: Option<f64>,
}

/// Result of one gated call.
#[derive(Debug, Clone)]
pub struct GatedOutcome {
    pub result: ToolResult,
    pub decision: ApprovalDecision,
    pub risk: DesktopRisk,
    pub approval_required: bool,
    /// Supervisor report for a process the call started.
    pub supervision: Option<String>,
}

impl GatedOutcome {
    /// Text fed back to the model.
    pub fn message(&self) -> String {
        let text = self.result.message_text();
        match &self.supervision {
            Some(note) if text.is_empty() => note.clone(),
            Some(note) => format!("{text}\n{note}"),
            None => text,
        }
    }
}

/// Process identifier reported in a result, by precedence.
pub(super) fn reported_process_id(result: &ToolResult) -> Option<String> {
    ["process_id", "session_id", "pid"]
        .iter()
        .find_map(|key| match result.metadata.get(*key)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Arguments that already address an existing process (read / stop calls).
fn addresses_process(args: &serde_json::Value) -> bool {
    ["process_id", "session_id", "pid", "handle"]
        .iter()
        .any(|key| args.get(*key).is_some())
}

fn process_arg(args: &serde_json::Value) -> Option<String> {
    match args.get("process_id")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl DesktopOps {
    /// Risk, approval requirement and path results for a call, from the
    /// policy cache when the exact inputs were seen before in this run.
    pub(super) fn evaluate_policy(
        &self,
        ctx: &mut RunContext,
        tool: &ToolDescriptor,
        args: &serde_json::Value,
    ) -> (PolicyCacheEntry, bool) {
        let allowlist_version = self.gateway.allowlist_version();
        let denylist_version = ctx.path_policy.denylist_version();
        let roots_version = ctx.path_policy.roots_version();
        let key = PolicyKey {
            tool_id: &tool.qualified_id,
            args,
            mode: self.gateway.mode(),
            allowlist_version: &allowlist_version,
            denylist_version: &denylist_version,
            roots_version: &roots_version,
        }
        .digest();

        if let Some(entry) = ctx.policy_cache.get(&key) {
            tracing::debug!(tool = %tool.qualified_id, "policy cache hit");
            return (entry, true);
        }

        let risk = classify_risk(tool, args, ctx.path_policy.workspace_root());
        let mut paths_validated = BTreeMap::new();
        for param in &tool.path_params {
            if let Some(raw) = args.get(param).and_then(|v| v.as_str()) {
                let result = ctx.path_cache.validate(&ctx.path_policy, raw);
                paths_validated.insert(param.clone(), result);
            }
        }
        let entry = PolicyCacheEntry {
            risk,
            approval_required: self.gateway.requires_approval(risk, tool, args),
            allowlist_match: self.gateway.allowlisted(tool, args),
            denylist_match: paths_validated
                .values()
                .any(|r| r.violation == Some(PathViolation::Denied)),
            paths_validated,
        };
        ctx.policy_cache.insert(key, entry.clone());
        (entry, false)
    }

    /// Gate, audit and execute one call, then supervise any process it started.
    pub async fn execute_tool_call_with_policy(
        &self,
        ctx: &mut RunContext,
        tool: &ToolDescriptor,
        call: &ToolCall,
        origin: CallOrigin<'_>,
    ) -> GatedOutcome {
        let mut outcome = self.gated_call(ctx, tool, call, origin).await;
        if !outcome.result.success || addresses_process(&call.arguments) {
            return outcome;
        }
        if let Some(process_id) = reported_process_id(&outcome.result) {
            let note = self.supervise_process(ctx, &process_id, origin).await;
            outcome.supervision = Some(note);
        }
        outcome
    }

    /// Gate, audit and execute one call without supervision.
    pub(super) async fn gated_call(
        &self,
        ctx: &mut RunContext,
        tool: &ToolDescriptor,
        call: &ToolCall,
        origin: CallOrigin<'_>,
    ) -> GatedOutcome {
        let start_time = chrono::Utc::now().to_rfc3339();
        let args = &call.arguments;
        let (entry, cached) = self.evaluate_policy(ctx, tool, args);

        let decision = self
            .gateway
            .check_approval(
                &mut ctx.approvals,
                ApprovalRequest {
                    tool,
                    args,
                    risk: entry.risk,
                    approval_required: entry.approval_required,
                    paths: &entry.paths_validated,
                },
                self.prompt.as_ref(),
            )
            .await;

        if let Some(path_override) = &decision.path_override {
            ctx.push(AuditEvent::PathOverride {
                tool: tool.qualified_id.clone(),
                approved: path_override.approved,
                paths: path_override.paths.clone(),
                args: args.clone(),
            });
        }

        ctx.push(AuditEvent::PolicyCheck(PolicyCheckEvent {
            loop_step: ctx.step_index,
            recipe: origin.recipe.map(str::to_string),
            step: origin.step.map(str::to_string),
            tool_id: tool.qualified_id.clone(),
            risk: entry.risk,
            risk_level: tool
                .category
                .map(|c| c.as_str())
                .unwrap_or("unknown")
                .to_string(),
            mode: self.gateway.mode(),
            approval_required: entry.approval_required,
            approval_result: decision.approved,
            approval_reason: decision.reason,
            paths_validated: entry.paths_validated.clone(),
            allowlist_match: entry.allowlist_match,
            denylist_match: entry.denylist_match,
            cached,
            start_time,
            end_time: chrono::Utc::now().to_rfc3339(),
        }));
        tracing::info!(
            tool = %tool.qualified_id,
            risk = %entry.risk,
            approval_required = entry.approval_required,
            approved = decision.approved,
            reason = %decision.reason,
            cached,
            "policy check"
        );

        if !decision.approved {
            return GatedOutcome {
                result: ToolResult::failure(format!("Approval denied ({}).", decision.reason)),
                decision,
                risk: entry.risk,
                approval_required: entry.approval_required,
                supervision: None,
            };
        }

        let mut allowed_paths: Vec<PathBuf> = ctx.path_policy.roots();
        allowed_paths.extend(decision.override_paths.iter().cloned());
        let (result, audit) = self.tools.run_tool(tool, call, Some(allowed_paths.as_slice())).await;

        ctx.push(AuditEvent::ToolCall(ToolCallEvent {
            tool: tool.qualified_id.clone(),
            risk: entry.risk,
            approval_reason: decision.reason,
            success: result.success,
            error: result.error.clone(),
            audit,
            probe: origin.probe,
            recipe: origin.recipe.map(str::to_string),
            step: origin.step.map(str::to_string),
        }));

        for artifact in &result.artifacts {
            ctx.add_artifact(artifact.clone());
        }

        if result.success {
            ctx.successful_calls += 1;
            if self.is_stop_tool(tool) {
                if let Some(process_id) = process_arg(args) {
                    if ctx.active_processes.remove(&process_id).is_some() {
                        tracing::info!(process_id = %process_id, "process handle released");
                    }
                }
            }
        } else {
            tracing::warn!(
                tool = %tool.qualified_id,
                error = result.error.as_deref().unwrap_or(""),
                "tool call failed"
            );
        }

        GatedOutcome {
            result,
            decision,
            risk: entry.risk,
            approval_required: entry.approval_required,
            supervision: None,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reported_process_id_precedence() {
        let result = ToolResult::ok("")
            .with_metadata("pid", json!(4242))
            .with_metadata("process_id", json!("process-1"));
        assert_eq!(reported_process_id(&result).as_deref(), Some("process-1"));

        let pid_only = ToolResult::ok("").with_metadata("pid", json!(4242));
        assert_eq!(reported_process_id(&pid_only).as_deref(), Some("4242"));
        assert_eq!(reported_process_id(&ToolResult::ok("")), None);
    }

    #[test]
    fn test_addresses_process() {
        assert!(addresses_process(&json!({"process_id": "p"})));
        assert!(addresses_process(&json!({"handle": 3})));
        assert!(!addresses_process(&json!({"argv": ["ls"]})));
    }

    #[test]
    fn test_gated_message_appends_supervision_note() {
        let outcome = GatedOutcome {
            result: ToolResult::ok("started"),
            decision: ApprovalDecision {
                approved: true,
                reason: crate::governance::approval::ApprovalReason::Auto,
                path_override: None,
                override_paths: Vec::new(),
            },
            risk: DesktopRisk::ExecUserspace,
            approval_required: false,
            supervision: Some("Process process-1 exited.".into()),
        };
        assert_eq!(outcome.message(), "started\nProcess process-1 exited.");
    }
}
