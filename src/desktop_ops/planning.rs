//! Read-only planning: `plan(goal, dry_run)`.
//!
//! A goal that matches a recipe is rendered step by step with the gateway's
//! view of each step (risk, whether approval would be needed). With
//! `dry_run`, steps that are safe to observe are probed; everything else is
//! recorded as `probe_skipped`. Without a recipe the model is asked for a
//! short numbered plan.

use super::context::RunContext;
use super::controller::DesktopOps;
use super::dispatch::CallOrigin;
use super::errors::EngineError;
use crate::audit::events::AuditEvent;
use crate::governance::policy_cache::PolicyCacheEntry;
use crate::governance::risk::DesktopRisk;
use crate::inference::types::{ChatMessage, ToolCall};
use crate::recipes::{RecipePlan, RecipeStep};
use crate::tools::types::ToolDescriptor;

const PLAN_INSTRUCTION: &str = "Provide a short numbered plan.";

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Why a step cannot be probed, if it cannot.
fn probe_blocker(step: &RecipeStep, entry: &PolicyCacheEntry) -> Option<&'static str> {
    if step.args.known().is_none() {
        return Some("computed_arguments");
    }
    if entry.approval_required {
        return Some("approval_required");
    }
    if entry.paths_validated.values().any(|r| !r.allowed) {
        return Some("path_not_allowed");
    }
    let safe = entry.risk == DesktopRisk::ReadOnly
        || (entry.risk == DesktopRisk::ExecUserspace && entry.allowlist_match);
    if !safe {
        return Some("not_read_only");
    }
    None
}

impl DesktopOps {
    /// Ask the model for a numbered plan for `goal`, without tools.
    pub(super) async fn request_numbered_plan(&self, goal: &str) -> Result<String, EngineError> {
        let messages = [
            ChatMessage::system(PLAN_INSTRUCTION),
            ChatMessage::user(format!("Plan the steps to: {goal}")),
        ];
        let response = self.chat.chat(&self.config.model, &messages, &[]).await?;
        Ok(response.content.unwrap_or_default())
    }

    /// Describe how `goal` would be carried out. Never mutates anything;
    /// `dry_run` additionally probes read-only steps.
    pub async fn plan(
        &self,
        goal: &str,
        dry_run: bool,
    ) -> Result<(String, Vec<AuditEvent>), EngineError> {
        let mut ctx = self.new_context(goal);
        let mut lines = vec![format!("Desktop Ops plan (mode={})", ctx.mode)];

        match self.recipes.match_goal(goal, &ctx) {
            Some(matched) => {
                let plan = self.recipes.plan(&matched.name, &matched.arguments, &ctx)?;
                ctx.push(AuditEvent::RecipePreference {
                    recipe: matched.name.clone(),
                    arguments: matched.arguments.clone(),
                    reason: matched.reason.clone(),
                });
                ctx.push(AuditEvent::RecipePlan {
                    recipe: plan.name.clone(),
                    summary: plan.summary.clone(),
                    steps: plan.planned_steps(),
                });
                lines.push(format!("Recipe: {} ({})", matched.name, matched.reason));
                lines.push("Steps:".to_string());
                self.describe_steps(&mut ctx, &plan, dry_run, &mut lines).await;
            }
            None => {
                let text = self.request_numbered_plan(goal).await?;
                let text = text.trim();
                if text.is_empty() {
                    lines.push("Steps: (none)".to_string());
                } else {
                    lines.push("Steps:".to_string());
                    lines.extend(text.lines().map(|l| format!("  {}", l.trim())));
                }
            }
        }

        tracing::info!(goal, dry_run, events = ctx.audit.len(), "plan prepared");
        Ok((lines.join("\n"), ctx.audit.into_events()))
    }

    async fn describe_steps(
        &self,
        ctx: &mut RunContext,
        plan: &RecipePlan,
        dry_run: bool,
        lines: &mut Vec<String>,
    ) {
        for (index, step) in plan.steps.iter().enumerate() {
            let number = index + 1;
            let tool = match self.tools.resolve(&step.tool_name) {
                Ok(tool) => tool,
                Err(e) => {
                    lines.push(format!(
                        "  {number}. {}: tool={} unresolved ({e})",
                        step.name, step.tool_name
                    ));
                    continue;
                }
            };

            let empty = serde_json::Value::Object(serde_json::Map::new());
            let args = step.args.known().unwrap_or(&empty);
            let (entry, _) = self.evaluate_policy(ctx, &tool, args);

            let probe = if dry_run {
                Some(self.probe_step(ctx, plan, step, &tool, &entry).await)
            } else {
                None
            };

            lines.push(format!(
                "  {number}. {}: tool={} risk={} approval_required={}{}",
                step.name,
                tool.qualified_id,
                entry.risk,
                yes_no(entry.approval_required),
                probe.map(|p| format!(" probe={p}")).unwrap_or_default()
            ));
            lines.push(match step.args.known() {
                Some(args) => format!("     args: {args}"),
                None => "     args: (computed at run time)".to_string(),
            });
        }
    }

    /// Run one step as a probe when it is safe to; returns the probe label.
    async fn probe_step(
        &self,
        ctx: &mut RunContext,
        plan: &RecipePlan,
        step: &RecipeStep,
        tool: &ToolDescriptor,
        entry: &PolicyCacheEntry,
    ) -> &'static str {
        if let Some(reason) = probe_blocker(step, entry) {
            ctx.push(AuditEvent::ProbeSkipped {
                step: step.name.clone(),
                tool: tool.qualified_id.clone(),
                reason: reason.to_string(),
            });
            return "skipped";
        }
        let Some(arguments) = step.args.known().cloned() else {
            return "skipped";
        };
        let call = ToolCall {
            id: format!("probe_{}", uuid::Uuid::new_v4().simple()),
            name: tool.qualified_id.clone(),
            arguments,
        };
        let origin = CallOrigin {
            recipe: Some(&plan.name),
            step: Some(&step.name),
            probe: true,
            max_total_seconds: None,
        };
        let outcome = self.gated_call(ctx, tool, &call, origin).await;
        if outcome.result.success {
            "ok"
        } else {
            "failed"
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
