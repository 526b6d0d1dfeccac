//! Recipe interpreter.
//!
//! Steps run from an explicit queue. A failing step may hand back remedial
//! steps through its `on_failure` hook; those go to the front of the queue
//! and the run continues. Every step is a normal gated call.

use std::collections::VecDeque;

use super::context::RunContext;
use super::controller::DesktopOps;
use super::dispatch::CallOrigin;
use crate::audit::events::AuditEvent;
use crate::inference::types::ToolCall;
use crate::recipes::{RecipeStep, StepOutcome};

/// How a recipe attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeOutcome {
    pub success: bool,
    /// A step was denied by the operator or the path gate.
    pub denied: bool,
    /// Plan summary on success, the reason otherwise.
    pub message: String,
}

impl RecipeOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            denied: false,
            message: message.into(),
        }
    }

    fn denied(message: impl Into<String>) -> Self {
        Self {
            denied: true,
            ..Self::failed(message)
        }
    }
}

impl DesktopOps {
    /// Plan and execute one recipe against `ctx`.
    pub async fn run_recipe(
        &self,
        ctx: &mut RunContext,
        name: &str,
        args: &serde_json::Value,
    ) -> RecipeOutcome {
        let plan = match self.recipes.plan(name, args, ctx) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(recipe = name, error = %e, "recipe planning failed");
                return RecipeOutcome::failed(e.to_string());
            }
        };
        ctx.push(AuditEvent::RecipePlan {
            recipe: plan.name.clone(),
            summary: plan.summary.clone(),
            steps: plan.planned_steps(),
        });
        tracing::info!(recipe = %plan.name, steps = plan.steps.len(), "recipe started");

        let mut queue: VecDeque<RecipeStep> = plan.steps.iter().cloned().collect();
        let mut results: Vec<StepOutcome> = Vec::new();

        while let Some(step) = queue.pop_front() {
            let Some(arguments) = step.args.resolve(ctx, results.last()) else {
                tracing::info!(recipe = %plan.name, step = %step.name, "recipe step skipped");
                ctx.push(AuditEvent::RecipeStepSkipped {
                    recipe: plan.name.clone(),
                    step: step.name.clone(),
                    reason: "missing_arguments".to_string(),
                });
                continue;
            };

            let tool = match self.tools.resolve(&step.tool_name) {
                Ok(tool) => tool,
                Err(e) => {
                    ctx.push(AuditEvent::RecipeStepFailed {
                        recipe: plan.name.clone(),
                        step: step.name.clone(),
                        error: e.to_string(),
                    });
                    return RecipeOutcome::failed(format!(
                        "Recipe {} failed at step {}: {e}",
                        plan.name, step.name
                    ));
                }
            };

            let call = ToolCall {
                id: format!("recipe_{}", uuid::Uuid::new_v4().simple()),
                name: tool.qualified_id.clone(),
                arguments,
            };
            let origin = CallOrigin {
                recipe: Some(&plan.name),
                step: Some(&step.name),
                probe: false,
                max_total_seconds: step.max_total_seconds,
            };
            let gated = self.execute_tool_call_with_policy(ctx, &tool, &call, origin).await;

            let outcome = StepOutcome {
                step: step.name.clone(),
                tool: tool.qualified_id.clone(),
                success: gated.result.success,
                output: gated.message(),
                metadata: gated.result.metadata.clone(),
            };
            results.push(outcome.clone());
            if outcome.success {
                continue;
            }

            if !gated.decision.approved {
                ctx.push(AuditEvent::RecipeStepFailed {
                    recipe: plan.name.clone(),
                    step: step.name.clone(),
                    error: outcome.output.clone(),
                });
                return RecipeOutcome::denied(format!(
                    "Recipe {} stopped at step {}: {}",
                    plan.name, step.name, outcome.output
                ));
            }

            let followups = step
                .on_failure
                .as_ref()
                .map(|hook| hook(&outcome.output))
                .unwrap_or_default();
            if followups.is_empty() {
                ctx.push(AuditEvent::RecipeStepFailed {
                    recipe: plan.name.clone(),
                    step: step.name.clone(),
                    error: outcome.output.clone(),
                });
                return RecipeOutcome::failed(format!(
                    "Recipe {} failed at step {}: {}",
                    plan.name, step.name, outcome.output
                ));
            }

            let inserted: Vec<String> = followups.iter().map(|s| s.name.clone()).collect();
            tracing::info!(recipe = %plan.name, step = %step.name, ?inserted, "recipe remediation");
            ctx.push(AuditEvent::RecipeRemediation {
                recipe: plan.name.clone(),
                step: step.name.clone(),
                inserted,
            });
            for followup in followups.into_iter().rev() {
                queue.push_front(followup);
            }
        }

        if (plan.done_criteria)(ctx, &results) {
            tracing::info!(recipe = %plan.name, "recipe completed");
            RecipeOutcome {
                success: true,
                denied: false,
                message: plan.summary,
            }
        } else {
            tracing::warn!(recipe = %plan.name, "recipe did not meet completion criteria");
            RecipeOutcome::failed("Recipe did not meet completion criteria.")
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
