//! Desktop Ops controller: the `run()` loop.
//!
//! Flow of one run:
//! 1. **Confirm**: GUIDE mode shows the model's plan and waits for a yes
//! 2. **Recipe**: a goal that matches a recipe runs it first; success ends the run
//! 3. **Loop**: model turns until completion, stop, failure, or `max_steps`
//! 4. **Finalize**: persist the run record and render the report
//!
//! Every terminal path goes through finalize, so every run leaves a summary
//! and an audit log behind.

use std::collections::HashMap;
use std::sync::Arc;

use super::context::RunContext;
use super::dispatch::CallOrigin;
use super::errors::EngineError;
use super::response_analysis::{
    appears_complete, extract_question, is_done, MAX_NUDGES, NUDGE_MESSAGE,
};
use super::types::{DesktopOpsResult, RunStatus};
use crate::audit::events::AuditEvent;
use crate::audit::record::RunRecord;
use crate::audit::summary::{RunReport, SummaryOutcome};
use crate::config::{DesktopOpsConfig, DesktopOpsMode};
use crate::governance::approval::ApprovalGateway;
use crate::governance::prompt::{is_affirmative, OperatorPrompt};
use crate::inference::client::ChatClient;
use crate::inference::types::{ChatMessage, ToolCall, ToolDefinition};
use crate::recipes::{recipe_name, RecipeRegistry};
use crate::tools::provider::ToolProvider;
use crate::workspace::Workspace;

const SYSTEM_PROMPT: &str = "You are Desktop Ops, an operator for local developer tasks. \
Work toward the goal by calling the provided tools, one step at a time. \
Tools named desktop.recipe.* run a complete, deterministic procedure. \
When the goal is achieved, reply with DONE and a one-line summary. \
If you need information only the operator has, reply with QUESTION: followed by the question.";

const SKIPPED_MESSAGE: &str = "Skipped: an earlier call in this turn did not complete.";

/// The engine. Holds collaborators and configuration; all per-run state
/// lives in the [`RunContext`] each call creates.
pub struct DesktopOps {
    pub(super) config: DesktopOpsConfig,
    pub(super) tools: Arc<dyn ToolProvider>,
    pub(super) chat: Arc<dyn ChatClient>,
    pub(super) prompt: Arc<dyn OperatorPrompt>,
    pub(super) workspace: Arc<dyn Workspace>,
    pub(super) gateway: ApprovalGateway,
    pub(super) recipes: RecipeRegistry,
}

/// What the loop decided about one turn of tool calls.
enum TurnOutcome {
    Continue,
    Failed(String),
}

fn outcome(status: RunStatus, reason: Option<String>) -> SummaryOutcome {
    SummaryOutcome { status, reason }
}

impl DesktopOps {
    pub fn new(
        config: DesktopOpsConfig,
        tools: Arc<dyn ToolProvider>,
        chat: Arc<dyn ChatClient>,
        prompt: Arc<dyn OperatorPrompt>,
        workspace: Arc<dyn Workspace>,
    ) -> Self {
        Self {
            gateway: ApprovalGateway::from_config(&config),
            recipes: RecipeRegistry::new(&config),
            config,
            tools,
            chat,
            prompt,
            workspace,
        }
    }

    pub fn config(&self) -> &DesktopOpsConfig {
        &self.config
    }

    /// Fresh per-run state rooted at the workspace.
    pub fn new_context(&self, goal: &str) -> RunContext {
        RunContext::new(goal, &self.workspace.root(), self.config.mode, &self.config)
    }

    /// Provider tools plus the recipe tools.
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = self.tools.tool_definitions();
        definitions.extend(self.recipes.definitions());
        definitions
    }

    /// Execute `goal` to a terminal status.
    pub async fn run(&self, goal: &str) -> DesktopOpsResult {
        let mut ctx = self.new_context(goal);
        tracing::info!(
            run_id = %ctx.run_id,
            mode = %ctx.mode,
            cwd = %ctx.cwd.display(),
            goal,
            "desktop ops run started"
        );
        let outcome = self.drive(&mut ctx).await;
        self.finalize(ctx, outcome)
    }

    async fn drive(&self, ctx: &mut RunContext) -> SummaryOutcome {
        if ctx.mode == DesktopOpsMode::Guide {
            match self.confirm_plan(ctx).await {
                Ok(true) => {}
                Ok(false) => {
                    return outcome(
                        RunStatus::Stopped,
                        Some("Plan was not approved by the operator.".into()),
                    )
                }
                Err(e) => return outcome(RunStatus::Failed, Some(e.to_string())),
            }
        }

        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(context_message(ctx)),
        ];

        if let Some(matched) = self.recipes.match_goal(&ctx.goal, ctx) {
            tracing::info!(recipe = %matched.name, reason = %matched.reason, "goal matched recipe");
            ctx.push(AuditEvent::RecipePreference {
                recipe: matched.name.clone(),
                arguments: matched.arguments.clone(),
                reason: matched.reason.clone(),
            });
            let recipe = self.run_recipe(ctx, &matched.name, &matched.arguments).await;
            if recipe.success {
                return outcome(RunStatus::Completed, Some(recipe.message));
            }
            messages.push(ChatMessage::user(format!(
                "The {} recipe did not finish: {} Continue with the available tools.",
                matched.name, recipe.message
            )));
        }

        let tools = self.tool_definitions();
        let mut nudges = 0u32;
        let mut retry_counts: HashMap<String, u32> = HashMap::new();

        for step in 0..self.config.max_steps {
            ctx.step_index = step;
            let response = match self.chat.chat(&self.config.model, &messages, &tools).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(step, error = %e, "chat request failed");
                    return outcome(RunStatus::Failed, Some(format!("Chat request failed: {e}")));
                }
            };
            let text = response.content.clone().unwrap_or_default();
            ctx.push(AuditEvent::LlmResponse {
                step,
                content: text.clone(),
                tool_calls: response.tool_calls.iter().map(|c| c.name.clone()).collect(),
            });

            if response.tool_calls.is_empty() {
                messages.push(ChatMessage::assistant(Some(text.clone()), &[]));

                if is_done(&text) || appears_complete(&text, ctx.successful_calls) {
                    tracing::info!(step, "model reported completion");
                    return outcome(RunStatus::Completed, Some(text.trim().to_string()));
                }

                if let Some(question) = extract_question(&text) {
                    let answer = self.prompt.get_user_input(&format!("{question}\n> ")).await;
                    ctx.push(AuditEvent::Clarification {
                        step,
                        question,
                        answer: answer.clone(),
                    });
                    let reply = if answer.trim().is_empty() {
                        "(no answer from the operator)".to_string()
                    } else {
                        answer
                    };
                    messages.push(ChatMessage::user(reply));
                    continue;
                }

                if ctx.mode == DesktopOpsMode::Guide {
                    return outcome(
                        RunStatus::Stopped,
                        Some("The model needs operator guidance to continue.".into()),
                    );
                }

                if nudges >= MAX_NUDGES {
                    tracing::warn!(step, nudges, "no progress after nudges");
                    return outcome(
                        RunStatus::Stopped,
                        Some(format!("No tool call or completion after {MAX_NUDGES} nudges.")),
                    );
                }
                nudges += 1;
                ctx.push(AuditEvent::Nudge { step, count: nudges });
                messages.push(ChatMessage::system(NUDGE_MESSAGE));
                continue;
            }

            messages.push(ChatMessage::assistant(
                response.content.clone(),
                &response.tool_calls,
            ));
            if let TurnOutcome::Failed(reason) = self
                .dispatch_turn(ctx, &response.tool_calls, &mut messages, &mut retry_counts)
                .await
            {
                return outcome(RunStatus::Failed, Some(reason));
            }
        }

        tracing::warn!(max_steps = self.config.max_steps, "step budget exhausted");
        outcome(
            RunStatus::Stopped,
            Some(format!("Reached the maximum of {} steps.", self.config.max_steps)),
        )
    }

    /// Dispatch one turn's calls in order. A denial, failure or unknown tool
    /// ends the turn; the remaining calls get a skip message.
    async fn dispatch_turn(
        &self,
        ctx: &mut RunContext,
        calls: &[ToolCall],
        messages: &mut Vec<ChatMessage>,
        retry_counts: &mut HashMap<String, u32>,
    ) -> TurnOutcome {
        for (index, call) in calls.iter().enumerate() {
            let finished = if let Some(recipe) = recipe_name(&call.name) {
                let result = self.run_recipe(ctx, recipe, &call.arguments).await;
                messages.push(ChatMessage::tool(&call.id, &call.name, &result.message));
                if result.denied {
                    skip_remaining(messages, &calls[index + 1..]);
                    return TurnOutcome::Continue;
                }
                result.success
            } else {
                match self.tools.resolve(&call.name) {
                    Ok(tool) => {
                        let gated = self
                            .execute_tool_call_with_policy(ctx, &tool, call, CallOrigin::default())
                            .await;
                        messages.push(ChatMessage::tool(&call.id, &call.name, gated.message()));
                        if !gated.decision.approved {
                            skip_remaining(messages, &calls[index + 1..]);
                            return TurnOutcome::Continue;
                        }
                        gated.result.success
                    }
                    Err(e) => {
                        tracing::warn!(tool = %call.name, error = %e, "tool resolution failed");
                        ctx.push(AuditEvent::ToolResolutionFailed {
                            tool: call.name.clone(),
                            error: e.to_string(),
                        });
                        messages.push(ChatMessage::tool(
                            &call.id,
                            &call.name,
                            format!("Tool resolution failed: {e}"),
                        ));
                        false
                    }
                }
            };

            if finished {
                continue;
            }

            let attempts = retry_counts.entry(call.name.clone()).or_insert(0);
            *attempts += 1;
            if *attempts > self.config.max_retries_per_step {
                tracing::error!(tool = %call.name, attempts = *attempts, "retry budget exhausted");
                return TurnOutcome::Failed(format!(
                    "Desktop Ops failed after {} attempt(s) for {}.",
                    attempts, call.name
                ));
            }
            skip_remaining(messages, &calls[index + 1..]);
            return TurnOutcome::Continue;
        }
        TurnOutcome::Continue
    }

    /// GUIDE mode: show the model's plan and ask the operator to proceed.
    async fn confirm_plan(&self, ctx: &mut RunContext) -> Result<bool, EngineError> {
        let plan = self.request_numbered_plan(&ctx.goal).await?;
        let shown = if plan.trim().is_empty() { "(no plan)" } else { plan.trim() };
        let answer = self
            .prompt
            .get_user_input(&format!("Proposed plan:\n{shown}\nProceed with this plan? [y/N]: "))
            .await;
        let approved = is_affirmative(&answer);
        tracing::info!(approved, "plan proposal answered");
        ctx.push(AuditEvent::PlanProposal {
            plan: shown.to_string(),
            approved,
        });
        Ok(approved)
    }

    /// Persist the record, render the report, hand back the result.
    fn finalize(&self, ctx: RunContext, outcome: SummaryOutcome) -> DesktopOpsResult {
        tracing::info!(
            run_id = %ctx.run_id,
            status = %outcome.status,
            reason = outcome.reason.as_deref().unwrap_or(""),
            events = ctx.audit.len(),
            "desktop ops run finished"
        );

        let record = RunRecord {
            goal: ctx.goal.clone(),
            mode: ctx.mode,
            cwd: ctx.cwd.display().to_string(),
            repo_root: ctx.repo_root.as_ref().map(|p| p.display().to_string()),
            virtualenv: ctx.virtualenv.clone(),
            status: outcome.status,
            reason: outcome.reason.clone(),
            artifacts: ctx.artifacts.clone(),
            audit_log: ctx.audit.events().to_vec(),
        };
        let audit_log_path = match record.write(&self.workspace.artifact_dir(), &ctx.run_id) {
            Ok(path) => {
                self.workspace.register_artifact_hint(&path, "audit_log");
                Some(path)
            }
            Err(e) => {
                tracing::error!(error = %e, "audit record not persisted");
                None
            }
        };

        let summary = RunReport::build(ctx.mode, ctx.audit.events(), &ctx.artifacts, outcome.clone())
            .render(self.config.summary_format);

        DesktopOpsResult {
            status: outcome.status,
            summary,
            audit_log: ctx.audit.into_events(),
            artifacts: ctx.artifacts,
            audit_log_path,
        }
    }
}

fn skip_remaining(messages: &mut Vec<ChatMessage>, calls: &[ToolCall]) {
    for call in calls {
        messages.push(ChatMessage::tool(&call.id, &call.name, SKIPPED_MESSAGE));
    }
}

/// First user message: the goal and what is known about the workspace.
fn context_message(ctx: &RunContext) -> String {
    let mut lines = vec![
        format!("Goal: {}", ctx.goal),
        format!("Working directory: {}", ctx.cwd.display()),
        format!("Mode: {}", ctx.mode),
    ];
    if let Some(root) = &ctx.repo_root {
        lines.push(format!("Repository root: {}", root.display()));
    }
    if let Some(venv) = &ctx.virtualenv {
        lines.push(format!("Virtualenv: {venv}"));
    }
    lines.join("\n")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
