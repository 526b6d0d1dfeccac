//! Audit events: the ordered, append-only record of a run.
//!
//! Serialized with an `event` tag (`{"event": "policy_check", ...}`). The
//! summary builder reads nothing but these events, so everything worth
//! reporting must land here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::DesktopOpsMode;
use crate::governance::approval::ApprovalReason;
use crate::governance::paths::PathValidationResult;
use crate::governance::risk::DesktopRisk;
use crate::tools::types::{Artifact, ToolAudit};

/// One gateway evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyCheckEvent {
    /// Loop step the call belongs to.
    pub loop_step: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<String>,
    /// Recipe step name, when issued by a recipe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub tool_id: String,
    pub risk: DesktopRisk,
    /// Declared category (`read` / `write` / `exec` / `unknown`).
    pub risk_level: String,
    pub mode: DesktopOpsMode,
    pub approval_required: bool,
    pub approval_result: bool,
    pub approval_reason: ApprovalReason,
    pub paths_validated: BTreeMap<String, PathValidationResult>,
    pub allowlist_match: bool,
    pub denylist_match: bool,
    /// `true` when classification came from the policy cache.
    pub cached: bool,
    pub start_time: String,
    pub end_time: String,
}

/// One executed tool call (denied calls never get here).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub tool: String,
    pub risk: DesktopRisk,
    pub approval_reason: ApprovalReason,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub audit: ToolAudit,
    /// Issued by a dry-run probe.
    #[serde(default)]
    pub probe: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

/// A planned recipe step as shown in the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub name: String,
    pub tool: String,
    /// `None` when arguments are computed at run time.
    #[serde(default)]
    pub args: Option<serde_json::Value>,
    pub description: String,
}

/// Which liveness budget a supervised process ran out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallReason {
    /// No new output within the idle budget.
    Idle,
    /// Total supervision budget elapsed.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    LlmResponse {
        step: usize,
        content: String,
        tool_calls: Vec<String>,
    },
    Nudge {
        step: usize,
        count: u32,
    },
    Clarification {
        step: usize,
        question: String,
        answer: String,
    },
    PlanProposal {
        plan: String,
        approved: bool,
    },
    PolicyCheck(PolicyCheckEvent),
    PathOverride {
        tool: String,
        approved: bool,
        paths: Vec<String>,
        args: serde_json::Value,
    },
    ToolCall(ToolCallEvent),
    ToolResolutionFailed {
        tool: String,
        error: String,
    },
    Artifact {
        artifact: Artifact,
    },
    RecipePreference {
        recipe: String,
        arguments: serde_json::Value,
        reason: String,
    },
    RecipePlan {
        recipe: String,
        summary: String,
        steps: Vec<PlannedStep>,
    },
    RecipeStepSkipped {
        recipe: String,
        step: String,
        reason: String,
    },
    RecipeStepFailed {
        recipe: String,
        step: String,
        error: String,
    },
    RecipeRemediation {
        recipe: String,
        step: String,
        inserted: Vec<String>,
    },
    ProcessOutput {
        process_id: String,
        output: String,
        condensed: bool,
    },
    ProcessStalled {
        process_id: String,
        reason: StallReason,
        idle_seconds: f64,
        elapsed_seconds: f64,
    },
    ProcessStop {
        process_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ProcessStopFailed {
        process_id: String,
        error: String,
    },
    ProcessExited {
        process_id: String,
        #[serde(default)]
        exit_code: Option<i64>,
    },
    ProbeSkipped {
        step: String,
        tool: String,
        reason: String,
    },
}

impl AuditEvent {
    /// The `event` tag value.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::LlmResponse { .. } => "llm_response",
            AuditEvent::Nudge { .. } => "nudge",
            AuditEvent::Clarification { .. } => "clarification",
            AuditEvent::PlanProposal { .. } => "plan_proposal",
            AuditEvent::PolicyCheck(_) => "policy_check",
            AuditEvent::PathOverride { .. } => "path_override",
            AuditEvent::ToolCall(_) => "tool_call",
            AuditEvent::ToolResolutionFailed { .. } => "tool_resolution_failed",
            AuditEvent::Artifact { .. } => "artifact",
            AuditEvent::RecipePreference { .. } => "recipe_preference",
            AuditEvent::RecipePlan { .. } => "recipe_plan",
            AuditEvent::RecipeStepSkipped { .. } => "recipe_step_skipped",
            AuditEvent::RecipeStepFailed { .. } => "recipe_step_failed",
            AuditEvent::RecipeRemediation { .. } => "recipe_remediation",
            AuditEvent::ProcessOutput { .. } => "process_output",
            AuditEvent::ProcessStalled { .. } => "process_stalled",
            AuditEvent::ProcessStop { .. } => "process_stop",
            AuditEvent::ProcessStopFailed { .. } => "process_stop_failed",
            AuditEvent::ProcessExited { .. } => "process_exited",
            AuditEvent::ProbeSkipped { .. } => "probe_skipped",
        }
    }
}

/// Append-only event list; no edit or remove operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog {
    events: Vec<AuditEvent>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: AuditEvent) {
        tracing::trace!(event = event.kind(), "audit");
        self.events.push(event);
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events with the given tag, in order.
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a AuditEvent> + 'a {
        self.events.iter().filter(move |e| e.kind() == kind)
    }

    pub fn into_events(self) -> Vec<AuditEvent> {
        self.events
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
