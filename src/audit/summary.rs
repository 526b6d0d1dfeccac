//! Run report built from audit events alone.
//!
//! [`RunReport::build`] is a pure function of (mode, events, artifacts,
//! outcome): it makes no model or tool calls, so rebuilding it from a
//! persisted [`RunRecord`](super::record::RunRecord) gives the same report.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::events::AuditEvent;
use crate::config::{DesktopOpsMode, SummaryFormat};
use crate::desktop_ops::types::RunStatus;
use crate::governance::approval::ApprovalReason;
use crate::tools::types::Artifact;

/// At most this many suggestions in the next-actions section.
const MAX_NEXT_ACTIONS: usize = 3;

const PATH_BLOCKED_ACTION: &str =
    "Path access was blocked: move requested paths into the workspace or allow the override.";
const FALLBACK_ACTION: &str = "Review the last error in the audit log and retry with adjustments.";

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutcome {
    pub status: RunStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPerformed {
    /// Recipe name, or `"manual plan"`.
    pub recipe: String,
    pub commands: Vec<String>,
    pub files_changed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub steps_executed: usize,
    pub policy_cache_hits: usize,
    pub policy_cache_misses: usize,
    pub path_cache_hits: usize,
    pub path_cache_misses: usize,
    pub output_condensed_count: usize,
    pub probe_steps: usize,
}

/// Produced artifacts grouped by kind, sorted and de-duplicated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactGroups {
    pub logs: Vec<String>,
    pub diffs: Vec<String>,
    pub files: Vec<String>,
}

impl ArtifactGroups {
    fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.diffs.is_empty() && self.files.is_empty()
    }

    fn labelled(&self) -> [(&'static str, &Vec<String>); 3] {
        [("Logs", &self.logs), ("Diffs", &self.diffs), ("Files", &self.files)]
    }
}

/// Every section of the end-of-run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: DesktopOpsMode,
    pub outcome: SummaryOutcome,
    pub work_performed: WorkPerformed,
    /// Destructive, privileged and network decisions only.
    pub approvals: Vec<String>,
    pub run_stats: RunStats,
    pub artifacts: ArtifactGroups,
    /// Empty on success.
    pub next_actions: Vec<String>,
}

// ─── Building ────────────────────────────────────────────────────────────────

impl RunReport {
    pub fn build(
        mode: DesktopOpsMode,
        events: &[AuditEvent],
        artifacts: &[Artifact],
        outcome: SummaryOutcome,
    ) -> Self {
        let next_actions = if outcome.status.is_success() {
            Vec::new()
        } else {
            next_actions(events)
        };
        let collected = collect_artifacts(events, artifacts);
        Self {
            mode,
            work_performed: WorkPerformed {
                recipe: recipe_used(events).unwrap_or_else(|| "manual plan".to_string()),
                commands: commands_executed(events),
                files_changed: files_changed(&collected),
            },
            approvals: meaningful_approvals(events),
            run_stats: run_stats(events),
            artifacts: group_artifacts(&collected),
            outcome,
            next_actions,
        }
    }

    pub fn render(&self, format: SummaryFormat) -> String {
        match format {
            SummaryFormat::Json => self.render_json(),
            SummaryFormat::Markdown => self.render_sections(true),
            SummaryFormat::Text => self.render_sections(false),
        }
    }

    /// Single JSON object with sorted keys.
    fn render_json(&self) -> String {
        let value = serde_json::json!({
            "mode": self.mode,
            "outcome": self.outcome,
            "work_performed": self.work_performed,
            "approvals": self.approvals,
            "run_stats": self.run_stats,
            "artifacts": self.artifacts,
            "next_actions": self.next_actions,
        });
        value.to_string()
    }

    fn outcome_line(&self) -> String {
        if self.outcome.status.is_success() {
            return "Success".to_string();
        }
        let status = match self.outcome.status {
            RunStatus::Completed => "Completed",
            RunStatus::Stopped => "Stopped",
            RunStatus::Failed => "Failed",
        };
        match &self.outcome.reason {
            Some(reason) if !reason.is_empty() => format!("{status} - {reason}"),
            _ => status.to_string(),
        }
    }

    fn render_sections(&self, markdown: bool) -> String {
        let heading = |title: &str| {
            if markdown {
                format!("## {title}")
            } else {
                title.to_string()
            }
        };
        let label = |name: &str| {
            if markdown {
                format!("**{name}**")
            } else {
                name.to_string()
            }
        };
        let code = |text: &str| {
            if markdown {
                format!("`{text}`")
            } else {
                text.to_string()
            }
        };

        let mut sections = Vec::new();

        sections.push(format!("{}\n- {}", heading("Outcome"), self.outcome_line()));

        let work = &self.work_performed;
        let mut lines = vec![
            heading("Work performed"),
            format!("- {}: {}", label("Recipe used"), work.recipe),
            format!("- {}:", label("Commands executed")),
        ];
        if work.commands.is_empty() {
            lines.push("  (none)".to_string());
        }
        for (idx, command) in work.commands.iter().enumerate() {
            lines.push(format!("  {}. {}", idx + 1, code(command)));
        }
        if work.files_changed.is_empty() {
            lines.push(format!("- {}: (unknown)", label("Files changed")));
        } else {
            lines.push(format!(
                "- {} ({}):",
                label("Files changed"),
                work.files_changed.len()
            ));
            lines.extend(work.files_changed.iter().map(|p| format!("  - {}", code(p))));
        }
        sections.push(lines.join("\n"));

        let mut lines = vec![heading("Approvals")];
        if self.approvals.is_empty() {
            lines.push("- None".to_string());
        }
        lines.extend(self.approvals.iter().map(|a| format!("- {a}")));
        sections.push(lines.join("\n"));

        let stats = &self.run_stats;
        sections.push(
            [
                heading("Run stats"),
                format!("- {}: {}", label("Steps executed"), stats.steps_executed),
                format!(
                    "- {}: {}/{}",
                    label("Policy cache hits/misses"),
                    stats.policy_cache_hits,
                    stats.policy_cache_misses
                ),
                format!(
                    "- {}: {}/{}",
                    label("Path cache hits/misses"),
                    stats.path_cache_hits,
                    stats.path_cache_misses
                ),
                format!(
                    "- {}: {}",
                    label("Output condensed count"),
                    stats.output_condensed_count
                ),
                format!("- {}: {}", label("Probe steps count"), stats.probe_steps),
            ]
            .join("\n"),
        );

        let mut lines = vec![heading("Artifacts")];
        if self.artifacts.is_empty() {
            lines.push("- None".to_string());
        }
        for (name, paths) in self.artifacts.labelled() {
            if paths.is_empty() {
                continue;
            }
            lines.push(format!("- {}:", label(name)));
            lines.extend(paths.iter().map(|p| format!("  - {}", code(p))));
        }
        sections.push(lines.join("\n"));

        if !self.next_actions.is_empty() {
            let mut lines = vec![heading("Next actions")];
            lines.extend(self.next_actions.iter().map(|a| format!("- {a}")));
            sections.push(lines.join("\n"));
        }

        sections.join("\n\n")
    }
}

// ─── Section helpers ─────────────────────────────────────────────────────────

fn recipe_used(events: &[AuditEvent]) -> Option<String> {
    let planned = events.iter().find_map(|e| match e {
        AuditEvent::RecipePlan { recipe, .. } => Some(recipe.clone()),
        _ => None,
    });
    planned.or_else(|| {
        events.iter().find_map(|e| match e {
            AuditEvent::RecipePreference { recipe, .. } => Some(recipe.clone()),
            _ => None,
        })
    })
}

fn commands_executed(events: &[AuditEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            AuditEvent::ToolCall(call) => {
                let has_args = call
                    .audit
                    .input
                    .as_object()
                    .is_some_and(|args| !args.is_empty());
                Some(if has_args {
                    format!("{} {}", call.tool, call.audit.input)
                } else {
                    call.tool.clone()
                })
            }
            _ => None,
        })
        .collect()
}

/// Explicit artifacts followed by `artifact` events, first occurrence wins.
fn collect_artifacts(events: &[AuditEvent], explicit: &[Artifact]) -> Vec<Artifact> {
    let mut seen = BTreeSet::new();
    let from_events = events.iter().filter_map(|e| match e {
        AuditEvent::Artifact { artifact } => Some(artifact),
        _ => None,
    });
    explicit
        .iter()
        .chain(from_events)
        .filter(|a| seen.insert((a.kind.to_lowercase(), a.path.clone())))
        .cloned()
        .collect()
}

fn files_changed(artifacts: &[Artifact]) -> Vec<String> {
    let paths: BTreeSet<String> = artifacts
        .iter()
        .filter(|a| matches!(a.kind.to_lowercase().as_str(), "file" | "diff"))
        .map(|a| a.path.clone())
        .collect();
    paths.into_iter().collect()
}

fn group_artifacts(artifacts: &[Artifact]) -> ArtifactGroups {
    let mut logs = BTreeSet::new();
    let mut diffs = BTreeSet::new();
    let mut files = BTreeSet::new();
    for artifact in artifacts {
        let bucket = match artifact.kind.to_lowercase().as_str() {
            "log" | "logs" => &mut logs,
            "diff" | "diffs" | "patch" => &mut diffs,
            "file" | "files" => &mut files,
            _ => continue,
        };
        bucket.insert(artifact.path.clone());
    }
    ArtifactGroups {
        logs: logs.into_iter().collect(),
        diffs: diffs.into_iter().collect(),
        files: files.into_iter().collect(),
    }
}

fn meaningful_approvals(events: &[AuditEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            AuditEvent::PolicyCheck(check)
                if check.risk.is_high_impact() && check.approval_required =>
            {
                let paths = if check.paths_validated.is_empty() {
                    "none".to_string()
                } else {
                    check
                        .paths_validated
                        .values()
                        .map(|p| p.resolved.clone().unwrap_or_else(|| p.value.clone()))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                let verdict = if check.approval_result { "approved" } else { "denied" };
                Some(format!(
                    "{} ({}) {verdict} reason={}; paths={paths}",
                    check.tool_id, check.risk, check.approval_reason
                ))
            }
            _ => None,
        })
        .collect()
}

fn run_stats(events: &[AuditEvent]) -> RunStats {
    let mut stats = RunStats::default();
    for event in events {
        match event {
            AuditEvent::ToolCall(call) => {
                stats.steps_executed += 1;
                if call.probe {
                    stats.probe_steps += 1;
                }
            }
            AuditEvent::PolicyCheck(check) => {
                if check.cached {
                    stats.policy_cache_hits += 1;
                } else {
                    stats.policy_cache_misses += 1;
                }
                for path in check.paths_validated.values() {
                    if path.cached {
                        stats.path_cache_hits += 1;
                    } else {
                        stats.path_cache_misses += 1;
                    }
                }
            }
            AuditEvent::ProcessOutput { condensed: true, .. } => {
                stats.output_condensed_count += 1;
            }
            _ => {}
        }
    }
    stats
}

fn next_actions(events: &[AuditEvent]) -> Vec<String> {
    let mut actions: Vec<String> = Vec::new();

    let first_denial = events.iter().find_map(|e| match e {
        AuditEvent::PolicyCheck(check) if !check.approval_result => Some(check),
        _ => None,
    });
    if let Some(check) = first_denial {
        match check.approval_reason {
            ApprovalReason::PathDenied | ApprovalReason::PathOutsideWorkspace => {
                push_unique(&mut actions, PATH_BLOCKED_ACTION.to_string())
            }
            _ => push_unique(
                &mut actions,
                format!(
                    "Approve or avoid {} for {} in the next run.",
                    check.risk, check.tool_id
                ),
            ),
        }
    }

    let path_rejected = events
        .iter()
        .any(|e| matches!(e, AuditEvent::PathOverride { approved: false, .. }));
    if path_rejected {
        push_unique(&mut actions, PATH_BLOCKED_ACTION.to_string());
    }

    let last_failure = events.iter().rev().find_map(|e| match e {
        AuditEvent::ToolCall(call) if !call.success => Some(call),
        _ => None,
    });
    if let Some(call) = last_failure {
        let error = call.error.as_deref().unwrap_or("unknown error");
        let action = format!("Fix the failure in {} ({error}) and rerun.", call.tool);
        push_unique(&mut actions, action);
    }

    if actions.is_empty() {
        actions.push(FALLBACK_ACTION.to_string());
    }
    actions.truncate(MAX_NEXT_ACTIONS);
    actions
}

fn push_unique(actions: &mut Vec<String>, action: String) {
    if !actions.contains(&action) {
        actions.push(action);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
