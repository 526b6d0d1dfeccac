//! Process lifecycle supervisor.
//!
//! When a call reports a process id, the loop does not move on until the
//! process exits, exceeds its total budget, or goes quiet for longer than the
//! idle budget. Output is read with a doubling delay; every chunk is appended
//! verbatim to `process_<id>_<run8>.log` and a condensed copy is audited.
//!
//! A stall is cleaned up through the gateway: the stop call is approved (or
//! not) like any other call, then `process_stalled` and `process_stop` are
//! recorded back to back and the handle is released.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use super::context::RunContext;
use super::controller::DesktopOps;
use super::dispatch::CallOrigin;
use super::types::ProcessHandle;
use crate::audit::events::{AuditEvent, StallReason};
use crate::inference::types::ToolCall;
use crate::tools::types::{Artifact, ToolDescriptor};

/// Names tried, in order, for the output reader.
pub const READ_TOOL_NAMES: &[&str] = &["read_process_output", "process_read", "read_process"];

/// Names tried, in order, for the stop action.
pub const STOP_TOOL_NAMES: &[&str] = &["stop_process", "terminate_process", "kill_process"];

fn sanitize(process_id: &str) -> String {
    process_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn append_raw(path: &Path, chunk: &str) {
    let written = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(chunk.as_bytes()));
    if let Err(e) = written {
        tracing::warn!(path = %path.display(), error = %e, "cannot append process output");
    }
}

impl DesktopOps {
    /// First of `names` the provider can resolve.
    fn resolve_first(&self, names: &[&str]) -> Option<ToolDescriptor> {
        names.iter().find_map(|name| self.tools.resolve(name).ok())
    }

    pub(super) fn is_stop_tool(&self, tool: &ToolDescriptor) -> bool {
        STOP_TOOL_NAMES.contains(&tool.name.as_str())
            || STOP_TOOL_NAMES.iter().any(|name| {
                self.tools
                    .resolve(name)
                    .is_ok_and(|stop| stop.qualified_id == tool.qualified_id)
            })
    }

    /// Create the raw log for a process and register it as an artifact.
    fn open_raw_log(&self, ctx: &mut RunContext, process_id: &str) -> Option<PathBuf> {
        let dir = self.workspace.artifact_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot create artifact dir");
            return None;
        }
        let path = dir.join(format!(
            "process_{}_{}.log",
            sanitize(process_id),
            ctx.short_id()
        ));
        let opened = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path);
        if let Err(e) = opened {
            tracing::warn!(path = %path.display(), error = %e, "cannot create process log");
            return None;
        }
        self.workspace.register_artifact_hint(&path, "process_log");
        ctx.add_artifact(Artifact::new(path.display().to_string(), "log"));
        Some(path)
    }

    /// Poll a started process until it exits or stalls. Returns a note for
    /// the tool message.
    pub(super) async fn supervise_process(
        &self,
        ctx: &mut RunContext,
        process_id: &str,
        origin: CallOrigin<'_>,
    ) -> String {
        let poll = &self.config.process_poll;
        let max_total = origin.max_total_seconds.unwrap_or(poll.max_total_seconds);
        let raw_log = self.open_raw_log(ctx, process_id);
        ctx.active_processes.insert(
            process_id.to_string(),
            ProcessHandle::new(process_id, raw_log.clone(), poll.max_bytes, poll.max_lines),
        );

        let Some(reader) = self.resolve_first(READ_TOOL_NAMES) else {
            tracing::warn!(process_id, "no output reader available, process left running");
            return format!("Process {process_id} started; no output reader is available.");
        };

        tracing::info!(process_id, max_total, max_idle = poll.max_idle_seconds, "supervising process");
        let started = Instant::now();
        let max_delay = Duration::from_millis(poll.max_ms);
        let mut delay = Duration::from_millis(poll.initial_ms);

        loop {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(max_delay);

            let call = ToolCall {
                id: format!("poll_{}", uuid::Uuid::new_v4().simple()),
                name: reader.qualified_id.clone(),
                arguments: json!({"process_id": process_id}),
            };
            let (result, _) = self.tools.run_tool(&reader, &call, None).await;

            if !result.success {
                let error = result.message_text();
                tracing::warn!(process_id, error = %error, "process output unavailable");
                ctx.push(AuditEvent::ProcessExited {
                    process_id: process_id.to_string(),
                    exit_code: None,
                });
                ctx.active_processes.remove(process_id);
                return format!("Process {process_id} output unavailable: {error}");
            }

            if !result.content.is_empty() {
                if let Some(path) = &raw_log {
                    append_raw(path, &result.content);
                }
                if let Some(handle) = ctx.active_processes.get_mut(process_id) {
                    let condensed = handle.condenser.condense(&result.content);
                    handle.last_output_at = Instant::now();
                    handle.last_output_text = result.content.clone();
                    ctx.push(AuditEvent::ProcessOutput {
                        process_id: process_id.to_string(),
                        output: condensed.text,
                        condensed: condensed.condensed,
                    });
                }
            }

            let running = result
                .metadata
                .get("running")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            if !running {
                let exit_code = result.metadata.get("exit_code").and_then(|v| v.as_i64());
                ctx.push(AuditEvent::ProcessExited {
                    process_id: process_id.to_string(),
                    exit_code,
                });
                ctx.active_processes.remove(process_id);
                tracing::info!(process_id, ?exit_code, "process exited");
                return match exit_code {
                    Some(code) => format!("Process {process_id} exited with code {code}."),
                    None => format!("Process {process_id} exited."),
                };
            }

            let elapsed = started.elapsed().as_secs_f64();
            let idle = ctx
                .active_processes
                .get(process_id)
                .map(|h| h.last_output_at.elapsed().as_secs_f64())
                .unwrap_or(elapsed);
            let reason = if elapsed >= max_total {
                StallReason::Timeout
            } else if idle >= poll.max_idle_seconds {
                StallReason::Idle
            } else {
                continue;
            };
            return self
                .stop_stalled(ctx, process_id, reason, idle, elapsed, origin)
                .await;
        }
    }

    async fn stop_stalled(
        &self,
        ctx: &mut RunContext,
        process_id: &str,
        reason: StallReason,
        idle_seconds: f64,
        elapsed_seconds: f64,
        origin: CallOrigin<'_>,
    ) -> String {
        tracing::warn!(process_id, ?reason, idle_seconds, elapsed_seconds, "process stalled");
        let stalled = AuditEvent::ProcessStalled {
            process_id: process_id.to_string(),
            reason,
            idle_seconds,
            elapsed_seconds,
        };

        let Some(stop) = self.resolve_first(STOP_TOOL_NAMES) else {
            ctx.push(stalled);
            ctx.push(AuditEvent::ProcessStopFailed {
                process_id: process_id.to_string(),
                error: "no stop tool available".to_string(),
            });
            return format!("Process {process_id} stalled and could not be stopped.");
        };

        let call = ToolCall {
            id: format!("stop_{}", uuid::Uuid::new_v4().simple()),
            name: stop.qualified_id.clone(),
            arguments: json!({"process_id": process_id}),
        };
        let stop_origin = CallOrigin {
            max_total_seconds: None,
            ..origin
        };
        let outcome = self.gated_call(ctx, &stop, &call, stop_origin).await;

        ctx.push(stalled);
        ctx.push(AuditEvent::ProcessStop {
            process_id: process_id.to_string(),
            success: outcome.result.success,
            error: outcome.result.error.clone(),
        });
        ctx.active_processes.remove(process_id);

        let why = match reason {
            StallReason::Idle => "no output",
            StallReason::Timeout => "time budget exhausted",
        };
        if outcome.result.success {
            format!("Process {process_id} stalled ({why}) and was stopped.")
        } else {
            format!(
                "Process {process_id} stalled ({why}); stop failed: {}",
                outcome.result.message_text()
            )
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::{DesktopOpsConfig, ProcessPollConfig};
    use crate::testing::{engine, FakeTools, ScriptedChat, ScriptedPrompt};
    use crate::tools::provider::ToolProvider;
    use crate::tools::types::ToolResult;

    fn poll_config() -> DesktopOpsConfig {
        DesktopOpsConfig {
            process_poll: ProcessPollConfig {
                initial_ms: 100,
                max_ms: 400,
                max_idle_seconds: 1.0,
                max_total_seconds: 10.0,
                ..ProcessPollConfig::default()
            },
            ..DesktopOpsConfig::default()
        }
    }

    fn start_call() -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "start_process".into(),
            arguments: json!({"argv": ["tail", "-f", "app.log"]}),
        }
    }

    #[test]
    fn test_raw_log_reopen_keeps_earlier_output() {
        let dir = tempfile::tempdir().unwrap();
        let ops = engine(
            poll_config(),
            Arc::new(FakeTools::process_tools()),
            Arc::new(ScriptedChat::new(vec![])),
            Arc::new(ScriptedPrompt::new(&[])),
            dir.path(),
        );
        let mut ctx = ops.new_context("watch the log");

        let first = ops.open_raw_log(&mut ctx, "process-1").unwrap();
        std::fs::write(&first, "first run\n").unwrap();
        let second = ops.open_raw_log(&mut ctx, "process-1").unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "first run\n");
    }

    #[test]
    fn test_sanitize_process_id() {
        assert_eq!(sanitize("process-1"), "process-1");
        assert_eq!(sanitize("a/b c"), "a_b_c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_process_is_stalled_then_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let tools = Arc::new(FakeTools::process_tools());
        tools.push_result(
            "start_process",
            ToolResult::ok("started").with_metadata("process_id", json!("process-1")),
        );
        let ops = engine(
            poll_config(),
            tools.clone(),
            Arc::new(ScriptedChat::new(vec![])),
            Arc::new(ScriptedPrompt::new(&["y"])),
            dir.path(),
        );
        let mut ctx = ops.new_context("tail the log");
        let start = tools.resolve("start_process").unwrap();

        let outcome = ops
            .execute_tool_call_with_policy(&mut ctx, &start, &start_call(), CallOrigin::default())
            .await;

        assert!(outcome.supervision.unwrap().contains("stalled"));
        let kinds: Vec<&str> = ctx.audit.events().iter().map(|e| e.kind()).collect();
        let stalled = kinds.iter().position(|k| *k == "process_stalled").unwrap();
        assert_eq!(kinds[stalled + 1], "process_stop");
        assert_eq!(ctx.audit.of_kind("process_stalled").count(), 1);
        assert_eq!(ctx.audit.of_kind("process_stop").count(), 1);
        assert!(ctx.active_processes.is_empty());
        assert!(ctx.artifacts.iter().any(|a| a.kind == "log"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exited_process_is_released_without_stop() {
        let dir = tempfile::tempdir().unwrap();
        let tools = Arc::new(FakeTools::process_tools());
        tools.push_result(
            "start_process",
            ToolResult::ok("started").with_metadata("process_id", json!("process-1")),
        );
        tools.push_result("read_process_output", ToolResult::ok("line one\n"));
        tools.push_result(
            "read_process_output",
            ToolResult::ok("line two\n")
                .with_metadata("running", json!(false))
                .with_metadata("exit_code", json!(0)),
        );
        let ops = engine(
            poll_config(),
            tools.clone(),
            Arc::new(ScriptedChat::new(vec![])),
            Arc::new(ScriptedPrompt::new(&["y"])),
            dir.path(),
        );
        let mut ctx = ops.new_context("tail the log");
        let start = tools.resolve("start_process").unwrap();

        let outcome = ops
            .execute_tool_call_with_policy(&mut ctx, &start, &start_call(), CallOrigin::default())
            .await;

        assert_eq!(
            outcome.supervision.as_deref(),
            Some("Process process-1 exited with code 0.")
        );
        assert_eq!(ctx.audit.of_kind("process_output").count(), 2);
        assert_eq!(ctx.audit.of_kind("process_exited").count(), 1);
        assert_eq!(ctx.audit.of_kind("process_stop").count(), 0);
        assert!(ctx.active_processes.is_empty());

        let log = ctx.artifacts.iter().find(|a| a.kind == "log").unwrap();
        let raw = std::fs::read_to_string(&log.path).unwrap();
        assert_eq!(raw, "line one\nline two\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_budget_override_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let tools = Arc::new(FakeTools::process_tools());
        tools.push_result(
            "start_process",
            ToolResult::ok("started").with_metadata("process_id", json!("process-1")),
        );
        for _ in 0..20 {
            tools.push_result("read_process_output", ToolResult::ok("tick\n"));
        }
        let ops = engine(
            poll_config(),
            tools.clone(),
            Arc::new(ScriptedChat::new(vec![])),
            Arc::new(ScriptedPrompt::new(&["y"])),
            dir.path(),
        );
        let mut ctx = ops.new_context("tail the log");
        let start = tools.resolve("start_process").unwrap();
        let origin = CallOrigin {
            max_total_seconds: Some(0.5),
            ..CallOrigin::default()
        };

        ops.execute_tool_call_with_policy(&mut ctx, &start, &start_call(), origin)
            .await;

        let stalled = ctx.audit.of_kind("process_stalled").next().unwrap();
        assert!(matches!(
            stalled,
            AuditEvent::ProcessStalled {
                reason: StallReason::Timeout,
                ..
            }
        ));
    }
}
