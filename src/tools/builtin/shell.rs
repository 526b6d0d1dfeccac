//! Built-in shell tools: `run`, `start`, `read`, `stop`.
//!
//! Commands are executed directly from an argv list, never through a shell.
//! Long-running processes live in a [`ProcessTable`] owned by the provider;
//! background tasks buffer their stdout/stderr until the next `read`.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::tools::errors::ToolError;
use crate::tools::types::{ToolCategory, ToolDescriptor, ToolResult};

pub const RUN: &str = "builtin:shell:run";
pub const START: &str = "builtin:shell:start";
pub const READ: &str = "builtin:shell:read";
pub const STOP: &str = "builtin:shell:stop";

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default time limit for `run`.
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 120;

/// Time to wait for a killed process to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Output kept from a `run` (tail).
const MAX_RUN_OUTPUT_BYTES: usize = 32 * 1024;

/// Read size for the background output readers.
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Time to wait for the readers to reach EOF after a process exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub(super) fn descriptors() -> Vec<ToolDescriptor> {
    let command_props = json!({
        "type": "object",
        "properties": {
            "argv": {"type": "array", "items": {"type": "string"}},
            "command": {"type": "string", "description": "Whitespace-separated command (no shell)"},
            "cwd": {"type": "string"},
            "timeout_seconds": {"type": "integer", "minimum": 1}
        }
    });
    let process_props = json!({
        "type": "object",
        "properties": {"process_id": {"type": "string"}},
        "required": ["process_id"]
    });
    vec![
        ToolDescriptor::new(RUN, "Run a command to completion and return its output.")
            .category(ToolCategory::Exec)
            .requires_shell()
            .path_params(&["cwd"])
            .parameters(command_props.clone()),
        ToolDescriptor::new(START, "Start a long-running command; returns a process_id.")
            .category(ToolCategory::Exec)
            .requires_shell()
            .path_params(&["cwd"])
            .parameters(command_props),
        ToolDescriptor::new(READ, "Read new output from a started process.")
            .category(ToolCategory::Read)
            .requires_shell()
            .parameters(process_props.clone()),
        ToolDescriptor::new(STOP, "Stop a started process.")
            .category(ToolCategory::Exec)
            .requires_shell()
            .parameters(process_props),
    ]
}

/// Extract the argv from `argv` (array) or `command` (whitespace split).
pub(super) fn parse_argv(tool: &str, args: &serde_json::Value) -> Result<Vec<String>, ToolError> {
    let argv: Vec<String> = if let Some(items) = args.get("argv").and_then(|a| a.as_array()) {
        items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    } else if let Some(command) = args.get("command").and_then(|c| c.as_str()) {
        command.split_whitespace().map(str::to_string).collect()
    } else {
        Vec::new()
    };
    if argv.is_empty() {
        return Err(ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: "expected a non-empty 'argv' array or 'command' string".into(),
        });
    }
    Ok(argv)
}

fn command(argv: &[String], cwd: &Path) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Keep the last `max` bytes, on a char boundary.
fn tail_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Run to completion; non-zero exit is a failed result carrying the output.
pub(super) async fn run(argv: &[String], cwd: &Path, timeout_secs: Option<u64>) -> Result<ToolResult, ToolError> {
    let joined = argv.join(" ");
    let seconds = timeout_secs.unwrap_or(DEFAULT_RUN_TIMEOUT_SECS);
    let child = command(argv, cwd).spawn().map_err(|e| ToolError::Spawn {
        command: joined.clone(),
        reason: e.to_string(),
    })?;

    let output = tokio::time::timeout(Duration::from_secs(seconds), child.wait_with_output())
        .await
        .map_err(|_| ToolError::Timeout {
            command: joined.clone(),
            seconds,
        })??;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    let content = tail_bytes(&text, MAX_RUN_OUTPUT_BYTES).to_string();
    let exit_code = output.status.code();

    tracing::debug!(command = %joined, exit_code = ?exit_code, "command finished");

    let result = if output.status.success() {
        ToolResult::ok(content)
    } else {
        let mut failed = ToolResult::failure(match exit_code {
            Some(code) => format!("'{joined}' exited with code {code}"),
            None => format!("'{joined}' was terminated by a signal"),
        });
        failed.content = content;
        failed
    };
    Ok(result
        .with_metadata("command", json!(joined))
        .with_metadata("exit_code", json!(exit_code)))
}

// ─── ProcessTable ────────────────────────────────────────────────────────────

/// Raw stdout/stderr bytes not yet returned by a `read`.
type OutputBuffer = Arc<Mutex<Vec<u8>>>;

/// A started process, its buffered output and the tasks filling it.
struct ManagedProcess {
    command: String,
    child: Child,
    buffer: OutputBuffer,
    readers: Vec<JoinHandle<()>>,
}

/// Processes started by `builtin:shell:start`, keyed by `process-N`.
#[derive(Default)]
pub struct ProcessTable {
    processes: tokio::sync::Mutex<HashMap<String, ManagedProcess>>,
    next_id: AtomicU64,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) async fn start(&self, argv: &[String], cwd: &Path) -> Result<ToolResult, ToolError> {
        let joined = argv.join(" ");
        let mut child = command(argv, cwd).spawn().map_err(|e| ToolError::Spawn {
            command: joined.clone(),
            reason: e.to_string(),
        })?;

        let buffer: OutputBuffer = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Arc::clone(&buffer)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Arc::clone(&buffer)));
        }

        let id = format!("process-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let pid = child.id();
        self.processes.lock().await.insert(
            id.clone(),
            ManagedProcess {
                command: joined.clone(),
                child,
                buffer,
                readers,
            },
        );
        tracing::info!(process_id = %id, pid = ?pid, command = %joined, "process started");

        Ok(ToolResult::ok(format!("Started {id}: {joined}"))
            .with_metadata("process_id", json!(id))
            .with_metadata("pid", json!(pid))
            .with_metadata("command", json!(joined)))
    }

    /// Drain output buffered since the last read.
    ///
    /// Once the process has exited, the readers are awaited to EOF, the rest
    /// of the output is returned and the entry leaves the table.
    pub(super) async fn read(&self, process_id: &str) -> Result<ToolResult, ToolError> {
        let mut processes = self.processes.lock().await;
        let process = processes
            .get_mut(process_id)
            .ok_or_else(|| ToolError::UnknownProcess {
                process_id: process_id.to_string(),
            })?;

        let status = process.child.try_wait()?;
        let output = match status {
            None => take_output(&process.buffer, false),
            Some(_) => {
                let Some(mut exited) = processes.remove(process_id) else {
                    return Err(ToolError::UnknownProcess {
                        process_id: process_id.to_string(),
                    });
                };
                drop(processes);
                for reader in exited.readers.drain(..) {
                    let abort = reader.abort_handle();
                    if tokio::time::timeout(DRAIN_TIMEOUT, reader).await.is_err() {
                        tracing::warn!(process_id, "output reader still open after exit");
                        abort.abort();
                    }
                }
                tracing::info!(
                    process_id,
                    command = %exited.command,
                    exit_code = ?status.and_then(|s| s.code()),
                    "process exited"
                );
                take_output(&exited.buffer, true)
            }
        };

        Ok(ToolResult::ok(output)
            .with_metadata("process_id", json!(process_id))
            .with_metadata("running", json!(status.is_none()))
            .with_metadata("exit_code", json!(status.and_then(|s| s.code()))))
    }

    pub(super) async fn stop(&self, process_id: &str) -> Result<ToolResult, ToolError> {
        let mut process = self
            .processes
            .lock()
            .await
            .remove(process_id)
            .ok_or_else(|| ToolError::UnknownProcess {
                process_id: process_id.to_string(),
            })?;

        if process.child.try_wait()?.is_none() {
            let _ = process.child.start_kill();
            if tokio::time::timeout(STOP_TIMEOUT, process.child.wait())
                .await
                .is_err()
            {
                tracing::warn!(process_id, "process did not exit after kill");
            }
        }
        for reader in &process.readers {
            reader.abort();
        }
        tracing::info!(process_id, command = %process.command, "process stopped");

        Ok(ToolResult::ok(format!("Stopped {process_id}"))
            .with_metadata("process_id", json!(process_id)))
    }

    pub async fn len(&self) -> usize {
        self.processes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Copy raw bytes from `stream` into `buffer` until EOF.
fn spawn_reader<R>(mut stream: R, buffer: OutputBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => match buffer.lock() {
                    Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                    Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
                },
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "process output reader failed");
                    break;
                }
            }
        }
    })
}

/// Take buffered bytes as text. Invalid bytes become U+FFFD; an incomplete
/// UTF-8 sequence at the end is held back for the next read unless `all`.
fn take_output(buffer: &OutputBuffer, all: bool) -> String {
    let mut buf = match buffer.lock() {
        Ok(buf) => buf,
        Err(poisoned) => poisoned.into_inner(),
    };
    let keep = if all { 0 } else { incomplete_tail(&buf) };
    let split = buf.len() - keep;
    let rest = buf.split_off(split);
    let taken = std::mem::replace(&mut *buf, rest);
    String::from_utf8_lossy(&taken).into_owned()
}

/// Length of a truncated UTF-8 sequence at the end of `bytes`, if any.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let b = bytes[i];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        let present = bytes.len() - i;
        return if present < width { present } else { 0 };
    }
    0
}

// ─── Tests ───────────────────────────────────────────────────────────────────
