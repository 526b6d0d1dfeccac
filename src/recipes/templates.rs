//! Plan builders, one per recipe.
//!
//! Commands are argv lists with an explicit `cwd`; nothing is routed
//! through a shell.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;

use super::goal_matching::{argv_of, detect_build_command, detect_test_command};
use super::{FailureHook, RecipePlan, RecipeStep, StepOutcome};
use crate::desktop_ops::context::RunContext;
use crate::desktop_ops::errors::EngineError;
use crate::governance::paths::resolve_path;
use crate::tools::builtin::{fs, shell};

/// Failure output that means pytest itself is missing.
const MISSING_PYTEST: &[&str] = &["No module named pytest", "pytest: command not found"];

const DEFAULT_TAIL_LINES: u64 = 50;

fn required_str<'a>(
    recipe: &str,
    args: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, EngineError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| EngineError::RecipePlanning {
            recipe: recipe.to_string(),
            reason: format!("missing string argument '{key}'"),
        })
}

fn optional_str<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|v| !v.trim().is_empty())
}

fn plan(
    name: &str,
    summary: &str,
    steps: Vec<RecipeStep>,
    done: impl Fn(&mut RunContext, &[StepOutcome]) -> bool + Send + Sync + 'static,
) -> RecipePlan {
    RecipePlan {
        name: name.to_string(),
        summary: summary.to_string(),
        steps,
        done_criteria: Arc::new(done),
    }
}

fn last_succeeded(results: &[StepOutcome]) -> bool {
    results.last().is_some_and(|r| r.success)
}

/// `python` inside a virtualenv directory.
fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

/// Extras for `pip install -e .[...]`: sorted, deduplicated, `all` wins.
fn extras_spec(extras: &[String]) -> String {
    let mut extras: Vec<&str> = extras
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .collect();
    if extras.contains(&"all") {
        return ".[all]".to_string();
    }
    extras.sort_unstable();
    extras.dedup();
    if extras.is_empty() {
        ".".to_string()
    } else {
        format!(".[{}]", extras.join(","))
    }
}

// ─── Repository ──────────────────────────────────────────────────────────────

pub(super) fn repo_clone_open(
    args: &serde_json::Value,
    ctx: &RunContext,
) -> Result<RecipePlan, EngineError> {
    let name = "repo_clone_open";
    let url = required_str(name, args, "repo_url")?;
    let dest = required_str(name, args, "dest_dir")?;
    let dest_path = resolve_path(dest, &ctx.cwd);

    let status = RecipeStep::new(
        "status",
        shell::RUN,
        json!({"argv": ["git", "status", "-sb"], "cwd": dest}),
        "Show repository status",
    );
    let steps = if dest_path.exists() {
        vec![
            RecipeStep::new(
                "fetch_updates",
                shell::RUN,
                json!({"argv": ["git", "fetch", "--all", "--prune"], "cwd": dest}),
                "Refresh the existing clone",
            ),
            status,
        ]
    } else {
        vec![
            RecipeStep::new(
                "clone",
                shell::RUN,
                json!({"argv": ["git", "clone", url, dest], "cwd": ctx.cwd.display().to_string()}),
                "Clone the repository",
            ),
            status,
        ]
    };

    Ok(plan(
        name,
        "Repository cloned/opened and status captured.",
        steps,
        move |ctx, _| {
            if dest_path.join(".git").exists() {
                ctx.repo_root = Some(dest_path.clone());
                true
            } else {
                false
            }
        },
    ))
}

pub(super) fn run_git_status(args: &serde_json::Value) -> Result<RecipePlan, EngineError> {
    let name = "run_git_status";
    let root = required_str(name, args, "repo_root")?;
    let steps = vec![RecipeStep::new(
        "git_status",
        shell::RUN,
        json!({"argv": ["git", "status"], "cwd": root}),
        "Run git status",
    )];
    Ok(plan(name, "Git status captured.", steps, |_, results| {
        last_succeeded(results)
    }))
}

// ─── Python ──────────────────────────────────────────────────────────────────

pub(super) fn python_bootstrap(
    args: &serde_json::Value,
    extras: &[String],
) -> Result<RecipePlan, EngineError> {
    let name = "python_bootstrap";
    let root = required_str(name, args, "repo_root")?;
    let python = optional_str(args, "python_exe").unwrap_or("python");
    let venv_dir = optional_str(args, "venv_dir").unwrap_or(".venv");

    let root_path = PathBuf::from(root);
    let venv_path = resolve_path(venv_dir, &root_path);
    let venv_python = venv_python(&venv_path).display().to_string();

    let steps = vec![
        RecipeStep::new(
            "create_venv",
            shell::RUN,
            json!({"argv": [python, "-m", "venv", venv_dir], "cwd": root}),
            "Create the virtualenv",
        ),
        RecipeStep::new(
            "upgrade_pip",
            shell::RUN,
            json!({"argv": [venv_python, "-m", "pip", "install", "-U", "pip"], "cwd": root}),
            "Upgrade pip inside the virtualenv",
        ),
        RecipeStep::new(
            "install_editable",
            shell::RUN,
            json!({
                "argv": [venv_python, "-m", "pip", "install", "-e", extras_spec(extras)],
                "cwd": root
            }),
            "Install the project in editable mode",
        ),
    ];

    Ok(plan(
        name,
        "Virtualenv created and dependencies installed.",
        steps,
        move |ctx, results| {
            if !last_succeeded(results) || !venv_path.is_dir() {
                return false;
            }
            ctx.virtualenv = venv_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            true
        },
    ))
}

pub(super) fn run_tests(args: &serde_json::Value) -> Result<RecipePlan, EngineError> {
    let name = "run_tests";
    let root = required_str(name, args, "repo_root")?.to_string();

    let mut argv: Vec<String> = match args.get("argv").and_then(|v| v.as_array()) {
        Some(items) if !items.is_empty() => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => argv_of(detect_test_command(Path::new(&root))),
    };
    if let Some(target) = optional_str(args, "target") {
        argv.push(target.to_string());
    }

    let remediation: FailureHook = {
        let root = root.clone();
        let argv = argv.clone();
        Arc::new(move |output: &str| {
            if !MISSING_PYTEST.iter().any(|marker| output.contains(marker)) {
                return Vec::new();
            }
            vec![
                RecipeStep::new(
                    "install_pytest",
                    shell::RUN,
                    json!({"argv": ["python", "-m", "pip", "install", "pytest"], "cwd": root}),
                    "Install pytest",
                ),
                RecipeStep::new(
                    "rerun_tests",
                    shell::RUN,
                    json!({"argv": argv, "cwd": root}),
                    "Run the tests again",
                ),
            ]
        })
    };

    let steps = vec![RecipeStep::new(
        "run_tests",
        shell::RUN,
        json!({"argv": argv, "cwd": root}),
        "Run the test suite",
    )
    .on_failure(remediation)];

    Ok(plan(name, "Tests executed.", steps, |_, results| {
        last_succeeded(results)
    }))
}

// ─── Files ───────────────────────────────────────────────────────────────────

pub(super) fn list_directory(args: &serde_json::Value) -> Result<RecipePlan, EngineError> {
    let name = "list_directory";
    let path = required_str(name, args, "path")?;
    let steps = vec![RecipeStep::new(
        "list_dir",
        fs::LIST_DIR,
        json!({"path": path}),
        "List directory entries",
    )];
    Ok(plan(name, "Directory listed.", steps, |_, results| {
        last_succeeded(results)
    }))
}

pub(super) fn create_text_file(args: &serde_json::Value) -> Result<RecipePlan, EngineError> {
    let name = "create_text_file";
    let path = required_str(name, args, "path")?.to_string();
    let content = args
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let steps = vec![RecipeStep::new(
        "write_file",
        fs::WRITE_TEXT,
        json!({"path": path, "content": content}),
        "Write the file",
    )];

    Ok(plan(name, "Text file created.", steps, move |ctx, results| {
        if !last_succeeded(results) {
            return false;
        }
        let written = resolve_path(&path, &ctx.cwd);
        std::fs::read_to_string(written).is_ok_and(|actual| actual == content)
    }))
}

// ─── Build and logs ──────────────────────────────────────────────────────────

pub(super) fn build_project(args: &serde_json::Value) -> Result<RecipePlan, EngineError> {
    let name = "build_project";
    let root = required_str(name, args, "repo_root")?;
    let command = detect_build_command(Path::new(root));
    let steps = vec![RecipeStep::new(
        "build",
        shell::RUN,
        json!({"argv": argv_of(command), "cwd": root}),
        "Build the project",
    )];
    Ok(plan(
        name,
        &format!("Build executed using `{command}`."),
        steps,
        |_, results| last_succeeded(results),
    ))
}

pub(super) fn log_tail(args: &serde_json::Value) -> Result<RecipePlan, EngineError> {
    let name = "log_tail";
    let file_path = required_str(name, args, "file_path")?;
    let lines = args
        .get("lines")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_TAIL_LINES);
    let max_seconds = args.get("max_seconds").and_then(|v| v.as_f64());

    let steps = vec![
        RecipeStep::new(
            "start_tail",
            shell::START,
            json!({"argv": ["tail", "-n", lines.to_string(), "-f", file_path]}),
            "Follow the log file",
        )
        .max_total_seconds(max_seconds),
        RecipeStep::computed(
            "stop_tail",
            shell::STOP,
            Arc::new(|ctx: &RunContext, last: Option<&StepOutcome>| {
                let id = last?.metadata.get("process_id")?.as_str()?;
                ctx.active_processes
                    .contains_key(id)
                    .then(|| json!({"process_id": id}))
            }),
            "Stop following the log file",
        ),
    ];

    Ok(plan(name, "Log tail captured.", steps, |_, results| {
        results.first().is_some_and(|r| r.success)
    }))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DesktopOpsConfig, DesktopOpsMode};
    use crate::desktop_ops::types::ProcessHandle;

    fn ctx(dir: &Path) -> RunContext {
        RunContext::new("goal", dir, DesktopOpsMode::Commander, &DesktopOpsConfig::default())
    }

    fn outcome(success: bool) -> StepOutcome {
        StepOutcome {
            success,
            ..Default::default()
        }
    }

    #[test]
    fn test_clone_plan_depends_on_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let args = json!({"repo_url": "https://example.com/a.git", "dest_dir": "a"});

        let fresh = repo_clone_open(&args, &ctx).unwrap();
        let names: Vec<&str> = fresh.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["clone", "status"]);

        std::fs::create_dir(dir.path().join("a")).unwrap();
        let existing = repo_clone_open(&args, &ctx).unwrap();
        let names: Vec<&str> = existing.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["fetch_updates", "status"]);
    }

    #[test]
    fn test_clone_done_records_repo_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx(dir.path());
        let args = json!({"repo_url": "https://example.com/a.git", "dest_dir": "a"});
        let plan = repo_clone_open(&args, &ctx).unwrap();
        assert!(!(plan.done_criteria)(&mut ctx, &[outcome(true)]));

        std::fs::create_dir_all(ctx.cwd.join("a").join(".git")).unwrap();
        assert!((plan.done_criteria)(&mut ctx, &[outcome(true)]));
        assert_eq!(ctx.repo_root, Some(ctx.cwd.join("a")));
    }

    #[test]
    fn test_bootstrap_extras_sorted_and_all_wins() {
        let extras = vec!["test".to_string(), "dev".to_string(), "dev".to_string()];
        assert_eq!(extras_spec(&extras), ".[dev,test]");
        let with_all = vec!["dev".to_string(), "all".to_string()];
        assert_eq!(extras_spec(&with_all), ".[all]");
        assert_eq!(extras_spec(&[]), ".");

        let plan = python_bootstrap(&json!({"repo_root": "/r"}), &extras).unwrap();
        assert_eq!(plan.steps.len(), 3);
        let install = plan.steps[2].args.known().unwrap();
        assert_eq!(install["argv"][5], ".[dev,test]");
    }

    #[test]
    fn test_run_tests_remediates_missing_pytest() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().display().to_string();
        let plan = run_tests(&json!({"repo_root": root, "target": "tests/unit"})).unwrap();
        let step = &plan.steps[0];
        assert_eq!(
            step.args.known().unwrap()["argv"],
            json!(["pytest", "-q", "tests/unit"])
        );

        let hook = step.on_failure.as_ref().unwrap();
        let followups = hook("/usr/bin/python: No module named pytest");
        let names: Vec<&str> = followups.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["install_pytest", "rerun_tests"]);
        assert!(hook("1 failed, 3 passed").is_empty());
    }

    #[test]
    fn test_create_text_file_done_checks_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx(dir.path());
        let plan = create_text_file(&json!({"path": "notes.txt", "content": "hi"})).unwrap();

        assert!(!(plan.done_criteria)(&mut ctx, &[outcome(true)]));
        std::fs::write(ctx.cwd.join("notes.txt"), "hello").unwrap();
        assert!(!(plan.done_criteria)(&mut ctx, &[outcome(true)]));
        std::fs::write(ctx.cwd.join("notes.txt"), "hi").unwrap();
        assert!((plan.done_criteria)(&mut ctx, &[outcome(true)]));
        assert!(!(plan.done_criteria)(&mut ctx, &[outcome(false)]));
    }

    #[test]
    fn test_build_summary_names_command() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        let plan = build_project(&json!({"repo_root": dir.path().display().to_string()})).unwrap();
        assert_eq!(plan.summary, "Build executed using `cargo build`.");
    }

    #[test]
    fn test_log_tail_stop_needs_active_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx(dir.path());
        let plan = log_tail(&json!({"file_path": "/var/log/app.log", "max_seconds": 2.0})).unwrap();
        assert_eq!(plan.steps[0].max_total_seconds, Some(2.0));
        assert!(plan.steps[1].args.known().is_none());

        let mut started = outcome(true);
        started
            .metadata
            .insert("process_id".into(), json!("process-1"));
        assert_eq!(plan.steps[1].args.resolve(&ctx, Some(&started)), None);

        ctx.active_processes.insert(
            "process-1".into(),
            ProcessHandle::new("process-1", None, 1024, 10),
        );
        assert_eq!(
            plan.steps[1].args.resolve(&ctx, Some(&started)),
            Some(json!({"process_id": "process-1"}))
        );
    }

    #[test]
    fn test_missing_argument_is_planning_error() {
        assert!(matches!(
            list_directory(&json!({})),
            Err(EngineError::RecipePlanning { .. })
        ));
    }
}
