//! Recipes: deterministic multi-step procedures for common goals.
//!
//! A goal is matched against ordered heuristics ([`RecipeRegistry::match_goal`]);
//! a match expands into a [`RecipePlan`] whose steps run through the same
//! approval gateway as model-issued calls. Recipes are also offered to the
//! model as `desktop.recipe.<name>` tools.
//!
//! - `goal_matching`: regex extraction of URLs, paths, content, intents
//! - `templates`: one plan builder per recipe

pub mod goal_matching;
mod templates;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::events::PlannedStep;
use crate::config::DesktopOpsConfig;
use crate::desktop_ops::context::RunContext;
use crate::desktop_ops::errors::EngineError;
use crate::inference::types::ToolDefinition;

use goal_matching as gm;

/// Tool-name prefix under which recipes are offered to the model.
pub const RECIPE_PREFIX: &str = "desktop.recipe.";

/// Recipe name from a `desktop.recipe.<name>` tool name.
pub fn recipe_name(tool_name: &str) -> Option<&str> {
    tool_name.strip_prefix(RECIPE_PREFIX)
}

// ─── Types ───────────────────────────────────────────────────────────────────

/// What a finished step left behind, as seen by later steps and done criteria.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub step: String,
    pub tool: String,
    pub success: bool,
    /// Content on success, error text otherwise.
    pub output: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Computes a step's arguments from the run and the previous step.
/// `None` means the step cannot run.
pub type ArgsFn =
    Arc<dyn Fn(&RunContext, Option<&StepOutcome>) -> Option<serde_json::Value> + Send + Sync>;

/// Inspects failure output and returns remedial steps (empty = unhandled).
pub type FailureHook = Arc<dyn Fn(&str) -> Vec<RecipeStep> + Send + Sync>;

/// Decides whether the plan reached its goal; may record discoveries on the run.
pub type DoneCriteria = Arc<dyn Fn(&mut RunContext, &[StepOutcome]) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum StepArgs {
    Static(serde_json::Value),
    Computed(ArgsFn),
}

impl StepArgs {
    pub fn resolve(&self, ctx: &RunContext, last: Option<&StepOutcome>) -> Option<serde_json::Value> {
        match self {
            StepArgs::Static(value) => Some(value.clone()),
            StepArgs::Computed(f) => f(ctx, last),
        }
    }

    /// Arguments known before execution.
    pub fn known(&self) -> Option<&serde_json::Value> {
        match self {
            StepArgs::Static(value) => Some(value),
            StepArgs::Computed(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct RecipeStep {
    pub name: String,
    pub tool_name: String,
    pub args: StepArgs,
    pub description: String,
    pub on_failure: Option<FailureHook>,
    /// Supervision budget override for a process this step starts.
    pub max_total_seconds: Option<f64>,
}

impl RecipeStep {
    pub fn new(
        name: &str,
        tool_name: &str,
        args: serde_json::Value,
        description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            tool_name: tool_name.to_string(),
            args: StepArgs::Static(args),
            description: description.to_string(),
            on_failure: None,
            max_total_seconds: None,
        }
    }

    pub fn computed(name: &str, tool_name: &str, args: ArgsFn, description: &str) -> Self {
        Self {
            args: StepArgs::Computed(args),
            ..Self::new(name, tool_name, serde_json::Value::Null, description)
        }
    }

    pub fn on_failure(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    pub fn max_total_seconds(mut self, seconds: Option<f64>) -> Self {
        self.max_total_seconds = seconds;
        self
    }

    pub fn planned(&self) -> PlannedStep {
        PlannedStep {
            name: self.name.clone(),
            tool: self.tool_name.clone(),
            args: self.args.known().cloned(),
            description: self.description.clone(),
        }
    }
}

impl std::fmt::Debug for RecipeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeStep")
            .field("name", &self.name)
            .field("tool_name", &self.tool_name)
            .field("args", &self.args.known())
            .field("has_on_failure", &self.on_failure.is_some())
            .finish()
    }
}

pub struct RecipePlan {
    pub name: String,
    pub summary: String,
    pub steps: Vec<RecipeStep>,
    pub done_criteria: DoneCriteria,
}

impl RecipePlan {
    pub fn planned_steps(&self) -> Vec<PlannedStep> {
        self.steps.iter().map(RecipeStep::planned).collect()
    }
}

impl std::fmt::Debug for RecipePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipePlan")
            .field("name", &self.name)
            .field("summary", &self.summary)
            .field("steps", &self.steps)
            .finish()
    }
}

/// A goal that matched a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeMatch {
    pub name: String,
    pub arguments: serde_json::Value,
    /// Which heuristic fired, e.g. `goal_mentions_clone`.
    pub reason: String,
}

impl RecipeMatch {
    fn new(name: &str, arguments: serde_json::Value, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            arguments,
            reason: reason.to_string(),
        }
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// The recipe catalogue.
#[derive(Debug, Clone, Default)]
pub struct RecipeRegistry {
    bootstrap_extras: Vec<String>,
}

impl RecipeRegistry {
    pub fn new(config: &DesktopOpsConfig) -> Self {
        Self {
            bootstrap_extras: config.python_bootstrap_extras.clone(),
        }
    }

    /// Tool definitions offered to the model next to the provider's tools.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let repo_root_only = json!({
            "type": "object",
            "properties": {"repo_root": {"type": "string"}},
            "required": ["repo_root"]
        });
        let def = |name: &str, description: &str, parameters: serde_json::Value| {
            ToolDefinition::function(format!("{RECIPE_PREFIX}{name}"), description, parameters)
        };
        vec![
            def(
                "repo_clone_open",
                "Clone a repository (or refresh an existing clone) and show its status.",
                json!({
                    "type": "object",
                    "properties": {
                        "repo_url": {"type": "string"},
                        "dest_dir": {"type": "string"}
                    },
                    "required": ["repo_url", "dest_dir"]
                }),
            ),
            def(
                "python_bootstrap",
                "Create a virtualenv and install the project in editable mode.",
                json!({
                    "type": "object",
                    "properties": {
                        "repo_root": {"type": "string"},
                        "python_exe": {"type": "string"},
                        "venv_dir": {"type": "string", "default": ".venv"}
                    },
                    "required": ["repo_root"]
                }),
            ),
            def(
                "run_tests",
                "Run the project's test suite.",
                json!({
                    "type": "object",
                    "properties": {
                        "repo_root": {"type": "string"},
                        "argv": {"type": "array", "items": {"type": "string"}},
                        "target": {"type": "string"}
                    },
                    "required": ["repo_root"]
                }),
            ),
            def("run_git_status", "Run git status in the repository.", repo_root_only.clone()),
            def(
                "list_directory",
                "List the entries of a directory.",
                json!({
                    "type": "object",
                    "properties": {"path": {"type": "string"}},
                    "required": ["path"]
                }),
            ),
            def(
                "create_text_file",
                "Create or overwrite a text file with exact content.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "content": {"type": "string"}
                    },
                    "required": ["path", "content"]
                }),
            ),
            def(
                "build_project",
                "Build the project with the command its marker files imply.",
                repo_root_only,
            ),
            def(
                "log_tail",
                "Follow a log file for a while, then stop.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": {"type": "string"},
                        "max_seconds": {"type": "number"},
                        "lines": {"type": "integer", "default": 50}
                    },
                    "required": ["file_path"]
                }),
            ),
        ]
    }

    /// Expand a recipe into steps.
    pub fn plan(
        &self,
        name: &str,
        args: &serde_json::Value,
        ctx: &RunContext,
    ) -> Result<RecipePlan, EngineError> {
        let plan = match name {
            "repo_clone_open" => templates::repo_clone_open(args, ctx)?,
            "python_bootstrap" => templates::python_bootstrap(args, &self.bootstrap_extras)?,
            "run_tests" => templates::run_tests(args)?,
            "run_git_status" => templates::run_git_status(args)?,
            "list_directory" => templates::list_directory(args)?,
            "create_text_file" => templates::create_text_file(args)?,
            "build_project" => templates::build_project(args)?,
            "log_tail" => templates::log_tail(args)?,
            other => {
                return Err(EngineError::UnknownRecipe {
                    name: other.to_string(),
                })
            }
        };
        tracing::debug!(recipe = name, steps = plan.steps.len(), "recipe planned");
        Ok(plan)
    }

    /// First recipe whose heuristic fires for `goal`, in a fixed order.
    pub fn match_goal(&self, goal: &str, ctx: &RunContext) -> Option<RecipeMatch> {
        let repo_root = ctx
            .repo_root
            .as_ref()
            .map(|p| p.display().to_string());

        if goal.to_lowercase().contains("clone") {
            if let Some(url) = gm::extract_repo_url(goal) {
                let dest = gm::extract_dest_dir(goal).or_else(|| gm::repo_name_from_url(&url));
                if let Some(dest) = dest {
                    return Some(RecipeMatch::new(
                        "repo_clone_open",
                        json!({"repo_url": url, "dest_dir": dest}),
                        "goal_mentions_clone",
                    ));
                }
            }
        }

        if let (true, Some(root)) = (gm::mentions_bootstrap(goal), &repo_root) {
            return Some(RecipeMatch::new(
                "python_bootstrap",
                json!({"repo_root": root}),
                "goal_mentions_bootstrap",
            ));
        }

        if let Some((path, content)) = gm::extract_file_request(goal) {
            return Some(RecipeMatch::new(
                "create_text_file",
                json!({"path": path, "content": content}),
                "goal_mentions_file_write",
            ));
        }

        if let Some(path) = gm::extract_list_request(goal) {
            let listable = ctx
                .path_policy
                .validate(&path)
                .is_ok_and(|resolved| resolved.is_dir());
            if listable {
                return Some(RecipeMatch::new(
                    "list_directory",
                    json!({"path": path}),
                    "goal_mentions_list_directory",
                ));
            }
        }

        if let Some(root) = &repo_root {
            if gm::mentions_tests(goal) {
                return Some(RecipeMatch::new(
                    "run_tests",
                    json!({"repo_root": root}),
                    "goal_mentions_tests",
                ));
            }
            if gm::mentions_git_status(goal) {
                return Some(RecipeMatch::new(
                    "run_git_status",
                    json!({"repo_root": root}),
                    "goal_mentions_git_status",
                ));
            }
            if gm::mentions_build(goal) {
                return Some(RecipeMatch::new(
                    "build_project",
                    json!({"repo_root": root}),
                    "goal_mentions_build",
                ));
            }
        }

        gm::extract_log_path(goal).map(|file_path| {
            RecipeMatch::new("log_tail", json!({"file_path": file_path}), "goal_mentions_logs")
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DesktopOpsMode;

    fn ctx(dir: &std::path::Path) -> RunContext {
        RunContext::new("goal", dir, DesktopOpsMode::Commander, &DesktopOpsConfig::default())
    }

    #[test]
    fn test_definitions_are_prefixed() {
        let registry = RecipeRegistry::default();
        let defs = registry.definitions();
        assert_eq!(defs.len(), 8);
        assert!(defs
            .iter()
            .all(|d| recipe_name(&d.function.name).is_some()));
        assert_eq!(recipe_name("desktop.recipe.log_tail"), Some("log_tail"));
        assert_eq!(recipe_name("builtin:fs:list_dir"), None);
    }

    #[test]
    fn test_unknown_recipe_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RecipeRegistry::default();
        assert!(matches!(
            registry.plan("format_disk", &json!({}), &ctx(dir.path())),
            Err(EngineError::UnknownRecipe { .. })
        ));
    }

    #[test]
    fn test_match_clone_and_file_write() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RecipeRegistry::default();
        let ctx = ctx(dir.path());

        let clone = registry
            .match_goal("clone https://github.com/acme/widgets.git", &ctx)
            .unwrap();
        assert_eq!(clone.name, "repo_clone_open");
        assert_eq!(clone.arguments["dest_dir"], "widgets");

        let write = registry
            .match_goal("create a file named notes.txt with content 'hi'", &ctx)
            .unwrap();
        assert_eq!(write.name, "create_text_file");
        assert_eq!(write.arguments, json!({"path": "notes.txt", "content": "hi"}));
    }

    #[test]
    fn test_repo_scoped_recipes_need_repo_root() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RecipeRegistry::default();
        assert!(registry.match_goal("run the tests", &ctx(dir.path())).is_none());

        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let ctx = ctx(dir.path());
        assert_eq!(registry.match_goal("run the tests", &ctx).unwrap().name, "run_tests");
        assert_eq!(registry.match_goal("git status please", &ctx).unwrap().name, "run_git_status");
        assert_eq!(registry.match_goal("build it", &ctx).unwrap().name, "build_project");
        assert_eq!(
            registry.match_goal("bootstrap a venv", &ctx).unwrap().name,
            "python_bootstrap"
        );
    }

    #[test]
    fn test_list_requires_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let registry = RecipeRegistry::default();
        let ctx = ctx(dir.path());
        let listed = registry.match_goal("list files in src", &ctx).unwrap();
        assert_eq!(listed.name, "list_directory");
        assert!(registry.match_goal("list files in missing", &ctx).is_none());
    }

    #[test]
    fn test_log_tail_match() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RecipeRegistry::default();
        let matched = registry
            .match_goal("follow /var/log/app.log for errors", &ctx(dir.path()))
            .unwrap();
        assert_eq!(matched.name, "log_tail");
        assert_eq!(matched.arguments["file_path"], "/var/log/app.log");
    }
}
