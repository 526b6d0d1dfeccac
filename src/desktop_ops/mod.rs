//! Desktop Ops: the governed execution engine.
//!
//! - `controller`: [`DesktopOps`] and the `run()` loop
//! - `planning`: read-only `plan()` with optional dry-run probes
//! - `dispatch`: the single gated path every tool call takes
//! - `recipe_runner`: queue interpreter for recipe plans
//! - `supervisor`: polling, condensing and stall cleanup for started processes
//! - `condenser`: live-view shaping of process output
//! - `response_analysis`: completion / clarification / nudge decisions
//! - `context`: per-run state
//! - `types` / `errors`: result types and [`EngineError`]

pub mod condenser;
pub mod context;
pub mod controller;
pub mod dispatch;
pub mod errors;
pub mod planning;
pub mod recipe_runner;
pub mod response_analysis;
pub mod supervisor;
pub mod types;

pub use context::RunContext;
pub use controller::DesktopOps;
pub use dispatch::{CallOrigin, GatedOutcome};
pub use errors::EngineError;
pub use recipe_runner::RecipeOutcome;
pub use types::{DesktopOpsResult, ProcessHandle, RunStatus};
