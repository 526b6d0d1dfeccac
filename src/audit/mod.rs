//! Audit: the append-only event log, its persisted form, and the run report.
//!
//! - `events`: [`AuditEvent`] tagged enum and the [`AuditLog`] container
//! - `record`: [`RunRecord`], the per-run JSON document
//! - `summary`: [`RunReport`], rendered as text, markdown or JSON

pub mod events;
pub mod record;
pub mod summary;

pub use events::{AuditEvent, AuditLog, PlannedStep, PolicyCheckEvent, StallReason, ToolCallEvent};
pub use record::RunRecord;
pub use summary::{RunReport, SummaryOutcome};
