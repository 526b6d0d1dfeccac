//! The tool provider seam: resolution, schemas, and execution.

use std::path::PathBuf;

use async_trait::async_trait;

use super::errors::ToolError;
use super::types::{ToolAudit, ToolDescriptor, ToolResult};
use crate::inference::types::{ToolCall, ToolDefinition};

/// Source of callable tools for the Desktop Ops engine.
///
/// `run_tool` never returns `Err`: failures come back as a failed
/// [`ToolResult`] so the engine can count retries instead of crashing.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Resolve a name the model (or a recipe) used to a descriptor.
    fn resolve(&self, name: &str) -> Result<ToolDescriptor, ToolError>;

    /// Schemas for every tool the model may call.
    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    /// Execute `call`. `allowed_paths`, when present, is the full set of
    /// roots and explicitly approved paths this call may touch.
    async fn run_tool(
        &self,
        tool: &ToolDescriptor,
        call: &ToolCall,
        allowed_paths: Option<&[PathBuf]>,
    ) -> (ToolResult, ToolAudit);
}
