//! Tools: what the engine can call and how it calls it.
//!
//! - `types`: descriptors, results, artifacts, provider audit details
//! - `provider`: the [`ToolProvider`] seam (resolve, schemas, execute)
//! - `builtin`: filesystem, shell-process and web tools
//! - `errors`: [`ToolError`], converted to failed results at the seam

pub mod builtin;
pub mod errors;
pub mod provider;
pub mod types;

pub use builtin::BuiltinTools;
pub use errors::ToolError;
pub use provider::ToolProvider;
pub use types::{Artifact, ToolAudit, ToolCategory, ToolDescriptor, ToolResult};
