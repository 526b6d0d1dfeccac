//! Governance: everything that decides whether a tool call may run.
//!
//! - `risk`: pure risk classification of a call
//! - `paths`: path resolution and root membership, with a per-run cache
//! - `policy_cache`: content-addressed cache keys for full decisions
//! - `approval`: the Approval Gateway (mode policy, allowlist, prompts)
//! - `prompt`: the operator prompt seam
//!
//! Every model-issued and recipe-issued call goes through the same gateway.

pub mod approval;
pub mod paths;
pub mod policy_cache;
pub mod prompt;
pub mod risk;

pub use approval::{
    ApprovalDecision, ApprovalGateway, ApprovalLedger, ApprovalReason, ApprovalRecord,
    ApprovalRequest, ApprovalScope,
};
pub use paths::{PathCache, PathPolicy, PathValidationResult, PathViolation};
pub use policy_cache::{PolicyCache, PolicyCacheEntry, PolicyKey};
pub use prompt::{ChannelPrompt, OperatorPrompt, StdinPrompt};
pub use risk::{classify_risk, DesktopRisk};
