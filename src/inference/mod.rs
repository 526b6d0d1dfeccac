//! Inference: the chat seam between the Desktop Ops loop and a model.
//!
//! - `types`: OpenAI-compatible message and tool-definition shapes
//! - `client`: the [`ChatClient`] trait plus a non-streaming HTTP client
//! - `errors`: transport and parse failures
//!
//! The engine is written against [`ChatClient`], so any backend (local model,
//! hosted API, scripted test double) can drive it.

pub mod client;
pub mod errors;
pub mod types;

pub use client::{ChatClient, OpenAiChatClient};
pub use errors::InferenceError;
pub use types::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition};
