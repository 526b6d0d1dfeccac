//! Inference error types.
//!
//! Structured logging is the caller's responsibility; these types carry the
//! context needed to build meaningful log entries.

use thiserror::Error;

use crate::desktop_ops::errors::EngineError;

/// Errors that can occur while talking to the model endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response body was not a valid chat completion.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },

    /// Failed to parse a tool call's arguments.
    #[error("tool call parse error: {reason}")]
    ToolCallParseError { raw_arguments: String, reason: String },
}

impl From<InferenceError> for EngineError {
    fn from(e: InferenceError) -> Self {
        EngineError::Chat {
            reason: e.to_string(),
        }
    }
}
