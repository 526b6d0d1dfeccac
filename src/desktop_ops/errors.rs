//! Desktop Ops engine error types.

use thiserror::Error;

/// Errors that can end or prevent a Desktop Ops run.
///
/// Tool failures and approval denials are not errors: they travel as failed
/// tool results and audit events.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The chat transport failed to produce a response.
    #[error("chat request failed: {reason}")]
    Chat { reason: String },

    /// Configuration could not be read, parsed, or validated.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// The per-run audit record could not be written or read back.
    #[error("audit log error: {reason}")]
    AuditPersist { reason: String },

    /// A recipe name was requested that the registry does not know.
    #[error("unknown recipe: '{name}'")]
    UnknownRecipe { name: String },

    /// Recipe arguments were missing or malformed.
    #[error("recipe '{recipe}' cannot be planned: {reason}")]
    RecipePlanning { recipe: String, reason: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// Filesystem error outside of tool execution.
    #[error("io error: {reason}")]
    Io { reason: String },
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization {
            reason: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(e: serde_yaml::Error) -> Self {
        EngineError::Config {
            reason: e.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io {
            reason: e.to_string(),
        }
    }
}
