//! Tool descriptor and result types shared by providers and the engine.

use serde::{Deserialize, Serialize};

use crate::governance::risk::DesktopRisk;
use crate::inference::types::ToolDefinition;

// ─── Descriptor ──────────────────────────────────────────────────────────────

/// Declared capability class of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Read,
    Write,
    Exec,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Read => "read",
            ToolCategory::Write => "write",
            ToolCategory::Exec => "exec",
        }
    }
}

/// Everything the governance layer needs to know about a callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Provider-qualified id, e.g. `"builtin:fs:write_text"`.
    pub qualified_id: String,
    /// Short name (last segment of the id).
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
    /// Declared category; `None` when the provider does not say.
    pub category: Option<ToolCategory>,
    /// Explicit risk that beats every other classification rule.
    #[serde(default)]
    pub risk_override: Option<DesktopRisk>,
    #[serde(default)]
    pub mutates_state: bool,
    #[serde(default)]
    pub requires_network: bool,
    #[serde(default)]
    pub requires_shell: bool,
    /// Argument names that carry filesystem paths.
    #[serde(default)]
    pub path_params: Vec<String>,
}

impl ToolDescriptor {
    /// A descriptor with no declared capabilities.
    pub fn new(qualified_id: impl Into<String>, description: impl Into<String>) -> Self {
        let qualified_id = qualified_id.into();
        let name = qualified_id
            .rsplit(':')
            .next()
            .unwrap_or(qualified_id.as_str())
            .to_string();
        Self {
            qualified_id,
            name,
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            category: None,
            risk_override: None,
            mutates_state: false,
            requires_network: false,
            requires_shell: false,
            path_params: Vec::new(),
        }
    }

    pub fn category(mut self, category: ToolCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn risk_override(mut self, risk: DesktopRisk) -> Self {
        self.risk_override = Some(risk);
        self
    }

    pub fn mutates_state(mut self) -> Self {
        self.mutates_state = true;
        self
    }

    pub fn requires_network(mut self) -> Self {
        self.requires_network = true;
        self
    }

    pub fn requires_shell(mut self) -> Self {
        self.requires_shell = true;
        self
    }

    pub fn path_params(mut self, params: &[&str]) -> Self {
        self.path_params = params.iter().map(|p| p.to_string()).collect();
        self
    }

    /// The schema presented to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.qualified_id.clone(),
            self.description.clone(),
            self.parameters.clone(),
        )
    }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// A file or log produced by a tool or by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    /// `file`, `diff`, `log`, ...
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Artifact {
    pub fn new(path: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: kind.into(),
            name: None,
        }
    }
}

/// Outcome of one tool execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Text the model sees: the content on success, else the error.
    pub fn message_text(&self) -> String {
        if self.success {
            return self.content.clone();
        }
        match (&self.error, self.content.is_empty()) {
            (Some(err), true) => err.clone(),
            (Some(err), false) => format!("{err}\n{}", self.content),
            (None, _) => self.content.clone(),
        }
    }
}

/// Provider-side audit details for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolAudit {
    /// The arguments the tool actually ran with.
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub duration_ms: u64,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
