//! Scripted collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::DesktopOpsConfig;
use crate::desktop_ops::DesktopOps;
use crate::governance::prompt::OperatorPrompt;
use crate::inference::client::ChatClient;
use crate::inference::errors::InferenceError;
use crate::inference::types::{ChatMessage, ChatResponse, ToolCall, ToolDefinition};
use crate::tools::errors::ToolError;
use crate::tools::provider::ToolProvider;
use crate::tools::types::{ToolAudit, ToolCategory, ToolDescriptor, ToolResult};
use crate::workspace::LocalWorkspace;

/// Engine over a [`LocalWorkspace`] rooted at `root`.
pub fn engine(
    config: DesktopOpsConfig,
    tools: Arc<dyn ToolProvider>,
    chat: Arc<dyn ChatClient>,
    prompt: Arc<dyn OperatorPrompt>,
    root: &Path,
) -> DesktopOps {
    DesktopOps::new(
        config,
        tools,
        chat,
        prompt,
        Arc::new(LocalWorkspace::new(root)),
    )
}

pub fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
        name: name.to_string(),
        arguments,
    }
}

// ─── Operator prompt ─────────────────────────────────────────────────────────

/// Answers prompts from a fixed script, then with empty strings.
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt text shown so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperatorPrompt for ScriptedPrompt {
    async fn get_user_input(&self, prompt: &str) -> String {
        self.asked.lock().unwrap().push(prompt.to_string());
        self.answers.lock().unwrap().pop_front().unwrap_or_default()
    }
}

// ─── Chat ────────────────────────────────────────────────────────────────────

/// Replies from a script; optionally repeats one reply forever.
pub struct ScriptedChat {
    replies: Mutex<VecDeque<ChatResponse>>,
    repeat: Option<ChatResponse>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn new(replies: Vec<ChatResponse>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(reply: ChatResponse) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::new(Vec::new())
        }
    }

    /// Message histories sent so far, one per request.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for ScriptedChat {
    async fn chat(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ChatResponse, InferenceError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        self.repeat
            .clone()
            .ok_or_else(|| InferenceError::MalformedResponse {
                reason: "chat script exhausted".into(),
            })
    }
}

// ─── Tools ───────────────────────────────────────────────────────────────────

/// In-memory provider: queued results per tool, `ok("")` when none is queued.
pub struct FakeTools {
    tools: Vec<ToolDescriptor>,
    results: Mutex<HashMap<String, VecDeque<ToolResult>>>,
    calls: Mutex<Vec<ToolCall>>,
}

impl FakeTools {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            results: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `start_process`, `read_process_output` and `stop_process`.
    pub fn process_tools() -> Self {
        Self::new(vec![
            ToolDescriptor::new("start_process", "start").category(ToolCategory::Exec),
            ToolDescriptor::new("read_process_output", "read").category(ToolCategory::Read),
            ToolDescriptor::new("stop_process", "stop").category(ToolCategory::Exec),
        ])
    }

    pub fn push_result(&self, tool_id: &str, result: ToolResult) {
        self.results
            .lock()
            .unwrap()
            .entry(tool_id.to_string())
            .or_default()
            .push_back(result);
    }

    /// Every executed call, in order.
    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolProvider for FakeTools {
    fn resolve(&self, name: &str) -> Result<ToolDescriptor, ToolError> {
        self.tools
            .iter()
            .find(|t| t.qualified_id == name || t.name == name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolDescriptor::definition).collect()
    }

    async fn run_tool(
        &self,
        tool: &ToolDescriptor,
        call: &ToolCall,
        _allowed_paths: Option<&[PathBuf]>,
    ) -> (ToolResult, ToolAudit) {
        self.calls.lock().unwrap().push(call.clone());
        let result = self
            .results
            .lock()
            .unwrap()
            .get_mut(&tool.qualified_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| ToolResult::ok(""));
        let audit = ToolAudit {
            input: call.arguments.clone(),
            duration_ms: 0,
        };
        (result, audit)
    }
}
