//! Contracts for the generation model.
//!
//! Two shapes of call are used:
//! - [`CodeModel`]: one-shot prompt (text + image) to response text, used by
//!   code generation.
//! - [`ToolModel`] / [`ToolSession`]: a tool-calling conversation, used by the
//!   repair agent. The session owns its history; each [`ToolSession::send`]
//!   appends one user turn and one assistant turn.

pub mod anthropic;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::errors::ModelError;

pub use anthropic::AnthropicClient;

/// One piece of a one-shot prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    /// Encoded raster image, either a `data:` URL or bare base64 PNG.
    Image(String),
}

#[async_trait]
pub trait CodeModel: Send + Sync {
    async fn generate(&self, parts: &[PromptPart], temperature: f32)
    -> Result<String, ModelError>;
}

/// JSON-schema description of a tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl ToolCall {
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }

    pub fn bool_arg(&self, key: &str) -> Option<bool> {
        self.input.get(key).and_then(Value::as_bool)
    }
}

/// Outcome of one dispatched tool call, fed back on the next turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// What the orchestrator sends on one conversation turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnInput {
    pub text: Option<String>,
    pub tool_results: Vec<ToolResult>,
}

/// What the model answered on one conversation turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentTurn {
    pub tool_calls: Vec<ToolCall>,
    /// Non-tool text. Informational only.
    pub free_text: String,
}

#[async_trait]
pub trait ToolModel: Send + Sync {
    async fn start_conversation(
        &self,
        system: &str,
        tools: &[ToolSpec],
        temperature: f32,
    ) -> Result<Box<dyn ToolSession>, ModelError>;
}

#[async_trait]
pub trait ToolSession: Send {
    async fn send(&mut self, input: TurnInput) -> Result<AgentTurn, ModelError>;
}
