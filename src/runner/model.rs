//! Model invocation contract and conversation state.
//!
//! The scheduler never talks to a provider directly; it goes through a
//! [`ModelClient`]. Output is an exhaustive [`ContentBlock`] sequence so
//! every consumer handles text, reasoning, tool calls and tool results
//! explicitly.

use std::future::Future;

use serde::{Deserialize, Serialize};

use super::tools::ToolSpec;
use crate::experiment::{AgentConfig, TokenUsage};
use crate::Result;

/// One block of model input or output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// Text body.
        text: String,
    },
    /// Reasoning trace (kept in the conversation, never executed).
    Reasoning {
        /// Reasoning body.
        text: String,
    },
    /// Request to run a tool.
    ToolCall {
        /// Call id, echoed by the matching result.
        id: String,
        /// Tool name from the catalog.
        name: String,
        /// Tool arguments.
        input: serde_json::Value,
    },
    /// Outcome of a tool call.
    ToolResult {
        /// Id of the call this answers.
        call_id: String,
        /// Output (JSON text on success, error message on failure).
        output: String,
        /// Whether the call failed.
        is_error: bool,
    },
}

impl ContentBlock {
    /// Text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Tool-call block.
    #[must_use]
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Speaker of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Scheduler-side input (prompts, tool results, review requests).
    User,
    /// Model output.
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker.
    pub role: Role,
    /// Content.
    pub blocks: Vec<ContentBlock>,
}

/// An agent's conversation, owned by its task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Conversation opened with `prompt`.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        let mut conversation = Self::default();
        conversation.push_user(vec![ContentBlock::text(prompt)]);
        conversation
    }

    /// Append user-side blocks, merged into the last message if it is also user-side.
    pub fn push_user(&mut self, blocks: Vec<ContentBlock>) {
        if blocks.is_empty() {
            return;
        }
        match self.messages.last_mut() {
            Some(last) if last.role == Role::User => last.blocks.extend(blocks),
            _ => self.messages.push(Message {
                role: Role::User,
                blocks,
            }),
        }
    }

    /// Append a model response.
    pub fn push_assistant(&mut self, blocks: Vec<ContentBlock>) {
        self.messages.push(Message {
            role: Role::Assistant,
            blocks,
        });
    }

    /// All messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Wants tool results before continuing.
    ToolUse,
    /// Turn ended; the agent keeps working on the next step.
    EndTurn,
    /// Agent voluntarily finished its run.
    Done,
}

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Output blocks.
    pub blocks: Vec<ContentBlock>,
    /// Billable usage.
    pub usage: TokenUsage,
    /// Stop reason.
    pub stop: StopReason,
}

impl ModelResponse {
    /// Tool calls in output order as `(id, name, input)`.
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.blocks.iter().filter_map(|block| match block {
            ContentBlock::ToolCall { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            ContentBlock::Text { .. } | ContentBlock::Reasoning { .. } | ContentBlock::ToolResult { .. } => None,
        })
    }
}

/// Language-model provider.
///
/// Implementations report provider outages and rate limits as
/// [`crate::Error::ProviderTransient`] (retried by the scheduler) and
/// everything else as [`crate::Error::Provider`].
pub trait ModelClient: Send + Sync + 'static {
    /// Produce the next response for `conversation`.
    fn invoke(
        &self,
        agent: &AgentConfig,
        conversation: &Conversation,
        tools: &[ToolSpec],
    ) -> impl Future<Output = Result<ModelResponse>> + Send;
}
