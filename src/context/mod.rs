//! Per-session conversation state.
//!
//! The [`ContextManager`] owns the ordered message sequence for one session
//! and produces the provider-shaped view for each LLM call: system prompt
//! from the prompt manager, history compressed under a token budget, and
//! tool-call/tool-result linkage enforced.
//!
//! Token estimation uses the ~4-characters-per-token heuristic; it only has
//! to be stable enough for budget decisions, not exact.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ai::types::{Message, ToolCall};
use crate::prompts::{PromptContext, PromptManager};

// ─── Message model ────────────────────────────────────────────────────────────

/// Reference to an image attached to a user message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    /// Base64-encoded bytes.  Exactly one of `data` / `uri` must be set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub mime_type: String,
}

impl ImageRef {
    /// Shape check: one source, a plausible mime type.
    pub fn validate(&self) -> Result<(), String> {
        match (&self.data, &self.uri) {
            (None, None) => Err("imageRef requires either 'data' or 'uri'".to_owned()),
            (Some(_), Some(_)) => Err("imageRef cannot carry both 'data' and 'uri'".to_owned()),
            _ if !self.mime_type.starts_with("image/") => {
                Err(format!("unsupported image mime type '{}'", self.mime_type))
            }
            _ => Ok(()),
        }
    }
}

/// A tool call recorded on an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    /// Structured arguments.  Unparseable provider output is preserved as a
    /// JSON string.
    pub arguments: Value,
}

/// One element of a session's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    User {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<ImageRef>,
    },
    #[serde(rename_all = "camelCase")]
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRecord>,
    },
    #[serde(rename_all = "camelCase")]
    Tool {
        tool_call_id: String,
        tool_name: String,
        content: String,
    },
}

// ─── ContextManager ───────────────────────────────────────────────────────────

/// Owns one session's message ring and its provider-facing formatting.
pub struct ContextManager {
    session_id: String,
    messages: RwLock<Vec<ChatMessage>>,
    prompt_manager: Arc<PromptManager>,
    max_context_tokens: usize,
}

impl ContextManager {
    pub fn new(
        session_id: impl Into<String>,
        prompt_manager: Arc<PromptManager>,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            messages: RwLock::new(Vec::new()),
            prompt_manager,
            max_context_tokens,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // ── Appends ───────────────────────────────────────────────────────────────

    pub fn add_user_message(
        &self,
        text: impl Into<String>,
        image: Option<ImageRef>,
    ) -> Result<(), String> {
        if let Some(image) = &image {
            image.validate()?;
        }
        let mut messages = self.messages.write().map_err(|e| e.to_string())?;
        messages.push(ChatMessage::User {
            text: text.into(),
            image,
        });
        Ok(())
    }

    pub fn add_assistant_message(
        &self,
        text: impl Into<String>,
        tool_calls: Vec<ToolCallRecord>,
    ) -> Result<(), String> {
        let mut messages = self.messages.write().map_err(|e| e.to_string())?;
        messages.push(ChatMessage::Assistant {
            text: text.into(),
            tool_calls,
        });
        Ok(())
    }

    /// Append a tool result.  The id must reference a tool call on an
    /// earlier assistant message.
    pub fn add_tool_result(
        &self,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), String> {
        let tool_call_id = tool_call_id.into();
        let mut messages = self.messages.write().map_err(|e| e.to_string())?;
        let known = messages.iter().any(|m| match m {
            ChatMessage::Assistant { tool_calls, .. } => {
                tool_calls.iter().any(|c| c.id == tool_call_id)
            }
            _ => false,
        });
        if !known {
            return Err(format!(
                "tool result references unknown tool call id '{tool_call_id}'"
            ));
        }
        messages.push(ChatMessage::Tool {
            tool_call_id,
            tool_name: tool_name.into(),
            content: content.into(),
        });
        Ok(())
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    pub fn message_count(&self) -> usize {
        self.messages.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Full raw history — for memory extraction and persistence.
    pub fn raw_messages(&self) -> Vec<ChatMessage> {
        self.messages.read().map(|m| m.clone()).unwrap_or_default()
    }

    /// Replace the ring with messages restored from storage.
    pub fn load_messages(&self, restored: Vec<ChatMessage>) {
        if let Ok(mut messages) = self.messages.write() {
            *messages = restored;
        }
    }

    /// Provider-neutral view of the full history (no system prompt, no
    /// compression).
    pub fn all_formatted_messages(&self) -> Vec<Message> {
        format_messages(&self.raw_messages())
    }

    // ── Formatting pipeline ───────────────────────────────────────────────────

    /// The per-turn pipeline: system prompt from the prompt manager,
    /// compressed history, provider-shaped output.  The newest turn must
    /// already be appended.
    pub async fn formatted_for_llm(&self, ctx: &PromptContext) -> Result<Vec<Message>, String> {
        let prompt = self.prompt_manager.generate(ctx).await?;
        let system_tokens = estimate_tokens(&prompt.content);

        let history = self.raw_messages();
        let compressed = compress(history, self.max_context_tokens, system_tokens);

        let mut out = Vec::with_capacity(compressed.len() + 1);
        if !prompt.content.is_empty() {
            out.push(Message::system(prompt.content));
        }
        out.extend(format_messages(&compressed));
        Ok(out)
    }
}

// ─── Formatting helpers ───────────────────────────────────────────────────────

/// Convert raw messages to the provider-neutral shape.
///
/// Assistant tool calls without a matching tool result are dropped from the
/// outgoing view (the raw ring keeps them); orphaned tool messages are
/// skipped for the same reason.
fn format_messages(messages: &[ChatMessage]) -> Vec<Message> {
    let answered: std::collections::HashSet<&str> = messages
        .iter()
        .filter_map(|m| match m {
            ChatMessage::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();

    let requested: std::collections::HashSet<&str> = messages
        .iter()
        .filter_map(|m| match m {
            ChatMessage::Assistant { tool_calls, .. } => Some(tool_calls),
            _ => None,
        })
        .flatten()
        .map(|c| c.id.as_str())
        .collect();

    messages
        .iter()
        .filter_map(|m| match m {
            ChatMessage::System { text } => Some(Message::system(text.clone())),
            ChatMessage::User { text, .. } => Some(Message::user(text.clone())),
            ChatMessage::Assistant { text, tool_calls } => {
                let kept: Vec<ToolCall> = tool_calls
                    .iter()
                    .filter(|c| answered.contains(c.id.as_str()))
                    .map(|c| ToolCall {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        arguments: c.arguments.to_string(),
                    })
                    .collect();
                if kept.is_empty() {
                    Some(Message::assistant(text.clone()))
                } else {
                    Some(Message::assistant_with_calls(text.clone(), kept))
                }
            }
            ChatMessage::Tool {
                tool_call_id,
                tool_name,
                content,
            } => {
                if requested.contains(tool_call_id.as_str()) {
                    Some(Message::tool_result(
                        tool_call_id.clone(),
                        tool_name.clone(),
                        content.clone(),
                    ))
                } else {
                    None
                }
            }
        })
        .collect()
}

fn estimate_tokens(text: &str) -> usize {
    // ~4 characters per token plus per-message overhead.
    text.len().div_ceil(4) + 4
}

fn message_tokens(message: &ChatMessage) -> usize {
    match message {
        ChatMessage::System { text } => estimate_tokens(text),
        ChatMessage::User { text, .. } => estimate_tokens(text),
        ChatMessage::Assistant { text, tool_calls } => {
            estimate_tokens(text)
                + tool_calls
                    .iter()
                    .map(|c| estimate_tokens(&c.arguments.to_string()))
                    .sum::<usize>()
        }
        ChatMessage::Tool { content, .. } => estimate_tokens(content),
    }
}

/// Drop the oldest user/assistant pairs until the history fits the budget.
///
/// A drop unit is a leading user message together with the assistant reply
/// (and that reply's tool messages) that follows it — a tool message is
/// never separated from its originating assistant message.  The trailing
/// turn is always kept.
fn compress(mut messages: Vec<ChatMessage>, budget: usize, system_tokens: usize) -> Vec<ChatMessage> {
    let total = |msgs: &[ChatMessage]| -> usize {
        system_tokens + msgs.iter().map(message_tokens).sum::<usize>()
    };

    while messages.len() > 2 && total(&messages) > budget {
        let before = messages.len();
        drop_front_unit(&mut messages);
        if messages.len() == before {
            break;
        }
    }
    messages
}

fn drop_front_unit(messages: &mut Vec<ChatMessage>) {
    if messages.is_empty() {
        return;
    }
    match messages.remove(0) {
        ChatMessage::User { .. } => {
            // Take the assistant reply (and its tool messages) with it.
            if matches!(messages.first(), Some(ChatMessage::Assistant { .. })) {
                drop_assistant_unit(messages);
            }
        }
        ChatMessage::Assistant { tool_calls, .. } => {
            drop_tool_results(messages, &tool_calls);
        }
        _ => {}
    }
}

fn drop_assistant_unit(messages: &mut Vec<ChatMessage>) {
    if let ChatMessage::Assistant { tool_calls, .. } = messages.remove(0) {
        drop_tool_results(messages, &tool_calls);
    }
}

fn drop_tool_results(messages: &mut Vec<ChatMessage>, tool_calls: &[ToolCallRecord]) {
    while let Some(ChatMessage::Tool { tool_call_id, .. }) = messages.first() {
        if tool_calls.iter().any(|c| &c.id == tool_call_id) {
            messages.remove(0);
        } else {
            break;
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
