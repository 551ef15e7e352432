//! Core types for the memory pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── MemoryEvent ──────────────────────────────────────────────────────────────

/// The operation a memory decision resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryEvent {
    Add,
    Update,
    Delete,
    None,
}

impl MemoryEvent {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADD" => Some(Self::Add),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "NONE" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::None => "NONE",
        }
    }
}

// ─── KnowledgeFact ────────────────────────────────────────────────────────────

/// A candidate fact distilled from one interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeFact {
    /// Trimmed, non-empty free-form text.
    pub text: String,
    /// Verbatim slice of a code block or command, when one was found.
    pub code_pattern: Option<String>,
    /// Derived lowercase tags.
    pub tags: Vec<String>,
}

// ─── MemoryAction ─────────────────────────────────────────────────────────────

/// A resolved decision for one fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryAction {
    /// Target record id: a fresh id for ADD, an existing id for
    /// UPDATE/DELETE.
    pub id: String,
    pub text: String,
    pub event: MemoryEvent,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_pattern: Option<String>,
    /// Decision confidence in `[0, 1]`.
    pub confidence: f32,
    pub reasoning: String,
}

// ─── Interaction inputs ───────────────────────────────────────────────────────

/// One tool invocation observed during the turn, pre-summarized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsage {
    pub name: String,
    pub args_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
}

/// Everything the memory engine sees about one completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub user_input: String,
    pub assistant_response: String,
    #[serde(default)]
    pub tools_used: Vec<ToolUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl InteractionRecord {
    pub fn new(user_input: impl Into<String>, assistant_response: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            assistant_response: assistant_response.into(),
            tools_used: Vec::new(),
            session_id: None,
            metadata: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tools(mut self, tools_used: Vec<ToolUsage>) -> Self {
        self.tools_used = tools_used;
        self
    }
}

// ─── Outcome ──────────────────────────────────────────────────────────────────

/// How a memory run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryMode {
    /// Full pipeline ran.
    Full,
    /// Embeddings unavailable; nothing was embedded or persisted.
    ChatOnly,
}

/// Result of one memory run — diagnostic only, never surfaced to the
/// request path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryOutcome {
    pub mode: MemoryMode,
    /// `true` when the run short-circuited before processing facts.
    pub skipped: bool,
    pub actions: Vec<MemoryAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl MemoryOutcome {
    pub fn chat_only() -> Self {
        Self {
            mode: MemoryMode::ChatOnly,
            skipped: true,
            actions: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self {
            mode: MemoryMode::Full,
            skipped: false,
            actions: Vec::new(),
            errors: Vec::new(),
        }
    }
}
