//! LLM provider abstraction: provider-neutral types, the [`LlmProvider`]
//! trait, and the OpenAI-compatible client with a reliability wrapper.

pub mod provider;
pub mod providers;
pub mod types;

pub use provider::LlmProvider;
pub use providers::{OpenAiCompatibleProvider, ReliableProvider};
pub use types::{
    CompletionRequest, CompletionResponse, Message, MessageRole, TokenUsage, ToolCall, ToolSpec,
};
