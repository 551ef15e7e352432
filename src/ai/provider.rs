//! The `LlmProvider` trait.

use async_trait::async_trait;

use super::types::{CompletionRequest, CompletionResponse};

/// Result type for AI operations
pub type Result<T> = std::result::Result<T, String>;

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete a prompt and return the full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Get the context window limit for this provider
    fn context_limit(&self) -> usize;

    /// Check if this provider supports native function/tool calling
    fn supports_tools(&self) -> bool;

    /// Get the provider name
    fn provider_name(&self) -> &str;
}
