//! ReliableProvider — retry + fallback wrapper around any LlmProvider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::ai::provider::{LlmProvider, Result};
use crate::ai::types::{CompletionRequest, CompletionResponse};

/// Wraps a primary provider with retry-with-exponential-backoff and an
/// optional ordered fallback chain.
pub struct ReliableProvider {
    primary: Arc<dyn LlmProvider>,
    fallbacks: Vec<Arc<dyn LlmProvider>>,
    max_retries: u32,
    base_delay: Duration,
}

impl ReliableProvider {
    pub fn new(primary: Arc<dyn LlmProvider>) -> Self {
        Self {
            primary,
            fallbacks: vec![],
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Set the retry configuration.
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    /// Add a fallback provider tried after all retries on the primary fail.
    pub fn with_fallback(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.fallbacks.push(provider);
        self
    }
}

#[async_trait]
impl LlmProvider for ReliableProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut last_err = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
            match self.primary.complete(request.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) => last_err = e,
            }
        }

        // Retries exhausted — try fallbacks in order.
        for fallback in &self.fallbacks {
            match fallback.complete(request.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) => last_err = e,
            }
        }

        Err(format!("all providers failed, last error: {last_err}"))
    }

    /// Minimum context limit across the chain so callers never submit
    /// requests that would exceed a fallback provider's capacity.
    fn context_limit(&self) -> usize {
        self.fallbacks
            .iter()
            .map(|f| f.context_limit())
            .fold(self.primary.context_limit(), usize::min)
    }

    /// `true` only when every provider in the chain supports tool use, so
    /// tool-based requests remain valid after a fallback switch.
    fn supports_tools(&self) -> bool {
        self.primary.supports_tools() && self.fallbacks.iter().all(|f| f.supports_tools())
    }

    fn provider_name(&self) -> &str {
        self.primary.provider_name()
    }
}
