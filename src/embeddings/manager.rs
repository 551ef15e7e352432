//! Embedding manager — retry with backoff and the process-wide disable latch.

use std::{
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::config::{EmbeddingProviderConfig, EmbeddingsConfig};

use super::{
    EmbeddingError, EmbeddingProvider, HashEmbeddingProvider, LruEmbeddingCache,
    OllamaEmbeddingProvider, OpenAiEmbeddingProvider,
};

/// Wraps a provider with:
/// - LRU caching (exact-text keyed)
/// - retry with exponential backoff on transient failures
/// - a sticky, process-wide "disabled" latch set on persistent failure
///
/// Once the latch is set, every call fails fast with
/// [`EmbeddingError::Disabled`] until [`EmbeddingManager::reset`].
/// Downstream consumers (memory and reflection engines) check
/// [`EmbeddingManager::is_disabled`] and degrade to chat-only behavior.
pub struct EmbeddingManager {
    provider: Arc<dyn EmbeddingProvider>,
    max_retries: u32,
    base_delay: Duration,
    disabled: AtomicBool,
    disabled_reason: RwLock<Option<String>>,
}

impl EmbeddingManager {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, max_retries: u32) -> Self {
        Self {
            provider,
            max_retries,
            base_delay: Duration::from_millis(500),
            disabled: AtomicBool::new(false),
            disabled_reason: RwLock::new(None),
        }
    }

    /// Build the configured provider stack: concrete provider → LRU cache.
    pub fn from_config(config: &EmbeddingsConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let provider: Box<dyn EmbeddingProvider> = match &config.provider {
            EmbeddingProviderConfig::Openai {
                model,
                api_key,
                base_url,
                dimension,
            } => {
                let key = api_key
                    .clone()
                    .or_else(|| std::env::var("ENGRAM_EMBEDDINGS_API_KEY").ok())
                    .or_else(|| std::env::var("ENGRAM_API_KEY").ok());
                Box::new(OpenAiEmbeddingProvider::new(
                    model.clone(),
                    key,
                    base_url.clone(),
                    *dimension,
                    timeout,
                ))
            }
            EmbeddingProviderConfig::Ollama {
                model,
                base_url,
                dimension,
            } => Box::new(OllamaEmbeddingProvider::new(
                model.clone(),
                base_url.clone(),
                *dimension,
                timeout,
            )),
            EmbeddingProviderConfig::Hash { dimension } => {
                Box::new(HashEmbeddingProvider::new(*dimension))
            }
        };
        let cached = LruEmbeddingCache::new(provider, config.cache_size);
        Self::new(Arc::new(cached), config.max_retries)
    }

    #[cfg(test)]
    pub(crate) fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Embed `text`, retrying transient failures.
    ///
    /// A persistent failure flips the disable latch and surfaces as
    /// [`EmbeddingError::Disabled`] so callers can distinguish "just
    /// disabled now" from "was already disabled" by having seen the flip.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(reason) = self.disabled_reason() {
            return Err(EmbeddingError::Disabled(reason));
        }

        let mut last_transient = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
            match self.provider.embed(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(EmbeddingError::Transient(msg)) => last_transient = msg,
                Err(EmbeddingError::Persistent(msg)) => {
                    self.handle_runtime_failure(&msg);
                    return Err(EmbeddingError::Disabled(msg));
                }
                Err(EmbeddingError::Disabled(msg)) => return Err(EmbeddingError::Disabled(msg)),
            }
        }
        Err(EmbeddingError::Transient(format!(
            "exhausted {} retries: {last_transient}",
            self.max_retries
        )))
    }

    /// Set the sticky disable latch.  Idempotent; the first reason wins.
    pub fn handle_runtime_failure(&self, reason: &str) {
        if self.disabled.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(reason, "embeddings disabled for this process session");
        if let Ok(mut guard) = self.disabled_reason.write() {
            *guard = Some(reason.to_owned());
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn disabled_reason(&self) -> Option<String> {
        if !self.is_disabled() {
            return None;
        }
        self.disabled_reason
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .or_else(|| Some("unknown".to_owned()))
    }

    /// Clear the latch (explicit operator action).
    pub fn reset(&self) {
        self.disabled.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.disabled_reason.write() {
            *guard = None;
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Provider scripted to fail a fixed number of times, then succeed.
    struct FlakyProvider {
        failures: AtomicU32,
        calls: AtomicU32,
        persistent: bool,
    }

    impl FlakyProvider {
        fn transient(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                persistent: false,
            }
        }

        fn persistent() -> Self {
            Self {
                failures: AtomicU32::new(u32::MAX),
                calls: AtomicU32::new(0),
                persistent: true,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining == 0 {
                return Ok(vec![1.0, 0.0]);
            }
            self.failures.store(remaining.saturating_sub(1), Ordering::SeqCst);
            if self.persistent {
                Err(EmbeddingError::Persistent("bad credentials".to_owned()))
            } else {
                Err(EmbeddingError::Transient("503".to_owned()))
            }
        }

        fn dimension(&self) -> usize {
            2
        }

        fn provider_name(&self) -> &str {
            "flaky"
        }
    }

    fn manager(provider: FlakyProvider, retries: u32) -> (EmbeddingManager, Arc<FlakyProvider>) {
        let provider = Arc::new(provider);
        let m = EmbeddingManager::new(provider.clone(), retries)
            .with_base_delay(Duration::from_millis(1));
        (m, provider)
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (m, provider) = manager(FlakyProvider::transient(2), 3);
        let result = m.embed("x").await;
        assert!(result.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(!m.is_disabled());
    }

    #[tokio::test]
    async fn retries_exhausted_stays_enabled() {
        let (m, _) = manager(FlakyProvider::transient(10), 2);
        let err = m.embed("x").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Transient(_)));
        assert!(!m.is_disabled(), "transient exhaustion must not disable");
    }

    #[tokio::test]
    async fn persistent_failure_sets_sticky_latch() {
        let (m, provider) = manager(FlakyProvider::persistent(), 3);
        let err = m.embed("x").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Disabled(_)));
        assert!(m.is_disabled());
        assert_eq!(m.disabled_reason().as_deref(), Some("bad credentials"));

        // Subsequent calls fail fast without touching the provider.
        let calls_before = provider.calls.load(Ordering::SeqCst);
        let err = m.embed("y").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Disabled(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn reset_clears_the_latch() {
        let (m, _) = manager(FlakyProvider::persistent(), 0);
        let _ = m.embed("x").await;
        assert!(m.is_disabled());
        m.reset();
        assert!(!m.is_disabled());
        assert_eq!(m.disabled_reason(), None);
    }

    #[tokio::test]
    async fn from_config_builds_hash_stack() {
        let config = EmbeddingsConfig::default();
        let m = EmbeddingManager::from_config(&config);
        assert_eq!(m.dimension(), 384);
        assert_eq!(m.provider_name(), "hash");
        assert!(m.embed("hello").await.is_ok());
    }
}
