//! Local Ollama-style embeddings service provider.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{EmbeddingError, EmbeddingProvider};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
/// Dimension of `nomic-embed-text`, a common local default.
const DEFAULT_DIMENSION: usize = 768;

pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddingProvider {
    pub fn new(
        model: impl Into<String>,
        base_url: Option<String>,
        dimension: Option<usize>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            model: model.into(),
            dimension: dimension.unwrap_or(DEFAULT_DIMENSION),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()
            .await
            .map_err(|e| EmbeddingError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // An unknown model will not heal on retry; the daemon being
            // busy or restarting will.
            return if status.as_u16() == 404 {
                Err(EmbeddingError::Persistent(format!(
                    "model '{}' not available: {body}",
                    self.model
                )))
            } else {
                Err(EmbeddingError::Transient(format!("HTTP {status}: {body}")))
            };
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Transient(format!("bad response body: {e}")))?;

        let embedding: Vec<f32> = body["embedding"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|f| f as f32).collect())
            .unwrap_or_default();

        if embedding.is_empty() {
            return Err(EmbeddingError::Transient(
                "response contained no embedding".to_owned(),
            ));
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}
