//! Hosted OpenAI-compatible embeddings API provider.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{EmbeddingError, EmbeddingProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Dimension of `text-embedding-3-small`, the default model.
const DEFAULT_DIMENSION: usize = 1536;

pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        model: impl Into<String>,
        api_key: Option<String>,
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
            api_key,
            model: model.into(),
            dimension: dimension.unwrap_or(DEFAULT_DIMENSION),
        }
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> EmbeddingError {
        let message = format!("HTTP {status}: {}", truncate(body, 200));
        // Credential and model errors will not heal on retry; everything
        // else is worth another attempt.
        if status.as_u16() == 401 || status.as_u16() == 403 || status.as_u16() == 404 {
            EmbeddingError::Persistent(message)
        } else {
            EmbeddingError::Transient(message)
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let mut request = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "input": text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Transient(format!("bad response body: {e}")))?;

        let embedding: Vec<f32> = body["data"][0]["embedding"]
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
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_persistent() {
        let err = OpenAiEmbeddingProvider::classify_status(
            reqwest::StatusCode::UNAUTHORIZED,
            "invalid api key",
        );
        assert!(matches!(err, EmbeddingError::Persistent(_)));
    }

    #[test]
    fn server_errors_are_transient() {
        let err = OpenAiEmbeddingProvider::classify_status(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "oops",
        );
        assert!(matches!(err, EmbeddingError::Transient(_)));

        let err = OpenAiEmbeddingProvider::classify_status(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "slow down",
        );
        assert!(matches!(err, EmbeddingError::Transient(_)));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 5), "héllo");
        assert_eq!(truncate("ab", 5), "ab");
    }
}
