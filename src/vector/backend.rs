//! The vector store contract.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by vector backends.
#[derive(Debug, Clone, Error)]
pub enum VectorError {
    #[error("vector backend is not connected")]
    NotConnected,

    /// A caller bug: mismatched lengths, duplicate ids, or a query vector
    /// whose dimension does not match the collection.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("vector record not found: {0}")]
    NotFound(String),

    #[error("vector backend error: {0}")]
    Backend(String),
}

/// One search hit: cosine score in `[0, 1]`, higher is more similar.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

/// Optional constraints applied during `search` / `delete_matching`.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Drop results scoring strictly below this cutoff.
    pub threshold: Option<f32>,
    /// Only records whose payload `tags` array contains all of these.
    pub tags: Vec<String>,
    /// Only records whose payload `sourceSessionId` equals this.
    pub session_id: Option<String>,
}

impl SearchFilter {
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold: Some(threshold),
            ..Self::default()
        }
    }

    /// Whether `payload` satisfies the tag and session constraints.
    pub fn matches_payload(&self, payload: &Value) -> bool {
        if let Some(session_id) = &self.session_id {
            let matches = payload
                .get("sourceSessionId")
                .and_then(|v| v.as_str())
                .is_some_and(|s| s == session_id);
            if !matches {
                return false;
            }
        }
        if !self.tags.is_empty() {
            let payload_tags: Vec<&str> = payload
                .get("tags")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|t| t.as_str()).collect())
                .unwrap_or_default();
            if !self.tags.iter().all(|t| payload_tags.contains(&t.as_str())) {
                return false;
            }
        }
        true
    }
}

/// Abstraction over a single vector collection.
///
/// The collection name and dimension are fixed at construction time.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn connect(&self) -> Result<(), VectorError>;
    async fn disconnect(&self) -> Result<(), VectorError>;
    fn is_connected(&self) -> bool;

    fn kind(&self) -> &'static str;
    fn collection(&self) -> &str;
    fn dimension(&self) -> usize;

    /// Insert records.  `vectors`, `ids`, and `payloads` must have equal
    /// lengths and `ids` must be new to the collection.
    async fn insert(
        &self,
        vectors: Vec<Vec<f32>>,
        ids: Vec<String>,
        payloads: Vec<Value>,
    ) -> Result<(), VectorError>;

    /// Replace the vector and payload of an existing record.
    /// Fails with [`VectorError::NotFound`] when `id` is absent.
    async fn update(&self, id: &str, vector: Vec<f32>, payload: Value) -> Result<(), VectorError>;

    /// Remove a record.  Idempotent: deleting an absent id succeeds.
    async fn delete(&self, id: &str) -> Result<(), VectorError>;

    /// Top-`k` records by descending cosine similarity to `query`.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorMatch>, VectorError>;

    /// Fetch a single record's payload.
    async fn get(&self, id: &str) -> Result<Option<Value>, VectorError>;

    /// Remove all records matching `filter` (threshold ignored).
    /// Returns the number removed.
    async fn delete_matching(&self, filter: &SearchFilter) -> Result<usize, VectorError>;

    /// Number of records in the collection.
    async fn count(&self) -> Result<usize, VectorError>;
}

/// Validate the shared `insert` preconditions.  Backends call this before
/// touching their storage.
pub fn validate_insert(
    dimension: usize,
    vectors: &[Vec<f32>],
    ids: &[String],
    payloads: &[Value],
) -> Result<(), VectorError> {
    if vectors.len() != ids.len() || ids.len() != payloads.len() {
        return Err(VectorError::InvalidArgument(format!(
            "length mismatch: {} vectors, {} ids, {} payloads",
            vectors.len(),
            ids.len(),
            payloads.len()
        )));
    }
    for (i, vector) in vectors.iter().enumerate() {
        if vector.len() != dimension {
            return Err(VectorError::InvalidArgument(format!(
                "vector {i} has dimension {}, collection expects {dimension}",
                vector.len()
            )));
        }
    }
    let mut seen = std::collections::HashSet::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(VectorError::InvalidArgument(format!(
                "duplicate id in batch: {id}"
            )));
        }
    }
    Ok(())
}

/// Validate a query vector's dimension.  A mismatch is a fatal caller bug.
pub fn validate_query(dimension: usize, query: &[f32]) -> Result<(), VectorError> {
    if query.len() != dimension {
        return Err(VectorError::InvalidArgument(format!(
            "query has dimension {}, collection expects {dimension}",
            query.len()
        )));
    }
    Ok(())
}
