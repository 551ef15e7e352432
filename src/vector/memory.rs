//! In-memory vector backend — the default and the fallback substitute.

use std::{
    collections::HashMap,
    sync::{
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::Value;

use crate::embeddings::cosine_similarity;

use super::backend::{
    SearchFilter, VectorBackend, VectorError, VectorMatch, validate_insert, validate_query,
};

struct StoredRecord {
    vector: Vec<f32>,
    payload: Value,
}

/// HashMap-backed vector collection with brute-force cosine search.
pub struct MemoryVectorBackend {
    collection: String,
    dimension: usize,
    connected: AtomicBool,
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl MemoryVectorBackend {
    pub fn new(collection: impl Into<String>, dimension: usize) -> Self {
        Self {
            collection: collection.into(),
            dimension,
            connected: AtomicBool::new(false),
            records: RwLock::new(HashMap::new()),
        }
    }

    fn check_connected(&self) -> Result<(), VectorError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VectorError::NotConnected)
        }
    }

    fn lock_err<T>(e: std::sync::PoisonError<T>) -> VectorError {
        VectorError::Backend(format!("lock poisoned: {e}"))
    }
}

#[async_trait]
impl VectorBackend for MemoryVectorBackend {
    async fn connect(&self) -> Result<(), VectorError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VectorError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn insert(
        &self,
        vectors: Vec<Vec<f32>>,
        ids: Vec<String>,
        payloads: Vec<Value>,
    ) -> Result<(), VectorError> {
        self.check_connected()?;
        validate_insert(self.dimension, &vectors, &ids, &payloads)?;
        let mut records = self.records.write().map_err(Self::lock_err)?;
        for id in &ids {
            if records.contains_key(id) {
                return Err(VectorError::InvalidArgument(format!(
                    "id already exists in collection: {id}"
                )));
            }
        }
        for ((vector, id), payload) in vectors.into_iter().zip(ids).zip(payloads) {
            records.insert(id, StoredRecord { vector, payload });
        }
        Ok(())
    }

    async fn update(&self, id: &str, vector: Vec<f32>, payload: Value) -> Result<(), VectorError> {
        self.check_connected()?;
        validate_query(self.dimension, &vector)?;
        let mut records = self.records.write().map_err(Self::lock_err)?;
        match records.get_mut(id) {
            Some(record) => {
                record.vector = vector;
                record.payload = payload;
                Ok(())
            }
            None => Err(VectorError::NotFound(id.to_owned())),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), VectorError> {
        self.check_connected()?;
        let mut records = self.records.write().map_err(Self::lock_err)?;
        records.remove(id);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorMatch>, VectorError> {
        self.check_connected()?;
        validate_query(self.dimension, query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let records = self.records.read().map_err(Self::lock_err)?;
        let mut matches: Vec<VectorMatch> = records
            .iter()
            .filter(|(_, r)| filter.map(|f| f.matches_payload(&r.payload)).unwrap_or(true))
            .map(|(id, r)| VectorMatch {
                id: id.clone(),
                score: cosine_similarity(query, &r.vector),
                payload: r.payload.clone(),
            })
            .filter(|m| {
                filter
                    .and_then(|f| f.threshold)
                    .map(|t| m.score >= t)
                    .unwrap_or(true)
            })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(k);
        Ok(matches)
    }

    async fn get(&self, id: &str) -> Result<Option<Value>, VectorError> {
        self.check_connected()?;
        let records = self.records.read().map_err(Self::lock_err)?;
        Ok(records.get(id).map(|r| r.payload.clone()))
    }

    async fn delete_matching(&self, filter: &SearchFilter) -> Result<usize, VectorError> {
        self.check_connected()?;
        let mut records = self.records.write().map_err(Self::lock_err)?;
        let before = records.len();
        records.retain(|_, r| !filter.matches_payload(&r.payload));
        Ok(before - records.len())
    }

    async fn count(&self) -> Result<usize, VectorError> {
        self.check_connected()?;
        let records = self.records.read().map_err(Self::lock_err)?;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn backend() -> MemoryVectorBackend {
        let b = MemoryVectorBackend::new("test", 3);
        b.connect().await.unwrap();
        b
    }

    fn unit(x: f32, y: f32, z: f32) -> Vec<f32> {
        let mag = (x * x + y * y + z * z).sqrt();
        vec![x / mag, y / mag, z / mag]
    }

    #[tokio::test]
    async fn insert_and_search_sorted_descending() {
        let b = backend().await;
        b.insert(
            vec![unit(1.0, 0.0, 0.0), unit(0.0, 1.0, 0.0), unit(1.0, 0.2, 0.0)],
            vec!["x".into(), "y".into(), "near-x".into()],
            vec![json!({"t": 1}), json!({"t": 2}), json!({"t": 3})],
        )
        .await
        .unwrap();

        let results = b.search(&unit(1.0, 0.0, 0.0), 10, None).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "x");
        assert_eq!(results[1].id, "near-x");
        assert!(results[0].score >= results[1].score);
        assert!(results[1].score >= results[2].score);
    }

    #[tokio::test]
    async fn threshold_filters_low_scores() {
        let b = backend().await;
        b.insert(
            vec![unit(1.0, 0.0, 0.0), unit(0.0, 1.0, 0.0)],
            vec!["close".into(), "far".into()],
            vec![json!({}), json!({})],
        )
        .await
        .unwrap();

        let filter = SearchFilter::with_threshold(0.9);
        let results = b
            .search(&unit(1.0, 0.0, 0.0), 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "close");
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let b = backend().await;
        b.insert(vec![unit(1.0, 0.0, 0.0)], vec!["a".into()], vec![json!({})])
            .await
            .unwrap();
        let err = b
            .insert(vec![unit(0.0, 1.0, 0.0)], vec!["a".into()], vec![json!({})])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn update_absent_id_fails() {
        let b = backend().await;
        let err = b
            .update("ghost", unit(1.0, 0.0, 0.0), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let b = backend().await;
        b.insert(vec![unit(1.0, 0.0, 0.0)], vec!["a".into()], vec![json!({})])
            .await
            .unwrap();
        b.delete("a").await.unwrap();
        b.delete("a").await.unwrap();
        assert_eq!(b.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_fatal() {
        let b = backend().await;
        let err = b.search(&[1.0, 0.0], 5, None).await.unwrap_err();
        assert!(matches!(err, VectorError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn delete_matching_by_session() {
        let b = backend().await;
        b.insert(
            vec![unit(1.0, 0.0, 0.0), unit(0.0, 1.0, 0.0)],
            vec!["a".into(), "b".into()],
            vec![
                json!({"sourceSessionId": "s1"}),
                json!({"sourceSessionId": "s2"}),
            ],
        )
        .await
        .unwrap();
        let mut filter = SearchFilter::default();
        filter.session_id = Some("s1".to_owned());
        assert_eq!(b.delete_matching(&filter).await.unwrap(), 1);
        assert_eq!(b.count().await.unwrap(), 1);
    }
}
