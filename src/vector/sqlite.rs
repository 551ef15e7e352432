//! SQLite vector backend — embedding BLOBs with brute-force cosine scan.
//!
//! Embeddings are stored as little-endian `f32` byte blobs in a single
//! `vector_records` table keyed by `(collection, id)`.  Search loads the
//! collection's rows and scores them in process; collections at this
//! system's scale (thousands of memories) stay well inside that budget.

use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, params};
use serde_json::Value;

use crate::embeddings::cosine_similarity;

use super::backend::{
    SearchFilter, VectorBackend, VectorError, VectorMatch, validate_insert, validate_query,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS vector_records (
    collection TEXT NOT NULL,
    id         TEXT NOT NULL,
    embedding  BLOB NOT NULL,
    payload    TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_vector_records_collection ON vector_records (collection);
"#;

pub struct SqliteVectorBackend {
    path: String,
    collection: String,
    dimension: usize,
    conn: Mutex<Option<Connection>>,
}

impl SqliteVectorBackend {
    pub fn new(path: impl Into<String>, collection: impl Into<String>, dimension: usize) -> Self {
        Self {
            path: path.into(),
            collection: collection.into(),
            dimension,
            conn: Mutex::new(None),
        }
    }

    pub fn in_memory(collection: impl Into<String>, dimension: usize) -> Self {
        Self::new(":memory:", collection, dimension)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, VectorError>,
    ) -> Result<T, VectorError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| VectorError::Backend(format!("lock poisoned: {e}")))?;
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(VectorError::NotConnected),
        }
    }

    fn db_err(e: rusqlite::Error) -> VectorError {
        VectorError::Backend(format!("sqlite: {e}"))
    }

    fn encode_vector(vector: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(vector.len() * 4);
        for value in vector {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    fn decode_vector(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn decode_payload(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap_or(Value::Null)
    }
}

#[async_trait]
impl VectorBackend for SqliteVectorBackend {
    async fn connect(&self) -> Result<(), VectorError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| VectorError::Backend(format!("lock poisoned: {e}")))?;
        if guard.is_some() {
            return Ok(());
        }
        let conn = Connection::open(&self.path).map_err(Self::db_err)?;
        if self.path != ":memory:" {
            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
                .map_err(Self::db_err)?;
        }
        conn.execute_batch(SCHEMA_SQL).map_err(Self::db_err)?;
        *guard = Some(conn);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VectorError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| VectorError::Backend(format!("lock poisoned: {e}")))?;
        *guard = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    fn kind(&self) -> &'static str {
        "sqlite"
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
        validate_insert(self.dimension, &vectors, &ids, &payloads)?;
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(Self::db_err)?;
            for ((vector, id), payload) in vectors.iter().zip(&ids).zip(&payloads) {
                let exists: bool = tx
                    .query_row(
                        "SELECT 1 FROM vector_records WHERE collection = ?1 AND id = ?2",
                        params![self.collection, id],
                        |_| Ok(true),
                    )
                    .ok()
                    .unwrap_or(false);
                if exists {
                    return Err(VectorError::InvalidArgument(format!(
                        "id already exists in collection: {id}"
                    )));
                }
                tx.execute(
                    "INSERT INTO vector_records (collection, id, embedding, payload)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        self.collection,
                        id,
                        Self::encode_vector(vector),
                        payload.to_string()
                    ],
                )
                .map_err(Self::db_err)?;
            }
            tx.commit().map_err(Self::db_err)
        })
    }

    async fn update(&self, id: &str, vector: Vec<f32>, payload: Value) -> Result<(), VectorError> {
        validate_query(self.dimension, &vector)?;
        self.with_conn(|conn| {
            let rows = conn
                .execute(
                    "UPDATE vector_records SET embedding = ?3, payload = ?4
                     WHERE collection = ?1 AND id = ?2",
                    params![
                        self.collection,
                        id,
                        Self::encode_vector(&vector),
                        payload.to_string()
                    ],
                )
                .map_err(Self::db_err)?;
            if rows == 0 {
                Err(VectorError::NotFound(id.to_owned()))
            } else {
                Ok(())
            }
        })
    }

    async fn delete(&self, id: &str) -> Result<(), VectorError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM vector_records WHERE collection = ?1 AND id = ?2",
                params![self.collection, id],
            )
            .map_err(Self::db_err)?;
            Ok(())
        })
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorMatch>, VectorError> {
        validate_query(self.dimension, query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut matches = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, embedding, payload FROM vector_records WHERE collection = ?1",
                )
                .map_err(Self::db_err)?;
            let rows = stmt
                .query_map(params![self.collection], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(Self::db_err)?;

            let mut matches = Vec::new();
            for row in rows.filter_map(|r| r.ok()) {
                let (id, blob, raw_payload) = row;
                let payload = Self::decode_payload(&raw_payload);
                if let Some(f) = filter
                    && !f.matches_payload(&payload)
                {
                    continue;
                }
                let vector = Self::decode_vector(&blob);
                let score = cosine_similarity(query, &vector);
                if let Some(threshold) = filter.and_then(|f| f.threshold)
                    && score < threshold
                {
                    continue;
                }
                matches.push(VectorMatch { id, score, payload });
            }
            Ok(matches)
        })?;
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(k);
        Ok(matches)
    }

    async fn get(&self, id: &str) -> Result<Option<Value>, VectorError> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT payload FROM vector_records WHERE collection = ?1 AND id = ?2",
                    params![self.collection, id],
                    |row| row.get(0),
                )
                .ok();
            Ok(raw.map(|r| Self::decode_payload(&r)))
        })
    }

    async fn delete_matching(&self, filter: &SearchFilter) -> Result<usize, VectorError> {
        // Payload constraints are JSON-level, so filter in process and delete
        // by id.
        let ids: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, payload FROM vector_records WHERE collection = ?1")
                .map_err(Self::db_err)?;
            let rows = stmt
                .query_map(params![self.collection], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(Self::db_err)?;
            Ok(rows
                .filter_map(|r| r.ok())
                .filter(|(_, raw)| filter.matches_payload(&Self::decode_payload(raw)))
                .map(|(id, _)| id)
                .collect())
        })?;
        let removed = ids.len();
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(Self::db_err)?;
            for id in &ids {
                tx.execute(
                    "DELETE FROM vector_records WHERE collection = ?1 AND id = ?2",
                    params![self.collection, id],
                )
                .map_err(Self::db_err)?;
            }
            tx.commit().map_err(Self::db_err)
        })?;
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, VectorError> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM vector_records WHERE collection = ?1",
                    params![self.collection],
                    |row| row.get(0),
                )
                .map_err(Self::db_err)?;
            Ok(count as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn backend() -> SqliteVectorBackend {
        let b = SqliteVectorBackend::in_memory("test", 3);
        b.connect().await.unwrap();
        b
    }

    fn unit(x: f32, y: f32, z: f32) -> Vec<f32> {
        let mag = (x * x + y * y + z * z).sqrt();
        vec![x / mag, y / mag, z / mag]
    }

    #[tokio::test]
    async fn not_connected_before_connect() {
        let b = SqliteVectorBackend::in_memory("test", 3);
        let err = b.count().await.unwrap_err();
        assert!(matches!(err, VectorError::NotConnected));
    }

    #[tokio::test]
    async fn vector_round_trip_through_blob() {
        let b = backend().await;
        let v = unit(0.3, 0.5, 0.9);
        b.insert(vec![v.clone()], vec!["a".into()], vec![json!({"text": "x"})])
            .await
            .unwrap();
        let results = b.search(&v, 1, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(
            (results[0].score - 1.0).abs() < 1e-5,
            "self-similarity should be 1.0, got {}",
            results[0].score
        );
        assert_eq!(results[0].payload["text"], "x");
    }

    #[tokio::test]
    async fn search_sorted_and_thresholded() {
        let b = backend().await;
        b.insert(
            vec![unit(1.0, 0.0, 0.0), unit(0.0, 1.0, 0.0), unit(1.0, 0.3, 0.0)],
            vec!["x".into(), "y".into(), "near".into()],
            vec![json!({}), json!({}), json!({})],
        )
        .await
        .unwrap();
        let filter = SearchFilter::with_threshold(0.5);
        let results = b
            .search(&unit(1.0, 0.0, 0.0), 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "x");
        assert_eq!(results[1].id, "near");
    }

    #[tokio::test]
    async fn update_and_delete() {
        let b = backend().await;
        b.insert(
            vec![unit(1.0, 0.0, 0.0)],
            vec!["a".into()],
            vec![json!({"v": 1})],
        )
        .await
        .unwrap();
        b.update("a", unit(0.0, 1.0, 0.0), json!({"v": 2}))
            .await
            .unwrap();
        assert_eq!(b.get("a").await.unwrap().unwrap()["v"], 2);

        assert!(matches!(
            b.update("ghost", unit(1.0, 0.0, 0.0), json!({}))
                .await
                .unwrap_err(),
            VectorError::NotFound(_)
        ));

        b.delete("a").await.unwrap();
        b.delete("a").await.unwrap();
        assert_eq!(b.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        let path_str = path.to_str().unwrap().to_owned();

        let knowledge = SqliteVectorBackend::new(&path_str, "knowledge_memory", 3);
        knowledge.connect().await.unwrap();
        knowledge
            .insert(vec![unit(1.0, 0.0, 0.0)], vec!["a".into()], vec![json!({})])
            .await
            .unwrap();

        let reflection = SqliteVectorBackend::new(&path_str, "reflection_memory", 3);
        reflection.connect().await.unwrap();
        assert_eq!(reflection.count().await.unwrap(), 0);
        assert_eq!(knowledge.count().await.unwrap(), 1);
    }
}
