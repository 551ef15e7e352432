//! Vector store manager — backend construction with graceful fallback.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::config::VectorConfig;

use super::{
    backend::VectorBackend,
    memory::MemoryVectorBackend,
    sqlite::SqliteVectorBackend,
};

/// Owns one connected collection handle.
///
/// If the configured backend fails to connect, an in-memory backend with the
/// same collection name and dimension is substituted transparently and
/// [`VectorStoreManager::info`] reports `fallback: true`.
pub struct VectorStoreManager {
    backend: Arc<dyn VectorBackend>,
    fallback: bool,
}

impl VectorStoreManager {
    /// Construct and connect the backend for `collection`.
    pub async fn open(config: &VectorConfig, collection: &str, dimension: usize) -> Self {
        let configured: Arc<dyn VectorBackend> = match config.backend.as_str() {
            "sqlite" => {
                let path = config.path.clone().unwrap_or_else(|| {
                    crate::config::engram_dir()
                        .join("vectors.db")
                        .to_string_lossy()
                        .into_owned()
                });
                Arc::new(SqliteVectorBackend::new(path, collection, dimension))
            }
            // "memory" and anything unrecognized resolve to the in-process
            // backend; an unknown name is reported once below.
            other => {
                if other != "memory" {
                    tracing::warn!(backend = other, "unknown vector backend, using memory");
                }
                Arc::new(MemoryVectorBackend::new(collection, dimension))
            }
        };

        match configured.connect().await {
            Ok(()) => Self {
                backend: configured,
                fallback: false,
            },
            Err(e) => {
                tracing::warn!(
                    collection,
                    error = %e,
                    "vector backend failed to connect, falling back to memory"
                );
                let fallback: Arc<dyn VectorBackend> =
                    Arc::new(MemoryVectorBackend::new(collection, dimension));
                // The in-memory connect cannot fail.
                let _ = fallback.connect().await;
                Self {
                    backend: fallback,
                    fallback: true,
                }
            }
        }
    }

    /// The connected collection handle.
    pub fn store(&self) -> Arc<dyn VectorBackend> {
        self.backend.clone()
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Introspection payload for stats endpoints.
    pub fn info(&self) -> Value {
        json!({
            "backend": self.backend.kind(),
            "collection": self.backend.collection(),
            "dimension": self.backend.dimension(),
            "connected": self.backend.is_connected(),
            "fallback": self.fallback,
        })
    }
}
