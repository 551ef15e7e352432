//! In-memory storage driver — the default, always-available backend.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::Value;

use super::backend::{KvBackend, StorageError};

/// HashMap-backed driver.  Data lives for the process lifetime only.
#[derive(Default)]
pub struct MemoryKvBackend {
    connected: AtomicBool,
    kv: RwLock<HashMap<String, Value>>,
    lists: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_connected(&self) -> Result<(), StorageError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::NotConnected)
        }
    }

    fn lock_err<T>(e: std::sync::PoisonError<T>) -> StorageError {
        StorageError::Backend(format!("lock poisoned: {e}"))
    }
}

#[async_trait]
impl KvBackend for MemoryKvBackend {
    async fn connect(&self) -> Result<(), StorageError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StorageError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.check_connected()?;
        let kv = self.kv.read().map_err(Self::lock_err)?;
        Ok(kv.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.check_connected()?;
        let mut kv = self.kv.write().map_err(Self::lock_err)?;
        kv.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.check_connected()?;
        // Hold both write locks so the KV entry and the list vanish together.
        let mut kv = self.kv.write().map_err(Self::lock_err)?;
        let mut lists = self.lists.write().map_err(Self::lock_err)?;
        let removed_kv = kv.remove(key).is_some();
        let removed_list = lists.remove(key).is_some();
        Ok(removed_kv || removed_list)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.check_connected()?;
        let kv = self.kv.read().map_err(Self::lock_err)?;
        let lists = self.lists.read().map_err(Self::lock_err)?;
        let keys: BTreeSet<String> = kv
            .keys()
            .chain(lists.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn append(&self, key: &str, item: Value) -> Result<(), StorageError> {
        self.check_connected()?;
        let mut lists = self.lists.write().map_err(Self::lock_err)?;
        lists.entry(key.to_owned()).or_default().push(item);
        Ok(())
    }

    async fn get_range(
        &self,
        key: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<Value>, StorageError> {
        self.check_connected()?;
        let lists = self.lists.read().map_err(Self::lock_err)?;
        let Some(items) = lists.get(key) else {
            return Ok(Vec::new());
        };
        if start >= items.len() {
            return Ok(Vec::new());
        }
        let end = start.saturating_add(count).min(items.len());
        Ok(items[start..end].to_vec())
    }

    async fn list_len(&self, key: &str) -> Result<usize, StorageError> {
        self.check_connected()?;
        let lists = self.lists.read().map_err(Self::lock_err)?;
        Ok(lists.get(key).map(Vec::len).unwrap_or(0))
    }
}
