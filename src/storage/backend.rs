//! The key-value / ordered-list storage contract.
//!
//! A backend stores two families of data under the same key space:
//! - plain JSON values (`get` / `set` / `delete`)
//! - append-only ordered lists (`append` / `get_range`)
//!
//! `delete(key)` removes both the plain value and the list under `key`.
//! `list(prefix)` returns every known key with the given prefix, sorted
//! lexicographically ascending, across both families.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by storage drivers.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// An operation was attempted before `connect()`.
    #[error("storage backend is not connected")]
    NotConnected,

    /// The underlying driver failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Abstraction over the runtime's durable key-value store.
///
/// Implementations must be internally thread-safe; callers never serialize
/// access on the backend's behalf.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Establish the connection.  Idempotent.
    async fn connect(&self) -> Result<(), StorageError>;

    /// Tear down the connection.  Subsequent operations fail with
    /// [`StorageError::NotConnected`].
    async fn disconnect(&self) -> Result<(), StorageError>;

    fn is_connected(&self) -> bool;

    /// Driver name, e.g. `"memory"` or `"sqlite"`.
    fn kind(&self) -> &'static str;

    /// Fetch the plain value under `key`, if present.
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Store `value` under `key`.  Last write wins.
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Remove the plain value *and* the list under `key`.
    /// Returns `true` if anything was removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// List keys with the given prefix, sorted ascending.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Append `item` to the ordered list under `key`, creating it if needed.
    async fn append(&self, key: &str, item: Value) -> Result<(), StorageError>;

    /// Fetch up to `count` items starting at zero-based index `start`.
    /// Out-of-range reads return an empty vector.
    async fn get_range(
        &self,
        key: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<Value>, StorageError>;

    /// Length of the list under `key` (0 when absent).
    async fn list_len(&self, key: &str) -> Result<usize, StorageError>;
}
