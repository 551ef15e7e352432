//! Black-box contract suite for storage drivers.
//!
//! Every driver must pass the exact same assertions; the suite is generic
//! over `dyn KvBackend` and instantiated once per driver.

use engram::storage::{KvBackend, MemoryKvBackend, SqliteKvBackend, StorageError};
use serde_json::json;

async fn contract_suite(backend: &dyn KvBackend) {
    // Not connected yet: every operation fails with NotConnected.
    assert!(matches!(
        backend.get("k").await.unwrap_err(),
        StorageError::NotConnected
    ));
    assert!(matches!(
        backend.append("k", json!(1)).await.unwrap_err(),
        StorageError::NotConnected
    ));
    assert!(!backend.is_connected());

    backend.connect().await.unwrap();
    assert!(backend.is_connected());
    // connect() is idempotent.
    backend.connect().await.unwrap();

    // get of an absent key.
    assert_eq!(backend.get("missing").await.unwrap(), None);

    // set is last-write-wins, values round-trip structurally.
    backend.set("kv:a", json!({"v": 1})).await.unwrap();
    backend.set("kv:a", json!({"v": 2, "nested": [1, 2]})).await.unwrap();
    assert_eq!(
        backend.get("kv:a").await.unwrap(),
        Some(json!({"v": 2, "nested": [1, 2]}))
    );

    // append preserves total order; get_range is zero-based inclusive.
    for i in 0..10 {
        backend.append("list:log", json!(i)).await.unwrap();
    }
    assert_eq!(backend.list_len("list:log").await.unwrap(), 10);
    assert_eq!(
        backend.get_range("list:log", 0, 3).await.unwrap(),
        vec![json!(0), json!(1), json!(2)]
    );
    assert_eq!(
        backend.get_range("list:log", 7, 10).await.unwrap(),
        vec![json!(7), json!(8), json!(9)]
    );
    // Out-of-range reads are empty, not errors.
    assert!(backend.get_range("list:log", 100, 5).await.unwrap().is_empty());
    assert!(backend.get_range("no-such-list", 0, 5).await.unwrap().is_empty());
    assert_eq!(backend.get_range("list:log", 0, 0).await.unwrap().len(), 0);

    // list(prefix) covers both families, sorted lexicographically ascending.
    backend.set("kv:b", json!(true)).await.unwrap();
    backend.append("kv:c", json!("item")).await.unwrap();
    assert_eq!(
        backend.list("kv:").await.unwrap(),
        vec!["kv:a", "kv:b", "kv:c"]
    );
    assert_eq!(
        backend.list("list:").await.unwrap(),
        vec!["list:log"]
    );
    assert!(backend.list("zzz:").await.unwrap().is_empty());

    // delete removes the KV entry AND the list under the same key.
    backend.set("both", json!("value")).await.unwrap();
    backend.append("both", json!("entry")).await.unwrap();
    assert!(backend.delete("both").await.unwrap());
    assert_eq!(backend.get("both").await.unwrap(), None);
    assert_eq!(backend.list_len("both").await.unwrap(), 0);
    // Deleting again reports nothing removed.
    assert!(!backend.delete("both").await.unwrap());

    // disconnect returns the backend to the NotConnected state.
    backend.disconnect().await.unwrap();
    assert!(!backend.is_connected());
    assert!(matches!(
        backend.get("kv:a").await.unwrap_err(),
        StorageError::NotConnected
    ));
}

#[tokio::test]
async fn memory_driver_passes_contract() {
    let backend = MemoryKvBackend::new();
    contract_suite(&backend).await;
}

#[tokio::test]
async fn sqlite_in_memory_driver_passes_contract() {
    let backend = SqliteKvBackend::in_memory();
    contract_suite(&backend).await;
}

#[tokio::test]
async fn sqlite_file_driver_passes_contract() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contract.db");
    let backend = SqliteKvBackend::new(path.to_str().unwrap());
    contract_suite(&backend).await;
}
