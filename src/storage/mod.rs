//! Durable key-value / ordered-list storage.
//!
//! # Architecture
//! ```text
//! KvBackend (trait)
//!   ├── MemoryKvBackend   ← HashMap-backed, always available (default)
//!   └── SqliteKvBackend   ← embedded file-based, WAL mode
//!
//! BackendRegistry — constructors keyed by backend type; selectable at
//! runtime via [storage] config.
//! ```
//!
//! All drivers pass the same black-box contract suite in
//! `tests/storage_contract.rs`.

pub mod backend;
pub mod memory;
pub mod registry;
pub mod sqlite;

pub use backend::{KvBackend, StorageError};
pub use memory::MemoryKvBackend;
pub use registry::{BackendCtor, BackendRegistry};
pub use sqlite::SqliteKvBackend;
