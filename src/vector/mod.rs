//! Vector memory storage.
//!
//! # Architecture
//! ```text
//! VectorBackend (trait, one collection per handle)
//!   ├── MemoryVectorBackend   ← HashMap + brute-force cosine (default, fallback)
//!   └── SqliteVectorBackend   ← embedding BLOBs in SQLite
//!
//! VectorStoreManager — connects the configured backend, substitutes the
//! in-memory backend when the connection fails (reported via `fallback`).
//! ```

pub mod backend;
pub mod manager;
pub mod memory;
pub mod sqlite;

pub use backend::{SearchFilter, VectorBackend, VectorError, VectorMatch};
pub use manager::VectorStoreManager;
pub use memory::MemoryVectorBackend;
pub use sqlite::SqliteVectorBackend;
