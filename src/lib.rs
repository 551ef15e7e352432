//! Engram — a memory-augmented conversational agent runtime.
//!
//! A user message flows through the session manager into a reasoning loop
//! that can call tools (internal or external tool servers); after each
//! turn, a background pipeline mines the interaction for durable knowledge
//! stored in vector memory and recalled on later turns.

pub mod agent;
pub mod ai;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod gateway;
pub mod mcp;
pub mod memory;
pub mod prompts;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod tools;
pub mod vector;

/// Convenience re-exports for the most commonly used traits and types.
///
/// ```rust
/// use engram::prelude::*;
/// ```
pub mod prelude {
    // Runtime assembly
    pub use crate::runtime::Runtime;

    // AI provider layer
    pub use crate::ai::provider::LlmProvider;
    pub use crate::ai::types::{CompletionRequest, CompletionResponse, Message, MessageRole};

    // Tool system
    pub use crate::tools::{ConflictPolicy, Tool, ToolResult, UnifiedToolManager};

    // Memory pipeline
    pub use crate::memory::{
        InteractionRecord, MemoryEngine, MemoryEvent, MemoryOutcome, ReflectionEngine,
    };

    // Storage and vectors
    pub use crate::storage::{KvBackend, StorageError};
    pub use crate::vector::{SearchFilter, VectorBackend, VectorError, VectorMatch};

    // Sessions and context
    pub use crate::context::{ChatMessage, ContextManager};
    pub use crate::session::{Session, SessionManager, SessionMetadata};

    // Configuration
    pub use crate::config::{AppConfig, load_default_config};

    // Errors
    pub use crate::error::{CoreError, CoreResult, ErrorKind};
}
