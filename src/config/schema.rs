//! TOML configuration schema for the runtime.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly.  Missing sections fall back to their `Default` impl.
//!
//! Example `~/.engram/config.toml`:
//! ```toml
//! [provider]
//! default_model = "gpt-4o-mini"
//! base_url = "https://api.openai.com/v1"
//!
//! [embeddings.provider]
//! type = "openai"
//! model = "text-embedding-3-small"
//!
//! [storage]
//! backend = "sqlite"
//!
//! [memory]
//! similarity_threshold = 0.7
//!
//! [gateway]
//! port = 18600
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── ProviderConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Default chat model identifier (e.g. `"gpt-4o-mini"`).
    pub default_model: String,
    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,
    /// API key.  May also be supplied via the `ENGRAM_API_KEY` env var.
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Ordered fallback models tried when the default model fails.
    pub fallback_models: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".to_owned(),
            base_url: "https://api.openai.com/v1".to_owned(),
            api_key: None,
            request_timeout_secs: 60,
            fallback_models: Vec::new(),
        }
    }
}

// ─── Embeddings ───────────────────────────────────────────────────────────────

/// Embedding provider selection.
///
/// A tagged union: the `type` field discriminates, and the remaining fields
/// are the superset of what each provider accepts.  Unknown fields are
/// rejected at the config edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum EmbeddingProviderConfig {
    /// Hosted OpenAI-compatible embeddings API.
    Openai {
        model: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        dimension: Option<usize>,
    },
    /// Local Ollama-style embeddings service.
    Ollama {
        model: String,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        dimension: Option<usize>,
    },
    /// Deterministic hash-based embeddings (offline / development / tests).
    Hash {
        #[serde(default = "default_dimension")]
        dimension: usize,
    },
}

fn default_dimension() -> usize {
    384
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub provider: EmbeddingProviderConfig,
    /// Retries on transient failures.
    pub max_retries: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// LRU cache capacity (exact-text keyed).
    pub cache_size: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderConfig::Hash { dimension: 384 },
            max_retries: 3,
            timeout_secs: 30,
            cache_size: 10_000,
        }
    }
}

// ─── StorageConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Driver name as registered in the backend registry: `"memory"` or
    /// `"sqlite"`.
    pub backend: String,
    /// Database file path for file-based drivers.  `None` resolves to
    /// `~/.engram/engram.db`.
    pub path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_owned(),
            path: None,
        }
    }
}

// ─── VectorConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorConfig {
    /// Driver name: `"memory"` or `"sqlite"`.
    pub backend: String,
    /// Database file path for file-based drivers.
    pub path: Option<String>,
    /// Collection holding knowledge memories.
    pub collection: String,
    /// Collection holding reasoning traces.
    pub reflection_collection: String,
    /// Optional workspace collection name.  No dedicated pipeline writes to
    /// it; it exists so externally-written records share the same store.
    pub workspace_collection: Option<String>,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_owned(),
            path: None,
            collection: "knowledge_memory".to_owned(),
            reflection_collection: "reflection_memory".to_owned(),
            workspace_collection: None,
        }
    }
}

// ─── MemoryConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// When `false` the memory engine is a no-op.
    pub enabled: bool,
    /// Cosine similarity above which an existing record is updated instead
    /// of adding a new one.
    pub similarity_threshold: f32,
    /// Maximum similar records fetched per fact.
    pub max_similar_results: usize,
    /// Decisions below this confidence are coerced to NONE.
    pub confidence_threshold: f32,
    /// Prefer an LLM judge over the similarity rules when a model is
    /// available.
    pub use_llm_decisions: bool,
    /// Allow DELETE decisions to remove records.
    pub enable_delete_operations: bool,
    /// Candidate facts shorter than this are filtered out.
    pub min_fact_length: usize,
    /// Background worker pool size.
    pub worker_count: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.7,
            max_similar_results: 5,
            confidence_threshold: 0.6,
            use_llm_decisions: true,
            enable_delete_operations: true,
            min_fact_length: 10,
            worker_count: 2,
        }
    }
}

// ─── ReflectionConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReflectionConfig {
    /// When `false` the reflection engine is a no-op.
    pub enabled: bool,
    /// Minimum detector confidence before the sub-pipeline runs.
    pub detection_confidence: f32,
    /// Minimum quality score for a trace to be stored.
    pub store_threshold: f32,
    /// Model used to evaluate reasoning traces.  Deliberately a cheaper,
    /// non-thinking configuration than the chat model.
    pub eval_model: String,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detection_confidence: 0.5,
            store_threshold: 0.6,
            eval_model: "gpt-4o-mini".to_owned(),
        }
    }
}

// ─── SessionConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Bounded LRU capacity for live sessions.
    pub max_sessions: usize,
    /// Idle seconds after which a live session may be evicted from the
    /// in-memory cache (durable state is untouched).
    pub session_ttl_secs: u64,
    /// Concurrency ceiling for batched metadata fetches.
    pub metadata_concurrency: usize,
    /// Token budget for the formatted context window.
    pub max_context_tokens: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 128,
            session_ttl_secs: 3600,
            metadata_concurrency: 32,
            max_context_tokens: 8000,
        }
    }
}

// ─── PromptsConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptsConfig {
    /// Total deadline for one `generate()` call, in milliseconds.
    pub max_generation_time_ms: u64,
    /// Separator between provider outputs.
    pub content_separator: String,
    /// Abort the whole generation on the first provider failure.
    pub fail_on_provider_error: bool,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            max_generation_time_ms: 5000,
            content_separator: "\n\n".to_owned(),
            fail_on_provider_error: false,
        }
    }
}

// ─── ToolsConfig ──────────────────────────────────────────────────────────────

/// How to launch one external tool server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Name-conflict policy: `"prefix"`, `"first-wins"`, or `"error"`.
    pub conflict_policy: String,
    /// Per-call execution timeout in seconds.
    pub execution_timeout_secs: u64,
    /// External tool servers, keyed by server name.
    pub servers: HashMap<String, ToolServerConfig>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            conflict_policy: "prefix".to_owned(),
            execution_timeout_secs: 60,
            servers: HashMap::new(),
        }
    }
}

// ─── AgentLoopConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentLoopConfig {
    /// Maximum tool-call → response iterations per turn.
    pub max_iterations: usize,
    /// LLM call retries per iteration.
    pub max_retries: u32,
    /// Sampling temperature.  `None` uses the provider default.
    pub temperature: Option<f32>,
    /// Maximum tokens per response.
    pub max_tokens: Option<u32>,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_retries: 3,
            temperature: None,
            max_tokens: None,
        }
    }
}

// ─── GatewayConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// First port tried when binding; incremented on conflict.
    pub port: u16,
    /// Optional bearer token.  When set, all session endpoints require
    /// `Authorization: Bearer <token>`.
    pub auth_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 18600,
            auth_token: None,
        }
    }
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// Root configuration object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub embeddings: EmbeddingsConfig,
    pub storage: StorageConfig,
    pub vector: VectorConfig,
    pub memory: MemoryConfig,
    pub reflection: ReflectionConfig,
    pub session: SessionConfig,
    pub prompts: PromptsConfig,
    pub tools: ToolsConfig,
    pub agent: AgentLoopConfig,
    pub gateway: GatewayConfig,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
