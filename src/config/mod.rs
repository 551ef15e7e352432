//! Runtime configuration: TOML schema plus the loader.

pub mod loader;
pub mod schema;

pub use loader::{default_config_path, engram_dir, load_config, load_default_config};
pub use schema::{
    AgentLoopConfig, AppConfig, EmbeddingProviderConfig, EmbeddingsConfig, GatewayConfig,
    MemoryConfig, PromptsConfig, ProviderConfig, ReflectionConfig, SessionConfig, StorageConfig,
    ToolServerConfig, ToolsConfig, VectorConfig,
};
