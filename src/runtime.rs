//! Runtime assembly.
//!
//! [`Runtime`] is the explicit wiring of every subsystem — storage, vector
//! collections, embeddings, LLM provider, prompt manager, tool manager,
//! session manager, and the two background engines.  Nothing here is a
//! process-wide global; embedding applications construct as many runtimes
//! as they need and the gateway/CLI share one behind an `Arc`.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::agent::ConversationSession;
use crate::ai::provider::LlmProvider;
use crate::ai::types::{CompletionRequest, CompletionResponse};
use crate::ai::{OpenAiCompatibleProvider, ReliableProvider};
use crate::config::AppConfig;
use crate::embeddings::EmbeddingManager;
use crate::error::{CoreError, CoreResult};
use crate::mcp::{ToolServer, connect_tool_servers};
use crate::memory::{MemoryEngine, ReflectionEngine, register_memory_tools};
use crate::prompts::{PromptManager, PromptProvider, PromptSource};
use crate::session::SessionManager;
use crate::storage::{BackendRegistry, KvBackend, MemoryKvBackend};
use crate::tools::{ConflictPolicy, UnifiedToolManager};
use crate::vector::VectorStoreManager;

const DEFAULT_PERSONA: &str = "You are Engram, a helpful assistant with long-term memory. \
     Use your tools when they genuinely help; otherwise answer directly.";

// ─── Model-pinned provider ────────────────────────────────────────────────────

/// Rewrites every request to a fixed model — the building block for
/// model-level fallback chains on one endpoint.
struct ModelPinnedProvider {
    inner: Arc<dyn LlmProvider>,
    model: String,
}

#[async_trait]
impl LlmProvider for ModelPinnedProvider {
    async fn complete(
        &self,
        mut request: CompletionRequest,
    ) -> crate::ai::provider::Result<CompletionResponse> {
        request.model = self.model.clone();
        self.inner.complete(request).await
    }

    fn context_limit(&self) -> usize {
        self.inner.context_limit()
    }

    fn supports_tools(&self) -> bool {
        self.inner.supports_tools()
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }
}

// ─── Runtime ──────────────────────────────────────────────────────────────────

pub struct Runtime {
    pub config: AppConfig,
    pub storage: Arc<dyn KvBackend>,
    pub prompt_manager: Arc<PromptManager>,
    pub sessions: Arc<SessionManager>,
    pub tools: Arc<UnifiedToolManager>,
    pub provider: Arc<dyn LlmProvider>,
    pub embeddings: Arc<EmbeddingManager>,
    pub memory: Arc<MemoryEngine>,
    pub reflection: Arc<ReflectionEngine>,
    knowledge_info: Value,
    reflection_info: Value,
    tool_servers: Vec<Arc<ToolServer>>,
    started_at: DateTime<Utc>,
}

impl Runtime {
    /// Build and connect everything from configuration.
    pub async fn initialize(config: AppConfig) -> CoreResult<Arc<Self>> {
        // ── Storage (degrades to in-memory when the driver cannot connect) ─
        let registry = BackendRegistry::with_builtin_drivers();
        let storage: Arc<dyn KvBackend> = match registry.create(&config.storage) {
            Ok(backend) => match backend.connect().await {
                Ok(()) => backend,
                Err(e) => {
                    tracing::warn!(error = %e, "storage backend failed to connect, using memory");
                    fallback_storage().await
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "storage backend unavailable, using memory");
                fallback_storage().await
            }
        };

        // ── Embeddings and vector collections ──────────────────────────────
        let embeddings = Arc::new(EmbeddingManager::from_config(&config.embeddings));
        let dimension = embeddings.dimension();

        let knowledge =
            VectorStoreManager::open(&config.vector, &config.vector.collection, dimension).await;
        let reflection_store = VectorStoreManager::open(
            &config.vector,
            &config.vector.reflection_collection,
            dimension,
        )
        .await;

        // ── LLM provider (reliability wrapper + model fallback chain) ──────
        let api_key = config
            .provider
            .api_key
            .clone()
            .or_else(|| std::env::var("ENGRAM_API_KEY").ok());
        let base: Arc<dyn LlmProvider> = Arc::new(
            OpenAiCompatibleProvider::new(
                config.provider.base_url.clone(),
                api_key,
                Duration::from_secs(config.provider.request_timeout_secs),
            )
            .with_name("openai-compatible"),
        );
        let provider: Arc<dyn LlmProvider> = if config.provider.fallback_models.is_empty() {
            base
        } else {
            // The loop owns per-call retry, so the wrapper contributes the
            // fallback chain only.
            let mut reliable =
                ReliableProvider::new(base.clone()).with_retries(0, Duration::from_millis(500));
            for model in &config.provider.fallback_models {
                reliable = reliable.with_fallback(Arc::new(ModelPinnedProvider {
                    inner: base.clone(),
                    model: model.clone(),
                }));
            }
            Arc::new(reliable)
        };

        // ── Background engines ─────────────────────────────────────────────
        let memory = MemoryEngine::new(
            embeddings.clone(),
            knowledge.store(),
            Some(provider.clone()),
            config.provider.default_model.clone(),
            config.memory.clone(),
        );
        let reflection = ReflectionEngine::new(
            embeddings.clone(),
            reflection_store.store(),
            Some(provider.clone()),
            config.reflection.clone(),
        );

        // ── Tools (internal first, then external servers) ──────────────────
        let policy = ConflictPolicy::parse(&config.tools.conflict_policy).ok_or_else(|| {
            CoreError::validation(format!(
                "unknown conflict policy '{}'",
                config.tools.conflict_policy
            ))
        })?;
        let tools = Arc::new(UnifiedToolManager::new(
            policy,
            Duration::from_secs(config.tools.execution_timeout_secs),
        ));
        register_memory_tools(&tools, memory.clone(), reflection.clone())?;
        let tool_servers = connect_tool_servers(&config.tools, &tools).await?;

        // ── Prompt layers ──────────────────────────────────────────────────
        let prompt_manager = Arc::new(PromptManager::new(config.prompts.clone()));
        prompt_manager.add_provider(PromptProvider {
            id: "persona".to_owned(),
            source: PromptSource::Static {
                content: DEFAULT_PERSONA.to_owned(),
                variables: HashMap::new(),
            },
            priority: 100,
            enabled: true,
        });
        prompt_manager.add_provider(PromptProvider {
            id: "memory-context".to_owned(),
            source: PromptSource::Dynamic {
                generator: "memory-context".to_owned(),
                generator_config: Value::Null,
                template: None,
            },
            priority: 50,
            enabled: true,
        });
        prompt_manager.add_provider(PromptProvider {
            id: "session-context".to_owned(),
            source: PromptSource::Dynamic {
                generator: "session-context".to_owned(),
                generator_config: Value::Null,
                template: None,
            },
            priority: 40,
            enabled: true,
        });

        // ── Sessions ───────────────────────────────────────────────────────
        let sessions = Arc::new(SessionManager::new(
            storage.clone(),
            prompt_manager.clone(),
            config.session.clone(),
        ));

        Ok(Arc::new(Self {
            knowledge_info: knowledge.info(),
            reflection_info: reflection_store.info(),
            config,
            storage,
            prompt_manager,
            sessions,
            tools,
            provider,
            embeddings,
            memory,
            reflection,
            tool_servers,
            started_at: Utc::now(),
        }))
    }

    /// A [`ConversationSession`] for `session_id` (loaded or created), or
    /// for the current session when `None`.
    pub async fn conversation(&self, session_id: Option<&str>) -> CoreResult<ConversationSession> {
        let session = match session_id {
            Some(id) => self.sessions.load_session(id).await?,
            None => {
                let current = self.sessions.current_session();
                match current {
                    Some(id) => self.sessions.load_session(&id).await?,
                    None => self.sessions.create_session(None).await?,
                }
            }
        };
        Ok(ConversationSession::new(
            session,
            self.provider.clone(),
            self.tools.clone(),
            self.sessions.clone(),
            self.memory.clone(),
            self.reflection.clone(),
            self.config.provider.default_model.clone(),
            self.config.agent.clone(),
        ))
    }

    /// Delete a session's KV entries plus its tagged vector records.
    pub async fn delete_session(&self, id: &str) -> CoreResult<bool> {
        let deleted = self.sessions.delete_session(id).await?;
        if let Err(e) = self.memory.delete_session_memories(id).await {
            tracing::debug!(session = %id, error = %e, "knowledge cleanup failed");
        }
        let filter = crate::vector::SearchFilter {
            session_id: Some(id.to_owned()),
            ..Default::default()
        };
        if let Err(e) = self.reflection.vectors().delete_matching(&filter).await {
            tracing::debug!(session = %id, error = %e, "reflection cleanup failed");
        }
        Ok(deleted)
    }

    /// The stats payload behind `GET /sessions/stats`.
    pub fn stats(&self) -> Value {
        json!({
            "sessionStats": self.sessions.stats(),
            "runtimeStats": {
                "uptimeSecs": (Utc::now() - self.started_at).num_seconds(),
                "provider": self.provider.provider_name(),
                "model": self.config.provider.default_model,
                "toolStats": self.tools.stats(),
                "memoryStats": self.memory.stats(),
                "reflectionTracesStored": self.reflection.stored_count(),
                "toolServers": self.tool_servers.len(),
            },
            "optimizationStatus": {
                "storageBackend": self.storage.kind(),
                "knowledgeCollection": self.knowledge_info,
                "reflectionCollection": self.reflection_info,
                "embeddingsDisabled": self.embeddings.is_disabled(),
                "embeddingsDisabledReason": self.embeddings.disabled_reason(),
            },
        })
    }

    /// Terminate external tool-server processes.
    pub async fn shutdown(&self) {
        for server in &self.tool_servers {
            server.shutdown().await;
        }
    }
}

async fn fallback_storage() -> Arc<dyn KvBackend> {
    let backend = Arc::new(MemoryKvBackend::new());
    // The in-memory connect cannot fail.
    let _ = backend.connect().await;
    backend
}

// ─── Tests ────────────────────────────────────────────────────────────────────
