//! Per-turn orchestration: one [`ConversationSession`] drives the context,
//! the reasoning loop, persistence, and the background memory work for a
//! single session.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::ai::provider::LlmProvider;
use crate::config::AgentLoopConfig;
use crate::context::ImageRef;
use crate::error::{CoreError, CoreResult};
use crate::memory::{InteractionRecord, MemoryEngine, ReflectionEngine};
use crate::prompts::PromptContext;
use crate::session::{Session, SessionManager};
use crate::tools::UnifiedToolManager;

use super::loop_::AgentLoop;

/// Per-call options, validated at the edge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RunOptions {
    /// Advisory; the current provider surface is non-streaming.
    #[serde(default)]
    pub stream: bool,
    /// Override the chat model for this turn.
    #[serde(default)]
    pub model: Option<String>,
}

/// Orchestrates `run()` calls for one session.
pub struct ConversationSession {
    session: Arc<Session>,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<UnifiedToolManager>,
    sessions: Arc<SessionManager>,
    memory: Arc<MemoryEngine>,
    reflection: Arc<ReflectionEngine>,
    model: String,
    loop_config: AgentLoopConfig,
    // The loop is built lazily on the first run() call.
    loop_: OnceLock<AgentLoop>,
}

impl ConversationSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<Session>,
        provider: Arc<dyn LlmProvider>,
        tools: Arc<UnifiedToolManager>,
        sessions: Arc<SessionManager>,
        memory: Arc<MemoryEngine>,
        reflection: Arc<ReflectionEngine>,
        model: impl Into<String>,
        loop_config: AgentLoopConfig,
    ) -> Self {
        Self {
            session,
            provider,
            tools,
            sessions,
            memory,
            reflection,
            model: model.into(),
            loop_config,
            loop_: OnceLock::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    fn agent_loop(&self) -> &AgentLoop {
        self.loop_.get_or_init(|| {
            AgentLoop::new(
                self.provider.clone(),
                self.tools.clone(),
                self.session.context.clone(),
                self.model.clone(),
                self.loop_config.clone(),
            )
        })
    }

    /// Run one turn.
    ///
    /// The response returns as soon as the loop finishes; knowledge
    /// extraction and reflection run in the background afterwards and can
    /// never delay or fail this call.
    pub async fn run(
        &self,
        input: &str,
        image: Option<ImageRef>,
        options: Option<RunOptions>,
    ) -> CoreResult<String> {
        let input = input.trim();
        if input.is_empty() {
            return Err(CoreError::validation("input must be a non-empty string"));
        }
        if let Some(image) = &image {
            image.validate().map_err(CoreError::validation)?;
        }
        let options = options.unwrap_or_default();
        if options.stream {
            tracing::debug!("streaming requested; responding non-streaming");
        }

        let message_count_before = self.session.context.message_count();
        self.session
            .context
            .add_user_message(input, image)
            .map_err(CoreError::validation)?;

        let prompt_ctx = self.prompt_context(input).await;
        let result = match options.model.as_deref() {
            // A per-turn model override gets a one-off loop; the cached loop
            // keeps the session's configured model.
            Some(model) if model != self.model => {
                let one_off = AgentLoop::new(
                    self.provider.clone(),
                    self.tools.clone(),
                    self.session.context.clone(),
                    model,
                    self.loop_config.clone(),
                );
                one_off.run(&prompt_ctx).await?
            }
            _ => self.agent_loop().run(&prompt_ctx).await?,
        };

        // Persist everything this turn appended.
        let raw = self.session.context.raw_messages();
        let new_messages = raw.get(message_count_before..).unwrap_or_default();
        if let Err(e) = self.sessions.persist_turn(&self.session, new_messages).await {
            tracing::warn!(session = %self.session.id, error = %e, "turn persistence failed");
        }

        // Fire-and-forget memory work; the reflection pipeline chains after
        // the knowledge pipeline inside the engine's worker.
        let record = InteractionRecord::new(input, &result.response)
            .with_tools(result.tools_used.clone())
            .with_session(&self.session.id);
        self.memory.schedule(record, Some(self.reflection.clone()));

        Ok(result.response)
    }

    /// Assemble the prompt context for this turn, including a recall block
    /// of relevant memories when any exist.
    async fn prompt_context(&self, input: &str) -> PromptContext {
        let mut ctx = PromptContext::for_session(&self.session.id);
        ctx.user_input = Some(input.to_owned());
        ctx.vars.insert(
            "message_count".to_owned(),
            self.session.context.message_count().to_string(),
        );

        // Recall is best-effort: disabled embeddings or an empty store just
        // mean no memory block.
        match self.memory.search_memories(input, 3, Some(0.5)).await {
            Ok(hits) if !hits.is_empty() => {
                let lines: Vec<String> = hits
                    .iter()
                    .filter_map(|h| h.payload.get("text").and_then(|v| v.as_str()))
                    .map(|text| format!("- {}", truncate_chars(text, 150)))
                    .collect();
                if !lines.is_empty() {
                    ctx.memory_context = Some(lines.join("\n"));
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "memory recall unavailable");
            }
        }
        ctx
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}
