//! The background memory engine.
//!
//! # Pipeline
//! ```text
//! InteractionRecord
//!       │  extract_facts (summary + code blocks, significance-filtered)
//!       ▼
//! for each fact (sequential):
//!   embed ── embeddings disabled? ──► chat-only result, stop
//!       │
//!       ▼
//!   vector search (top-k, similarity threshold)
//!       │
//!       ▼
//!   decision: LLM judge ── parse failure ──► similarity rules
//!       │  confidence gate (< threshold → NONE)
//!       ▼
//!   persist ADD / UPDATE / DELETE   (NONE is a no-op)
//! ```
//!
//! The engine never raises into the request path: `schedule()` is
//! fire-and-forget, all errors end up in the outcome's error list and the
//! debug log.  A failed persistence for one fact does not stop the others.

use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use crate::ai::provider::LlmProvider;
use crate::config::MemoryConfig;
use crate::embeddings::{EmbeddingError, EmbeddingManager};
use crate::vector::{SearchFilter, VectorBackend, VectorMatch};

use super::decision::{decide_by_similarity, decide_with_llm, gate_confidence};
use super::extract::extract_facts;
use super::reflection::ReflectionEngine;
use super::summary::interaction_summary;
use super::types::{InteractionRecord, KnowledgeFact, MemoryAction, MemoryEvent, MemoryOutcome};

// ─── Stats ────────────────────────────────────────────────────────────────────

/// Counters, surfaced through the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub add_operations: u64,
    pub update_operations: u64,
    pub delete_operations: u64,
    pub none_operations: u64,
    pub chat_only_runs: u64,
    pub dropped_runs: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    adds: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    nones: AtomicU64,
    chat_only: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

// ─── MemoryEngine ─────────────────────────────────────────────────────────────

pub struct MemoryEngine {
    embeddings: Arc<EmbeddingManager>,
    vectors: Arc<dyn VectorBackend>,
    llm: Option<Arc<dyn LlmProvider>>,
    decision_model: String,
    config: MemoryConfig,
    counters: Counters,
    limiter: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
}

impl MemoryEngine {
    pub fn new(
        embeddings: Arc<EmbeddingManager>,
        vectors: Arc<dyn VectorBackend>,
        llm: Option<Arc<dyn LlmProvider>>,
        decision_model: impl Into<String>,
        config: MemoryConfig,
    ) -> Arc<Self> {
        let workers = config.worker_count.max(1);
        Arc::new(Self {
            embeddings,
            vectors,
            llm,
            decision_model: decision_model.into(),
            config,
            counters: Counters::default(),
            limiter: Arc::new(Semaphore::new(workers)),
            pending: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn vectors(&self) -> Arc<dyn VectorBackend> {
        self.vectors.clone()
    }

    pub fn embeddings(&self) -> Arc<EmbeddingManager> {
        self.embeddings.clone()
    }

    // ── Scheduling ────────────────────────────────────────────────────────────

    /// Fire-and-forget: queue the interaction for background processing and
    /// optionally run the reflection sub-pipeline afterwards.
    ///
    /// The queue is bounded: above the watermark new work is dropped with a
    /// warning rather than growing without limit.
    pub fn schedule(
        self: &Arc<Self>,
        record: InteractionRecord,
        reflection: Option<Arc<ReflectionEngine>>,
    ) {
        if !self.config.enabled {
            return;
        }
        let watermark = self.config.worker_count.max(1) * 4;
        if self.pending.load(Ordering::SeqCst) >= watermark {
            tracing::warn!(watermark, "memory queue full, dropping interaction");
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        let engine = self.clone();
        tokio::spawn(async move {
            let permit = engine.limiter.clone().acquire_owned().await;
            if permit.is_ok() {
                let outcome = engine.process_interaction(record.clone()).await;
                tracing::debug!(
                    actions = outcome.actions.len(),
                    skipped = outcome.skipped,
                    "memory run finished"
                );
                if let Some(reflection) = reflection {
                    reflection.process(&record).await;
                }
            }
            engine.pending.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Number of queued or running background tasks.
    pub fn pending_tasks(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    // ── The pipeline ──────────────────────────────────────────────────────────

    #[tracing::instrument(name = "memory.process", skip_all, fields(session = ?record.session_id))]
    pub async fn process_interaction(&self, record: InteractionRecord) -> MemoryOutcome {
        if !self.config.enabled {
            return MemoryOutcome {
                skipped: true,
                ..MemoryOutcome::empty()
            };
        }
        if self.embeddings.is_disabled() {
            self.counters.chat_only.fetch_add(1, Ordering::SeqCst);
            return MemoryOutcome::chat_only();
        }

        let context_summary = interaction_summary(&record);
        let facts = extract_facts(&record, self.config.min_fact_length);
        if facts.is_empty() {
            return MemoryOutcome::empty();
        }

        let mut outcome = MemoryOutcome::empty();
        for fact in facts {
            let embedding = match self.embeddings.embed(&fact.text).await {
                Ok(embedding) => embedding,
                Err(EmbeddingError::Disabled(reason)) => {
                    // Persistent provider failure: the latch is set, nothing
                    // further can be embedded this run or any future run.
                    tracing::debug!(reason, "embeddings disabled mid-run, degrading to chat-only");
                    self.counters.chat_only.fetch_add(1, Ordering::SeqCst);
                    return MemoryOutcome::chat_only();
                }
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::SeqCst);
                    outcome.errors.push(format!("embed failed: {e}"));
                    continue;
                }
            };

            let filter = SearchFilter::with_threshold(self.config.similarity_threshold);
            let similar = match self
                .vectors
                .search(&embedding, self.config.max_similar_results, Some(&filter))
                .await
            {
                Ok(similar) => similar,
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::SeqCst);
                    outcome.errors.push(format!("search failed: {e}"));
                    Vec::new()
                }
            };

            let action = self.decide(&fact, &similar, &context_summary).await;
            let action = gate_confidence(action, self.config.confidence_threshold);

            if let Err(e) = self.persist(&action, &embedding, &record).await {
                // One fact's persistence failure must not stop the rest.
                self.counters.errors.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(event = action.event.as_str(), error = %e, "memory persistence failed");
                outcome.errors.push(e);
                outcome.actions.push(action);
                continue;
            }

            match action.event {
                MemoryEvent::Add => self.counters.adds.fetch_add(1, Ordering::SeqCst),
                MemoryEvent::Update => self.counters.updates.fetch_add(1, Ordering::SeqCst),
                MemoryEvent::Delete => self.counters.deletes.fetch_add(1, Ordering::SeqCst),
                MemoryEvent::None => self.counters.nones.fetch_add(1, Ordering::SeqCst),
            };
            outcome.actions.push(action);
        }
        outcome
    }

    async fn decide(
        &self,
        fact: &KnowledgeFact,
        similar: &[VectorMatch],
        context_summary: &str,
    ) -> MemoryAction {
        let mut action = match (&self.llm, self.config.use_llm_decisions) {
            (Some(llm), true) => {
                match decide_with_llm(
                    llm.as_ref(),
                    &self.decision_model,
                    fact,
                    similar,
                    context_summary,
                )
                .await
                {
                    Some(action) => action,
                    None => decide_by_similarity(fact, similar, self.config.similarity_threshold),
                }
            }
            _ => decide_by_similarity(fact, similar, self.config.similarity_threshold),
        };

        if action.event == MemoryEvent::Delete && !self.config.enable_delete_operations {
            action.reasoning = format!("{}; delete operations disabled", action.reasoning);
            action.event = MemoryEvent::None;
        }
        action
    }

    async fn persist(
        &self,
        action: &MemoryAction,
        embedding: &[f32],
        record: &InteractionRecord,
    ) -> Result<(), String> {
        match action.event {
            MemoryEvent::Add => self
                .vectors
                .insert(
                    vec![embedding.to_vec()],
                    vec![action.id.clone()],
                    vec![payload_for(action, record)],
                )
                .await
                .map_err(|e| format!("insert failed: {e}")),
            MemoryEvent::Update => self
                .vectors
                .update(&action.id, embedding.to_vec(), payload_for(action, record))
                .await
                .map_err(|e| format!("update failed: {e}")),
            MemoryEvent::Delete => self
                .vectors
                .delete(&action.id)
                .await
                .map_err(|e| format!("delete failed: {e}")),
            MemoryEvent::None => Ok(()),
        }
    }

    // ── Query surface ─────────────────────────────────────────────────────────

    /// Semantic search over stored memories (backs the `memory_search`
    /// tool and memory-context recall).
    pub async fn search_memories(
        &self,
        query: &str,
        limit: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<VectorMatch>, String> {
        let embedding = self
            .embeddings
            .embed(query)
            .await
            .map_err(|e| e.to_string())?;
        let filter = threshold.map(SearchFilter::with_threshold);
        self.vectors
            .search(&embedding, limit, filter.as_ref())
            .await
            .map_err(|e| e.to_string())
    }

    /// Remove every record tagged with `session_id` (session deletion).
    pub async fn delete_session_memories(&self, session_id: &str) -> Result<usize, String> {
        let filter = SearchFilter {
            session_id: Some(session_id.to_owned()),
            ..SearchFilter::default()
        };
        self.vectors
            .delete_matching(&filter)
            .await
            .map_err(|e| e.to_string())
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            add_operations: self.counters.adds.load(Ordering::SeqCst),
            update_operations: self.counters.updates.load(Ordering::SeqCst),
            delete_operations: self.counters.deletes.load(Ordering::SeqCst),
            none_operations: self.counters.nones.load(Ordering::SeqCst),
            chat_only_runs: self.counters.chat_only.load(Ordering::SeqCst),
            dropped_runs: self.counters.dropped.load(Ordering::SeqCst),
            errors: self.counters.errors.load(Ordering::SeqCst),
        }
    }
}

fn payload_for(action: &MemoryAction, record: &InteractionRecord) -> Value {
    let mut payload = json!({
        "text": action.text,
        "tags": action.tags,
        "confidence": action.confidence,
        "event": action.event.as_str(),
        "createdAt": Utc::now().to_rfc3339(),
    });
    if let Some(pattern) = &action.code_pattern {
        payload["codePattern"] = json!(pattern);
    }
    if let Some(old) = &action.old_memory {
        payload["oldMemory"] = json!(old);
    }
    if let Some(session) = &record.session_id {
        payload["sourceSessionId"] = json!(session);
    }
    payload
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingsConfig;
    use crate::memory::types::MemoryMode;
    use crate::vector::MemoryVectorBackend;

    async fn engine() -> Arc<MemoryEngine> {
        engine_with(MemoryConfig {
            use_llm_decisions: false,
            ..MemoryConfig::default()
        })
        .await
    }

    async fn engine_with(config: MemoryConfig) -> Arc<MemoryEngine> {
        let embeddings = Arc::new(EmbeddingManager::from_config(&EmbeddingsConfig::default()));
        let vectors = Arc::new(MemoryVectorBackend::new("knowledge_memory", 384));
        vectors.connect().await.unwrap();
        MemoryEngine::new(embeddings, vectors, None, "gpt-4o-mini", config)
    }

    fn npm_record() -> InteractionRecord {
        InteractionRecord::new(
            "Use npm install next and run npm run build",
            "Installed and built successfully.",
        )
        .with_session("s1")
    }

    #[tokio::test]
    async fn first_run_adds_a_record() {
        let engine = engine().await;
        let outcome = engine.process_interaction(npm_record()).await;

        assert_eq!(outcome.mode, MemoryMode::Full);
        assert!(!outcome.skipped);
        let adds: Vec<_> = outcome
            .actions
            .iter()
            .filter(|a| a.event == MemoryEvent::Add)
            .collect();
        assert!(!adds.is_empty(), "a new fact should be added");
        assert!(adds[0].text.contains("Use npm install next and run npm run build"));
        assert!(adds[0].tags.contains(&"npm".to_owned()));
        assert!(adds[0].tags.contains(&"code-block".to_owned()));

        // Persisted with the payload contract.
        let stored = engine.vectors.get(&adds[0].id).await.unwrap().unwrap();
        assert_eq!(stored["event"], "ADD");
        assert_eq!(stored["sourceSessionId"], "s1");
        assert!(stored["text"].as_str().unwrap().contains("npm install next"));
        assert_eq!(engine.stats().add_operations, 1);
    }

    #[tokio::test]
    async fn repeat_run_collapses_to_none() {
        let engine = engine().await;
        let first = engine.process_interaction(npm_record()).await;
        let added: usize = first
            .actions
            .iter()
            .filter(|a| a.event == MemoryEvent::Add)
            .count();
        let count_after_first = engine.vectors.count().await.unwrap();
        assert_eq!(count_after_first, added);

        let second = engine.process_interaction(npm_record()).await;
        let second_adds = second
            .actions
            .iter()
            .filter(|a| a.event == MemoryEvent::Add)
            .count();
        assert_eq!(second_adds, 0, "identical input must not add again");
        assert!(
            second
                .actions
                .iter()
                .all(|a| a.event == MemoryEvent::None),
            "duplicates collapse to NONE"
        );
        assert_eq!(engine.vectors.count().await.unwrap(), count_after_first);
        assert!(engine.stats().none_operations >= 1);
    }

    #[tokio::test]
    async fn trivial_input_produces_no_actions() {
        let engine = engine().await;
        let outcome = engine
            .process_interaction(InteractionRecord::new("thanks", "welcome"))
            .await;
        assert!(outcome.actions.is_empty());
        assert_eq!(engine.vectors.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn disabled_embeddings_short_circuit_to_chat_only() {
        let engine = engine().await;
        engine.embeddings.handle_runtime_failure("provider gone");

        let outcome = engine.process_interaction(npm_record()).await;
        assert_eq!(outcome.mode, MemoryMode::ChatOnly);
        assert!(outcome.skipped);
        assert_eq!(engine.vectors.count().await.unwrap(), 0);
        assert_eq!(engine.stats().chat_only_runs, 1);

        // Sticky: the next run is also chat-only without touching vectors.
        let outcome = engine.process_interaction(npm_record()).await;
        assert!(outcome.skipped);
        assert_eq!(engine.stats().chat_only_runs, 2);
    }

    #[tokio::test]
    async fn confidence_gate_applies() {
        // An impossible threshold forces every decision to NONE.
        let engine = engine_with(MemoryConfig {
            use_llm_decisions: false,
            confidence_threshold: 0.99,
            ..MemoryConfig::default()
        })
        .await;
        let outcome = engine.process_interaction(npm_record()).await;
        assert!(!outcome.actions.is_empty());
        for action in &outcome.actions {
            assert_eq!(action.event, MemoryEvent::None);
            assert!(action.reasoning.contains("coerced to NONE"));
        }
        assert_eq!(engine.vectors.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn engine_disabled_is_noop() {
        let engine = engine_with(MemoryConfig {
            enabled: false,
            ..MemoryConfig::default()
        })
        .await;
        let outcome = engine.process_interaction(npm_record()).await;
        assert!(outcome.skipped);
        assert_eq!(engine.vectors.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn schedule_runs_in_background() {
        let engine = engine().await;
        engine.schedule(npm_record(), None);

        // Wait for the background task to settle.
        for _ in 0..100 {
            if engine.vectors.count().await.unwrap() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(engine.vectors.count().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn search_memories_finds_stored_fact() {
        let engine = engine().await;
        engine.process_interaction(npm_record()).await;
        let hits = engine
            .search_memories("Use npm install next and run npm run build", 5, None)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].score > 0.5);
    }

    #[tokio::test]
    async fn delete_session_memories_removes_tagged_records() {
        let engine = engine().await;
        engine.process_interaction(npm_record()).await;
        let removed = engine.delete_session_memories("s1").await.unwrap();
        assert!(removed >= 1);
        assert_eq!(engine.vectors.count().await.unwrap(), 0);
    }
}
