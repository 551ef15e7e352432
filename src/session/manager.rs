//! Session lifecycle, metadata, and history retrieval.
//!
//! The [`SessionManager`] owns every [`Session`] (and through it, each
//! session's `ContextManager`).  Live sessions sit in a bounded LRU; durable
//! state lives in the KV store under `session:<id>` (metadata + history
//! snapshot) and `messages:<id>` (ordered message list).
//!
//! # Concurrency
//! - the session map is a `Mutex<LruCache>` never held across an await
//! - concurrent history reads for one session share a single in-flight
//!   future keyed `history_<id>`; the entry is removed on resolve
//! - batched metadata fan-out is capped by `metadata_concurrency`

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{Arc, Mutex, RwLock},
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{
    FutureExt, StreamExt,
    future::{BoxFuture, Shared},
};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::context::{ChatMessage, ContextManager};
use crate::error::{CoreError, CoreResult};
use crate::prompts::PromptManager;
use crate::storage::KvBackend;

// ─── Sanitization ─────────────────────────────────────────────────────────────

/// Normalize a caller-supplied session id.
///
/// Rules: trim; replace `[^\w-]` with `-`; strip leading `empty-` / `null-` /
/// `undefined-` (case-insensitive); collapse repeated `-`; strip leading and
/// trailing `-`; cap at 64 chars.  Returns `None` when fewer than 3 chars
/// survive (callers auto-generate instead).
pub fn sanitize_session_id(raw: &str) -> Option<String> {
    let mut id: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let lower = id.to_lowercase();
    for prefix in ["empty-", "null-", "undefined-"] {
        if lower.starts_with(prefix) {
            id = id[prefix.len()..].to_owned();
            break;
        }
    }

    // Collapse runs of '-'.
    let mut collapsed = String::with_capacity(id.len());
    let mut prev_dash = false;
    for c in id.chars() {
        if c == '-' {
            if !prev_dash {
                collapsed.push('-');
            }
            prev_dash = true;
        } else {
            collapsed.push(c);
            prev_dash = false;
        }
    }

    let trimmed: String = collapsed.trim_matches('-').chars().take(64).collect();
    let cleaned = trimmed.trim_matches('-').to_owned();
    if cleaned.len() < 3 { None } else { Some(cleaned) }
}

/// Server-generated session id.
pub fn generate_session_id() -> String {
    format!("session-{}", Uuid::new_v4())
}

// ─── Metadata ─────────────────────────────────────────────────────────────────

/// Durable per-session metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Where a history read was satisfied from, reported for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistorySource {
    Memory,
    MessagesKey,
    Snapshot,
    Empty,
}

impl HistorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistorySource::Memory => "memory",
            HistorySource::MessagesKey => "messages",
            HistorySource::Snapshot => "snapshot",
            HistorySource::Empty => "none",
        }
    }
}

// ─── Session ──────────────────────────────────────────────────────────────────

/// A live conversational session.
pub struct Session {
    pub id: String,
    pub context: Arc<ContextManager>,
    created_at: DateTime<Utc>,
    last_active: RwLock<DateTime<Utc>>,
    topic: RwLock<Option<String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("last_active", &self.last_active)
            .field("topic", &self.topic)
            .finish()
    }
}

impl Session {
    fn new(
        id: String,
        prompt_manager: Arc<PromptManager>,
        max_context_tokens: usize,
    ) -> Arc<Self> {
        let context = Arc::new(ContextManager::new(
            id.clone(),
            prompt_manager,
            max_context_tokens,
        ));
        let now = Utc::now();
        Arc::new(Self {
            id,
            context,
            created_at: now,
            last_active: RwLock::new(now),
            topic: RwLock::new(None),
        })
    }

    pub fn touch(&self) {
        if let Ok(mut guard) = self.last_active.write() {
            *guard = Utc::now();
        }
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active.read().map(|g| *g).unwrap_or(self.created_at)
    }

    pub fn set_topic(&self, topic: impl Into<String>) {
        if let Ok(mut guard) = self.topic.write() {
            guard.get_or_insert(topic.into());
        }
    }

    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            session_id: self.id.clone(),
            created_at: self.created_at,
            last_active_at: self.last_active(),
            message_count: self.context.message_count(),
            topic: self.topic.read().ok().and_then(|g| g.clone()),
        }
    }
}

// ─── SessionManager ───────────────────────────────────────────────────────────

type HistoryPayload = (Vec<ChatMessage>, HistorySource);
type SharedHistoryFuture = Shared<BoxFuture<'static, Result<HistoryPayload, String>>>;

pub struct SessionManager {
    storage: Arc<dyn KvBackend>,
    prompt_manager: Arc<PromptManager>,
    config: SessionConfig,
    sessions: Arc<Mutex<LruCache<String, Arc<Session>>>>,
    current: RwLock<Option<String>>,
    inflight_history: Arc<DashMap<String, SharedHistoryFuture>>,
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn KvBackend>,
        prompt_manager: Arc<PromptManager>,
        config: SessionConfig,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_sessions).unwrap_or(NonZeroUsize::MIN.saturating_add(127));
        Self {
            storage,
            prompt_manager,
            config,
            sessions: Arc::new(Mutex::new(LruCache::new(capacity))),
            current: RwLock::new(None),
            inflight_history: Arc::new(DashMap::new()),
        }
    }

    fn session_key(id: &str) -> String {
        format!("session:{id}")
    }

    fn messages_key(id: &str) -> String {
        format!("messages:{id}")
    }

    fn cached(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .ok()
            .and_then(|mut map| map.get(id).cloned())
    }

    fn cache(&self, session: Arc<Session>) {
        if let Ok(mut map) = self.sessions.lock() {
            map.put(session.id.clone(), session);
        }
    }

    /// Drop in-memory entries idle past the TTL.  Durable state is untouched.
    fn evict_idle(&self) {
        let ttl = chrono::Duration::seconds(self.config.session_ttl_secs as i64);
        let cutoff = Utc::now() - ttl;
        let Ok(mut map) = self.sessions.lock() else {
            return;
        };
        let stale: Vec<String> = map
            .iter()
            .filter(|(_, s)| s.last_active() < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            tracing::debug!(session = %id, "evicting idle session from cache");
            map.pop(&id);
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Create a session.  `requested` is sanitized; an unusable id falls
    /// back to a generated one.  An existing id is a conflict.
    pub async fn create_session(&self, requested: Option<&str>) -> CoreResult<Arc<Session>> {
        self.evict_idle();
        let id = requested
            .and_then(sanitize_session_id)
            .unwrap_or_else(generate_session_id);

        if self.cached(&id).is_some() || self.stored_metadata(&id).await.is_some() {
            return Err(CoreError::conflict(format!("session '{id}' already exists")));
        }

        let session = Session::new(
            id.clone(),
            self.prompt_manager.clone(),
            self.config.max_context_tokens,
        );
        self.cache(session.clone());
        self.persist_metadata(&session).await?;

        // The first session created becomes current.
        if let Ok(mut current) = self.current.write()
            && current.is_none()
        {
            *current = Some(id);
        }
        Ok(session)
    }

    /// Load a session, restoring history from storage when needed.
    ///
    /// A non-existent session is created with the requested id; if the
    /// requested id is unusable, a server-generated id is used instead.
    pub async fn load_session(&self, requested: &str) -> CoreResult<Arc<Session>> {
        self.evict_idle();
        let Some(id) = sanitize_session_id(requested) else {
            return self.create_session(None).await;
        };

        if let Some(session) = self.cached(&id) {
            session.touch();
            return Ok(session);
        }

        let (history, source) = self.fetch_history(&id).await?;
        let known = !history.is_empty() || self.stored_metadata(&id).await.is_some();

        let session = Session::new(
            id.clone(),
            self.prompt_manager.clone(),
            self.config.max_context_tokens,
        );
        if !history.is_empty() {
            session.context.load_messages(history);
        }
        self.cache(session.clone());

        if known {
            tracing::debug!(session = %id, source = source.as_str(), "session restored");
        } else {
            // Fall back to creating the session under the requested id.
            self.persist_metadata(&session).await?;
        }
        Ok(session)
    }

    /// Delete a session's durable and cached state.
    ///
    /// The current session is protected; vector-record cleanup is the
    /// runtime's responsibility (it owns the vector handles).
    pub async fn delete_session(&self, requested: &str) -> CoreResult<bool> {
        let id = sanitize_session_id(requested)
            .ok_or_else(|| CoreError::validation(format!("invalid session id '{requested}'")))?;

        if self.current_session().as_deref() == Some(id.as_str()) {
            return Err(CoreError::validation(format!(
                "session '{id}' is the current session and cannot be deleted"
            )));
        }

        let cached = self
            .sessions
            .lock()
            .ok()
            .and_then(|mut map| map.pop(&id))
            .is_some();

        let removed_meta = self
            .storage
            .delete(&Self::session_key(&id))
            .await
            .map_err(|e| CoreError::backend(e.to_string()))?;
        let removed_messages = self
            .storage
            .delete(&Self::messages_key(&id))
            .await
            .map_err(|e| CoreError::backend(e.to_string()))?;

        let existed = cached || removed_meta || removed_messages;
        if !existed {
            return Err(CoreError::not_found(format!("session '{id}' does not exist")));
        }
        Ok(true)
    }

    // ── Current session ───────────────────────────────────────────────────────

    pub fn current_session(&self) -> Option<String> {
        self.current.read().ok().and_then(|g| g.clone())
    }

    pub async fn set_current(&self, id: &str) -> CoreResult<()> {
        let id = sanitize_session_id(id)
            .ok_or_else(|| CoreError::validation(format!("invalid session id '{id}'")))?;
        if self.cached(&id).is_none() && self.stored_metadata(&id).await.is_none() {
            return Err(CoreError::not_found(format!("session '{id}' does not exist")));
        }
        if let Ok(mut current) = self.current.write() {
            *current = Some(id);
        }
        Ok(())
    }

    // ── Metadata ──────────────────────────────────────────────────────────────

    async fn stored_metadata(&self, id: &str) -> Option<SessionMetadata> {
        let snapshot = self.storage.get(&Self::session_key(id)).await.ok()??;
        parse_metadata(&snapshot)
    }

    /// Metadata for one session: live state first, then the snapshot.
    pub async fn session_metadata(&self, id: &str) -> CoreResult<SessionMetadata> {
        let id = sanitize_session_id(id)
            .ok_or_else(|| CoreError::validation(format!("invalid session id '{id}'")))?;
        if let Some(session) = self.cached(&id) {
            return Ok(session.metadata());
        }
        self.stored_metadata(&id)
            .await
            .ok_or_else(|| CoreError::not_found(format!("session '{id}' does not exist")))
    }

    /// Fetch metadata for many sessions concurrently (bounded fan-out).
    ///
    /// The result's keys are a subset of `ids`; sessions that do not exist
    /// or fail to load are simply absent — the batch never fails partially.
    pub async fn get_batch_session_metadata(
        &self,
        ids: &[String],
    ) -> HashMap<String, SessionMetadata> {
        let ceiling = self.config.metadata_concurrency.max(1);
        futures::stream::iter(ids.iter().cloned())
            .map(|id| async move {
                let metadata = self.session_metadata(&id).await.ok()?;
                Some((id, metadata))
            })
            .buffer_unordered(ceiling)
            .filter_map(|entry| async move { entry })
            .collect()
            .await
    }

    /// All known sessions, phantom (0-message) sessions hidden.
    pub async fn list_sessions(&self) -> CoreResult<Vec<SessionMetadata>> {
        let mut by_id: HashMap<String, SessionMetadata> = HashMap::new();

        // Durable snapshots first.
        let keys = self
            .storage
            .list("session:")
            .await
            .map_err(|e| CoreError::backend(e.to_string()))?;
        for key in keys {
            let Some(id) = key.strip_prefix("session:") else {
                continue;
            };
            if let Some(metadata) = self.stored_metadata(id).await {
                by_id.insert(id.to_owned(), metadata);
            }
        }

        // Live sessions override their snapshots.
        if let Ok(map) = self.sessions.lock() {
            for (id, session) in map.iter() {
                by_id.insert(id.clone(), session.metadata());
            }
        }

        // Phantom protection.
        let mut sessions: Vec<SessionMetadata> = by_id
            .into_values()
            .filter(|m| m.message_count > 0)
            .collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }

    // ── History ───────────────────────────────────────────────────────────────

    /// Retrieve a session's history with request deduplication.
    ///
    /// Priority: live session → `messages:<id>` list → `session:<id>`
    /// snapshot → empty.  The source is reported back for observability.
    pub async fn fetch_history(&self, id: &str) -> CoreResult<HistoryPayload> {
        let key = format!("history_{id}");

        let future = self
            .inflight_history
            .entry(key.clone())
            .or_insert_with(|| {
                let storage = self.storage.clone();
                let sessions = self.sessions.clone();
                let id = id.to_owned();
                async move { Ok(read_history(storage, sessions, id).await) }
                    .boxed()
                    .shared()
            })
            .clone();

        let result = future.await;
        // Entry removed once resolved; late arrivals start a fresh read.
        self.inflight_history.remove(&key);
        result.map_err(CoreError::backend)
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    async fn persist_metadata(&self, session: &Session) -> CoreResult<()> {
        let metadata = session.metadata();
        let mut snapshot = serde_json::to_value(&metadata)
            .map_err(|e| CoreError::internal(format!("metadata serialize: {e}")))?;
        snapshot["conversationHistory"] = history_to_value(&session.context.raw_messages());
        self.storage
            .set(&Self::session_key(&session.id), snapshot)
            .await
            .map_err(|e| CoreError::backend(e.to_string()))
    }

    /// Persist a completed turn: append the new messages to the ordered list
    /// and refresh the snapshot.
    pub async fn persist_turn(
        &self,
        session: &Session,
        new_messages: &[ChatMessage],
    ) -> CoreResult<()> {
        session.touch();
        let needs_topic = session.topic.read().ok().and_then(|g| g.clone()).is_none();
        if needs_topic {
            let raw = session.context.raw_messages();
            if let Some(ChatMessage::User { text, .. }) =
                raw.iter().find(|m| matches!(m, ChatMessage::User { .. }))
            {
                session.set_topic(text.chars().take(50).collect::<String>());
            }
        }

        let key = Self::messages_key(&session.id);
        for message in new_messages {
            let value = serde_json::to_value(message)
                .map_err(|e| CoreError::internal(format!("message serialize: {e}")))?;
            self.storage
                .append(&key, value)
                .await
                .map_err(|e| CoreError::backend(e.to_string()))?;
        }
        self.persist_metadata(session).await
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> Value {
        json!({
            "liveSessions": self.sessions.lock().map(|m| m.len()).unwrap_or(0),
            "maxSessions": self.config.max_sessions,
            "inflightHistoryReads": self.inflight_history.len(),
            "currentSession": self.current_session(),
        })
    }
}

// ─── History resolution ───────────────────────────────────────────────────────

async fn read_history(
    storage: Arc<dyn KvBackend>,
    sessions: Arc<Mutex<LruCache<String, Arc<Session>>>>,
    id: String,
) -> HistoryPayload {
    // 1. Live session.
    let live = sessions.lock().ok().and_then(|mut map| map.get(&id).cloned());
    if let Some(session) = live {
        return (session.context.raw_messages(), HistorySource::Memory);
    }

    // 2. The ordered message list.
    let messages_key = format!("messages:{id}");
    match storage.list_len(&messages_key).await {
        Ok(len) if len > 0 => {
            match storage.get_range(&messages_key, 0, len).await {
                Ok(items) => {
                    let messages: Vec<ChatMessage> = items
                        .into_iter()
                        .filter_map(|v| serde_json::from_value(v).ok())
                        .collect();
                    if !messages.is_empty() {
                        return (messages, HistorySource::MessagesKey);
                    }
                }
                Err(e) => {
                    tracing::debug!(session = %id, error = %e, "messages list read failed, trying snapshot");
                }
            }
        }
        Ok(_) => {}
        Err(e) => {
            tracing::debug!(session = %id, error = %e, "messages list length failed, trying snapshot");
        }
    }

    // 3. The snapshot's embedded history.
    match storage.get(&format!("session:{id}")).await {
        Ok(Some(snapshot)) => {
            let messages: Vec<ChatMessage> = snapshot
                .get("conversationHistory")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| serde_json::from_value(v.clone()).ok())
                        .collect()
                })
                .unwrap_or_default();
            if !messages.is_empty() {
                return (messages, HistorySource::Snapshot);
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::debug!(session = %id, error = %e, "snapshot read failed");
        }
    }

    // 4. Nothing anywhere.
    (Vec::new(), HistorySource::Empty)
}

fn parse_metadata(snapshot: &Value) -> Option<SessionMetadata> {
    // The snapshot is metadata plus `conversationHistory`; deserializing the
    // metadata fields alone is sufficient.
    serde_json::from_value(Value::Object(
        snapshot
            .as_object()?
            .iter()
            .filter(|(k, _)| k.as_str() != "conversationHistory")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    ))
    .ok()
}

fn history_to_value(messages: &[ChatMessage]) -> Value {
    Value::Array(
        messages
            .iter()
            .filter_map(|m| serde_json::to_value(m).ok())
            .collect(),
    )
}

// ─── Tests ────────────────────────────────────────────────────────────────────
