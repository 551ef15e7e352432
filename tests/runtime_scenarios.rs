//! End-to-end runtime scenarios: session lifecycle over the gateway, the
//! conversation loop with tools, and the background memory pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use engram::agent::ConversationSession;
use engram::ai::provider::LlmProvider;
use engram::ai::types::{CompletionRequest, CompletionResponse, ToolCall};
use engram::config::{
    AppConfig, EmbeddingsConfig, MemoryConfig, PromptsConfig, ReflectionConfig, SessionConfig,
};
use engram::context::ChatMessage;
use engram::embeddings::{EmbeddingError, EmbeddingManager, EmbeddingProvider};
use engram::memory::{MemoryEngine, ReflectionEngine, register_memory_tools};
use engram::prompts::PromptManager;
use engram::runtime::Runtime;
use engram::session::SessionManager;
use engram::storage::{KvBackend, MemoryKvBackend, StorageError};
use engram::tools::{ConflictPolicy, Tool, ToolResult, UnifiedToolManager};
use engram::vector::{MemoryVectorBackend, VectorBackend};

// ─── Mock LLM provider ────────────────────────────────────────────────────────

struct MockLlm {
    responses: std::sync::Mutex<Vec<Result<CompletionResponse, String>>>,
    index: AtomicUsize,
}

impl MockLlm {
    fn new(responses: Vec<Result<CompletionResponse, String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: std::sync::Mutex::new(responses),
            index: AtomicUsize::new(0),
        })
    }

    fn text(content: &str) -> Result<CompletionResponse, String> {
        Ok(CompletionResponse::text(content, "mock"))
    }

    fn with_call(name: &str, args: &str) -> Result<CompletionResponse, String> {
        Ok(CompletionResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: format!("call_{name}"),
                name: name.to_owned(),
                arguments: args.to_owned(),
            }],
            model: "mock".to_owned(),
            usage: None,
            finish_reason: Some("tool_calls".to_owned()),
        })
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn complete(
        &self,
        _request: CompletionRequest,
    ) -> engram::ai::provider::Result<CompletionResponse> {
        let i = self.index.fetch_add(1, Ordering::SeqCst);
        let responses = self.responses.lock().map_err(|e| e.to_string())?;
        responses
            .get(i)
            .cloned()
            .unwrap_or_else(|| Ok(CompletionResponse::text("no more responses", "mock")))
    }

    fn context_limit(&self) -> usize {
        128_000
    }
    fn supports_tools(&self) -> bool {
        true
    }
    fn provider_name(&self) -> &str {
        "mock"
    }
}

// ─── Test harness ─────────────────────────────────────────────────────────────

struct Harness {
    storage: Arc<MemoryKvBackend>,
    sessions: Arc<SessionManager>,
    tools: Arc<UnifiedToolManager>,
    memory: Arc<MemoryEngine>,
    reflection: Arc<ReflectionEngine>,
    knowledge: Arc<MemoryVectorBackend>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_embeddings(Arc::new(EmbeddingManager::from_config(
            &EmbeddingsConfig::default(),
        )))
        .await
    }

    async fn with_embeddings(embeddings: Arc<EmbeddingManager>) -> Self {
        let storage = Arc::new(MemoryKvBackend::new());
        storage.connect().await.unwrap();

        let prompts = Arc::new(PromptManager::new(PromptsConfig::default()));
        let sessions = Arc::new(SessionManager::new(
            storage.clone(),
            prompts,
            SessionConfig::default(),
        ));

        let knowledge = Arc::new(MemoryVectorBackend::new("knowledge_memory", 384));
        knowledge.connect().await.unwrap();
        let reflection_store = Arc::new(MemoryVectorBackend::new("reflection_memory", 384));
        reflection_store.connect().await.unwrap();

        let memory = MemoryEngine::new(
            embeddings.clone(),
            knowledge.clone(),
            None,
            "gpt-4o-mini",
            MemoryConfig {
                use_llm_decisions: false,
                ..MemoryConfig::default()
            },
        );
        let reflection = ReflectionEngine::new(
            embeddings,
            reflection_store,
            None,
            ReflectionConfig::default(),
        );

        let tools = Arc::new(UnifiedToolManager::new(
            ConflictPolicy::Prefix,
            Duration::from_secs(5),
        ));
        register_memory_tools(&tools, memory.clone(), reflection.clone()).unwrap();

        Self {
            storage,
            sessions,
            tools,
            memory,
            reflection,
            knowledge,
        }
    }

    async fn conversation(
        &self,
        session_id: &str,
        provider: Arc<MockLlm>,
    ) -> ConversationSession {
        let session = self.sessions.load_session(session_id).await.unwrap();
        ConversationSession::new(
            session,
            provider,
            self.tools.clone(),
            self.sessions.clone(),
            self.memory.clone(),
            self.reflection.clone(),
            "mock-model",
            engram::config::AgentLoopConfig {
                max_retries: 0,
                ..Default::default()
            },
        )
    }

    /// Wait (bounded) for background memory work to settle.
    async fn settle(&self) {
        for _ in 0..200 {
            if self.memory.pending_tasks() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ─── Gateway helpers ──────────────────────────────────────────────────────────

async fn offline_runtime() -> Arc<Runtime> {
    let config = AppConfig {
        memory: MemoryConfig {
            use_llm_decisions: false,
            ..MemoryConfig::default()
        },
        ..AppConfig::default()
    };
    Runtime::initialize(config).await.unwrap()
}

async fn call(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => {
            builder = builder.header("content-type", "application/json");
            builder.body(Body::from(body.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

// ─── S1: create / load / delete over the gateway ──────────────────────────────

#[tokio::test]
async fn s1_create_load_delete_lifecycle() {
    let runtime = offline_runtime().await;
    let router = engram::gateway::router(runtime.clone());

    // A current session exists so "s1-demo" is deletable later.
    let (status, _) = call(&router, "POST", "/sessions", Some(json!({"sessionId": "main-chat"}))).await;
    assert_eq!(status, StatusCode::CREATED);

    // Create s1.
    let (status, body) = call(&router, "POST", "/sessions", Some(json!({"sessionId": "s1-demo"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["session"]["id"], "s1-demo");
    assert_eq!(body["created"], true);

    // Duplicate create → 400.
    let (status, body) = call(&router, "POST", "/sessions", Some(json!({"sessionId": "s1-demo"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    // Addressable by id with messageCount 0 …
    let (status, body) = call(&router, "GET", "/sessions/s1-demo", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["messageCount"], 0);
    assert_eq!(body["isCurrent"], false);

    // … but absent from the listing (phantom protection).
    let (status, body) = call(&router, "GET", "/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body["sessions"].as_array().unwrap();
    assert!(
        !listed.iter().any(|s| s["sessionId"] == "s1-demo"),
        "phantom session must be hidden from listings"
    );

    // Load returns an empty conversation history.
    let (status, body) = call(&router, "POST", "/sessions/s1-demo/load", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loaded"], true);
    assert_eq!(body["conversationHistory"].as_array().unwrap().len(), 0);

    // Delete succeeds.
    let (status, body) = call(&router, "DELETE", "/sessions/s1-demo", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);
    assert_eq!(body["successful"], true);

    // Subsequent GET is a 404 with the session-flavored code.
    let (status, body) = call(&router, "GET", "/sessions/s1-demo", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn current_session_cannot_be_deleted_over_gateway() {
    let runtime = offline_runtime().await;
    let router = engram::gateway::router(runtime.clone());

    call(&router, "POST", "/sessions", Some(json!({"sessionId": "the-current"}))).await;
    let (status, body) = call(&router, "GET", "/sessions/current", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], "the-current");
    assert_eq!(body["isCurrent"], true);

    let (status, body) = call(&router, "DELETE", "/sessions/the-current", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn stats_endpoint_reports_all_sections() {
    let runtime = offline_runtime().await;
    let router = engram::gateway::router(runtime);

    let (status, body) = call(&router, "GET", "/sessions/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("sessionStats").is_some());
    assert!(body.get("runtimeStats").is_some());
    assert!(body.get("optimizationStatus").is_some());
    assert_eq!(body["optimizationStatus"]["embeddingsDisabled"], false);
}

#[tokio::test]
async fn gateway_auth_rejects_missing_token() {
    let mut config = AppConfig::default();
    config.memory.use_llm_decisions = false;
    config.gateway.auth_token = Some("sekrit".to_owned());
    let runtime = Runtime::initialize(config).await.unwrap();
    let router = engram::gateway::router(runtime);

    // Health stays public.
    let (status, _) = call(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&router, "GET", "/sessions", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    // With the token the request goes through.
    let request = Request::builder()
        .method("GET")
        .uri("/sessions")
        .header("authorization", "Bearer sekrit")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ─── S2 / S3: conversation memory ADD, duplicate → NONE ───────────────────────

const NPM_MESSAGE: &str = "Use npm install next and run npm run build";

#[tokio::test]
async fn s2_conversation_turn_adds_memory() {
    let harness = Harness::new().await;
    let conversation = harness
        .conversation("memory-add", MockLlm::new(vec![MockLlm::text("Will do!")]))
        .await;

    let response = conversation.run(NPM_MESSAGE, None, None).await.unwrap();
    assert_eq!(response, "Will do!");

    // Background work lands within the 2s budget.
    harness.settle().await;
    assert!(harness.knowledge.count().await.unwrap() >= 1);

    let hits = harness
        .memory
        .search_memories(NPM_MESSAGE, 1, None)
        .await
        .unwrap();
    let payload = &hits[0].payload;
    assert_eq!(payload["event"], "ADD");
    assert!(payload["text"].as_str().unwrap().contains(NPM_MESSAGE));
    let tags: Vec<&str> = payload["tags"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t.as_str())
        .collect();
    assert!(tags.contains(&"npm"));
    assert!(tags.contains(&"code-block"));
}

#[tokio::test]
async fn s3_repeated_turn_collapses_to_none() {
    let harness = Harness::new().await;

    let first = harness
        .conversation("memory-dup", MockLlm::new(vec![MockLlm::text("Will do!")]))
        .await;
    first.run(NPM_MESSAGE, None, None).await.unwrap();
    harness.settle().await;
    let count_after_first = harness.knowledge.count().await.unwrap();
    let nones_before = harness.memory.stats().none_operations;

    let second = harness
        .conversation("memory-dup", MockLlm::new(vec![MockLlm::text("Will do!")]))
        .await;
    second.run(NPM_MESSAGE, None, None).await.unwrap();
    harness.settle().await;

    // No new record; the duplicate resolved to NONE.
    assert_eq!(harness.knowledge.count().await.unwrap(), count_after_first);
    assert!(harness.memory.stats().none_operations > nones_before);

    // The stored record still carries its original ADD event.
    let hits = harness
        .memory
        .search_memories(NPM_MESSAGE, 1, None)
        .await
        .unwrap();
    assert_eq!(hits[0].payload["event"], "ADD");
}

// ─── S4: tool failure does not break the loop ─────────────────────────────────

struct FlakyTool;

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }
    fn description(&self) -> &str {
        "always throws"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _: Value, _: Option<&str>) -> Result<ToolResult, String> {
        Err("flaky tool exploded".to_owned())
    }
}

#[tokio::test]
async fn s4_tool_failure_does_not_break_the_loop() {
    let harness = Harness::new().await;
    harness.tools.register_internal(Arc::new(FlakyTool)).unwrap();

    let provider = MockLlm::new(vec![
        MockLlm::with_call("flaky", "{}"),
        MockLlm::text("The tool failed, but here is the answer anyway."),
    ]);
    let conversation = harness.conversation("flaky-session", provider).await;

    let response = conversation
        .run("please call the flaky tool", None, None)
        .await
        .unwrap();
    assert!(!response.is_empty());
    assert_eq!(response, "The tool failed, but here is the answer anyway.");

    // The history shows the call, the error payload, and the recovery.
    let (history, _) = harness.sessions.fetch_history("flaky-session").await.unwrap();
    let has_call = history.iter().any(|m| matches!(
        m,
        ChatMessage::Assistant { tool_calls, .. } if tool_calls.iter().any(|c| c.name == "flaky")
    ));
    let has_error_result = history.iter().any(|m| matches!(
        m,
        ChatMessage::Tool { content, .. } if content.contains("flaky tool exploded")
    ));
    assert!(has_call, "assistant message must record the tool call");
    assert!(has_error_result, "tool error must appear as a result payload");
}

// ─── S5: embedding disable cascades ───────────────────────────────────────────

struct BrokenEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for BrokenEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EmbeddingError::Persistent("quota permanently exceeded".to_owned()))
    }
    fn dimension(&self) -> usize {
        384
    }
    fn provider_name(&self) -> &str {
        "broken"
    }
}

#[tokio::test]
async fn s5_embedding_disable_cascades_to_chat_only() {
    let embedder = Arc::new(BrokenEmbedder {
        calls: AtomicUsize::new(0),
    });
    let embeddings = Arc::new(EmbeddingManager::new(embedder.clone(), 0));
    let harness = Harness::with_embeddings(embeddings.clone()).await;

    let conversation = harness
        .conversation("chat-only", MockLlm::new(vec![MockLlm::text("first reply")]))
        .await;
    let response = conversation.run(NPM_MESSAGE, None, None).await.unwrap();
    assert_eq!(response, "first reply");
    harness.settle().await;

    // The first embed attempt tripped the sticky latch.
    assert!(embeddings.is_disabled());
    assert_eq!(harness.knowledge.count().await.unwrap(), 0);
    assert!(harness.memory.stats().chat_only_runs >= 1);

    // The next turn still produces a response and never re-embeds.
    let calls_after_first = embedder.calls.load(Ordering::SeqCst);
    let conversation = harness
        .conversation("chat-only", MockLlm::new(vec![MockLlm::text("second reply")]))
        .await;
    let response = conversation.run("another message", None, None).await.unwrap();
    assert_eq!(response, "second reply");
    harness.settle().await;

    assert_eq!(
        embedder.calls.load(Ordering::SeqCst),
        calls_after_first,
        "chat-only mode must not invoke the embedding provider again"
    );
}

// ─── S6: prefix conflict resolution ───────────────────────────────────────────

struct NamedSearchTool;

#[async_trait]
impl Tool for NamedSearchTool {
    fn name(&self) -> &str {
        "search"
    }
    fn description(&self) -> &str {
        "a server search tool"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _: Value, _: Option<&str>) -> Result<ToolResult, String> {
        Ok(ToolResult::ok("results"))
    }
}

#[tokio::test]
async fn s6_prefix_conflict_resolution() {
    let tools = UnifiedToolManager::new(ConflictPolicy::Prefix, Duration::from_secs(5));
    tools
        .register_server_tools("serverA", vec![Arc::new(NamedSearchTool) as Arc<dyn Tool>])
        .unwrap();
    tools
        .register_server_tools("serverB", vec![Arc::new(NamedSearchTool) as Arc<dyn Tool>])
        .unwrap();

    let names: Vec<String> = tools.all_tools().into_iter().map(|t| t.name).collect();
    assert!(names.contains(&"serverA.search".to_owned()));
    assert!(names.contains(&"serverB.search".to_owned()));
    assert_eq!(tools.stats().conflicts, 1);

    let err = tools.execute("search", json!({}), None).await.unwrap_err();
    assert!(err.message.contains("not found in default mode"));

    assert!(tools.execute("serverA.search", json!({}), None).await.is_ok());
    assert!(tools.execute("serverB.search", json!({}), None).await.is_ok());
}

// ─── Property: message accounting ─────────────────────────────────────────────

#[tokio::test]
async fn history_counts_user_assistant_pairs_in_order() {
    let harness = Harness::new().await;

    for i in 0..3 {
        let conversation = harness
            .conversation(
                "counting",
                MockLlm::new(vec![MockLlm::text(&format!("reply {i}"))]),
            )
            .await;
        conversation
            .run(&format!("message {i}"), None, None)
            .await
            .unwrap();
    }

    let (history, _) = harness.sessions.fetch_history("counting").await.unwrap();
    assert_eq!(history.len(), 6, "3 user+assistant pairs");

    // Append order is preserved.
    let roles: Vec<&str> = history
        .iter()
        .map(|m| match m {
            ChatMessage::User { .. } => "user",
            ChatMessage::Assistant { .. } => "assistant",
            ChatMessage::System { .. } => "system",
            ChatMessage::Tool { .. } => "tool",
        })
        .collect();
    assert_eq!(
        roles,
        vec!["user", "assistant", "user", "assistant", "user", "assistant"]
    );
    let texts: Vec<String> = history
        .iter()
        .filter_map(|m| match m {
            ChatMessage::User { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["message 0", "message 1", "message 2"]);
}

// ─── Property: batched metadata ───────────────────────────────────────────────

#[tokio::test]
async fn batch_metadata_keys_are_subset_of_request() {
    let harness = Harness::new().await;
    harness.sessions.create_session(Some("alpha")).await.unwrap();
    harness.sessions.create_session(Some("beta")).await.unwrap();

    let ids = vec![
        "alpha".to_owned(),
        "beta".to_owned(),
        "gamma-does-not-exist".to_owned(),
    ];
    let batch = harness.sessions.get_batch_session_metadata(&ids).await;
    assert_eq!(batch.len(), 2);
    for key in batch.keys() {
        assert!(ids.contains(key), "result keys must be a subset of the input");
    }
}

// ─── Property: request deduplication ──────────────────────────────────────────

struct CountingKv {
    inner: MemoryKvBackend,
    reads: AtomicUsize,
}

#[async_trait]
impl KvBackend for CountingKv {
    async fn connect(&self) -> Result<(), StorageError> {
        self.inner.connect().await
    }
    async fn disconnect(&self) -> Result<(), StorageError> {
        self.inner.disconnect().await
    }
    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
    fn kind(&self) -> &'static str {
        "counting"
    }
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.inner.set(key, value).await
    }
    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.delete(key).await
    }
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list(prefix).await
    }
    async fn append(&self, key: &str, item: Value) -> Result<(), StorageError> {
        self.inner.append(key, item).await
    }
    async fn get_range(
        &self,
        key: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<Value>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_range(key, start, count).await
    }
    async fn list_len(&self, key: &str) -> Result<usize, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_len(key).await
    }
}

#[tokio::test]
async fn concurrent_history_reads_share_one_backend_pass() {
    let counting = Arc::new(CountingKv {
        inner: MemoryKvBackend::new(),
        reads: AtomicUsize::new(0),
    });
    counting.connect().await.unwrap();

    // Seed a stored history with no live session.
    let message = serde_json::to_value(ChatMessage::User {
        text: "stored turn".to_owned(),
        image: None,
    })
    .unwrap();
    counting.append("messages:dedup-me", message).await.unwrap();

    let sessions = Arc::new(SessionManager::new(
        counting.clone(),
        Arc::new(PromptManager::new(PromptsConfig::default())),
        SessionConfig::default(),
    ));

    // One sequential pass establishes the per-read cost.
    let (history, _) = sessions.fetch_history("dedup-me").await.unwrap();
    assert_eq!(history.len(), 1);
    let cost_of_one = counting.reads.swap(0, Ordering::SeqCst);
    assert!(cost_of_one > 0);

    // Eight concurrent fetches cost exactly one pass.
    let concurrent = futures::future::join_all(
        (0..8).map(|_| sessions.fetch_history("dedup-me")),
    )
    .await;
    for result in concurrent {
        assert_eq!(result.unwrap().0.len(), 1);
    }
    assert_eq!(
        counting.reads.load(Ordering::SeqCst),
        cost_of_one,
        "deduplicated reads must hit the backend once"
    );
}

// ─── Property: reflection stores reasoning traces end-to-end ──────────────────

#[tokio::test]
async fn reasoned_turn_stores_reflection_trace() {
    let harness = Harness::new().await;
    let provider = MockLlm::new(vec![MockLlm::text(
        "1. Check the lockfile\n2. Reinstall dependencies\n3. The build passes because the cache is fresh",
    )]);
    let conversation = harness.conversation("reasoned", provider).await;

    conversation
        .run(
            "Let's think step by step: first check the lockfile, then reinstall, \
             therefore the build should pass.",
            None,
            None,
        )
        .await
        .unwrap();
    harness.settle().await;

    assert_eq!(harness.reflection.stored_count(), 1);
    assert_eq!(harness.reflection.vectors().count().await.unwrap(), 1);
}

// ─── Validation edges ─────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_input_is_a_validation_error() {
    let harness = Harness::new().await;
    let conversation = harness
        .conversation("validate", MockLlm::new(vec![]))
        .await;
    let err = conversation.run("   ", None, None).await.unwrap_err();
    assert_eq!(err.kind, engram::error::ErrorKind::Validation);
}

#[tokio::test]
async fn storage_survives_session_turn_and_restores() {
    let harness = Harness::new().await;
    let conversation = harness
        .conversation("persist-me", MockLlm::new(vec![MockLlm::text("saved")]))
        .await;
    conversation.run("remember this turn", None, None).await.unwrap();

    // The durable layout exists.
    assert!(harness.storage.get("session:persist-me").await.unwrap().is_some());
    assert_eq!(harness.storage.list_len("messages:persist-me").await.unwrap(), 2);
}
