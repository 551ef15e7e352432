//! Agent-callable tools backed by the memory and reflection engines.
//!
//! These expose the pipelines to the reasoning loop so the LLM can search
//! memory, store knowledge deliberately, and work with reasoning traces
//! during a session.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolResult};

use super::engine::MemoryEngine;
use super::reflection::{
    ReasoningStep, ReasoningTrace, ReflectionEngine, StepKind, extract_reasoning_steps,
};
use super::types::InteractionRecord;

// ─── MemorySearchTool ─────────────────────────────────────────────────────────

/// Agent tool: semantic search over stored memories.
///
/// Parameters (JSON object):
/// - `query` — natural-language search query (required)
/// - `limit` — maximum results (optional, default 5)
/// - `threshold` — minimum similarity score (optional)
pub struct MemorySearchTool {
    engine: Arc<MemoryEngine>,
}

impl MemorySearchTool {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search long-term memory for knowledge relevant to a query. \
         Returns the most similar stored facts sorted by relevance."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural-language search query."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results. Default: 5.",
                    "default": 5,
                    "minimum": 1,
                    "maximum": 50
                },
                "threshold": {
                    "type": "number",
                    "description": "Minimum similarity score in [0, 1]."
                }
            }
        })
    }

    fn category(&self) -> &str {
        "memory"
    }

    fn internal(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _session_id: Option<&str>) -> Result<ToolResult, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'query'")?;
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
        let threshold = args
            .get("threshold")
            .and_then(|v| v.as_f64())
            .map(|t| t as f32);

        let hits = self.engine.search_memories(query, limit, threshold).await?;
        if hits.is_empty() {
            return Ok(ToolResult::ok("No matching memories found."));
        }

        let lines: Vec<String> = hits
            .iter()
            .map(|h| {
                let text = h
                    .payload
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                format!("[{:.2}] {text}", h.score)
            })
            .collect();
        Ok(ToolResult::ok(lines.join("\n")))
    }
}

// ─── ExtractAndOperateMemoryTool ──────────────────────────────────────────────

/// Agent tool: run the full extraction → decision → persistence pipeline on
/// a piece of text immediately, instead of waiting for the background pass.
pub struct ExtractAndOperateMemoryTool {
    engine: Arc<MemoryEngine>,
}

impl ExtractAndOperateMemoryTool {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for ExtractAndOperateMemoryTool {
    fn name(&self) -> &str {
        "extract_and_operate_memory"
    }

    fn description(&self) -> &str {
        "Extract knowledge from text and store it in long-term memory right \
         away, resolving duplicates against existing memories."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["text"],
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The knowledge-bearing text to process."
                },
                "context": {
                    "type": "string",
                    "description": "Optional surrounding context."
                }
            }
        })
    }

    fn category(&self) -> &str {
        "memory"
    }

    fn internal(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, session_id: Option<&str>) -> Result<ToolResult, String> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'text'")?;
        let context = args
            .get("context")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let mut record = InteractionRecord::new(text, context);
        if let Some(session) = session_id {
            record = record.with_session(session);
        }

        let outcome = self.engine.process_interaction(record).await;
        if outcome.skipped {
            return Ok(ToolResult::ok("Memory is unavailable (chat-only mode)."));
        }
        if outcome.actions.is_empty() {
            return Ok(ToolResult::ok("Nothing significant to store."));
        }

        let lines: Vec<String> = outcome
            .actions
            .iter()
            .map(|a| format!("{}: {}", a.event.as_str(), a.reasoning))
            .collect();
        Ok(ToolResult::ok(lines.join("\n"))
            .with_metadata(serde_json::to_value(&outcome.actions).unwrap_or(Value::Null)))
    }
}

// ─── Reasoning tools ──────────────────────────────────────────────────────────

/// Agent tool: extract reasoning steps from text.
pub struct ReasoningExtractTool;

#[async_trait]
impl Tool for ReasoningExtractTool {
    fn name(&self) -> &str {
        "reasoning_extract"
    }

    fn description(&self) -> &str {
        "Extract explicit and implicit reasoning steps from a piece of text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["text"],
            "properties": {
                "text": { "type": "string", "description": "Text to analyze." }
            }
        })
    }

    fn category(&self) -> &str {
        "reasoning"
    }

    fn internal(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _session_id: Option<&str>) -> Result<ToolResult, String> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'text'")?;
        let steps = extract_reasoning_steps(text, "");
        if steps.is_empty() {
            return Ok(ToolResult::ok("No reasoning steps found."));
        }
        let rendered: Vec<String> = steps
            .iter()
            .map(|s| format!("{}. [{:?}] {}", s.index + 1, s.kind, s.text))
            .collect();
        Ok(ToolResult::ok(rendered.join("\n"))
            .with_metadata(serde_json::to_value(&steps).unwrap_or(Value::Null)))
    }
}

/// Agent tool: grade a list of reasoning steps.
pub struct ReasoningEvaluateTool {
    engine: Arc<ReflectionEngine>,
}

impl ReasoningEvaluateTool {
    pub fn new(engine: Arc<ReflectionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for ReasoningEvaluateTool {
    fn name(&self) -> &str {
        "reasoning_evaluate"
    }

    fn description(&self) -> &str {
        "Evaluate reasoning steps for efficiency and loops, returning a \
         quality score with issues and suggestions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["steps"],
            "properties": {
                "steps": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Ordered reasoning steps."
                }
            }
        })
    }

    fn category(&self) -> &str {
        "reasoning"
    }

    fn internal(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, session_id: Option<&str>) -> Result<ToolResult, String> {
        let trace = trace_from_args(&args, session_id)?;
        let evaluation = self.engine.evaluate(&trace).await;
        let summary = format!(
            "quality {:.2}, {} issue(s), shouldStore={}",
            evaluation.quality_score,
            evaluation.issues.len(),
            evaluation.should_store
        );
        Ok(ToolResult::ok(summary)
            .with_metadata(serde_json::to_value(&evaluation).unwrap_or(Value::Null)))
    }
}

/// Agent tool: store a reasoning trace in reflection memory.
pub struct ReasoningStoreTool {
    engine: Arc<ReflectionEngine>,
}

impl ReasoningStoreTool {
    pub fn new(engine: Arc<ReflectionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for ReasoningStoreTool {
    fn name(&self) -> &str {
        "reasoning_store"
    }

    fn description(&self) -> &str {
        "Evaluate reasoning steps and persist the trace to reflection \
         memory when it meets the quality bar."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["steps"],
            "properties": {
                "steps": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Ordered reasoning steps."
                }
            }
        })
    }

    fn category(&self) -> &str {
        "reasoning"
    }

    fn internal(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, session_id: Option<&str>) -> Result<ToolResult, String> {
        let trace = trace_from_args(&args, session_id)?;
        let evaluation = self.engine.evaluate(&trace).await;
        if !evaluation.should_store {
            return Ok(ToolResult::ok(format!(
                "Trace not stored (quality {:.2} below the bar).",
                evaluation.quality_score
            )));
        }
        self.engine.store_trace(&trace, &evaluation).await?;
        Ok(ToolResult::ok(format!(
            "Stored reasoning trace {} (quality {:.2}).",
            trace.id, evaluation.quality_score
        )))
    }
}

fn trace_from_args(args: &Value, session_id: Option<&str>) -> Result<ReasoningTrace, String> {
    let steps: Vec<ReasoningStep> = args
        .get("steps")
        .and_then(|v| v.as_array())
        .ok_or("missing required parameter 'steps'")?
        .iter()
        .filter_map(|v| v.as_str())
        .enumerate()
        .map(|(index, text)| ReasoningStep {
            index,
            kind: StepKind::Explicit,
            text: text.to_owned(),
        })
        .collect();
    if steps.is_empty() {
        return Err("'steps' must contain at least one string".to_owned());
    }
    Ok(ReasoningTrace::new(steps, session_id.map(str::to_owned)))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
