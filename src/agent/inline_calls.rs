//! Recovery parsing for models that write tool calls into message content.
//!
//! Providers with native tool support return calls in a dedicated response
//! field and never reach this path.  The rest inline their calls in one of
//! two shapes the loop still has to honor: a whole-body JSON envelope with
//! a `tool_calls` array, or `<tool_call>…</tool_call>` spans embedded in
//! prose.  Both decode into [`ToolCall`]s with the arguments kept as raw
//! JSON text, so the loop's parse-failure handling stays in one place.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::ai::types::ToolCall;

// ─── Wire shapes ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    tool_calls: Vec<EnvelopeCall>,
}

#[derive(Deserialize)]
struct EnvelopeCall {
    #[serde(default)]
    id: Option<String>,
    function: EnvelopeFunction,
}

#[derive(Deserialize)]
struct EnvelopeFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
struct TaggedCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

// ─── Extraction ───────────────────────────────────────────────────────────────

/// Extract inlined tool calls from response content.
///
/// An envelope covering the whole body wins; otherwise every well-formed
/// tagged span contributes one call.  Content with neither shape yields an
/// empty vector, which the loop reads as a final text answer.
pub fn inline_tool_calls(content: &str) -> Vec<ToolCall> {
    if let Ok(envelope) = serde_json::from_str::<Envelope>(content.trim()) {
        let calls: Vec<ToolCall> = envelope
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id.unwrap_or_else(fresh_id),
                name: call.function.name,
                arguments: raw_arguments(call.function.arguments),
            })
            .collect();
        if !calls.is_empty() {
            return calls;
        }
    }
    tagged_calls(content)
}

fn tagged_calls(content: &str) -> Vec<ToolCall> {
    content
        .split("<tool_call>")
        .skip(1)
        .filter_map(|chunk| chunk.split_once("</tool_call>"))
        .filter_map(|(body, _)| serde_json::from_str::<TaggedCall>(body.trim()).ok())
        .map(|call| ToolCall {
            id: fresh_id(),
            name: call.name,
            arguments: raw_arguments(call.arguments),
        })
        .collect()
}

/// Arguments arrive as an object, as a JSON-encoded string, or not at all;
/// normalize to raw JSON text and let the loop decide whether it parses.
fn raw_arguments(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => "{}".to_owned(),
        other => other.to_string(),
    }
}

fn fresh_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
