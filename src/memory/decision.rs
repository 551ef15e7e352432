//! ADD/UPDATE/DELETE/NONE decisions.
//!
//! Two deciders exist: an LLM judge (preferred when a model is available)
//! and deterministic similarity rules.  The judge's output must be strict
//! JSON; anything unparseable or invalid falls back to the rules, so the
//! pipeline always resolves to a decision.

use serde_json::Value;
use uuid::Uuid;

use crate::ai::provider::LlmProvider;
use crate::ai::types::{CompletionRequest, Message};
use crate::vector::VectorMatch;

use super::types::{KnowledgeFact, MemoryAction, MemoryEvent};

// ─── Similarity rules ─────────────────────────────────────────────────────────

/// Cosine similarity above which a fact is considered a duplicate.
const DUPLICATE_THRESHOLD: f32 = 0.9;

/// The deterministic fallback decider.
///
/// | condition                          | decision | confidence |
/// |------------------------------------|----------|------------|
/// | no similar records                 | ADD      | 0.8        |
/// | similarity > 0.9                   | NONE     | 0.9        |
/// | threshold < similarity ≤ 0.9       | UPDATE   | 0.75       |
/// | similarity ≤ threshold             | ADD      | 0.7        |
pub fn decide_by_similarity(
    fact: &KnowledgeFact,
    similar: &[VectorMatch],
    similarity_threshold: f32,
) -> MemoryAction {
    let base = MemoryAction {
        id: Uuid::new_v4().to_string(),
        text: fact.text.clone(),
        event: MemoryEvent::Add,
        tags: fact.tags.clone(),
        old_memory: None,
        code_pattern: fact.code_pattern.clone(),
        confidence: 0.8,
        reasoning: "no similar memories found".to_owned(),
    };

    let Some(top) = similar.first() else {
        return base;
    };

    if top.score > DUPLICATE_THRESHOLD {
        return MemoryAction {
            id: top.id.clone(),
            event: MemoryEvent::None,
            confidence: 0.9,
            reasoning: format!("duplicate of existing memory (similarity {:.2})", top.score),
            ..base
        };
    }

    if top.score > similarity_threshold {
        let old_memory = top
            .payload
            .get("text")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        return MemoryAction {
            id: top.id.clone(),
            event: MemoryEvent::Update,
            old_memory,
            confidence: 0.75,
            reasoning: format!(
                "similar memory found (similarity {:.2}), updating in place",
                top.score
            ),
            ..base
        };
    }

    MemoryAction {
        confidence: 0.7,
        reasoning: format!(
            "closest memory below threshold (similarity {:.2})",
            top.score
        ),
        ..base
    }
}

// ─── Confidence gating ────────────────────────────────────────────────────────

/// Coerce low-confidence decisions to NONE, recording why.
pub fn gate_confidence(mut action: MemoryAction, confidence_threshold: f32) -> MemoryAction {
    if action.event != MemoryEvent::None && action.confidence < confidence_threshold {
        action.reasoning = format!(
            "{}; confidence {:.2} below threshold {:.2}, coerced to NONE",
            action.reasoning, action.confidence, confidence_threshold
        );
        action.event = MemoryEvent::None;
    }
    action
}

// ─── LLM judge ────────────────────────────────────────────────────────────────

/// Extract the first balanced `{…}` object from free-form model output.
pub fn extract_first_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in s[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        s.chars().take(max).collect()
    }
}

fn judge_prompt(fact: &KnowledgeFact, similar: &[VectorMatch], context_summary: &str) -> String {
    let mut similar_lines = String::new();
    for m in similar.iter().take(3) {
        let text = m
            .payload
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        similar_lines.push_str(&format!(
            "- id: {} (similarity {:.2}): {}\n",
            m.id,
            m.score,
            truncate_chars(text, 100)
        ));
    }
    if similar_lines.is_empty() {
        similar_lines.push_str("(none)\n");
    }

    format!(
        "You maintain a long-term memory store. Decide what to do with a new fact.\n\
         \n\
         New fact:\n{fact_text}\n\
         \n\
         Most similar existing memories:\n{similar_lines}\
         \n\
         Conversation context:\n{context}\n\
         \n\
         Reply with strict JSON only, no prose:\n\
         {{\"operation\": \"ADD|UPDATE|DELETE|NONE\", \"confidence\": 0.0, \
         \"reasoning\": \"...\", \"targetMemoryId\": \"optional id for UPDATE/DELETE\"}}",
        fact_text = fact.text,
        context = truncate_chars(context_summary, 300),
    )
}

/// Ask the model to judge the fact.  Returns `None` on any parse or
/// validation failure so the caller can fall back to the similarity rules.
pub async fn decide_with_llm(
    llm: &dyn LlmProvider,
    model: &str,
    fact: &KnowledgeFact,
    similar: &[VectorMatch],
    context_summary: &str,
) -> Option<MemoryAction> {
    let prompt = judge_prompt(fact, similar, context_summary);
    let request = CompletionRequest::new(model, vec![Message::user(prompt)]).with_temperature(0.0);
    let response = match llm.complete(request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(error = %e, "memory judge call failed, using similarity rules");
            return None;
        }
    };

    parse_judge_output(&response.content, fact, similar)
}

fn parse_judge_output(
    output: &str,
    fact: &KnowledgeFact,
    similar: &[VectorMatch],
) -> Option<MemoryAction> {
    let raw = extract_first_json_object(output)?;
    let parsed: Value = serde_json::from_str(raw).ok()?;

    let event = MemoryEvent::parse(parsed.get("operation")?.as_str()?)?;
    let confidence = parsed
        .get("confidence")
        .and_then(|v| v.as_f64())
        .map(|c| c as f32)
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);
    let reasoning = parsed
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or("llm decision")
        .to_owned();
    let target = parsed
        .get("targetMemoryId")
        .and_then(|v| v.as_str())
        .map(str::to_owned);

    let (id, old_memory) = match event {
        MemoryEvent::Update | MemoryEvent::Delete => {
            // The target must be one of the candidates we actually showed.
            let target = target?;
            let existing = similar.iter().find(|m| m.id == target)?;
            let old = existing
                .payload
                .get("text")
                .and_then(|v| v.as_str())
                .map(str::to_owned);
            (target, old)
        }
        MemoryEvent::Add => (Uuid::new_v4().to_string(), None),
        MemoryEvent::None => (
            similar
                .first()
                .map(|m| m.id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            None,
        ),
    };

    Some(MemoryAction {
        id,
        text: fact.text.clone(),
        event,
        tags: fact.tags.clone(),
        old_memory,
        code_pattern: fact.code_pattern.clone(),
        confidence,
        reasoning,
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────
