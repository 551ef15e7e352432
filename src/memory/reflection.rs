//! The reflection sub-pipeline: mine reasoning traces from turns that
//! contain visible reasoning, grade them, and store the good ones.
//!
//! Runs after the knowledge pipeline, only when the pattern-based detector
//! fires on the user input.  Evaluation deliberately uses a cheaper,
//! non-thinking model configuration (`reflection.eval_model`); when no
//! model is available a heuristic grader checks for wasted steps and
//! loops.  Every failure in this module is swallowed — reflection never
//! affects the request path.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::ai::provider::LlmProvider;
use crate::ai::types::{CompletionRequest, Message};
use crate::config::ReflectionConfig;
use crate::embeddings::EmbeddingManager;
use crate::vector::VectorBackend;

use super::decision::extract_first_json_object;
use super::types::InteractionRecord;

// ─── Trace model ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Enumerated by the author: bullets, numbering, first/then/therefore.
    Explicit,
    /// Inferred from causal connectives inside prose.
    Implicit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningStep {
    pub index: usize,
    pub kind: StepKind,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningTrace {
    pub id: String,
    pub steps: Vec<ReasoningStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ReasoningTrace {
    pub fn new(steps: Vec<ReasoningStep>, session_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            steps,
            session_id,
        }
    }

    /// One-line rendering used for embedding and storage.
    pub fn summary(&self) -> String {
        let steps: Vec<String> = self
            .steps
            .iter()
            .map(|s| format!("{}. {}", s.index + 1, s.text))
            .collect();
        format!(
            "Reasoning trace ({} steps):\n{}",
            self.steps.len(),
            steps.join("\n")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningEvaluation {
    /// Quality in `[0, 1]`.
    pub quality_score: f32,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub should_store: bool,
}

// ─── Detection ────────────────────────────────────────────────────────────────

const REASONING_MARKERS: &[&str] = &[
    "because",
    "therefore",
    "first",
    "then",
    "next",
    "finally",
    "thus",
    "since",
    "let's think",
    "step by step",
    "if we",
    "so that",
];

fn enumerated_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:\d+[.)]|[-*]|step \d+)\s+\S").expect("valid regex")
    })
}

/// Confidence in `[0, 1]` that `text` contains reasoning content.
///
/// Each distinct marker contributes; an enumerated list is strong evidence
/// on its own.
pub fn detect_reasoning_confidence(text: &str) -> f32 {
    let lower = text.to_lowercase();
    let marker_hits = REASONING_MARKERS
        .iter()
        .filter(|m| lower.contains(*m))
        .count();
    let mut confidence = marker_hits as f32 * 0.25;
    if enumerated_re().is_match(&lower) {
        confidence += 0.5;
    }
    confidence.clamp(0.0, 1.0)
}

// ─── Step extraction ──────────────────────────────────────────────────────────

fn explicit_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:\d+[.)]|[-*]|step \d+[:.]?)\s+(.+)$").expect("valid regex")
    })
}

fn sequence_sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(first|then|next|finally|therefore|second|third)\b[ ,]*(.+)$")
            .expect("valid regex")
    })
}

fn causal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(because|therefore|thus|since|so that)\b").expect("valid regex")
    })
}

/// Extract ordered reasoning steps from a turn.
///
/// Explicit steps are enumerated items and sequence-marker sentences;
/// implicit steps are other sentences carrying causal connectives.
pub fn extract_reasoning_steps(user_input: &str, assistant_text: &str) -> Vec<ReasoningStep> {
    let combined = format!("{user_input}\n{assistant_text}");
    let mut steps: Vec<ReasoningStep> = Vec::new();

    for captures in explicit_line_re().captures_iter(&combined) {
        if let Some(text) = captures.get(1) {
            push_step(&mut steps, StepKind::Explicit, text.as_str());
        }
    }

    for sentence in split_sentences(&combined) {
        if let Some(captures) = sequence_sentence_re().captures(sentence) {
            if let Some(text) = captures.get(0) {
                push_step(&mut steps, StepKind::Explicit, text.as_str());
            }
        } else if causal_re().is_match(sentence) {
            push_step(&mut steps, StepKind::Implicit, sentence);
        }
    }

    for (index, step) in steps.iter_mut().enumerate() {
        step.index = index;
    }
    steps
}

fn push_step(steps: &mut Vec<ReasoningStep>, kind: StepKind, text: &str) {
    let text = text.trim();
    if text.len() < 8 {
        return;
    }
    let normalized = normalize_step(text);
    if steps.iter().any(|s| normalize_step(&s.text) == normalized) {
        return;
    }
    steps.push(ReasoningStep {
        index: steps.len(),
        kind,
        text: text.to_owned(),
    });
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '\n', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn normalize_step(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Heuristic evaluation ─────────────────────────────────────────────────────

/// Grade a trace without a model: penalize loops (repeated states) and
/// overlong traces (wasted steps).
pub fn heuristic_evaluation(trace: &ReasoningTrace, store_threshold: f32) -> ReasoningEvaluation {
    let mut issues = Vec::new();
    let mut suggestions = Vec::new();
    let mut score: f32 = 0.9;

    let mut seen = std::collections::HashSet::new();
    let mut loops = 0usize;
    for step in &trace.steps {
        if !seen.insert(normalize_step(&step.text)) {
            loops += 1;
        }
    }
    if loops > 0 {
        score -= 0.3;
        issues.push(format!("{loops} repeated step(s) suggest a reasoning loop"));
        suggestions.push("collapse repeated states into a single step".to_owned());
    }

    if trace.steps.len() > 12 {
        score -= 0.1;
        issues.push("trace is long; some steps may be wasted".to_owned());
        suggestions.push("consolidate intermediate steps".to_owned());
    }

    if trace.steps.len() < 2 {
        score -= 0.2;
        suggestions.push("single-step traces rarely generalize".to_owned());
    }

    let score = score.clamp(0.0, 1.0);
    ReasoningEvaluation {
        quality_score: score,
        issues,
        suggestions,
        should_store: score >= store_threshold && !trace.steps.is_empty(),
    }
}

// ─── ReflectionEngine ─────────────────────────────────────────────────────────

pub struct ReflectionEngine {
    embeddings: Arc<EmbeddingManager>,
    vectors: Arc<dyn VectorBackend>,
    llm: Option<Arc<dyn LlmProvider>>,
    config: ReflectionConfig,
    stored: AtomicU64,
}

impl ReflectionEngine {
    pub fn new(
        embeddings: Arc<EmbeddingManager>,
        vectors: Arc<dyn VectorBackend>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: ReflectionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            embeddings,
            vectors,
            llm,
            config,
            stored: AtomicU64::new(0),
        })
    }

    pub fn stored_count(&self) -> u64 {
        self.stored.load(Ordering::SeqCst)
    }

    pub fn vectors(&self) -> Arc<dyn VectorBackend> {
        self.vectors.clone()
    }

    /// Run the full sub-pipeline for one turn.  Never fails: every error is
    /// swallowed and logged at debug level.
    #[tracing::instrument(name = "reflection.process", skip_all)]
    pub async fn process(&self, record: &InteractionRecord) {
        if !self.config.enabled {
            return;
        }
        if self.embeddings.is_disabled() {
            tracing::debug!("embeddings disabled, skipping reflection");
            return;
        }

        let confidence = detect_reasoning_confidence(&record.user_input);
        if confidence < self.config.detection_confidence {
            return;
        }

        let steps = extract_reasoning_steps(&record.user_input, &record.assistant_response);
        if steps.is_empty() {
            return;
        }
        let trace = ReasoningTrace::new(steps, record.session_id.clone());

        let evaluation = self.evaluate(&trace).await;
        if evaluation.should_store && evaluation.quality_score >= self.config.store_threshold {
            if let Err(e) = self.store_trace(&trace, &evaluation).await {
                tracing::debug!(error = %e, "failed to store reasoning trace");
            }
        }
    }

    /// Grade a trace with the configured eval model, falling back to the
    /// heuristic grader on any failure.
    pub async fn evaluate(&self, trace: &ReasoningTrace) -> ReasoningEvaluation {
        let Some(llm) = &self.llm else {
            return heuristic_evaluation(trace, self.config.store_threshold);
        };

        let prompt = format!(
            "Grade this reasoning trace for efficiency (no wasted steps) and \
             loops (repeating states).\n\n{}\n\n\
             Reply with strict JSON only:\n\
             {{\"qualityScore\": 0.0, \"issues\": [], \"suggestions\": [], \"shouldStore\": true}}",
            trace.summary()
        );
        let request = CompletionRequest::new(self.config.eval_model.clone(), vec![Message::user(prompt)])
            .with_temperature(0.0);

        let parsed = match llm.complete(request).await {
            Ok(response) => extract_first_json_object(&response.content)
                .and_then(|raw| serde_json::from_str::<ReasoningEvaluation>(raw).ok()),
            Err(e) => {
                tracing::debug!(error = %e, "reflection eval call failed");
                None
            }
        };

        match parsed {
            Some(mut evaluation) => {
                evaluation.quality_score = evaluation.quality_score.clamp(0.0, 1.0);
                evaluation
            }
            None => heuristic_evaluation(trace, self.config.store_threshold),
        }
    }

    /// Persist a trace into the reflection collection.
    pub async fn store_trace(
        &self,
        trace: &ReasoningTrace,
        evaluation: &ReasoningEvaluation,
    ) -> Result<(), String> {
        let summary = trace.summary();
        let embedding = self
            .embeddings
            .embed(&summary)
            .await
            .map_err(|e| e.to_string())?;

        let mut payload = json!({
            "text": summary,
            "tags": ["reasoning"],
            "confidence": evaluation.quality_score,
            "event": "ADD",
            "createdAt": Utc::now().to_rfc3339(),
            "qualityScore": evaluation.quality_score,
            "stepCount": trace.steps.len(),
        });
        if let Some(session) = &trace.session_id {
            payload["sourceSessionId"] = json!(session);
        }

        self.vectors
            .insert(vec![embedding], vec![trace.id.clone()], vec![payload])
            .await
            .map_err(|e| e.to_string())?;
        self.stored.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
