//! The significance filter.
//!
//! Candidate facts pass through three rejection gates before any embedding
//! work happens:
//! 1. retrieved tool output echoed back into the turn (storing it again
//!    would feed the store its own results)
//! 2. conversational filler: greetings, acknowledgements, bare yes/no
//! 3. a minimum length threshold
//!
//! The gates are part of the engine's contract and are exercised by string
//! cases in the tests below.

use std::sync::OnceLock;

use regex::Regex;

/// Phrases that are pure conversational filler when they make up the whole
/// text.
const TRIVIAL_PHRASES: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "yo",
    "thanks",
    "thank you",
    "thx",
    "ok",
    "okay",
    "yes",
    "no",
    "yep",
    "nope",
    "sure",
    "bye",
    "goodbye",
    "good morning",
    "good evening",
    "good night",
    "how are you",
    "got it",
    "sounds good",
];

fn retrieved_result_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // "found 3 entries", "found 12 results"
            r"(?i)^found \d+ (entries|results|matches)",
            // "[0.92] some stored fact" — memory search hit lines
            r"^\[\d\.\d+\]",
            // "search results:" / "tool results:" prefixes
            r"(?i)^(search|tool) results?:",
            // "3 lines, 120 chars" — file read summaries
            r"(?i)^\d+ lines?, \d+ chars",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Whether `text` looks like retrieved tool output rather than knowledge.
pub fn looks_like_retrieved_result(text: &str) -> bool {
    let trimmed = text.trim();
    retrieved_result_patterns()
        .iter()
        .any(|re| re.is_match(trimmed))
}

/// Whether `text` is conversational filler.
pub fn is_trivial(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(['!', '.', '?'])
        .to_lowercase();
    TRIVIAL_PHRASES.contains(&normalized.as_str())
}

/// The combined gate: `true` when the text is worth embedding.
pub fn is_significant(text: &str, min_length: usize) -> bool {
    let trimmed = text.trim();
    if trimmed.len() < min_length {
        return false;
    }
    if is_trivial(trimmed) {
        return false;
    }
    if looks_like_retrieved_result(trimmed) {
        return false;
    }
    true
}

// ─── Tests ────────────────────────────────────────────────────────────────────
