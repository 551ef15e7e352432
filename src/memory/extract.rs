//! Fact extraction: code patterns and tags.

use std::sync::OnceLock;

use regex::Regex;

use super::significance::is_significant;
use super::summary::interaction_summary;
use super::types::{InteractionRecord, KnowledgeFact};

/// Verbatim code slices are capped so one pasted file cannot dominate a
/// stored record.
const MAX_CODE_PATTERN_LEN: usize = 500;

// ─── Code patterns ────────────────────────────────────────────────────────────

fn fenced_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\n?(.*?)```").expect("valid regex")
    })
}

fn inline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"`([^`\n]{3,})`").expect("valid regex")
    })
}

fn cli_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b((?:npm|npx|yarn|pnpm|git|cargo|rustup|pip3?|docker|kubectl|helm|make|brew|apt(?:-get)?|curl|wget)\s+[^\n.,;!?]{2,80})",
        )
        .expect("valid regex")
    })
}

/// Extract the first code-like slice of `text`: a fenced block, then inline
/// code, then a recognizable shell/CLI command.
pub fn extract_code_pattern(text: &str) -> Option<String> {
    if let Some(captures) = fenced_re().captures(text) {
        let block = captures.get(1)?.as_str().trim();
        if !block.is_empty() {
            return Some(cap(block));
        }
    }
    if let Some(captures) = inline_re().captures(text) {
        return Some(cap(captures.get(1)?.as_str().trim()));
    }
    if let Some(captures) = cli_re().captures(text) {
        return Some(cap(captures.get(1)?.as_str().trim()));
    }
    None
}

/// All fenced blocks in `text`, trimmed and capped.
pub fn fenced_blocks(text: &str) -> Vec<String> {
    fenced_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| cap(m.as_str().trim()))
        .filter(|b| !b.is_empty())
        .collect()
}

fn cap(s: &str) -> String {
    if s.chars().count() <= MAX_CODE_PATTERN_LEN {
        s.to_owned()
    } else {
        s.chars().take(MAX_CODE_PATTERN_LEN).collect()
    }
}

// ─── Tags ─────────────────────────────────────────────────────────────────────

const LANGUAGES: &[&str] = &[
    "rust",
    "python",
    "javascript",
    "typescript",
    "java",
    "golang",
    "ruby",
    "php",
    "kotlin",
    "swift",
    "sql",
    "bash",
];

const FRAMEWORKS: &[&str] = &[
    "react",
    "nextjs",
    "vue",
    "angular",
    "svelte",
    "django",
    "flask",
    "fastapi",
    "rails",
    "spring",
    "axum",
    "tokio",
    "express",
    "tailwind",
];

const TOOLS: &[&str] = &[
    "npm",
    "npx",
    "yarn",
    "pnpm",
    "git",
    "docker",
    "kubernetes",
    "kubectl",
    "cargo",
    "pip",
    "webpack",
    "vite",
    "make",
    "brew",
    "terraform",
];

fn keyword_re(keyword: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(keyword)))
        .expect("valid regex")
}

fn file_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|\s)[~/.]?[\w.-]+/[\w./-]+").expect("valid regex")
    })
}

fn error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(error|exception|panic|traceback|failure|failed)\b")
            .expect("valid regex")
    })
}

fn config_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(config|configuration|settings|env var|environment variable)\b|\.(toml|ya?ml|json|ini)\b")
            .expect("valid regex")
    })
}

fn api_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(api|endpoint|rest|graphql|http[s]?)\b")
            .expect("valid regex")
    })
}

/// Derive lowercase tags for a fact: known languages/frameworks/tools plus
/// content-type tags; `general-knowledge` when nothing matched.
pub fn extract_tags(text: &str, code_pattern: Option<&str>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();

    let mut programming = false;
    for keyword in LANGUAGES.iter().chain(FRAMEWORKS).chain(TOOLS) {
        if keyword_re(keyword).is_match(text) {
            push_tag(&mut tags, keyword);
            programming = true;
        }
    }

    if code_pattern.is_some() || text.contains("```") {
        push_tag(&mut tags, "code-block");
        programming = true;
    }
    if programming {
        push_tag(&mut tags, "programming");
    }
    if file_path_re().is_match(text) {
        push_tag(&mut tags, "file-path");
    }
    if error_re().is_match(text) {
        push_tag(&mut tags, "error-handling");
    }
    if config_re().is_match(text) {
        push_tag(&mut tags, "configuration");
    }
    if api_re().is_match(text) {
        push_tag(&mut tags, "api");
    }

    if tags.is_empty() {
        push_tag(&mut tags, "general-knowledge");
    }
    tags
}

fn push_tag(tags: &mut Vec<String>, tag: &str) {
    if !tags.iter().any(|t| t == tag) {
        tags.push(tag.to_owned());
    }
}

// ─── Fact extraction ──────────────────────────────────────────────────────────

/// Distill candidate facts from one turn.
///
/// The deterministic interaction summary is the primary fact; each fenced
/// code block beyond the one already captured becomes its own fact.  Every
/// candidate passes the significance filter independently.
pub fn extract_facts(record: &InteractionRecord, min_length: usize) -> Vec<KnowledgeFact> {
    let mut facts = Vec::new();

    let summary = interaction_summary(record);
    let primary_pattern = extract_code_pattern(&summary);
    // The greeting gate looks at the raw user input: the summary wrapper
    // would otherwise hide "thanks" behind "User: thanks".
    if !super::significance::is_trivial(&record.user_input) && is_significant(&summary, min_length)
    {
        let tags = extract_tags(&summary, primary_pattern.as_deref());
        facts.push(KnowledgeFact {
            text: summary,
            code_pattern: primary_pattern.clone(),
            tags,
        });
    }

    let combined = format!("{}\n{}", record.user_input, record.assistant_response);
    for block in fenced_blocks(&combined) {
        if primary_pattern.as_deref() == Some(block.as_str()) {
            continue;
        }
        let text = format!("Code pattern observed in conversation:\n{block}");
        if !is_significant(&text, min_length) {
            continue;
        }
        let tags = extract_tags(&text, Some(&block));
        facts.push(KnowledgeFact {
            text,
            code_pattern: Some(block),
            tags,
        });
    }

    facts
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_block_wins_over_inline() {
        let text = "Use `cargo test` or:\n```sh\ncargo test --all\n```";
        assert_eq!(extract_code_pattern(text).as_deref(), Some("cargo test --all"));
    }

    #[test]
    fn inline_code_second_choice() {
        let text = "Run `cargo clippy --fix` before committing.";
        assert_eq!(
            extract_code_pattern(text).as_deref(),
            Some("cargo clippy --fix")
        );
    }

    #[test]
    fn cli_command_last_resort() {
        let text = "Use npm install next and run npm run build";
        let pattern = extract_code_pattern(text).unwrap();
        assert!(pattern.starts_with("npm install next"));
    }

    #[test]
    fn no_pattern_in_plain_prose() {
        assert_eq!(extract_code_pattern("The weather is nice today."), None);
    }

    #[test]
    fn tags_detect_tools_and_content_types() {
        let text = "Use npm install next and run npm run build";
        let pattern = extract_code_pattern(text);
        let tags = extract_tags(text, pattern.as_deref());
        assert!(tags.contains(&"npm".to_owned()));
        assert!(tags.contains(&"code-block".to_owned()));
        assert!(tags.contains(&"programming".to_owned()));
    }

    #[test]
    fn tags_word_boundaries() {
        // "javascript" must not also produce "java".
        let tags = extract_tags("I write javascript daily", None);
        assert!(tags.contains(&"javascript".to_owned()));
        assert!(!tags.contains(&"java".to_owned()));
    }

    #[test]
    fn tags_fall_back_to_general_knowledge() {
        let tags = extract_tags("The meeting moved to Tuesday afternoon", None);
        assert_eq!(tags, vec!["general-knowledge"]);
    }

    #[test]
    fn tags_content_types() {
        let tags = extract_tags("the config lives in app.toml under /etc/app", None);
        assert!(tags.contains(&"configuration".to_owned()));
        assert!(tags.contains(&"file-path".to_owned()));

        let tags = extract_tags("the API endpoint returned an error", None);
        assert!(tags.contains(&"api".to_owned()));
        assert!(tags.contains(&"error-handling".to_owned()));
    }

    #[test]
    fn facts_include_summary_and_extra_blocks() {
        let record = InteractionRecord::new(
            "How do I build?",
            "Run this:\n```sh\nnpm run build\n```\nand for tests:\n```sh\nnpm test -- --watch\n```",
        );
        let facts = extract_facts(&record, 10);
        assert!(facts.len() >= 2, "summary plus at least one extra block");
        assert!(facts[0].text.starts_with("User: How do I build?"));
        assert!(facts.iter().any(|f| f
            .code_pattern
            .as_deref()
            .is_some_and(|p| p.contains("npm test"))));
    }

    #[test]
    fn trivial_turn_produces_no_facts() {
        let record = InteractionRecord::new("thanks", "you're welcome");
        let facts = extract_facts(&record, 10);
        assert!(facts.is_empty(), "a greeting turn stores nothing");
    }

    #[test]
    fn extraction_is_deterministic() {
        let record = InteractionRecord::new("Use npm install next and run npm run build", "ok");
        assert_eq!(extract_facts(&record, 10), extract_facts(&record, 10));
    }
}
