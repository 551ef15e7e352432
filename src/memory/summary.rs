//! Deterministic interaction summaries.
//!
//! The summary is the canonical text the extraction pipeline works on.  It
//! must be deterministic: the same turn always produces the same summary,
//! which is what makes repeated turns collapse to NONE decisions downstream.

use serde_json::Value;

use super::types::{InteractionRecord, ToolUsage};

/// Cap for summarized argument and result fragments.
const SUMMARY_FRAGMENT_LEN: usize = 50;

/// Render the canonical summary of one turn:
///
/// ```text
/// User: <text>
/// Tools used: <name> with <args>, ...
/// Tool results: <name>: <summary>; ...
/// Assistant: <text>
/// ```
///
/// The tool lines are omitted when no tools ran.
pub fn interaction_summary(record: &InteractionRecord) -> String {
    let mut lines = Vec::with_capacity(4);
    lines.push(format!("User: {}", record.user_input.trim()));

    if !record.tools_used.is_empty() {
        let used: Vec<String> = record
            .tools_used
            .iter()
            .map(|t| format!("{} with {}", t.name, t.args_summary))
            .collect();
        lines.push(format!("Tools used: {}", used.join(", ")));

        let results: Vec<String> = record
            .tools_used
            .iter()
            .filter_map(|t| {
                t.result_summary
                    .as_ref()
                    .map(|summary| format!("{}: {summary}", t.name))
            })
            .collect();
        if !results.is_empty() {
            lines.push(format!("Tool results: {}", results.join("; ")));
        }
    }

    lines.push(format!("Assistant: {}", record.assistant_response.trim()));
    lines.join("\n")
}

/// Summarize tool arguments to a short fragment: prefer a `path` or `query`
/// field, fall back to the compact JSON, truncated.
pub fn summarize_args(args: &Value) -> String {
    let fragment = args
        .get("path")
        .or_else(|| args.get("query"))
        .or_else(|| args.get("q"))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| args.to_string());
    truncate_chars(&fragment, SUMMARY_FRAGMENT_LEN)
}

/// Summarize a tool result by shape: file reads become `<N> lines, <M>
/// chars`, memory searches `found <K> entries`, anything else a truncated
/// fragment.
pub fn summarize_result(tool_name: &str, output: &str) -> String {
    if tool_name.contains("read") || tool_name.contains("file") {
        return format!("{} lines, {} chars", output.lines().count(), output.len());
    }
    if tool_name.contains("memory") || tool_name.contains("search") {
        let entries = output.lines().filter(|l| !l.trim().is_empty()).count();
        return format!("found {entries} entries");
    }
    truncate_chars(output, SUMMARY_FRAGMENT_LEN)
}

/// Build a [`ToolUsage`] from raw call data.
pub fn tool_usage(name: &str, args: &Value, output: Option<&str>) -> ToolUsage {
    ToolUsage {
        name: name.to_owned(),
        args_summary: summarize_args(args),
        result_summary: output.map(|o| summarize_result(name, o)),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}…")
}

// ─── Tests ────────────────────────────────────────────────────────────────────
