//! Built-in dynamic prompt generators.
//!
//! Generators are registered by name at startup and invoked by `dynamic`
//! prompt providers with a provider-supplied JSON config.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::PromptContext;

/// A named generator producing one prompt section from the turn context.
#[async_trait]
pub trait PromptGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Produce the section content.  `config` is the provider's
    /// `generator_config` value (may be `Null`).
    async fn generate(&self, ctx: &PromptContext, config: &Value) -> Result<String, String>;
}

// ─── timestamp ────────────────────────────────────────────────────────────────

/// Emits the current UTC time.  Config: `{ "format": "<chrono format>" }`.
pub struct TimestampGenerator;

#[async_trait]
impl PromptGenerator for TimestampGenerator {
    fn name(&self) -> &str {
        "timestamp"
    }

    async fn generate(&self, _ctx: &PromptContext, config: &Value) -> Result<String, String> {
        let format = config
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("%Y-%m-%d %H:%M:%S UTC");
        Ok(format!("Current time: {}", Utc::now().format(format)))
    }
}

// ─── session-context ──────────────────────────────────────────────────────────

/// Emits the session id and message count when a session is active.
pub struct SessionContextGenerator;

#[async_trait]
impl PromptGenerator for SessionContextGenerator {
    fn name(&self) -> &str {
        "session-context"
    }

    async fn generate(&self, ctx: &PromptContext, _config: &Value) -> Result<String, String> {
        match &ctx.session_id {
            Some(id) => {
                let count = ctx
                    .vars
                    .get("message_count")
                    .cloned()
                    .unwrap_or_else(|| "0".to_owned());
                Ok(format!("Session: {id} ({count} messages)"))
            }
            None => Ok(String::new()),
        }
    }
}

// ─── memory-context ───────────────────────────────────────────────────────────

/// Emits recalled memories relevant to the current input, if any were
/// attached to the context by the caller.
pub struct MemoryContextGenerator;

#[async_trait]
impl PromptGenerator for MemoryContextGenerator {
    fn name(&self) -> &str {
        "memory-context"
    }

    async fn generate(&self, ctx: &PromptContext, _config: &Value) -> Result<String, String> {
        match &ctx.memory_context {
            Some(memories) if !memories.is_empty() => {
                Ok(format!("Relevant context from memory:\n{memories}"))
            }
            _ => Ok(String::new()),
        }
    }
}

// ─── environment ──────────────────────────────────────────────────────────────

/// Emits coarse host information (OS family and architecture only — nothing
/// that could leak credentials or identify the machine).
pub struct EnvironmentGenerator;

#[async_trait]
impl PromptGenerator for EnvironmentGenerator {
    fn name(&self) -> &str {
        "environment"
    }

    async fn generate(&self, _ctx: &PromptContext, _config: &Value) -> Result<String, String> {
        Ok(format!(
            "Host environment: {} / {}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ))
    }
}

// ─── conditional ──────────────────────────────────────────────────────────────

/// Emits `then` when `ctx.vars[var] == equals`, otherwise `else` (default
/// empty).  Config: `{ "var": "...", "equals": "...", "then": "...",
/// "else": "..." }`.
pub struct ConditionalGenerator;

#[async_trait]
impl PromptGenerator for ConditionalGenerator {
    fn name(&self) -> &str {
        "conditional"
    }

    async fn generate(&self, ctx: &PromptContext, config: &Value) -> Result<String, String> {
        let var = config
            .get("var")
            .and_then(|v| v.as_str())
            .ok_or("conditional generator requires a 'var' config field")?;
        let expected = config.get("equals").and_then(|v| v.as_str()).unwrap_or("");
        let matched = ctx.vars.get(var).map(String::as_str) == Some(expected);
        let key = if matched { "then" } else { "else" };
        Ok(config
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_with(session: Option<&str>) -> PromptContext {
        let mut ctx = PromptContext::default();
        ctx.session_id = session.map(str::to_owned);
        ctx
    }

    #[tokio::test]
    async fn timestamp_generator_emits_time() {
        let out = TimestampGenerator
            .generate(&ctx_with(None), &Value::Null)
            .await
            .unwrap();
        assert!(out.starts_with("Current time: "));
    }

    #[tokio::test]
    async fn session_context_empty_without_session() {
        let out = SessionContextGenerator
            .generate(&ctx_with(None), &Value::Null)
            .await
            .unwrap();
        assert!(out.is_empty());

        let out = SessionContextGenerator
            .generate(&ctx_with(Some("s1")), &Value::Null)
            .await
            .unwrap();
        assert!(out.contains("s1"));
    }

    #[tokio::test]
    async fn memory_context_passthrough() {
        let mut ctx = ctx_with(Some("s1"));
        ctx.memory_context = Some("- user prefers npm".to_owned());
        let out = MemoryContextGenerator
            .generate(&ctx, &Value::Null)
            .await
            .unwrap();
        assert!(out.contains("user prefers npm"));
    }

    #[tokio::test]
    async fn conditional_branches_on_var() {
        let mut ctx = ctx_with(None);
        ctx.vars.insert("mode".to_owned(), "debug".to_owned());
        let config = json!({"var": "mode", "equals": "debug", "then": "T", "else": "E"});
        let out = ConditionalGenerator.generate(&ctx, &config).await.unwrap();
        assert_eq!(out, "T");

        ctx.vars.insert("mode".to_owned(), "release".to_owned());
        let out = ConditionalGenerator.generate(&ctx, &config).await.unwrap();
        assert_eq!(out, "E");
    }

    #[tokio::test]
    async fn conditional_missing_var_config_errors() {
        let result = ConditionalGenerator
            .generate(&ctx_with(None), &Value::Null)
            .await;
        assert!(result.is_err());
    }
}
