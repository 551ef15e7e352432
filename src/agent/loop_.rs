//! The bounded reasoning loop.
//!
//! # Algorithm
//!
//! ```text
//! build context (system prompt + compressed history)
//!       │
//!       ▼
//! LLM.complete()  ──► no tool calls? ──► commit assistant text, done
//!       │
//!       ▼ tool calls present
//! commit assistant message with its calls
//! for each call:
//!   arguments parse as JSON?  no → tool result {"error": "failed to parse arguments"}
//!   execute via the unified tool manager → tool result (errors become payloads)
//!       │
//!       ▼
//! iteration += 1; if < max_iterations → call LLM again
//!       │
//!       ▼
//! commit "task completed but reached max iterations", done
//! ```
//!
//! Per LLM call: up to `max_retries` retries with `500ms × attempt`
//! backoff; tools are offered on the first attempt only and withdrawn
//! (`tool_choice = "none"`) on retries so a flaky provider cannot stack
//! redundant calls.  A response carrying both substantial text and tool
//! calls is treated as text.

use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};

use crate::ai::provider::LlmProvider;
use crate::ai::types::{CompletionRequest, CompletionResponse, ToolCall};
use crate::config::AgentLoopConfig;
use crate::context::{ContextManager, ToolCallRecord};
use crate::error::{CoreError, CoreResult};
use crate::memory::{ToolUsage, tool_usage};
use crate::prompts::PromptContext;
use crate::tools::UnifiedToolManager;

use super::inline_calls::inline_tool_calls;

/// Text this long alongside tool calls means the model already answered;
/// the calls are dropped as redundant.
const SUBSTANTIAL_TEXT_LEN: usize = 100;

const MAX_ITERATIONS_MESSAGE: &str = "task completed but reached max iterations";

/// Outcome of one `run()` turn.
#[derive(Debug, Clone)]
pub struct LoopResult {
    pub response: String,
    pub iterations: usize,
    /// Tools executed this turn, pre-summarized for the memory engine.
    pub tools_used: Vec<ToolUsage>,
}

/// The reasoning loop for one session.
///
/// Conversation state lives in the shared `ContextManager`; the loop only
/// appends to it.
pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<UnifiedToolManager>,
    context: Arc<ContextManager>,
    model: String,
    config: AgentLoopConfig,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<UnifiedToolManager>,
        context: Arc<ContextManager>,
        model: impl Into<String>,
        config: AgentLoopConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            context,
            model: model.into(),
            config,
        }
    }

    /// Drive the loop until a final text response or the iteration cap.
    ///
    /// The newest user message must already be appended to the context.
    #[tracing::instrument(
        name = "agent.run",
        skip_all,
        fields(model = %self.model, session = %self.context.session_id())
    )]
    pub async fn run(&self, prompt_ctx: &PromptContext) -> CoreResult<LoopResult> {
        let mut tools_used: Vec<ToolUsage> = Vec::new();

        for iteration in 0..self.config.max_iterations {
            let messages = self
                .context
                .formatted_for_llm(prompt_ctx)
                .await
                .map_err(CoreError::internal)?;

            let response = self.call_llm_with_retry(messages).await?;

            let mut tool_calls = response.tool_calls.clone();
            if tool_calls.is_empty() {
                // Providers without native tool support inline their calls
                // into the content.
                tool_calls = inline_tool_calls(&response.content);
            }

            // A model that wrote a real answer and *also* requested calls is
            // being chatty; the text wins.
            if !tool_calls.is_empty() && is_substantial(&response.content) {
                tracing::debug!(
                    calls = tool_calls.len(),
                    "dropping tool calls in favor of substantial text"
                );
                tool_calls.clear();
            }

            if tool_calls.is_empty() {
                self.context
                    .add_assistant_message(&response.content, Vec::new())
                    .map_err(CoreError::internal)?;
                return Ok(LoopResult {
                    response: response.content,
                    iterations: iteration + 1,
                    tools_used,
                });
            }

            self.dispatch_tool_calls(tool_calls, &response, &mut tools_used)
                .await?;
        }

        // Iteration cap: commit a terminal assistant message.
        self.context
            .add_assistant_message(MAX_ITERATIONS_MESSAGE, Vec::new())
            .map_err(CoreError::internal)?;
        Ok(LoopResult {
            response: MAX_ITERATIONS_MESSAGE.to_owned(),
            iterations: self.config.max_iterations,
            tools_used,
        })
    }

    /// Commit the assistant turn and every tool result.
    async fn dispatch_tool_calls(
        &self,
        tool_calls: Vec<ToolCall>,
        response: &CompletionResponse,
        tools_used: &mut Vec<ToolUsage>,
    ) -> CoreResult<()> {
        // Parse arguments up front; failures still get a call record (with
        // the raw text preserved) and an error tool result.
        let parsed: Vec<(ToolCall, Option<Value>)> = tool_calls
            .into_iter()
            .map(|call| {
                let args = serde_json::from_str::<Value>(&call.arguments)
                    .ok()
                    .filter(Value::is_object);
                (call, args)
            })
            .collect();

        let records: Vec<ToolCallRecord> = parsed
            .iter()
            .map(|(call, args)| ToolCallRecord {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: args
                    .clone()
                    .unwrap_or_else(|| Value::String(call.arguments.clone())),
            })
            .collect();
        self.context
            .add_assistant_message(&response.content, records)
            .map_err(CoreError::internal)?;

        let session_id = self.context.session_id().to_owned();
        for (call, args) in parsed {
            let content = match args {
                None => json!({"error": "failed to parse arguments"}).to_string(),
                Some(args) => {
                    match self.tools.execute(&call.name, args.clone(), Some(&session_id)).await {
                        Ok(result) if result.success => {
                            tools_used.push(tool_usage(&call.name, &args, Some(&result.output)));
                            result.output
                        }
                        Ok(result) => json!({"error": result.output}).to_string(),
                        // NotFound / Timeout — the loop continues either way.
                        Err(e) => json!({"error": e.message}).to_string(),
                    }
                }
            };
            self.context
                .add_tool_result(&call.id, &call.name, content)
                .map_err(CoreError::internal)?;
        }
        Ok(())
    }

    /// One logical LLM call with retries.  Tools are offered on the first
    /// attempt and withdrawn on retries.
    async fn call_llm_with_retry(
        &self,
        messages: Vec<crate::ai::types::Message>,
    ) -> CoreResult<CompletionResponse> {
        let mut last_error = String::new();
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
            }

            let mut request = CompletionRequest::new(self.model.clone(), messages.clone());
            if let Some(t) = self.config.temperature {
                request = request.with_temperature(t);
            }
            if let Some(m) = self.config.max_tokens {
                request = request.with_max_tokens(m);
            }
            if attempt == 0 {
                let specs = self.tools.tool_specs();
                if !specs.is_empty() {
                    request = request.with_tools(specs);
                }
            } else {
                request = request.with_tool_choice("none");
            }

            match self.provider.complete(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "LLM call failed");
                    last_error = e;
                }
            }
        }
        Err(CoreError::provider(format!(
            "LLM failed after {} retries: {last_error}",
            self.config.max_retries
        )))
    }
}

fn is_substantial(text: &str) -> bool {
    text.chars().filter(|c| !c.is_whitespace()).count() >= SUBSTANTIAL_TEXT_LEN
}

// ─── Tests ────────────────────────────────────────────────────────────────────
