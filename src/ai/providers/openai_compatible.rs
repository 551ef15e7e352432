//! OpenAI-compatible chat-completions client.
//!
//! Speaks the `/chat/completions` dialect implemented by OpenAI, OpenRouter,
//! Groq, vLLM, Ollama's OpenAI shim, and most other hosted endpoints.  The
//! runtime never depends on anything beyond this dialect.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::ai::provider::{LlmProvider, Result};
use crate::ai::types::{
    CompletionRequest, CompletionResponse, Message, MessageRole, TokenUsage, ToolCall,
};

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    name: String,
    context_limit: usize,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            name: "openai-compatible".to_owned(),
            context_limit: 128_000,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = limit;
        self
    }

    fn build_body(request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(wire_message).collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = request.max_tokens {
            body["max_tokens"] = json!(m);
        }
        if let Some(tools) = &request.tools
            && !tools.is_empty()
        {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        if let Some(choice) = &request.tool_choice {
            body["tool_choice"] = json!(choice);
        }
        body
    }

    fn parse_response(body: &Value) -> Result<CompletionResponse> {
        let message = body
            .pointer("/choices/0/message")
            .ok_or_else(|| format!("malformed completion response: {body}"))?;

        let content = message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();

        let tool_calls: Vec<ToolCall> = message
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let func = call.get("function")?;
                        Some(ToolCall {
                            id: call
                                .get("id")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_owned(),
                            name: func.get("name")?.as_str()?.to_owned(),
                            // `arguments` may be a JSON string (OpenAI) or an
                            // object (some providers); normalize to raw text.
                            arguments: match func.get("arguments") {
                                Some(Value::String(s)) => s.clone(),
                                Some(other) => other.to_string(),
                                None => "{}".to_owned(),
                            },
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = body.get("usage").map(|u| TokenUsage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            completion_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        });

        Ok(CompletionResponse {
            content,
            tool_calls,
            model: body
                .get("model")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned(),
            usage,
            finish_reason: body
                .pointer("/choices/0/finish_reason")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
        })
    }
}

fn wire_message(message: &Message) -> Value {
    match message.role {
        MessageRole::System => json!({ "role": "system", "content": message.content }),
        MessageRole::User => json!({ "role": "user", "content": message.content }),
        MessageRole::Assistant => {
            let mut m = json!({ "role": "assistant", "content": message.content });
            if let Some(calls) = &message.tool_calls
                && !calls.is_empty()
            {
                m["tool_calls"] = Value::Array(
                    calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": { "name": c.name, "arguments": c.arguments },
                            })
                        })
                        .collect(),
                );
            }
            m
        }
        MessageRole::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content,
        }),
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let url = format!(
            "{}/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let body = Self::build_body(&request);

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| format!("LLM request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("LLM returned HTTP {status}: {text}"));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("LLM response was not JSON: {e}"))?;
        Self::parse_response(&body)
    }

    fn context_limit(&self) -> usize {
        self.context_limit
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}
