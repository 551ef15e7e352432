use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The result of executing a [`Tool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Human-readable output (search hits, file contents, etc.).
    pub output: String,
    /// Whether the tool considered the execution successful.
    pub success: bool,
    /// Optional structured metadata for machine consumption.
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
            metadata: None,
        }
    }

    pub fn err(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A capability that the reasoning loop can invoke.
///
/// Implementations must be `Send + Sync` so they can be held in a shared
/// `Arc<dyn Tool>` registry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier (snake_case), e.g. `"memory_search"`.
    fn name(&self) -> &str;

    /// Human-readable description used in LLM tool payloads.
    fn description(&self) -> &str;

    /// JSON Schema object describing the tool's accepted parameters.
    fn parameters_schema(&self) -> Value;

    /// Coarse grouping for listings (e.g. `"memory"`, `"reasoning"`).
    fn category(&self) -> &str {
        "general"
    }

    /// Compiled-in tools are internal; tool-server proxies are not.
    fn internal(&self) -> bool {
        false
    }

    /// Whether the LLM is offered this tool (some are API-only).
    fn agent_accessible(&self) -> bool {
        true
    }

    /// Execute the tool.  `session_id` is present when the call originates
    /// from a session-scoped turn.
    async fn execute(&self, args: Value, session_id: Option<&str>) -> Result<ToolResult, String>;
}

/// Summary of a registered tool, suitable for inclusion in listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub category: String,
    pub internal: bool,
}
