//! The unified tool registry: internal tools plus external tool-server
//! tools, with conflict resolution, per-call timeouts, and provider-shaped
//! listings.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ai::types::ToolSpec;
use crate::error::{CoreError, ErrorKind};

use super::traits::{Tool, ToolInfo, ToolResult};

// ─── Conflict policy ──────────────────────────────────────────────────────────

/// What to do when two tools want the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Conflicting server tools become addressable as
    /// `<serverName>.<toolName>`; the bare name stops resolving.
    #[default]
    Prefix,
    /// The first registration keeps the name; later ones are dropped.
    FirstWins,
    /// Refuse to start on any conflict.
    Error,
}

impl ConflictPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prefix" => Some(Self::Prefix),
            "first-wins" => Some(Self::FirstWins),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

// ─── Provider listing shapes ──────────────────────────────────────────────────

/// Output shape expected by a given LLM provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Flat `function` list (OpenAI-compatible dialect).
    Openai,
    /// Nested descriptor objects.
    Generic,
}

// ─── Stats ────────────────────────────────────────────────────────────────────

/// Registry counters, surfaced through the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStats {
    pub internal_tools: usize,
    pub external_tools: usize,
    pub conflicts: u64,
    pub executions: u64,
    pub failures: u64,
    pub timeouts: u64,
}

// ─── Registration model ───────────────────────────────────────────────────────

#[derive(Clone)]
enum ToolSource {
    Internal,
    Server(String),
}

#[derive(Clone)]
struct RegisteredTool {
    tool: Arc<dyn Tool>,
    source: ToolSource,
}

// ─── UnifiedToolManager ───────────────────────────────────────────────────────

/// Aggregates internal and external tools behind one executor.
pub struct UnifiedToolManager {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    policy: ConflictPolicy,
    execution_timeout: Duration,
    conflicts: AtomicU64,
    executions: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

impl UnifiedToolManager {
    pub fn new(policy: ConflictPolicy, execution_timeout: Duration) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            policy,
            execution_timeout,
            conflicts: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    fn lock_err<T>(e: std::sync::PoisonError<T>) -> CoreError {
        CoreError::internal(format!("tool registry lock poisoned: {e}"))
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Register a compiled-in tool.  Internal names must be unique; a
    /// duplicate is a startup bug regardless of policy.
    pub fn register_internal(&self, tool: Arc<dyn Tool>) -> Result<(), CoreError> {
        let name = tool.name().to_owned();
        let mut tools = self.tools.write().map_err(Self::lock_err)?;
        if tools.contains_key(&name) {
            return Err(CoreError::conflict(format!(
                "internal tool '{name}' registered twice"
            )));
        }
        tools.insert(
            name,
            RegisteredTool {
                tool,
                source: ToolSource::Internal,
            },
        );
        Ok(())
    }

    /// Register the tools advertised by one server, applying the conflict
    /// policy.  Returns the number of tools that became addressable.
    pub fn register_server_tools(
        &self,
        server: &str,
        discovered: Vec<Arc<dyn Tool>>,
    ) -> Result<usize, CoreError> {
        let mut registered = 0;
        for tool in discovered {
            let name = tool.name().to_owned();
            let mut tools = self.tools.write().map_err(Self::lock_err)?;

            let Some(existing) = tools.get(&name).cloned() else {
                tools.insert(
                    name,
                    RegisteredTool {
                        tool,
                        source: ToolSource::Server(server.to_owned()),
                    },
                );
                registered += 1;
                continue;
            };

            // Name conflict.
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            match self.policy {
                ConflictPolicy::Error => {
                    return Err(CoreError::conflict(format!(
                        "tool name conflict on '{name}' from server '{server}'"
                    )));
                }
                ConflictPolicy::FirstWins => {
                    tracing::warn!(tool = %name, server, "dropping conflicting tool (first-wins)");
                }
                ConflictPolicy::Prefix => {
                    // The earlier server-provided tool moves to its prefixed
                    // name; internal tools keep the bare name.
                    if let ToolSource::Server(owner) = &existing.source {
                        let moved = format!("{owner}.{name}");
                        tools.remove(&name);
                        tools.insert(moved, existing);
                    }
                    let prefixed = format!("{server}.{name}");
                    tools.insert(
                        prefixed,
                        RegisteredTool {
                            tool,
                            source: ToolSource::Server(server.to_owned()),
                        },
                    );
                    registered += 1;
                }
            }
        }
        Ok(registered)
    }

    // ── Lookup and listing ────────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .ok()
            .and_then(|tools| tools.get(name).map(|r| r.tool.clone()))
    }

    /// All addressable tools, sorted by name.
    pub fn all_tools(&self) -> Vec<ToolInfo> {
        let Ok(tools) = self.tools.read() else {
            return Vec::new();
        };
        let mut infos: Vec<ToolInfo> = tools
            .iter()
            .map(|(name, registered)| ToolInfo {
                name: name.clone(),
                description: registered.tool.description().to_owned(),
                parameters: registered.tool.parameters_schema(),
                category: registered.tool.category().to_owned(),
                internal: matches!(registered.source, ToolSource::Internal),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Agent-accessible tools as [`ToolSpec`]s for a completion request.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        let Ok(tools) = self.tools.read() else {
            return Vec::new();
        };
        let mut specs: Vec<ToolSpec> = tools
            .iter()
            .filter(|(_, r)| r.tool.agent_accessible())
            .map(|(name, r)| ToolSpec {
                name: name.clone(),
                description: r.tool.description().to_owned(),
                parameters: r.tool.parameters_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// The registry in the shape `provider` expects.
    pub fn tools_for_provider(&self, provider: ProviderKind) -> Value {
        match provider {
            ProviderKind::Openai => Value::Array(
                self.tool_specs()
                    .into_iter()
                    .map(|spec| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": spec.name,
                                "description": spec.description,
                                "parameters": spec.parameters,
                            }
                        })
                    })
                    .collect(),
            ),
            ProviderKind::Generic => Value::Array(
                self.all_tools()
                    .into_iter()
                    .filter_map(|info| serde_json::to_value(info).ok())
                    .collect(),
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    /// Execute `name` with a per-call timeout.
    ///
    /// A timeout returns a [`CoreError`] of kind `Timeout` without awaiting
    /// the underlying call further (the provider future is dropped; tools
    /// that spawned real work keep running to their own deadline).
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        session_id: Option<&str>,
    ) -> Result<ToolResult, CoreError> {
        let Some(tool) = self.get(name) else {
            return Err(CoreError::not_found(format!(
                "tool '{name}' not found in default mode"
            )));
        };

        self.executions.fetch_add(1, Ordering::SeqCst);
        let outcome =
            tokio::time::timeout(self.execution_timeout, tool.execute(args, session_id)).await;

        match outcome {
            Ok(Ok(result)) => {
                if !result.success {
                    self.failures.fetch_add(1, Ordering::SeqCst);
                }
                Ok(result)
            }
            Ok(Err(message)) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                Ok(ToolResult::err(message))
            }
            Err(_) => {
                self.timeouts.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::new(
                    ErrorKind::Timeout,
                    format!(
                        "tool '{name}' timed out after {}s",
                        self.execution_timeout.as_secs()
                    ),
                ))
            }
        }
    }

    pub fn stats(&self) -> ToolStats {
        let (internal, external) = self
            .tools
            .read()
            .map(|tools| {
                let internal = tools
                    .values()
                    .filter(|r| matches!(r.source, ToolSource::Internal))
                    .count();
                (internal, tools.len() - internal)
            })
            .unwrap_or((0, 0));
        ToolStats {
            internal_tools: internal,
            external_tools: external,
            conflicts: self.conflicts.load(Ordering::SeqCst),
            executions: self.executions.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            timeouts: self.timeouts.load(Ordering::SeqCst),
        }
    }
}

impl Default for UnifiedToolManager {
    fn default() -> Self {
        Self::new(ConflictPolicy::Prefix, Duration::from_secs(60))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
