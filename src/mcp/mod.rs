//! External tool-server integration.

pub mod client;

use std::sync::Arc;

use crate::config::ToolsConfig;
use crate::error::CoreError;
use crate::tools::{Tool, UnifiedToolManager};

pub use client::{RemoteTool, RemoteToolSpec, ToolServer};

/// Launch every configured tool server and register its tools.
///
/// A server that fails to launch or list is logged and skipped; the runtime
/// starts with whatever servers are reachable.  A *registration* refusal
/// (the `error` conflict policy) aborts startup instead.  Returns the
/// connected servers so callers can shut them down.
pub async fn connect_tool_servers(
    config: &ToolsConfig,
    manager: &UnifiedToolManager,
) -> Result<Vec<Arc<ToolServer>>, CoreError> {
    let mut connected: Vec<Arc<ToolServer>> = Vec::new();
    // Deterministic connect order keeps conflict resolution reproducible.
    let mut names: Vec<&String> = config.servers.keys().collect();
    names.sort();

    for name in names {
        let Some(server_config) = config.servers.get(name) else {
            continue;
        };
        let server = match ToolServer::launch(name, server_config).await {
            Ok(server) => server,
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "tool server failed to start");
                continue;
            }
        };
        match server.describe_tools().await {
            Ok(specs) => {
                let discovered = specs.len();
                let tools: Vec<Arc<dyn Tool>> = specs
                    .into_iter()
                    .map(|spec| Arc::new(RemoteTool::new(server.clone(), spec)) as Arc<dyn Tool>)
                    .collect();
                match manager.register_server_tools(name, tools) {
                    Ok(registered) => {
                        tracing::info!(server = %name, discovered, registered, "tool server connected");
                    }
                    Err(e) => {
                        server.shutdown().await;
                        for running in &connected {
                            running.shutdown().await;
                        }
                        return Err(e);
                    }
                }

                // Servers without these capabilities answer "method not
                // found", which surfaces here as empty listings.
                let prompts = server.prompt_listing().await.unwrap_or_default();
                let resources = server.resource_listing().await.unwrap_or_default();
                if !prompts.is_empty() || !resources.is_empty() {
                    tracing::debug!(
                        server = %name,
                        prompts = prompts.len(),
                        resources = resources.len(),
                        "tool server extra capabilities"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "tool listing failed");
            }
        }
        connected.push(server);
    }
    Ok(connected)
}
