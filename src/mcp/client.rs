//! Tool-server client.
//!
//! A tool server is a child process that advertises tools with JSON-Schema
//! parameters and executes `{name, arguments}` calls returning structured
//! content.  The core requires only ordered request/response over the
//! process's stdio; anything the server volunteers on its own — progress
//! notifications, responses to ids we are not waiting on — is skipped while
//! a reply is pending, which also lets the stream self-heal after a timed
//! out call whose answer arrives late.
//!
//! Every round trip runs under [`RPC_TIMEOUT`], and failures carry a
//! [`CoreError`] kind: `Backend` for transport trouble, `Provider` for a
//! server-reported error, `Capability` when the server simply does not
//! implement the method (callers treat that as an empty capability).

use std::{process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::Mutex,
};

use crate::config::ToolServerConfig;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::tools::{Tool, ToolResult};

/// Deadline for one request/response round trip.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// The code a JSON-RPC server answers for a method it does not implement.
const CODE_METHOD_NOT_FOUND: i64 = -32601;

// ─── Reply decoding ───────────────────────────────────────────────────────────

/// What one line from the server meant for the request we are waiting on.
enum Reply {
    Done(Value),
    Failed { code: i64, message: String },
    /// A notification, unparseable chatter, or an answer to some other id.
    Unrelated,
}

fn decode_reply(line: &str, want_id: u64) -> Reply {
    let Ok(frame) = serde_json::from_str::<Value>(line) else {
        return Reply::Unrelated;
    };
    if frame.get("id").and_then(Value::as_u64) != Some(want_id) {
        return Reply::Unrelated;
    }
    if let Some(error) = frame.get("error") {
        return Reply::Failed {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified server error")
                .to_owned(),
        };
    }
    Reply::Done(frame.get("result").cloned().unwrap_or(Value::Null))
}

// ─── Process I/O ──────────────────────────────────────────────────────────────

struct Io {
    child: Child,
    writer: ChildStdin,
    reader: Lines<BufReader<ChildStdout>>,
    seq: u64,
}

impl Io {
    async fn roundtrip(&mut self, server: &str, method: &str, params: Value) -> CoreResult<Value> {
        self.seq += 1;
        let id = self.seq;

        let mut frame = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        if !params.is_null() {
            frame["params"] = params;
        }
        let mut wire = frame.to_string();
        wire.push('\n');

        let exchange = async {
            self.writer
                .write_all(wire.as_bytes())
                .await
                .map_err(|e| CoreError::backend(format!("tool server '{server}' write: {e}")))?;
            self.writer
                .flush()
                .await
                .map_err(|e| CoreError::backend(format!("tool server '{server}' flush: {e}")))?;

            loop {
                match self.reader.next_line().await {
                    Ok(Some(line)) => match decode_reply(&line, id) {
                        Reply::Done(result) => return Ok(result),
                        Reply::Failed {
                            code: CODE_METHOD_NOT_FOUND,
                            message,
                        } => return Err(CoreError::new(ErrorKind::Capability, message)),
                        Reply::Failed { code, message } => {
                            return Err(CoreError::provider(format!(
                                "tool server '{server}' rejected {method}: {message} ({code})"
                            )));
                        }
                        Reply::Unrelated => continue,
                    },
                    Ok(None) => {
                        return Err(CoreError::backend(format!(
                            "tool server '{server}' closed its output"
                        )));
                    }
                    Err(e) => {
                        return Err(CoreError::backend(format!(
                            "tool server '{server}' read: {e}"
                        )));
                    }
                }
            }
        };

        match tokio::time::timeout(RPC_TIMEOUT, exchange).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::timeout(format!(
                "tool server '{server}' did not answer {method} within {}s",
                RPC_TIMEOUT.as_secs()
            ))),
        }
    }
}

// ─── ToolServer ───────────────────────────────────────────────────────────────

/// One launched, handshaken tool-server process.
pub struct ToolServer {
    name: String,
    io: Mutex<Io>,
}

impl ToolServer {
    /// Spawn the server process and complete the handshake.
    pub async fn launch(name: &str, config: &ToolServerConfig) -> CoreResult<Arc<Self>> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CoreError::backend(format!("cannot launch tool server '{name}': {e}")))?;

        let writer = child
            .stdin
            .take()
            .ok_or_else(|| CoreError::internal(format!("tool server '{name}' has no stdin")))?;
        let reader = child
            .stdout
            .take()
            .map(|out| BufReader::new(out).lines())
            .ok_or_else(|| CoreError::internal(format!("tool server '{name}' has no stdout")))?;

        let server = Arc::new(Self {
            name: name.to_owned(),
            io: Mutex::new(Io {
                child,
                writer,
                reader,
                seq: 0,
            }),
        });

        server
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;

        Ok(server)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, method: &str, params: Value) -> CoreResult<Value> {
        let mut io = self.io.lock().await;
        io.roundtrip(&self.name, method, params).await
    }

    /// The server's advertised tools.
    pub async fn describe_tools(&self) -> CoreResult<Vec<RemoteToolSpec>> {
        let listing = self.request("tools/list", Value::Null).await?;
        Ok(listing
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| tools.iter().filter_map(RemoteToolSpec::from_value).collect())
            .unwrap_or_default())
    }

    /// The server's prompts; empty when the capability is absent.
    pub async fn prompt_listing(&self) -> CoreResult<Vec<Value>> {
        self.optional_listing("prompts/list", "prompts").await
    }

    /// The server's resources; empty when the capability is absent.
    pub async fn resource_listing(&self) -> CoreResult<Vec<Value>> {
        self.optional_listing("resources/list", "resources").await
    }

    async fn optional_listing(&self, method: &str, field: &str) -> CoreResult<Vec<Value>> {
        match self.request(method, Value::Null).await {
            Ok(listing) => Ok(listing
                .get(field)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()),
            // A missing capability is an empty capability, not a failure.
            Err(e) if e.kind == ErrorKind::Capability => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Execute one `{name, arguments}` call.
    pub async fn invoke(&self, tool: &str, arguments: Value) -> CoreResult<Value> {
        self.request("tools/call", json!({ "name": tool, "arguments": arguments }))
            .await
    }

    /// Terminate the server process.
    pub async fn shutdown(&self) {
        let mut io = self.io.lock().await;
        let _ = io.child.start_kill();
    }
}

// ─── RemoteToolSpec ───────────────────────────────────────────────────────────

/// One advertised tool, reduced to what the registry needs.
#[derive(Debug, Clone)]
pub struct RemoteToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the accepted parameters; servers that omit one get
    /// the permissive object schema.
    pub parameters: Value,
}

impl RemoteToolSpec {
    fn from_value(raw: &Value) -> Option<Self> {
        let name = raw.get("name")?.as_str()?.to_owned();
        let description = raw
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let parameters = match raw.get("inputSchema") {
            Some(schema) if schema.is_object() => schema.clone(),
            _ => json!({ "type": "object" }),
        };
        Some(Self {
            name,
            description,
            parameters,
        })
    }
}

// ─── RemoteTool ───────────────────────────────────────────────────────────────

/// A [`Tool`] whose execution happens on a tool server.
pub struct RemoteTool {
    server: Arc<ToolServer>,
    spec: RemoteToolSpec,
}

impl RemoteTool {
    pub fn new(server: Arc<ToolServer>, spec: RemoteToolSpec) -> Self {
        Self { server, spec }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> Value {
        self.spec.parameters.clone()
    }

    fn category(&self) -> &str {
        "external"
    }

    async fn execute(&self, args: Value, _session_id: Option<&str>) -> Result<ToolResult, String> {
        let outcome = self
            .server
            .invoke(&self.spec.name, args)
            .await
            .map_err(|e| e.to_string())?;
        Ok(flatten_outcome(outcome))
    }
}

/// Collapse a structured call outcome into a [`ToolResult`]: text parts
/// joined, the `isError` flag respected, the raw value kept as metadata.
fn flatten_outcome(outcome: Value) -> ToolResult {
    let text = outcome
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        });
    let output = match text {
        Some(t) if !t.is_empty() => t,
        _ => outcome.to_string(),
    };

    let failed = outcome
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if failed {
        ToolResult::err(output)
    } else {
        ToolResult::ok(output).with_metadata(outcome)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_with_matching_id_yields_result() {
        let line = r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#;
        match decode_reply(line, 7) {
            Reply::Done(result) => assert_eq!(result, json!({"tools": []})),
            _ => panic!("expected a result"),
        }
    }

    #[test]
    fn reply_error_carries_code_and_message() {
        let line = r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32000,"message":"kaput"}}"#;
        match decode_reply(line, 3) {
            Reply::Failed { code, message } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "kaput");
            }
            _ => panic!("expected a failure"),
        }
    }

    #[test]
    fn notifications_and_other_ids_are_unrelated() {
        // A notification has no id at all.
        let notification = r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#;
        assert!(matches!(decode_reply(notification, 1), Reply::Unrelated));

        // A stale answer to an earlier, timed-out request.
        let stale = r#"{"jsonrpc":"2.0","id":4,"result":{}}"#;
        assert!(matches!(decode_reply(stale, 5), Reply::Unrelated));
    }

    #[test]
    fn garbage_lines_are_unrelated() {
        assert!(matches!(decode_reply("log: starting up", 1), Reply::Unrelated));
        assert!(matches!(decode_reply("", 1), Reply::Unrelated));
    }

    #[test]
    fn missing_result_field_decodes_as_null() {
        let line = r#"{"jsonrpc":"2.0","id":2}"#;
        match decode_reply(line, 2) {
            Reply::Done(result) => assert_eq!(result, Value::Null),
            _ => panic!("expected a result"),
        }
    }

    #[test]
    fn spec_requires_name_and_defaults_schema() {
        let full = json!({
            "name": "lookup",
            "description": "find records",
            "inputSchema": {"type": "object", "properties": {"key": {"type": "string"}}},
        });
        let spec = RemoteToolSpec::from_value(&full).unwrap();
        assert_eq!(spec.name, "lookup");
        assert_eq!(spec.parameters["properties"]["key"]["type"], "string");

        let bare = json!({"name": "ping"});
        let spec = RemoteToolSpec::from_value(&bare).unwrap();
        assert_eq!(spec.description, "");
        assert_eq!(spec.parameters, json!({"type": "object"}));

        assert!(RemoteToolSpec::from_value(&json!({"description": "nameless"})).is_none());
    }

    #[test]
    fn outcome_flattening_joins_text_parts() {
        let outcome = json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "text", "text": "line two"},
            ]
        });
        let result = flatten_outcome(outcome);
        assert!(result.success);
        assert_eq!(result.output, "line one\nline two");
        assert!(result.metadata.is_some());
    }

    #[test]
    fn is_error_flag_marks_failure() {
        let outcome = json!({
            "isError": true,
            "content": [{"type": "text", "text": "path not allowed"}],
        });
        let result = flatten_outcome(outcome);
        assert!(!result.success);
        assert_eq!(result.output, "path not allowed");
    }

    #[test]
    fn bare_value_outcome_is_stringified() {
        let result = flatten_outcome(json!({"rows": 3}));
        assert!(result.success);
        assert!(result.output.contains("\"rows\":3"));
    }
}
