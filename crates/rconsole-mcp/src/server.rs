//! MCP Server implementation
//!
//! Reads newline-delimited JSON-RPC from stdin and writes responses to
//! stdout. `tools/call` requests go through one ordered worker so console
//! commands run strictly in arrival order; every other request runs in its
//! own task, so `ping` and `tools/list` are answered while a long console
//! command is in flight.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::protocol::{self, Request, RequestId, Response, RpcError};
use crate::tools::{self, ToolResult};

const SERVER_NAME: &str = "rails-console";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Tool handler trait
///
/// Implement this trait to handle tool calls.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    async fn call(&self, name: &str, arguments: Value) -> ToolResult;
}

pub struct McpServer<H: ToolHandler> {
    handler: Arc<H>,
}

impl<H: ToolHandler> McpServer<H> {
    pub fn new(handler: H) -> Self {
        McpServer {
            handler: Arc::new(handler),
        }
    }

    /// Serve on stdio until stdin closes
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Starting MCP server on stdio");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve on arbitrary streams. Returns after `input` hits EOF and every
    /// in-flight request has been answered.
    pub async fn serve<R, W>(&self, input: R, output: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Response>();

        let writer = tokio::spawn(async move {
            let mut output = output;
            while let Some(response) = rx.recv().await {
                let json = protocol::serialize_response(&response)?;
                debug!("Sending: {}", json);
                output.write_all(json.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
            Ok::<_, anyhow::Error>(())
        });

        // Tool calls are applied one at a time, in the order they were read
        let (calls_tx, mut calls_rx) = mpsc::unbounded_channel::<Request>();
        let call_worker = {
            let handler = Arc::clone(&self.handler);
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(request) = calls_rx.recv().await {
                    let response = handle_request(handler.as_ref(), request).await;
                    let _ = tx.send(response);
                }
            })
        };

        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();
        let mut in_flight = JoinSet::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = buf.trim_ascii();
            if line.is_empty() {
                continue;
            }
            debug!("Received: {}", String::from_utf8_lossy(line));

            let request = match protocol::parse_request(line) {
                Ok(request) => request,
                Err(err) => {
                    warn!(error = %err, "Rejected message");
                    let _ = tx.send(Response::from_error(RequestId::Null, err));
                    continue;
                }
            };

            if request.is_notification() {
                debug!(method = %request.method, "Notification");
                continue;
            }

            if request.method == "tools/call" {
                let _ = calls_tx.send(request);
                continue;
            }

            let handler = Arc::clone(&self.handler);
            let tx = tx.clone();
            in_flight.spawn(async move {
                let response = handle_request(handler.as_ref(), request).await;
                let _ = tx.send(response);
            });
        }

        info!("EOF received, shutting down");
        drop(calls_tx);
        call_worker.await?;
        while in_flight.join_next().await.is_some() {}
        drop(tx);
        writer.await??;
        Ok(())
    }
}

/// Handle a request that expects a response
async fn handle_request<H: ToolHandler>(handler: &H, request: Request) -> Response {
    let id = request.id.clone().unwrap_or(RequestId::Null);
    let params = request.params.unwrap_or(Value::Null);

    match request.method.as_str() {
        "initialize" => {
            info!("MCP server initialized");
            Response::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": SERVER_VERSION,
                    }
                }),
            )
        }
        "tools/list" => Response::success(id, json!({ "tools": tools::all_tools() })),
        "tools/call" => handle_tools_call(handler, id, params).await,
        "ping" => Response::success(id, json!({})),
        method => {
            warn!("Unknown method: {}", method);
            Response::from_error(id, RpcError::MethodNotFound(method.to_string()))
        }
    }
}

async fn handle_tools_call<H: ToolHandler>(handler: &H, id: RequestId, params: Value) -> Response {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return Response::from_error(id, RpcError::InvalidParams("Missing 'name' field".to_string()));
    };

    if tools::get_tool(name).is_none() {
        return Response::from_error(id, RpcError::InvalidParams(format!("Unknown tool: {}", name)));
    }

    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    debug!(tool = %name, "Calling tool");
    let result = handler.call(name, arguments).await;

    match serde_json::to_value(result) {
        Ok(value) => Response::success(id, value),
        Err(e) => Response::from_error(id, RpcError::InternalError(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    struct EchoHandler;

    #[async_trait::async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, name: &str, arguments: Value) -> ToolResult {
            if arguments.get("code").and_then(Value::as_str) == Some("slow") {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            ToolResult::text(json!({ "tool": name, "arguments": arguments }).to_string())
        }
    }

    fn request(method: &str, params: Option<Value>, id: i64) -> Request {
        Request {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: Some(RequestId::Number(id)),
        }
    }

    /// Feed `input` through a server and collect every response line
    async fn exchange(input: &str) -> Vec<Value> {
        exchange_with(McpServer::new(EchoHandler), input.as_bytes()).await
    }

    async fn exchange_with<H: ToolHandler>(server: McpServer<H>, input: &[u8]) -> Vec<Value> {
        let (mut client_out, server_out) = duplex(64 * 1024);
        server.serve(input, server_out).await.unwrap();

        let mut raw = String::new();
        client_out.read_to_string(&mut raw).await.unwrap();
        raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = handle_request(&EchoHandler, request("initialize", Some(json!({})), 1)).await;
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "rails-console");
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_tools_list() {
        let response = handle_request(&EchoHandler, request("tools/list", None, 2)).await;
        let result = response.result.unwrap();
        assert_eq!(result["tools"][0]["name"], "execute");
    }

    #[tokio::test]
    async fn test_tools_call() {
        let params = json!({ "name": "execute", "arguments": { "code": "1 + 1" } });
        let response = handle_request(&EchoHandler, request("tools/call", Some(params), 3)).await;
        let result = response.result.unwrap();
        let text: Value = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(text["arguments"]["code"], "1 + 1");
    }

    #[tokio::test]
    async fn test_tools_call_rejects_unknown_tool() {
        let params = json!({ "name": "run_migrations", "arguments": {} });
        let response = handle_request(&EchoHandler, request("tools/call", Some(params), 4)).await;
        assert_eq!(response.error.unwrap().code, -32602);

        let response = handle_request(&EchoHandler, request("tools/call", Some(json!({})), 5)).await;
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = handle_request(&EchoHandler, request("resources/list", None, 6)).await;
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_serve_skips_notifications_and_reports_parse_errors() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","method":"initialize","params":{},"id":1}"#, "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, "\n",
            "\n",
            "not json\n",
            r#"{"jsonrpc":"2.0","method":"ping","id":2}"#, "\n",
        );
        let responses = exchange(input).await;
        assert_eq!(responses.len(), 3);

        let parse_error = responses.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(parse_error["error"]["code"], -32700);
        assert!(responses.iter().any(|r| r["id"] == 1));
        assert!(responses.iter().any(|r| r["id"] == 2));
    }

    #[tokio::test]
    async fn test_ping_not_blocked_by_slow_call() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"execute","arguments":{"code":"slow"}},"id":1}"#, "\n",
            r#"{"jsonrpc":"2.0","method":"ping","id":2}"#, "\n",
        );
        let responses = exchange(input).await;
        let ids: Vec<i64> = responses.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_parse_error_and_serving_continues() {
        let mut input = b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":\"\xff\"}\n".to_vec();
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":2}\n");

        let responses = exchange_with(McpServer::new(EchoHandler), &input).await;
        assert_eq!(responses.len(), 2);

        let parse_error = responses.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(parse_error["error"]["code"], -32700);
        assert!(responses.iter().any(|r| r["id"] == 2 && r["result"].is_object()));
    }

    /// Logs when each call starts and finishes; earlier calls take longer
    struct RecordingHandler {
        events: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl ToolHandler for RecordingHandler {
        async fn call(&self, _name: &str, arguments: Value) -> ToolResult {
            let code = arguments["code"].as_str().unwrap_or_default().to_string();
            let n: u64 = code.trim_start_matches('c').parse().unwrap_or(0);
            self.events.lock().unwrap().push(format!("start {}", code));
            tokio::time::sleep(Duration::from_millis(20 - n)).await;
            self.events.lock().unwrap().push(format!("end {}", code));
            ToolResult::text(code)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pipelined_calls_run_in_arrival_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let server = McpServer::new(RecordingHandler {
            events: Arc::clone(&events),
        });

        let mut input = String::new();
        for i in 0..20 {
            input.push_str(&format!(
                r#"{{"jsonrpc":"2.0","method":"tools/call","params":{{"name":"execute","arguments":{{"code":"c{}"}}}},"id":{}}}"#,
                i, i
            ));
            input.push('\n');
        }

        let responses = exchange_with(server, input.as_bytes()).await;
        let ids: Vec<i64> = responses.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());

        let expected: Vec<String> = (0..20)
            .flat_map(|i| [format!("start c{}", i), format!("end c{}", i)])
            .collect();
        assert_eq!(*events.lock().unwrap(), expected);
    }
}
