//! The `ProtocolServer`/`Transport` collaborator contract (§6). The MCP
//! protocol framing, JSON-RPC dispatch, and tool handler bodies are
//! deliberately out of scope for the gateway core; this module defines
//! the trait seam plus the minimal concrete implementation needed to
//! exercise the full auth/session/pool lifecycle end to end — just the
//! `initialize` / `tools/list` / `tools/call` surface, with a single
//! `ping` tool standing in for the SQL dialect and catalog tooling that
//! belong to the real `ProtocolServer`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::pool::Pool;

pub const JSONRPC_VERSION: &str = "2.0";

pub const ERR_BAD_REQUEST: i64 = -32000;
pub const ERR_NO_SESSION: i64 = -32001;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INTERNAL: i64 = -32603;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

/// `Server.connect(Transport)` / `Server.close()`.
#[async_trait]
pub trait ProtocolServer: Send + Sync {
    async fn close(&self);
}

/// Transports expose `handleRequest(req, res, body?)` and `close()`. The
/// session manager installs the close-hook by calling `close` from its
/// own cleanup path rather than registering a callback on the transport
/// itself (see `session::SessionManager::close`).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse;
    async fn close(&self);
}

/// Builds a connected `(Server, Transport)` pair bound to a pool.
pub trait ProtocolServerFactory: Send + Sync {
    fn create(&self, pool_key: String, pool: Arc<dyn Pool>) -> (Arc<dyn ProtocolServer>, Arc<dyn Transport>);
}

/// Minimal MCP surface: `initialize`, `tools/list`, `tools/call`. The
/// single `ping` tool forwards to `Pool::probe`; a real deployment plugs
/// in the SQL-dialect-aware tool set here without touching anything
/// upstream of this trait boundary.
pub struct McpGatewayServer {
    pool: Arc<dyn Pool>,
    closed: AtomicBool,
}

impl McpGatewayServer {
    pub fn new(pool: Arc<dyn Pool>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ProtocolServer for McpGatewayServer {
    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for McpGatewayServer {
    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone().unwrap_or(Value::Null);

        if self.closed.load(Ordering::SeqCst) {
            return JsonRpcResponse::err(id, ERR_INTERNAL, "server closed");
        }

        match request.method.as_str() {
            "initialize" => JsonRpcResponse::ok(
                id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "mcp-db-gateway", "version": env!("CARGO_PKG_VERSION")},
                }),
            ),
            "tools/list" => JsonRpcResponse::ok(
                id,
                json!({
                    "tools": [{
                        "name": "ping",
                        "description": "Checks connectivity to the configured database.",
                        "inputSchema": {"type": "object", "properties": {}},
                    }]
                }),
            ),
            "tools/call" => {
                let name = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or_default();
                match name {
                    "ping" => {
                        let healthy = self.pool.probe().await;
                        JsonRpcResponse::ok(
                            id,
                            json!({"content": [{"type": "text", "text": format!("database reachable: {healthy}")}]}),
                        )
                    }
                    other => JsonRpcResponse::err(
                        id,
                        ERR_METHOD_NOT_FOUND,
                        format!("unknown tool: {other}"),
                    ),
                }
            }
            other => JsonRpcResponse::err(id, ERR_METHOD_NOT_FOUND, format!("unknown method: {other}")),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct DefaultProtocolServerFactory;

impl ProtocolServerFactory for DefaultProtocolServerFactory {
    fn create(&self, _pool_key: String, pool: Arc<dyn Pool>) -> (Arc<dyn ProtocolServer>, Arc<dyn Transport>) {
        let server = McpGatewayServer::new(pool);
        (server.clone() as Arc<dyn ProtocolServer>, server as Arc<dyn Transport>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::db::test_support::FakePool;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn initialize_then_ping_round_trip() {
        let pool: Arc<dyn Pool> = Arc::new(FakePool {
            close_count: Arc::new(AtomicUsize::new(0)),
            healthy: true,
        });
        let server = McpGatewayServer::new(pool);

        let init = server
            .handle_request(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                method: "initialize".to_string(),
                params: None,
                id: Some(json!(1)),
            })
            .await;
        assert!(init.result.is_some());

        let call = server
            .handle_request(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                method: "tools/call".to_string(),
                params: Some(json!({"name": "ping"})),
                id: Some(json!(2)),
            })
            .await;
        assert!(call.result.is_some());
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let pool: Arc<dyn Pool> = Arc::new(FakePool {
            close_count: Arc::new(AtomicUsize::new(0)),
            healthy: true,
        });
        let server = McpGatewayServer::new(pool);
        let resp = server
            .handle_request(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                method: "nonsense".to_string(),
                params: None,
                id: Some(json!(3)),
            })
            .await;
        assert_eq!(resp.error.unwrap().code, ERR_METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn closed_server_rejects_further_requests() {
        let pool: Arc<dyn Pool> = Arc::new(FakePool {
            close_count: Arc::new(AtomicUsize::new(0)),
            healthy: true,
        });
        let server = McpGatewayServer::new(pool);
        Transport::close(&*server).await;
        let resp = server
            .handle_request(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                method: "initialize".to_string(),
                params: None,
                id: Some(json!(4)),
            })
            .await;
        assert!(resp.error.is_some());
    }
}
