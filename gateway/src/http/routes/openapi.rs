use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::http::AppState;

pub async fn get_openapi(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let scheme = if state.tls_enabled { "https" } else { "http" };
    let base_url = format!("{scheme}://{{host}}");

    Json(json!({
        "openapi": "3.0.3",
        "info": {
            "title": "mcp-db-gateway",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "servers": [{"url": base_url}],
        "paths": {
            "/health": {"get": {"summary": "Liveness and statistics"}},
            "/auth": {"post": {"summary": "Exchange credentials for a bearer token"}},
            "/mcp": {
                "post": {"summary": "Send a JSON-RPC request"},
                "get": {"summary": "Open an SSE stream bound to a session"},
                "delete": {"summary": "Close a session"},
            },
        },
    }))
}
