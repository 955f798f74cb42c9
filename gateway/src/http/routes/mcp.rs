//! `/mcp`: the JSON-RPC POST endpoint, the stateful-mode SSE stream, and
//! explicit session close. POST dispatch itself lives in
//! [`crate::router::Router`]; these handlers only adapt HTTP in and out.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{http::StatusCode, Json};
use futures::stream;
use serde_json::json;

use crate::config::SessionMode;
use crate::http::AppState;
use crate::protocol::JsonRpcRequest;
use crate::router::AuthContext;

const SESSION_HEADER: &str = "mcp-session-id";

fn session_header_value(request: &Request) -> Option<String> {
    request
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn auth_context(request: &Request) -> AuthContext {
    request
        .extensions()
        .get::<AuthContext>()
        .map(AuthContext::clone)
        .unwrap_or(AuthContext::None)
}

pub async fn post_mcp(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let session_header = session_header_value(&request);
    let auth = auth_context(&request);

    let (_parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_request", "error_description": "failed to read body"})),
            )
                .into_response();
        }
    };
    let rpc_request: JsonRpcRequest = match serde_json::from_slice(&bytes) {
        Ok(r) => r,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_request", "error_description": e.to_string()})),
            )
                .into_response();
        }
    };

    match state
        .router
        .handle_post(&auth, session_header.as_deref(), rpc_request)
        .await
    {
        Ok((response, session_id)) => {
            let mut http_response = Json(response).into_response();
            if let Some(id) = session_id {
                if let Ok(value) = http::HeaderValue::from_str(&id) {
                    http_response.headers_mut().insert("mcp-session-id", value);
                }
            }
            http_response
        }
        Err(err) => err.into_response(),
    }
}

pub async fn get_mcp(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Response {
    if state.session_mode != SessionMode::Stateful {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let session_id = match session_header_value(&request) {
        Some(id) => id,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_request", "error_description": "Mcp-Session-Id header required"})),
            )
                .into_response();
        }
    };

    if state.session_manager.get(&session_id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"jsonrpc": "2.0", "error": {"code": -32001, "message": "session not found or expired"}, "id": null})),
        )
            .into_response();
    }

    let sessions = Arc::clone(&state.session_manager);
    let stream = stream::unfold((sessions, session_id), |(sessions, id)| async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        if sessions.get(&id).is_some() {
            let event = Event::default().comment("keep-alive");
            Some((Ok::<Event, Infallible>(event), (sessions, id)))
        } else {
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

pub async fn delete_mcp(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let session_id = match session_header_value(&request) {
        Some(id) => id,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_request", "error_description": "Mcp-Session-Id header required"})),
            )
                .into_response();
        }
    };

    if state.session_manager.close(&session_id).await {
        Json(json!({"status": "session_closed", "sessionId": session_id})).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"jsonrpc": "2.0", "error": {"code": -32001, "message": "session not found or expired"}, "id": null})),
        )
            .into_response()
    }
}
