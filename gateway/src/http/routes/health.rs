use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::http::AppState;

pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let session_stats = state.session_manager.stats();
    let token_stats = state.token_manager.stats();

    Json(json!({
        "status": "ok",
        "server": "mcp-db-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "auth_mode": format!("{:?}", state.auth_mode).to_lowercase(),
        "session_mode": format!("{:?}", state.session_mode).to_lowercase(),
        "tls_enabled": state.tls_enabled,
        "sessions": {
            "total": session_stats.total,
            "stale": session_stats.stale,
        },
        "tokens": {
            "total": token_stats.total,
            "active": token_stats.active,
            "expired": token_stats.expired,
            "max_sessions": state.max_sessions,
        },
    }))
}
