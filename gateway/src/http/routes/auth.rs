//! `POST /auth`: the credential-exchange handler implementing the
//! 8-step algorithm from the HTTP surface design — throttle, validate,
//! merge with environment defaults, probe via a transient pool, admit,
//! mint.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::{http::StatusCode, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthMode;
use crate::config::DatabaseConfig;
use crate::http::middleware::client_ip;
use crate::http::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthRequestBody {
    username: String,
    password: String,
    host: Option<String>,
    port: Option<i64>,
    database: Option<String>,
    schema: Option<String>,
    duration: Option<i64>,
}

impl AuthRequestBody {
    fn validate(&self) -> Result<(), String> {
        if self.username.trim().is_empty() {
            return Err("username must be a non-empty string".to_string());
        }
        if let Some(host) = &self.host {
            if host.trim().is_empty() {
                return Err("host must be a non-empty string".to_string());
            }
        }
        if let Some(port) = self.port {
            if !(1..=65535).contains(&port) {
                return Err("port must be between 1 and 65535".to_string());
            }
        }
        if let Some(duration) = self.duration {
            if !(1..=86400).contains(&duration) {
                return Err("duration must be between 1 and 86400 seconds".to_string());
            }
        }
        Ok(())
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "invalid_request", "error_description": message.into()})),
    )
        .into_response()
}

fn unauthorized(message: impl Into<String>) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "invalid_credentials", "error_description": message.into()})),
    )
        .into_response()
}

fn unavailable(message: impl Into<String>) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": "service_unavailable", "error_description": message.into()})),
    )
        .into_response()
}

fn too_many_requests(retry_after_secs: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "too_many_requests",
            "error_description": "too many failed attempts",
            "retry_after": retry_after_secs,
        })),
    )
        .into_response()
}

fn not_found_for_mode(mode: AuthMode) -> Response {
    let description = match mode {
        AuthMode::Token => {
            "this server uses a single pre-shared bearer token (MCP_AUTH_MODE=token); \
             there is no per-user credential exchange to perform"
        }
        AuthMode::None => {
            "this server has authentication disabled (MCP_AUTH_MODE=none); \
             no credential exchange is required or available"
        }
        AuthMode::Required => unreachable!("post_auth is only short-circuited outside required mode"),
    };
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "not_found", "error_description": description})),
    )
        .into_response()
}

pub async fn post_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Response {
    if state.auth_mode != AuthMode::Required {
        return not_found_for_mode(state.auth_mode);
    }

    let ip = client_ip(&state, &request);

    let decision = state.auth_throttle.check(&ip);
    if !decision.allowed {
        return too_many_requests(decision.retry_after_secs);
    }

    let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => {
            state.auth_throttle.record_failure(&ip);
            return bad_request("failed to read request body");
        }
    };
    let parsed: Result<AuthRequestBody, _> = serde_json::from_slice(&body);
    let body = match parsed {
        Ok(b) => b,
        Err(e) => {
            state.auth_throttle.record_failure(&ip);
            return bad_request(format!("malformed request body: {e}"));
        }
    };
    if let Err(msg) = body.validate() {
        state.auth_throttle.record_failure(&ip);
        return bad_request(msg);
    }

    let config = DatabaseConfig {
        host: body.host.unwrap_or_else(|| state.env_db_config.host.clone()),
        port: body
            .port
            .map(|p| p as u16)
            .unwrap_or(state.env_db_config.port),
        username: body.username,
        password: body.password,
        database: body
            .database
            .unwrap_or_else(|| state.env_db_config.database.clone()),
        schema: body.schema.or_else(|| state.env_db_config.schema.clone()),
        options: state.env_db_config.options.clone(),
    };
    if let Err(msg) = config.validate() {
        state.auth_throttle.record_failure(&ip);
        return bad_request(msg);
    }

    let transient_key = format!("transient-{}", Uuid::new_v4());
    let probe_ok = match state.pool_registry.ensure(&transient_key, &config).await {
        Ok(()) => state.pool_registry.test(&transient_key).await,
        Err(_) => false,
    };
    state.pool_registry.close(&transient_key).await;

    if !probe_ok {
        state.auth_throttle.record_failure(&ip);
        return unauthorized("could not authenticate against the target database");
    }

    if !state.token_manager.can_create() {
        return unavailable("maximum concurrent sessions reached");
    }

    let session = match state.token_manager.create(config, body.duration) {
        Ok(session) => session,
        Err(crate::auth::token::TokenError::SessionCap) => {
            return unavailable("maximum concurrent sessions reached");
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal_error", "error_description": e.to_string()})),
            )
                .into_response();
        }
    };

    state.auth_throttle.record_success(&ip);

    let expires_in = (session.expires_at - session.created_at).num_seconds().max(0);
    (
        StatusCode::CREATED,
        Json(json!({
            "access_token": session.token,
            "token_type": "Bearer",
            "expires_in": expires_in,
            "expires_at": session.expires_at.to_rfc3339(),
        })),
    )
        .into_response()
}
