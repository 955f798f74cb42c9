//! Error taxonomy for the gateway, modeled on the control-plane's
//! `ReportableError` / `UserFacingError` trait pair.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Coarse-grained classification used for logging/metrics grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedRequest,
    InvalidCredentials,
    Unauthorized,
    Throttled,
    NoSuchSession,
    WrongMethod,
    SessionCap,
    Internal,
}

/// Implemented by every error that can reach an HTTP handler boundary.
pub trait ReportableError: std::error::Error {
    fn error_kind(&self) -> ErrorKind;
}

/// Implemented by errors that carry a message safe to return to a caller.
pub trait UserFacingError: ReportableError {
    fn to_client_message(&self) -> String;
}

/// Top-level error type returned by router/session/pool/token operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("too many requests")]
    Throttled { retry_after_secs: u64 },

    #[error("session not found or expired")]
    NoSuchSession,

    #[error("wrong method or session mode: {0}")]
    WrongMethod(String),

    #[error("maximum concurrent sessions reached")]
    SessionCap,

    #[error("pool error: {0}")]
    Pool(#[from] crate::pool::PoolError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ReportableError for GatewayError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            GatewayError::MalformedRequest(_) => ErrorKind::MalformedRequest,
            GatewayError::InvalidCredentials => ErrorKind::InvalidCredentials,
            GatewayError::Unauthorized(_) => ErrorKind::Unauthorized,
            GatewayError::Throttled { .. } => ErrorKind::Throttled,
            GatewayError::NoSuchSession => ErrorKind::NoSuchSession,
            GatewayError::WrongMethod(_) => ErrorKind::WrongMethod,
            GatewayError::SessionCap => ErrorKind::SessionCap,
            GatewayError::Pool(_) => ErrorKind::Internal,
            GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl UserFacingError for GatewayError {
    fn to_client_message(&self) -> String {
        match self {
            GatewayError::MalformedRequest(msg) => msg.clone(),
            GatewayError::InvalidCredentials => "invalid credentials".to_string(),
            GatewayError::Unauthorized(msg) => msg.clone(),
            GatewayError::Throttled { .. } => "too many requests".to_string(),
            GatewayError::NoSuchSession => "Session not found or expired".to_string(),
            GatewayError::WrongMethod(msg) => msg.clone(),
            GatewayError::SessionCap => "maximum concurrent sessions reached".to_string(),
            GatewayError::Pool(_) => "database unavailable".to_string(),
            GatewayError::Internal(_) => "internal error".to_string(),
        }
    }
}

/// Maps a `GatewayError` onto the REST/JSON-RPC error shapes from the
/// error-handling design table. JSON-RPC shaped errors use `id: null`
/// since at this layer the originating request id may not be known;
/// handlers that have the id echo it by building the body themselves
/// instead of relying on this blanket impl.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let kind = self.error_kind();
        let message = self.to_client_message();

        tracing::warn!(error = %self, kind = ?kind, "request failed");

        match kind {
            ErrorKind::MalformedRequest => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_request", "error_description": message})),
            )
                .into_response(),
            ErrorKind::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid_credentials", "error_description": message})),
            )
                .into_response(),
            ErrorKind::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized", "error_description": message})),
            )
                .into_response(),
            ErrorKind::Throttled => {
                let retry_after = if let GatewayError::Throttled { retry_after_secs } = &self {
                    *retry_after_secs
                } else {
                    60
                };
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({
                        "error": "too_many_requests",
                        "error_description": message,
                        "retry_after": retry_after,
                    })),
                )
                    .into_response()
            }
            ErrorKind::NoSuchSession => (
                StatusCode::NOT_FOUND,
                Json(json!({"jsonrpc": "2.0", "error": {"code": -32001, "message": message}, "id": null})),
            )
                .into_response(),
            ErrorKind::WrongMethod => (
                StatusCode::BAD_REQUEST,
                Json(json!({"jsonrpc": "2.0", "error": {"code": -32000, "message": message}, "id": null})),
            )
                .into_response(),
            ErrorKind::SessionCap => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "service_unavailable", "error_description": message})),
            )
                .into_response(),
            ErrorKind::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"jsonrpc": "2.0", "error": {"code": -32603, "message": "internal error"}, "id": null})),
            )
                .into_response(),
        }
    }
}
