//! Cross-cutting HTTP middleware: security headers, CORS, the general
//! request throttle (component A), and the per-mode auth gate. CORS is
//! hand-rolled rather than `tower_http::cors::CorsLayer` because the
//! conditional origin-echo rule (empty list → no CORS headers at all;
//! non-empty list → echo iff present or wildcard) doesn't map onto that
//! layer's builder surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::{HeaderValue, Method, StatusCode};
use subtle::ConstantTimeEq;

use crate::auth::AuthMode;
use crate::config::RateLimitKeyMode;
use crate::error::GatewayError;
use crate::router::AuthContext;

use super::server::AppState;

const WILDCARD: &str = "*";

pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "x-xss-protection",
        HeaderValue::from_static("1; mode=block"),
    );
    response
}

pub async fn cors(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(&state, origin.as_deref(), response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(&state, origin.as_deref(), response.headers_mut());
    response
}

fn apply_cors_headers(state: &AppState, origin: Option<&str>, headers: &mut http::HeaderMap) {
    if state.cors_origins.is_empty() {
        return;
    }

    let wildcard_allowed = state.cors_origins.iter().any(|o| o == WILDCARD);
    let allowed = origin
        .filter(|o| wildcard_allowed || state.cors_origins.iter().any(|allowed| allowed == o));

    if let Some(origin) = allowed {
        if let Ok(value) = HeaderValue::from_str(origin) {
            headers.insert("access-control-allow-origin", value);
        }
        if !wildcard_allowed {
            headers.insert(
                "access-control-allow-credentials",
                HeaderValue::from_static("true"),
            );
        }
    } else if wildcard_allowed {
        headers.insert(
            "access-control-allow-origin",
            HeaderValue::from_static(WILDCARD),
        );
    }

    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Content-Type, Authorization, Mcp-Session-Id"),
    );
}

/// Resolves the caller's address honouring the operator's proxy-trust
/// policy: `X-Forwarded-For` is only consulted when the operator has
/// explicitly opted in, never blindly trusted.
pub fn client_ip(state: &AppState, request: &Request) -> String {
    if state.trust_proxy_headers {
        if let Some(forwarded) = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            if let Some(first) = forwarded.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

const RATE_LIMIT_GLOBAL_KEY: &str = "default";

/// Component A, applied as general request throttling ahead of the
/// router. Keyed per `state.rate_limit_key_mode` (§9 open question):
/// `Global` uses the constant key `"default"`, `PerIp` the caller's
/// address, `PerToken` the bearer token in `required`/`token` mode
/// (falling back to the IP when no token is present, e.g. `none` mode).
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let key = match state.rate_limit_key_mode {
        RateLimitKeyMode::Global => RATE_LIMIT_GLOBAL_KEY.to_string(),
        RateLimitKeyMode::PerIp => client_ip(&state, &request),
        RateLimitKeyMode::PerToken => request
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|s| s.to_string())
            .unwrap_or_else(|| client_ip(&state, &request)),
    };

    let decision = state.rate_limiter.check(&key);
    if !decision.allowed {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(serde_json::json!({
                "error": "too_many_requests",
                "error_description": "rate limit exceeded",
                "retry_after": decision.retry_after_secs,
            })),
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&decision.retry_after_secs.to_string()) {
            response.headers_mut().insert("retry-after", value);
        }
        return response;
    }

    next.run(request).await
}

/// Implements the auth gate from §4.G: `none` passes through, `token`
/// compares a static bearer constant-time, `required` validates against
/// the token manager. On success the resolved `AuthContext` is attached
/// to the request's extensions for downstream handlers/the router.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    let context = match state.auth_mode {
        AuthMode::None => Ok(AuthContext::None),
        AuthMode::Token => match (&bearer, &state.static_token) {
            (Some(token), Some(expected)) if constant_time_eq(token, expected) => {
                Ok(AuthContext::Token)
            }
            _ => Err(GatewayError::Unauthorized(
                "missing or invalid bearer token".to_string(),
            )),
        },
        AuthMode::Required => match bearer {
            Some(token) => match state.token_manager.validate(&token) {
                Ok(session) => Ok(AuthContext::Required(session)),
                Err(_) => Err(GatewayError::Unauthorized(
                    "invalid or expired token".to_string(),
                )),
            },
            None => Err(GatewayError::Unauthorized("missing bearer token".to_string())),
        },
    };

    match context {
        Ok(ctx) => {
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}
