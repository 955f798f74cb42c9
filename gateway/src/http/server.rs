//! Router assembly. Modeled on `compute_tools::http::server::serve`'s
//! `ServiceBuilder`-layered `axum::Router`, adapted to a multi-route,
//! stateful surface instead of a single compute-agent endpoint set.

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{middleware, Router as AxumRouter};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthMode, AuthThrottle, TokenManager};
use crate::config::{DatabaseConfig, RateLimitKeyMode, SessionMode};
use crate::pool::PoolRegistry;
use crate::rate_limit::RateLimiter;
use crate::router::Router as RequestRouter;
use crate::session::SessionManager;

use super::routes;

pub struct AppState {
    pub router: Arc<RequestRouter>,
    pub auth_mode: AuthMode,
    pub token_manager: Arc<TokenManager>,
    pub auth_throttle: Arc<AuthThrottle>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_limit_key_mode: RateLimitKeyMode,
    pub pool_registry: Arc<PoolRegistry>,
    pub session_manager: Arc<SessionManager>,
    pub session_mode: SessionMode,
    pub cors_origins: Vec<String>,
    pub trust_proxy_headers: bool,
    pub static_token: Option<String>,
    pub tls_enabled: bool,
    pub max_sessions: usize,
    pub env_db_config: DatabaseConfig,
    pub query_default_limit: u32,
    pub query_max_limit: u32,
    pub started_at: Instant,
}

async fn handle_404() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

pub fn build_router(state: Arc<AppState>) -> AxumRouter {
    // `/mcp` sits behind the per-mode auth gate; `/auth` does not — it is
    // the endpoint that *mints* the credential the gate checks, so
    // requiring one already present would be circular. Its own
    // mode-specific gating (404 outside `required`, throttle inside it)
    // lives in `routes::auth::post_auth`.
    let mcp_routes = AxumRouter::new()
        .route("/mcp", post(routes::mcp::post_mcp))
        .route("/mcp", get(routes::mcp::get_mcp))
        .route("/mcp", delete(routes::mcp::delete_mcp))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            super::middleware::authenticate,
        ));

    // Component A's general request throttle gates the two operational
    // endpoints (`/auth`, `/mcp`); `/health` and `/openapi.json` stay
    // open for monitoring the way the design calls them out as such.
    let rate_limited_routes = AxumRouter::new()
        .route("/auth", post(routes::auth::post_auth))
        .merge(mcp_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            super::middleware::rate_limit,
        ));

    AxumRouter::new()
        .route("/health", get(routes::health::get_health))
        .route("/openapi.json", get(routes::openapi::get_openapi))
        .merge(rate_limited_routes)
        .fallback(handle_404)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(middleware::from_fn(super::middleware::security_headers))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    super::middleware::cors,
                )),
        )
        .with_state(state)
}
