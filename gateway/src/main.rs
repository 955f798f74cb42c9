//! Binary entry point. Startup order follows the lifecycle design:
//! configuration, logging, the component singletons, route assembly,
//! bind, serve, and on the first shutdown signal, the teardown sequence
//! in `lifecycle::shutdown`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio_util::sync::CancellationToken;

use mcp_db_gateway::auth::{AuthThrottle, TokenManager};
use mcp_db_gateway::config::{GatewayConfig, Transport};
use mcp_db_gateway::pool::{Database, PoolRegistry};
use mcp_db_gateway::protocol::DefaultProtocolServerFactory;
use mcp_db_gateway::rate_limit::{RateLimitConfig, RateLimiter};
use mcp_db_gateway::router::Router as RequestRouter;
use mcp_db_gateway::session::SessionManager;
use mcp_db_gateway::{auth, http, lifecycle, logging, pool, stdio};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = GatewayConfig::parse();
    logging::init(&cli.log_level, &cli.log_format);
    cli.validate()?;

    let env_db_config = cli.database_config()?;
    tracing::info!(config = ?env_db_config, "starting mcp-db-gateway");

    let shutdown_token = CancellationToken::new();

    let database: Arc<dyn Database> = Arc::new(pool::db::PostgresDatabase);
    let pool_registry = PoolRegistry::new(database);
    let session_manager = SessionManager::new(Duration::from_secs(30 * 60));
    let token_manager = TokenManager::new(cli.max_sessions, Duration::from_secs(cli.token_expiry_secs));
    let auth_throttle = Arc::new(AuthThrottle::new(5, Duration::from_secs(60)));
    let rate_limit_enabled = cli.rate_limit_enabled;
    let rate_limiter = RateLimiter::new(RateLimitConfig {
        window: Duration::from_millis(cli.rate_limit_window_ms),
        max_requests: cli.rate_limit_max_requests,
        enabled: rate_limit_enabled,
    });

    // Shutdown order requires cascading per-token pool close via the
    // token's own cleanup callback, registered only under `required`
    // mode where the token IS the pool key.
    if matches!(cli.auth_mode, auth::AuthMode::Required) {
        let pool_registry_for_cleanup = Arc::clone(&pool_registry);
        let session_manager_for_cleanup = Arc::clone(&session_manager);
        token_manager.set_cleanup_callback(move |token| {
            let pool_registry = Arc::clone(&pool_registry_for_cleanup);
            let session_manager = Arc::clone(&session_manager_for_cleanup);
            tokio::spawn(async move {
                session_manager.close_by_pool_key(&token).await;
                pool_registry.close(&token).await;
            });
        });
    }

    session_manager.spawn_sweeper(Duration::from_secs(60), shutdown_token.clone());
    token_manager.spawn_sweeper(shutdown_token.clone());
    rate_limiter.spawn_sweeper(shutdown_token.clone());

    let serves_http = matches!(cli.transport, Transport::Http | Transport::Both);
    let serves_stdio = matches!(cli.transport, Transport::Stdio | Transport::Both);

    // `stdio` talks to the global pool directly through its own
    // `ProtocolServer`/`Transport` pair (no auth gate, no sessions); it
    // runs as its own task so `both` can serve it alongside HTTP.
    let stdio_task = if serves_stdio {
        let env_db_config = env_db_config.clone();
        let pool_registry = Arc::clone(&pool_registry);
        let factory = Arc::new(DefaultProtocolServerFactory);
        Some(tokio::spawn(async move {
            stdio::run(&env_db_config, pool_registry, factory).await
        }))
    } else {
        None
    };

    if serves_http {
        let request_router = Arc::new(RequestRouter::new(
            cli.auth_mode,
            env_db_config.clone(),
            cli.session_mode,
            Arc::clone(&pool_registry),
            Arc::clone(&session_manager),
            Arc::clone(&token_manager),
            Arc::new(DefaultProtocolServerFactory),
        ));

        let state = Arc::new(http::AppState {
            router: request_router,
            auth_mode: cli.auth_mode,
            token_manager: Arc::clone(&token_manager),
            auth_throttle,
            rate_limiter,
            rate_limit_key_mode: cli.rate_limit_key_mode,
            pool_registry: Arc::clone(&pool_registry),
            session_manager: Arc::clone(&session_manager),
            session_mode: cli.session_mode,
            cors_origins: cli.cors_allowed_origins(),
            trust_proxy_headers: cli.trust_proxy_headers,
            static_token: cli.auth_token.clone(),
            tls_enabled: cli.tls_enabled,
            max_sessions: cli.max_sessions,
            env_db_config,
            query_default_limit: cli.query_default_limit,
            query_max_limit: cli.query_max_limit,
            started_at: Instant::now(),
        });

        let app = http::build_router(state);
        let listener = lifecycle::bind_listener(&cli.http_host, cli.http_port).await?;
        if !cli.tls_enabled && cli.http_host != "127.0.0.1" && cli.http_host != "localhost" {
            tracing::warn!(host = %cli.http_host, "serving plain HTTP on a non-loopback address");
        }
        tracing::info!(host = %cli.http_host, port = cli.http_port, tls = cli.tls_enabled, "listening");

        let signal_token = shutdown_token.clone();
        if cli.tls_enabled {
            let tls_config = lifecycle::load_tls_config(
                cli.tls_cert_path.as_deref().expect("validated at startup"),
                cli.tls_key_path.as_deref().expect("validated at startup"),
            )?;
            let serve_shutdown = shutdown_token.clone();
            tokio::select! {
                result = lifecycle::serve_tls(listener, Arc::new(tls_config), app, serve_shutdown) => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "server error");
                    }
                }
                () = lifecycle::wait_for_shutdown_signal(signal_token) => {}
            }
        } else {
            let serve_shutdown = shutdown_token.clone();
            let server = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await });

            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "server error");
                    }
                }
                () = lifecycle::wait_for_shutdown_signal(signal_token) => {}
            }
        }

        // `both`: the stdio task runs detached alongside HTTP; once the
        // HTTP side has shut down there's nothing left to serve it to.
        if let Some(task) = stdio_task {
            task.abort();
        }
    } else if let Some(task) = stdio_task {
        // Stdio-only: there is no listener or signal loop to race against,
        // so the process simply runs until stdin closes.
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "stdio transport error"),
            Err(e) => tracing::error!(error = %e, "stdio transport task panicked"),
        }
    }

    lifecycle::shutdown(&session_manager, &token_manager, &pool_registry).await;
    tracing::info!("shutdown complete");
    Ok(())
}
