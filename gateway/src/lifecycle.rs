//! Component H: startup/shutdown orchestration. Signal collapsing and
//! the cancellation-token-driven shutdown sequence are modeled on
//! `proxy`'s `local_proxy` binary (`CancellationToken` + `JoinSet`
//! maintenance tasks), generalized to the gateway's own teardown order.

use std::io;
use std::path::Path;
use std::sync::Arc;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::Service;

use crate::auth::TokenManager;
use crate::pool::PoolRegistry;
use crate::session::SessionManager;

/// Waits for the first of SIGINT/SIGTERM and cancels `token`. Multiple
/// signals collapse onto the same cancellation; a signal arriving after
/// the token is already cancelled is a no-op.
pub async fn wait_for_shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    token.cancel();
}

pub async fn bind_listener(host: &str, port: u16) -> io::Result<TcpListener> {
    TcpListener::bind((host, port)).await
}

pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> anyhow::Result<rustls::ServerConfig> {
    let cert_file = std::fs::File::open(cert_path)?;
    let key_file = std::fs::File::open(key_path)?;
    let mut cert_reader = io::BufReader::new(cert_file);
    let mut key_reader = io::BufReader::new(key_file);

    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(config)
}

/// Accepts connections off `listener`, terminates TLS with
/// `tls_config`, and serves `app` on each one until `shutdown` fires.
/// There is no `axum::serve` equivalent for a TLS listener, so this
/// drives `hyper_util`'s auto (h1/h2) connection builder directly, the
/// way `proxy`'s own server-side TLS termination does for client
/// postgres connections.
pub async fn serve_tls(
    listener: TcpListener,
    tls_config: Arc<rustls::ServerConfig>,
    app: axum::Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let acceptor = TlsAcceptor::from(tls_config);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                let acceptor = acceptor.clone();
                let app = app.clone();

                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::warn!(error = %e, %peer_addr, "TLS handshake failed");
                            return;
                        }
                    };

                    let service = hyper::service::service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
                        let mut app = app.clone();
                        let mut request = request.map(axum::body::Body::new);
                        request
                            .extensions_mut()
                            .insert(axum::extract::ConnectInfo(peer_addr));
                        async move { app.call(request).await }
                    });

                    if let Err(e) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(tls_stream), service)
                        .await
                    {
                        tracing::warn!(error = %e, %peer_addr, "connection error");
                    }
                });
            }
        }
    }
}

/// Implements the exact shutdown order from the lifecycle design:
/// sessions, then tokens (cascading per-token pool close via the
/// cleanup callback), then the global pool and any stragglers.
pub async fn shutdown(
    session_manager: &Arc<SessionManager>,
    token_manager: &Arc<TokenManager>,
    pool_registry: &Arc<PoolRegistry>,
) {
    tracing::info!("shutdown: closing sessions");
    session_manager.shutdown().await;

    tracing::info!("shutdown: closing tokens");
    token_manager.shutdown();

    tracing::info!("shutdown: closing remaining pools");
    pool_registry.close_all().await;
}
