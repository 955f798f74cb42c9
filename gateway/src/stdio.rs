//! Component F/G's stdio counterpart: a trivial consumer of the same
//! `ProtocolServer`/`Transport` pair the HTTP surface drives, for
//! `MCP_TRANSPORT=stdio`/`both`. One line of stdin is one JSON-RPC
//! request, one line of stdout is one JSON-RPC response — no sessions,
//! no auth gate, no rate limiting, since a stdio client is already a
//! single trusted local process talking to a single pool.

use std::sync::Arc;

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::DatabaseConfig;
use crate::pool::{PoolRegistry, GLOBAL_POOL_KEY};
use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, ProtocolServer, ProtocolServerFactory, Transport,
    ERR_BAD_REQUEST,
};

/// Ensures the global pool, builds one `ProtocolServer`/`Transport` pair
/// bound to it, and pumps request/response lines until stdin closes.
/// Runs to completion on EOF rather than a cancellation signal; the
/// caller tears down the pool registry afterwards the same as the HTTP
/// path does.
pub async fn run(
    env_db_config: &DatabaseConfig,
    pool_registry: Arc<PoolRegistry>,
    factory: Arc<dyn ProtocolServerFactory>,
) -> anyhow::Result<()> {
    pool_registry.ensure(GLOBAL_POOL_KEY, env_db_config).await?;
    let pool = pool_registry.get(GLOBAL_POOL_KEY).expect("just ensured");

    let (server, transport) = factory.create(GLOBAL_POOL_KEY.to_string(), pool);

    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    tracing::info!("stdio transport ready, reading JSON-RPC requests from stdin");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => {
                let notification = request.is_notification();
                let response = transport.handle_request(request).await;
                if notification {
                    continue;
                }
                response
            }
            Err(e) => JsonRpcResponse::err(
                serde_json::Value::Null,
                ERR_BAD_REQUEST,
                format!("malformed JSON-RPC request: {e}"),
            ),
        };

        let encoded = serde_json::to_string(&response)?;
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    transport.close().await;
    server.close().await;
    tracing::info!("stdio transport closed (stdin EOF)");
    Ok(())
}
