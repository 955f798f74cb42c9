//! Component F: the request router. Converts a well-formed, already
//! authenticated request into the correct `(config, poolKey, session?)`
//! triple and drives the stateful/stateless POST algorithms, including
//! the partial-failure rollback ordering from the error-handling design:
//! session, then server, then per-token pool — and never the global pool.

use std::sync::Arc;

use crate::auth::{AuthMode, TokenManager, TokenSession};
use crate::config::{DatabaseConfig, SessionMode};
use crate::error::GatewayError;
use crate::pool::{PoolRegistry, GLOBAL_POOL_KEY};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, ProtocolServerFactory};
use crate::session::{SessionId, SessionManager};

/// The already-validated authentication context a caller carries into the
/// router; constructed by the HTTP auth middleware, never by the router.
#[derive(Clone)]
pub enum AuthContext {
    Required(TokenSession),
    Token,
    None,
}

pub struct Router {
    auth_mode: AuthMode,
    env_db_config: DatabaseConfig,
    session_mode: SessionMode,
    pool_registry: Arc<PoolRegistry>,
    session_manager: Arc<SessionManager>,
    token_manager: Arc<TokenManager>,
    protocol_factory: Arc<dyn ProtocolServerFactory>,
}

fn is_initialize(request: &JsonRpcRequest) -> bool {
    request.method == "initialize"
}

impl Router {
    pub fn new(
        auth_mode: AuthMode,
        env_db_config: DatabaseConfig,
        session_mode: SessionMode,
        pool_registry: Arc<PoolRegistry>,
        session_manager: Arc<SessionManager>,
        token_manager: Arc<TokenManager>,
        protocol_factory: Arc<dyn ProtocolServerFactory>,
    ) -> Self {
        Self {
            auth_mode,
            env_db_config,
            session_mode,
            pool_registry,
            session_manager,
            token_manager,
            protocol_factory,
        }
    }

    /// Decision table in §4.F: `required` uses the token's own config and
    /// the token itself as pool key; `token`/`none` share the
    /// environment-loaded config under the `"global"` key.
    fn resolve(&self, auth: &AuthContext) -> (DatabaseConfig, String) {
        match auth {
            AuthContext::Required(session) => (session.config.clone(), session.token.clone()),
            AuthContext::Token | AuthContext::None => {
                (self.env_db_config.clone(), GLOBAL_POOL_KEY.to_string())
            }
        }
    }

    pub async fn handle_post(
        &self,
        auth: &AuthContext,
        session_id_header: Option<&str>,
        request: JsonRpcRequest,
    ) -> Result<(JsonRpcResponse, Option<SessionId>), GatewayError> {
        let (config, pool_key) = self.resolve(auth);

        match self.session_mode {
            SessionMode::Stateful => {
                self.handle_stateful_post(auth, &config, &pool_key, session_id_header, request)
                    .await
            }
            SessionMode::Stateless => {
                let response = self.handle_stateless_post(&config, &pool_key, request).await?;
                Ok((response, None))
            }
        }
    }

    async fn handle_stateful_post(
        &self,
        auth: &AuthContext,
        config: &DatabaseConfig,
        pool_key: &str,
        session_id_header: Option<&str>,
        request: JsonRpcRequest,
    ) -> Result<(JsonRpcResponse, Option<SessionId>), GatewayError> {
        if let Some(id) = session_id_header {
            let session = self
                .session_manager
                .get(id)
                .ok_or(GatewayError::NoSuchSession)?;

            if !self.session_manager.begin(id) {
                return Err(GatewayError::NoSuchSession);
            }
            // `end` always runs, including on an error path, matching the
            // finally-style guard the design requires for request
            // accounting.
            let response = session.transport.handle_request(request).await;
            self.session_manager.end(id);
            return Ok((response, Some(id.to_string())));
        }

        if !is_initialize(&request) {
            return Err(GatewayError::WrongMethod(
                "Session ID required for non-initialize requests".to_string(),
            ));
        }

        self.pool_registry.ensure(pool_key, config).await?;

        let pool = self.pool_registry.get(pool_key).ok_or_else(|| {
            GatewayError::Internal(anyhow::anyhow!("pool vanished immediately after ensure"))
        })?;
        let (server, transport) = self.protocol_factory.create(pool_key.to_string(), pool);
        let id = self
            .session_manager
            .create(server, transport.clone(), pool_key.to_string());

        if let AuthContext::Required(token_session) = auth {
            self.token_manager.attach(&token_session.token, id.clone());
        }

        let response = transport.handle_request(request).await;
        Ok((response, Some(id)))
    }

    async fn handle_stateless_post(
        &self,
        config: &DatabaseConfig,
        pool_key: &str,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, GatewayError> {
        self.pool_registry.ensure(pool_key, config).await?;
        let pool = self.pool_registry.get(pool_key).ok_or_else(|| {
            GatewayError::Internal(anyhow::anyhow!("pool vanished immediately after ensure"))
        })?;
        let (server, transport) = self.protocol_factory.create(pool_key.to_string(), pool);

        let response = transport.handle_request(request).await;

        // One-shot: close server and transport, but never the pool — in
        // `required` mode it belongs to the token and outlives the
        // request, in the weak modes it is `"global"`.
        server.close().await;
        transport.close().await;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::db::test_support::FakeDatabase;
    use crate::protocol::DefaultProtocolServerFactory;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_config() -> DatabaseConfig {
        DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            username: "alice".to_string(),
            password: "secret".to_string(),
            database: "*LOCAL".to_string(),
            schema: None,
            options: HashMap::new(),
        }
    }

    fn build_router(session_mode: SessionMode) -> Router {
        let pool_registry = PoolRegistry::new(Arc::new(FakeDatabase {
            healthy: true,
            fail_open: false,
        }));
        let session_manager = SessionManager::new(Duration::from_secs(1800));
        let token_manager = TokenManager::new(100, Duration::from_secs(3600));
        Router::new(
            AuthMode::None,
            test_config(),
            session_mode,
            pool_registry,
            session_manager,
            token_manager,
            Arc::new(DefaultProtocolServerFactory),
        )
    }

    fn initialize_request() -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: "initialize".to_string(),
            params: None,
            id: Some(json!(1)),
        }
    }

    #[tokio::test]
    async fn stateful_initialize_without_header_creates_a_session() {
        let router = build_router(SessionMode::Stateful);
        let (response, session_id) = router
            .handle_post(&AuthContext::None, None, initialize_request())
            .await
            .unwrap();
        assert!(response.result.is_some());
        assert!(session_id.is_some());
    }

    #[tokio::test]
    async fn stateful_non_initialize_without_header_is_rejected() {
        let router = build_router(SessionMode::Stateful);
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: "tools/call".to_string(),
            params: None,
            id: Some(json!(2)),
        };
        let result = router.handle_post(&AuthContext::None, None, request).await;
        assert!(matches!(result, Err(GatewayError::WrongMethod(_))));
    }

    #[tokio::test]
    async fn stateful_unknown_session_header_returns_no_such_session() {
        let router = build_router(SessionMode::Stateful);
        let result = router
            .handle_post(&AuthContext::None, Some("not-a-real-session"), initialize_request())
            .await;
        assert!(matches!(result, Err(GatewayError::NoSuchSession)));
    }

    #[tokio::test]
    async fn stateless_post_never_registers_a_session() {
        let router = build_router(SessionMode::Stateless);
        let (response, session_id) = router
            .handle_post(&AuthContext::None, None, initialize_request())
            .await
            .unwrap();
        assert!(response.result.is_some());
        assert!(session_id.is_none());
    }

    #[tokio::test]
    async fn global_pool_survives_a_second_sessions_independent_lifecycle() {
        // Exercises invariant #4: the "global" pool is never closed by a
        // per-session cleanup path. Two sessions share it; closing one
        // (as if its request failed or it went idle) must not affect the
        // other or tear down the shared pool.
        let router = build_router(SessionMode::Stateful);
        let (_, first_id) = router
            .handle_post(&AuthContext::None, None, initialize_request())
            .await
            .unwrap();
        let (_, second_id) = router
            .handle_post(&AuthContext::None, None, initialize_request())
            .await
            .unwrap();

        router
            .session_manager
            .close(&second_id.unwrap())
            .await;

        assert!(router.pool_registry.contains(GLOBAL_POOL_KEY));
        let first_id = first_id.unwrap();
        let ping = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: "tools/call".to_string(),
            params: Some(json!({"name": "ping"})),
            id: Some(json!(3)),
        };
        let (response, _) = router
            .handle_post(&AuthContext::None, Some(&first_id), ping)
            .await
            .unwrap();
        assert!(response.result.is_some());
    }
}
