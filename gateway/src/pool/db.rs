//! The `Database`/`Pool` collaborator contract (§6). The concrete SQL
//! dialect, catalog queries, and result post-processing are out of scope
//! for the gateway core; this module defines the trait seam the router
//! and pool registry depend on, plus one concrete adapter built on the
//! corpus's own `tokio-postgres` fork (the crate `proxy` already uses,
//! repackaged here as `postgres-client` in that workspace).

use async_trait::async_trait;

use crate::config::DatabaseConfig;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("pool already closed")]
    AlreadyClosed,
}

/// A single, possibly-pooled handle to a database. Implementations decide
/// internally whether this wraps one connection or a real pool.
#[async_trait]
pub trait Pool: Send + Sync {
    /// Issues the collaborator's lightweight "am I alive" probe.
    async fn probe(&self) -> bool;

    /// Closes every underlying connection. Must be safe to call more than
    /// once; the registry guarantees it calls this at most once per
    /// logical pool, but a defensive implementation costs nothing.
    async fn close(&self);
}

/// Opens pools against a `DatabaseConfig`. The gateway core holds exactly
/// one `Database` implementation, chosen at startup.
#[async_trait]
pub trait Database: Send + Sync {
    async fn open_pool(&self, config: &DatabaseConfig) -> Result<std::sync::Arc<dyn Pool>, PoolError>;
}

/// Default adapter: one `tokio_postgres::Client` per pool entry, run on a
/// detached connection task the way `tokio_postgres::connect` requires.
pub struct PostgresDatabase;

struct PostgresPool {
    client: tokio::sync::Mutex<Option<tokio_postgres::Client>>,
    connection_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[async_trait]
impl Pool for PostgresPool {
    async fn probe(&self) -> bool {
        let guard = self.client.lock().await;
        match guard.as_ref() {
            Some(client) => client.simple_query("SELECT 1").await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) {
        self.client.lock().await.take();
        if let Some(handle) = self.connection_task.lock().await.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn open_pool(&self, config: &DatabaseConfig) -> Result<std::sync::Arc<dyn Pool>, PoolError> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .user(&config.username)
            .password(&config.password)
            .dbname(&config.database);

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| PoolError::Connect(e.to_string()))?;

        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "postgres connection task ended with error");
            }
        });

        Ok(std::sync::Arc::new(PostgresPool {
            client: tokio::sync::Mutex::new(Some(client)),
            connection_task: tokio::sync::Mutex::new(Some(connection_task)),
        }))
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// An in-memory fake used by pool-registry and router tests, so the
    /// lifecycle invariants (close-exactly-once, global-pool preservation)
    /// can be exercised without a real database.
    pub struct FakePool {
        pub close_count: Arc<AtomicUsize>,
        pub healthy: bool,
    }

    #[async_trait]
    impl Pool for FakePool {
        async fn probe(&self) -> bool {
            self.healthy
        }

        async fn close(&self) {
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub struct FakeDatabase {
        pub healthy: bool,
        pub fail_open: bool,
    }

    #[async_trait]
    impl Database for FakeDatabase {
        async fn open_pool(&self, _config: &DatabaseConfig) -> Result<Arc<dyn Pool>, PoolError> {
            if self.fail_open {
                return Err(PoolError::Connect("simulated failure".to_string()));
            }
            Ok(Arc::new(FakePool {
                close_count: Arc::new(AtomicUsize::new(0)),
                healthy: self.healthy,
            }))
        }
    }
}
