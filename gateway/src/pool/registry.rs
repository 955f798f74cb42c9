//! Component C: the pool registry. Builds and tears down database pools
//! keyed by an opaque string, with the literal `"global"` carrying the
//! shared-across-sessions semantics the router depends on.
//!
//! Follows the suspension-to-mutation boundary pattern the design notes
//! require, modeled directly on
//! `proxy::serverless::local_conn_pool::EndpointConnPool::put`: take the
//! lock, inspect, release, then do I/O (pool build / close) outside it.

use std::sync::Arc;

use dashmap::DashMap;

use super::db::{Database, Pool, PoolError};
use crate::config::DatabaseConfig;

pub const GLOBAL_POOL_KEY: &str = "global";

pub struct PoolRegistry {
    database: Arc<dyn Database>,
    entries: DashMap<String, Arc<dyn Pool>>,
}

impl PoolRegistry {
    pub fn new(database: Arc<dyn Database>) -> Arc<Self> {
        Arc::new(Self {
            database,
            entries: DashMap::new(),
        })
    }

    /// If a pool exists for `key`, does nothing. Otherwise builds one via
    /// the `Database` collaborator and stores it. Building happens outside
    /// any lock on `entries`; a racing `ensure` for the same key may build
    /// twice, in which case the loser's pool is immediately closed rather
    /// than retained, so the invariant "exactly one pool per live key"
    /// still holds from the caller's perspective.
    pub async fn ensure(&self, key: &str, config: &DatabaseConfig) -> Result<(), PoolError> {
        if self.entries.contains_key(key) {
            return Ok(());
        }

        let pool = self.database.open_pool(config).await?;

        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                // Lost the race: another task already installed a pool.
                pool.close().await;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(pool);
            }
        }
        Ok(())
    }

    /// Closes and forgets the pool for `key`. A missing key is a no-op.
    /// Close errors are swallowed (the caller only gets a bool back from
    /// the probe surface, never from close) since the registry must never
    /// loop on a dead resource.
    pub async fn close(&self, key: &str) {
        if let Some((_, pool)) = self.entries.remove(key) {
            pool.close().await;
        }
    }

    pub async fn close_all(&self) {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.close(&key).await;
        }
    }

    pub async fn test(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(pool) => pool.probe().await,
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Fetches the pool handle for `key`, if one has been `ensure`d.
    pub fn get(&self, key: &str) -> Option<Arc<dyn Pool>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::db::test_support::FakeDatabase;
    use std::collections::HashMap;

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

    #[tokio::test]
    async fn ensure_is_idempotent_for_the_same_key() {
        let registry = PoolRegistry::new(Arc::new(FakeDatabase {
            healthy: true,
            fail_open: false,
        }));
        registry.ensure("global", &test_config()).await.unwrap();
        registry.ensure("global", &test_config()).await.unwrap();
        assert!(registry.contains("global"));
    }

    #[tokio::test]
    async fn close_on_missing_key_is_a_no_op() {
        let registry = PoolRegistry::new(Arc::new(FakeDatabase {
            healthy: true,
            fail_open: false,
        }));
        registry.close("nonexistent").await;
    }

    #[tokio::test]
    async fn close_removes_entry_so_it_is_not_double_closed() {
        let registry = PoolRegistry::new(Arc::new(FakeDatabase {
            healthy: true,
            fail_open: false,
        }));
        registry.ensure("tok-1", &test_config()).await.unwrap();
        registry.close("tok-1").await;
        assert!(!registry.contains("tok-1"));
        // Second close is a no-op, not a double-close of the same pool.
        registry.close("tok-1").await;
    }

    #[tokio::test]
    async fn test_probe_reflects_pool_health() {
        let registry = PoolRegistry::new(Arc::new(FakeDatabase {
            healthy: false,
            fail_open: false,
        }));
        registry.ensure("tok-1", &test_config()).await.unwrap();
        assert!(!registry.test("tok-1").await);
    }

    #[tokio::test]
    async fn ensure_surfaces_connection_failure() {
        let registry = PoolRegistry::new(Arc::new(FakeDatabase {
            healthy: true,
            fail_open: true,
        }));
        assert!(registry.ensure("tok-1", &test_config()).await.is_err());
        assert!(!registry.contains("tok-1"));
    }
}
