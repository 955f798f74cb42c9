//! Component E: the MCP session manager. Owns `(transport, server,
//! account)` triples and sweeps idle sessions, modeled on the
//! idle-timeout eviction in
//! `proxy::serverless::local_conn_pool::LocalConnPool` and the
//! DashMap-plus-background-sweeper shape of
//! `proxy::cache::project_info::ProjectInfoCache`.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::protocol::{ProtocolServer, Transport};

pub type SessionId = String;

pub struct McpSession {
    pub id: SessionId,
    pub server: Arc<dyn ProtocolServer>,
    pub transport: Arc<dyn Transport>,
    pub pool_key: String,
    pub created_at: Instant,
    last_accessed_at: Mutex<Instant>,
    active_requests: AtomicI64,
    is_closing: AtomicBool,
}

impl McpSession {
    pub fn active_requests(&self) -> i64 {
        self.active_requests.load(Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.is_closing.load(Ordering::SeqCst)
    }

    pub fn last_accessed_at(&self) -> Instant {
        *self.last_accessed_at.lock()
    }

    fn touch(&self) {
        *self.last_accessed_at.lock() = Instant::now();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub total: usize,
    pub stale: usize,
}

pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<McpSession>>,
    stale_timeout: Duration,
}

impl SessionManager {
    pub fn new(stale_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            stale_timeout,
        })
    }

    /// Mints a random session id, registers the session with
    /// `active_requests = 0, is_closing = false`. The transport-close hook
    /// described in the design is realised by callers invoking `close`
    /// when the underlying connection (e.g. an SSE stream) goes away,
    /// rather than a registration callback stored on the transport.
    pub fn create(
        &self,
        server: Arc<dyn ProtocolServer>,
        transport: Arc<dyn Transport>,
        pool_key: String,
    ) -> SessionId {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(McpSession {
            id: id.clone(),
            server,
            transport,
            pool_key,
            created_at: Instant::now(),
            last_accessed_at: Mutex::new(Instant::now()),
            active_requests: AtomicI64::new(0),
            is_closing: AtomicBool::new(false),
        });
        self.sessions.insert(id.clone(), session);
        id
    }

    /// Returns the session only if it exists and is not closing; touches
    /// `last_accessed_at` on a hit.
    pub fn get(&self, id: &str) -> Option<Arc<McpSession>> {
        let session = self.sessions.get(id)?.clone();
        if session.is_closing() {
            return None;
        }
        session.touch();
        Some(session)
    }

    pub fn begin(&self, id: &str) -> bool {
        match self.sessions.get(id) {
            Some(session) => {
                session.active_requests.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// A decrement must never go below zero; `fetch_update` enforces that
    /// under concurrent `end` calls instead of relying on a plain
    /// `fetch_sub` that could underflow if called more times than `begin`.
    pub fn end(&self, id: &str) {
        if let Some(session) = self.sessions.get(id) {
            let _ = session.active_requests.fetch_update(
                Ordering::SeqCst,
                Ordering::SeqCst,
                |v| Some((v - 1).max(0)),
            );
        }
    }

    /// If absent or already closing, returns false. Otherwise marks the
    /// session closing, closes transport and server (each exactly once
    /// per session, guaranteed by removing the entry from the map right
    /// after), then deletes it.
    pub async fn close(&self, id: &str) -> bool {
        let session = match self.sessions.get(id) {
            Some(s) => s.clone(),
            None => return false,
        };
        if session.is_closing.swap(true, Ordering::SeqCst) {
            return false;
        }

        session.transport.close().await;
        session.server.close().await;
        self.sessions.remove(id);
        true
    }

    /// Closes every session whose `pool_key` equals `key`; used when a
    /// token dies so its sessions do not outlive their pool.
    pub async fn close_by_pool_key(&self, key: &str) {
        let ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|e| e.pool_key == key)
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            self.close(&id).await;
        }
    }

    pub fn stats(&self) -> SessionStats {
        let now = Instant::now();
        let mut stale = 0;
        let mut total = 0;
        for entry in self.sessions.iter() {
            total += 1;
            if now.saturating_duration_since(entry.last_accessed_at()) > self.stale_timeout {
                stale += 1;
            }
        }
        SessionStats { total, stale }
    }

    /// Periodically closes sessions that are idle (`!is_closing &&
    /// active_requests == 0`) and have exceeded the stale timeout. Active
    /// sessions are never evicted regardless of how long they have been
    /// open.
    async fn sweep_idle(&self) {
        let now = Instant::now();
        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|e| {
                !e.is_closing()
                    && e.active_requests() == 0
                    && now.saturating_duration_since(e.last_accessed_at()) > self.stale_timeout
            })
            .map(|e| e.key().clone())
            .collect();
        for id in idle {
            self.close(&id).await;
        }
    }

    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.sweep_idle().await,
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.close(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::db::test_support::FakePool;
    use crate::pool::Pool;
    use crate::protocol::McpGatewayServer;
    use std::sync::atomic::AtomicUsize;

    fn fake_pool() -> Arc<dyn Pool> {
        Arc::new(FakePool {
            close_count: Arc::new(AtomicUsize::new(0)),
            healthy: true,
        })
    }

    #[tokio::test]
    async fn create_then_get_returns_session_until_closed() {
        let manager = SessionManager::new(Duration::from_secs(1800));
        let server = McpGatewayServer::new(fake_pool());
        let id = manager.create(server.clone(), server, "global".to_string());

        assert!(manager.get(&id).is_some());
        assert!(manager.close(&id).await);
        assert!(manager.get(&id).is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_returns_false_on_second_call() {
        let manager = SessionManager::new(Duration::from_secs(1800));
        let server = McpGatewayServer::new(fake_pool());
        let id = manager.create(server.clone(), server, "global".to_string());

        assert!(manager.close(&id).await);
        assert!(!manager.close(&id).await);
    }

    #[tokio::test]
    async fn end_never_goes_below_zero() {
        let manager = SessionManager::new(Duration::from_secs(1800));
        let server = McpGatewayServer::new(fake_pool());
        let id = manager.create(server.clone(), server, "global".to_string());

        manager.end(&id);
        manager.end(&id);
        let session = manager.get(&id).unwrap();
        assert_eq!(session.active_requests(), 0);
    }

    #[tokio::test]
    async fn sweep_never_evicts_a_session_with_active_requests() {
        let manager = SessionManager::new(Duration::from_millis(1));
        let server = McpGatewayServer::new(fake_pool());
        let id = manager.create(server.clone(), server, "global".to_string());
        manager.begin(&id);

        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.sweep_idle().await;

        assert!(manager.get(&id).is_some());
    }

    #[tokio::test]
    async fn close_by_pool_key_closes_only_matching_sessions() {
        let manager = SessionManager::new(Duration::from_secs(1800));
        let server_a = McpGatewayServer::new(fake_pool());
        let server_b = McpGatewayServer::new(fake_pool());
        let id_a = manager.create(server_a.clone(), server_a, "tok-a".to_string());
        let id_b = manager.create(server_b.clone(), server_b, "tok-b".to_string());

        manager.close_by_pool_key("tok-a").await;

        assert!(manager.get(&id_a).is_none());
        assert!(manager.get(&id_b).is_some());
    }
}
