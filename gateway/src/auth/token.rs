//! Component D: the token manager. Mints, validates, revokes, and expires
//! bearer credentials, each bound to a `DatabaseConfig`.
//!
//! DashMap-backed state plus a background sweeper, in the style of
//! `proxy::cache::project_info::ProjectInfoCache`; the admission check
//! against `max_sessions` is folded into a single compare-and-insert via
//! an `AtomicUsize` counter kept in lockstep with the map, closing the
//! TOCTOU gap called out in the design notes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;

use crate::config::DatabaseConfig;

pub type SessionId = String;

/// A single outstanding credential grant.
#[derive(Clone)]
pub struct TokenSession {
    pub token: String,
    pub config: DatabaseConfig,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub mcp_session_id: Option<SessionId>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Invalid token format")]
    InvalidFormat,
    #[error("Token not found or expired")]
    NotFound,
    #[error("Token expired")]
    Expired,
    #[error("maximum concurrent sessions reached")]
    SessionCap,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
}

type CleanupCallback = Arc<dyn Fn(String) + Send + Sync>;

pub struct TokenManager {
    tokens: DashMap<String, TokenSession>,
    count: AtomicUsize,
    max_sessions: usize,
    default_ttl: Duration,
    cleanup_callback: parking_lot::RwLock<Option<CleanupCallback>>,
}

const MAX_TTL_SECS: i64 = 86_400;
const MIN_TTL_SECS: i64 = 1;

impl TokenManager {
    pub fn new(max_sessions: usize, default_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            tokens: DashMap::new(),
            count: AtomicUsize::new(0),
            max_sessions,
            default_ttl,
            cleanup_callback: parking_lot::RwLock::new(None),
        })
    }

    pub fn set_cleanup_callback<F>(&self, f: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        *self.cleanup_callback.write() = Some(Arc::new(f));
    }

    fn invoke_cleanup(&self, token: &str) {
        if let Some(cb) = self.cleanup_callback.read().as_ref() {
            cb(token.to_string());
        }
    }

    pub fn size(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Advisory pre-check; the authoritative check lives in `create`.
    pub fn can_create(&self) -> bool {
        self.size() < self.max_sessions
    }

    fn mint_token() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        base64_url_no_pad(&bytes)
    }

    /// Atomically admits a new token if under `max_sessions`, mints it,
    /// and inserts the session. The admission check and the insertion are
    /// indivisible with respect to other `create` calls: the counter is
    /// reserved via CAS before any map mutation happens.
    pub fn create(
        &self,
        config: DatabaseConfig,
        ttl_secs: Option<i64>,
    ) -> Result<TokenSession, TokenError> {
        loop {
            let current = self.count.load(Ordering::SeqCst);
            if current >= self.max_sessions {
                return Err(TokenError::SessionCap);
            }
            if self
                .count
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }

        let now = Utc::now();
        let requested = ttl_secs.unwrap_or(self.default_ttl.as_secs() as i64);
        let clamped = requested.clamp(MIN_TTL_SECS, MAX_TTL_SECS);
        let expires_at = now + chrono::Duration::seconds(clamped);

        let token = Self::mint_token();
        let session = TokenSession {
            token: token.clone(),
            config,
            created_at: now,
            expires_at,
            last_used_at: now,
            mcp_session_id: None,
        };

        self.tokens.insert(token, session.clone());
        tracing::info!(token_created = true, expires_at = %expires_at, "token created");
        Ok(session)
    }

    pub fn validate(&self, token: &str) -> Result<TokenSession, TokenError> {
        if token.is_empty() {
            return Err(TokenError::InvalidFormat);
        }

        let now = Utc::now();
        // Decide and, in the live case, clone the session while still
        // holding the `get_mut` guard so a concurrent `revoke`/sweep can't
        // remove the entry between a check and a re-fetch.
        let validated = {
            let mut entry = self.tokens.get_mut(token).ok_or(TokenError::NotFound)?;
            if now > entry.expires_at {
                None
            } else {
                entry.last_used_at = now;
                Some(entry.clone())
            }
        };

        match validated {
            Some(session) => Ok(session),
            None => {
                // Guarded the same way `revoke`/`sweep_expired` are: the
                // sweeper may have already removed this same expired entry
                // between the check above and here, and only the remover
                // that actually wins gets to decrement the count and fire
                // the cleanup callback.
                if self.tokens.remove(token).is_some() {
                    self.count.fetch_sub(1, Ordering::SeqCst);
                    self.invoke_cleanup(token);
                }
                Err(TokenError::Expired)
            }
        }
    }

    /// Deletes the token if present, invoking the cleanup callback exactly
    /// once for a present token. Returns whether anything was deleted.
    pub fn revoke(&self, token: &str) -> bool {
        if self.tokens.remove(token).is_some() {
            self.count.fetch_sub(1, Ordering::SeqCst);
            self.invoke_cleanup(token);
            true
        } else {
            false
        }
    }

    /// Last-write-wins, per the recorded open-question decision.
    pub fn attach(&self, token: &str, mcp_session_id: SessionId) {
        if let Some(mut entry) = self.tokens.get_mut(token) {
            entry.mcp_session_id = Some(mcp_session_id);
        }
    }

    pub fn stats(&self) -> TokenStats {
        let now = Utc::now();
        let mut active = 0;
        let mut expired = 0;
        for entry in self.tokens.iter() {
            if entry.expires_at < now {
                expired += 1;
            } else {
                active += 1;
            }
        }
        TokenStats {
            total: active + expired,
            active,
            expired,
        }
    }

    /// Removes every token past its expiry, invoking the cleanup callback
    /// for each. Intended to run on a periodic sweep.
    fn sweep_expired(&self) {
        let now = Utc::now();
        let expired: Vec<String> = self
            .tokens
            .iter()
            .filter(|e| e.expires_at < now)
            .map(|e| e.key().clone())
            .collect();

        for token in expired {
            if self.tokens.remove(&token).is_some() {
                self.count.fetch_sub(1, Ordering::SeqCst);
                self.invoke_cleanup(&token);
            }
        }
    }

    pub fn spawn_sweeper(self: &Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => manager.sweep_expired(),
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    /// Invokes the cleanup callback for every remaining token and clears
    /// the map. Called once, from the lifecycle orchestrator's shutdown
    /// sequence, after the sweeper has already been cancelled.
    pub fn shutdown(&self) {
        let remaining: Vec<String> = self.tokens.iter().map(|e| e.key().clone()).collect();
        for token in remaining {
            if self.tokens.remove(&token).is_some() {
                self.invoke_cleanup(&token);
            }
        }
        self.count.store(0, Ordering::SeqCst);
    }
}

fn base64_url_no_pad(bytes: &[u8]) -> String {
    use base64::{alphabet, engine, Engine};
    let engine = engine::GeneralPurpose::new(&alphabet::URL_SAFE, engine::general_purpose::NO_PAD);
    engine.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn create_respects_max_sessions_cap() {
        let manager = TokenManager::new(2, Duration::from_secs(3600));
        assert!(manager.create(test_config(), None).is_ok());
        assert!(manager.create(test_config(), None).is_ok());
        assert!(matches!(
            manager.create(test_config(), None),
            Err(TokenError::SessionCap)
        ));
        assert_eq!(manager.size(), 2);
    }

    #[test]
    fn validate_rejects_expired_token_and_invokes_cleanup_once() {
        let manager = TokenManager::new(10, Duration::from_secs(3600));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        manager.set_cleanup_callback(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        let session = manager.create(test_config(), Some(1)).unwrap();
        // Simulate expiry by directly manipulating the stored entry.
        manager
            .tokens
            .get_mut(&session.token)
            .unwrap()
            .expires_at = Utc::now() - chrono::Duration::seconds(1);

        assert!(matches!(
            manager.validate(&session.token),
            Err(TokenError::Expired)
        ));
        assert!(matches!(
            manager.validate(&session.token),
            Err(TokenError::NotFound)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.size(), 0);
    }

    #[test]
    fn revoke_invokes_cleanup_exactly_once_and_is_idempotent() {
        let manager = TokenManager::new(10, Duration::from_secs(3600));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        manager.set_cleanup_callback(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        let session = manager.create(test_config(), None).unwrap();
        assert!(manager.revoke(&session.token));
        assert!(!manager.revoke(&session.token));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn attach_is_last_write_wins() {
        let manager = TokenManager::new(10, Duration::from_secs(3600));
        let session = manager.create(test_config(), None).unwrap();
        manager.attach(&session.token, "session-a".to_string());
        manager.attach(&session.token, "session-b".to_string());
        let updated = manager.validate(&session.token).unwrap();
        assert_eq!(updated.mcp_session_id, Some("session-b".to_string()));
    }
}
