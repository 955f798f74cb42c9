//! Component A: fixed-window rate limiter, keyed, with a background sweep.
//!
//! Structurally modeled on the corpus's DashMap-backed caches (see
//! `proxy::cache::project_info::ProjectInfoCache`): a flat map guarded by
//! `DashMap`'s internal sharding, plus a periodic sweeper task that evicts
//! entries whose window has lapsed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            max_requests: 100,
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    /// Parses the `RATE_LIMIT_ENABLED` env convention: the literal strings
    /// `"false"` and `"0"` disable the limiter, anything else is truthy.
    pub fn enabled_from_str(raw: &str) -> bool {
        !(raw.eq_ignore_ascii_case("false") || raw == "0")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CheckResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: Instant,
    pub retry_after_secs: u64,
    pub limit: u32,
    pub window_ms: u64,
}

struct RateWindow {
    count: u32,
    window_start: Instant,
}

/// A single fixed-window counter keyed by an arbitrary string (token,
/// client IP, or the constant `"default"` depending on configuration).
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    config: RateLimitConfig,
    sweeper_running: AtomicBool,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Arc<Self> {
        Arc::new(Self {
            windows: DashMap::new(),
            config,
            sweeper_running: AtomicBool::new(false),
        })
    }

    fn limit_shape(&self, remaining: u32, reset_at: Instant, allowed: bool) -> CheckResult {
        let retry_after_secs = if allowed {
            0
        } else {
            reset_at
                .saturating_duration_since(Instant::now())
                .as_secs_f64()
                .ceil() as u64
        };
        CheckResult {
            allowed,
            remaining,
            reset_at,
            retry_after_secs,
            limit: self.config.max_requests,
            window_ms: self.config.window.as_millis() as u64,
        }
    }

    pub fn check(&self, key: &str) -> CheckResult {
        if !self.config.enabled {
            return self.limit_shape(self.config.max_requests, Instant::now(), true);
        }

        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindow {
                count: 0,
                window_start: now,
            });

        if now.saturating_duration_since(entry.window_start) >= self.config.window {
            entry.window_start = now;
            entry.count = 0;
        }

        let reset_at = entry.window_start + self.config.window;
        if entry.count < self.config.max_requests {
            entry.count += 1;
            self.limit_shape(self.config.max_requests - entry.count, reset_at, true)
        } else {
            self.limit_shape(0, reset_at, false)
        }
    }

    pub fn peek(&self, key: &str) -> CheckResult {
        if !self.config.enabled {
            return self.limit_shape(self.config.max_requests, Instant::now(), true);
        }
        let now = Instant::now();
        match self.windows.get(key) {
            None => self.limit_shape(self.config.max_requests, now + self.config.window, true),
            Some(entry) => {
                if now.saturating_duration_since(entry.window_start) >= self.config.window {
                    self.limit_shape(self.config.max_requests, now + self.config.window, true)
                } else {
                    let reset_at = entry.window_start + self.config.window;
                    let allowed = entry.count < self.config.max_requests;
                    let remaining = self.config.max_requests.saturating_sub(entry.count);
                    self.limit_shape(remaining, reset_at, allowed)
                }
            }
        }
    }

    pub fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    pub fn reset_all(&self) {
        self.windows.clear();
    }

    /// Spawns the background sweeper at most once per limiter instance.
    /// Sweeps at an interval equal to the window length and exits as soon
    /// as `cancel` fires; it does not keep the process alive by itself.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
        if self.sweeper_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(limiter.config.window.max(Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Instant::now();
                        limiter
                            .windows
                            .retain(|_, w| now.saturating_duration_since(w.window_start) < limiter.config.window);
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_limiter_always_allows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(60),
            max_requests: 1,
            enabled: false,
        });
        for _ in 0..5 {
            assert!(limiter.check("k").allowed);
        }
    }

    #[test]
    fn window_blocks_after_limit_and_resets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_millis(50),
            max_requests: 2,
            enabled: true,
        });
        assert!(limiter.check("k").allowed);
        assert!(limiter.check("k").allowed);
        assert!(!limiter.check("k").allowed);

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check("k").allowed);
    }

    #[test]
    fn reset_clears_a_single_key_without_affecting_others() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(60),
            max_requests: 1,
            enabled: true,
        });
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);

        limiter.reset("a");
        assert!(limiter.check("a").allowed);
    }

    #[test]
    fn env_string_parses_false_and_zero_as_disabled() {
        assert!(!RateLimitConfig::enabled_from_str("false"));
        assert!(!RateLimitConfig::enabled_from_str("0"));
        assert!(RateLimitConfig::enabled_from_str("true"));
        assert!(RateLimitConfig::enabled_from_str("1"));
    }
}
