//! Component B: auth throttle. A specialised, IP-keyed counter for
//! `/auth`; unlike the fixed-window rate limiter (component A) the window
//! only starts sliding on the *first failure*, and a success clears the
//! entry outright rather than waiting for expiry.

use std::time::{Duration, Instant};

use dashmap::DashMap;

struct AuthAttempt {
    count: u32,
    reset_at: Instant,
}

pub struct AuthThrottle {
    attempts: DashMap<String, AuthAttempt>,
    max_attempts: u32,
    window: Duration,
}

pub struct ThrottleDecision {
    pub allowed: bool,
    pub retry_after_secs: u64,
}

impl AuthThrottle {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            max_attempts,
            window,
        }
    }

    /// Checks whether the given IP is currently locked out, without
    /// recording anything. Call before attempting credential validation.
    pub fn check(&self, ip: &str) -> ThrottleDecision {
        let now = Instant::now();
        match self.attempts.get(ip) {
            Some(entry) if now < entry.reset_at && entry.count >= self.max_attempts => {
                ThrottleDecision {
                    allowed: false,
                    retry_after_secs: entry
                        .reset_at
                        .saturating_duration_since(now)
                        .as_secs_f64()
                        .ceil() as u64,
                }
            }
            _ => ThrottleDecision {
                allowed: true,
                retry_after_secs: 0,
            },
        }
    }

    /// Records a failed attempt. The reset deadline is only (re)extended
    /// on the first failure of a new window; subsequent failures within
    /// the same window do not push it further out.
    pub fn record_failure(&self, ip: &str) {
        let now = Instant::now();
        let mut entry = self.attempts.entry(ip.to_string()).or_insert_with(|| AuthAttempt {
            count: 0,
            reset_at: now + self.window,
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }
        entry.count += 1;
    }

    /// A success clears the entry outright; failures before a success
    /// never count against a later window.
    pub fn record_success(&self, ip: &str) {
        self.attempts.remove(ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_until_threshold_then_locks_out() {
        let throttle = AuthThrottle::new(5, Duration::from_secs(60));
        for _ in 0..5 {
            assert!(throttle.check("1.2.3.4").allowed);
            throttle.record_failure("1.2.3.4");
        }
        let decision = throttle.check("1.2.3.4");
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs <= 60);
    }

    #[test]
    fn success_clears_the_counter() {
        let throttle = AuthThrottle::new(2, Duration::from_secs(60));
        throttle.record_failure("1.2.3.4");
        throttle.record_success("1.2.3.4");
        throttle.record_failure("1.2.3.4");
        assert!(throttle.check("1.2.3.4").allowed);
    }

    #[test]
    fn failures_are_independent_per_ip() {
        let throttle = AuthThrottle::new(1, Duration::from_secs(60));
        throttle.record_failure("1.1.1.1");
        assert!(!throttle.check("1.1.1.1").allowed);
        assert!(throttle.check("2.2.2.2").allowed);
    }
}
