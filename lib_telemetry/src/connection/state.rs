//! Connection state and the two retry counters the manager owns: the
//! reconnect attempt budget and the rate-limit cooldown.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::configs::ClientConfig;
use crate::core::backoff::BackoffPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Credentials rejected; no automatic retries until `reconnect`.
    AuthFailed,
    /// Reported while a rate-limit cooldown is active.
    RateLimited,
    /// Reconnect budget exhausted.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::AuthFailed => "auth_failed",
            ConnectionState::RateLimited => "rate_limited",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// What to do after a failed connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep this long, then try again.
    RetryAfter(Duration),
    /// `max_attempts` consecutive failures; stop.
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    backoff: BackoffPolicy,
    max_attempts: u32,
    attempt_count: u32,
}

impl ReconnectPolicy {
    pub fn new(backoff: BackoffPolicy, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts,
            attempt_count: 0,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            BackoffPolicy::from_reconnect(&config.reconnect),
            config.reconnect.max_attempts,
        )
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Counts one failed attempt. Exhaustion resets the counter so a later
    /// explicit `connect` starts with a full budget.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.attempt_count += 1;
        if self.attempt_count >= self.max_attempts {
            let attempts = self.attempt_count;
            self.attempt_count = 0;
            return RetryDecision::GiveUp { attempts };
        }
        RetryDecision::RetryAfter(self.backoff.next_delay(self.attempt_count))
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }
}

/// Throttling overlay engaged when the upstream reports rate limiting.
///
/// Each engagement doubles the hold-off (capped) and bumps `level`; every
/// release decays `level` by one. Reconnect attempts are deferred until the
/// cooldown ends but the reconnect attempt budget is left untouched.
#[derive(Debug, Clone)]
pub struct RateLimitCooldown {
    backoff: BackoffPolicy,
    level: u32,
    until: Option<Instant>,
}

impl RateLimitCooldown {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            backoff,
            level: 0,
            until: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(BackoffPolicy::from_rate_limit(&config.rate_limit))
    }

    /// Starts (or extends) a cooldown. Returns its length.
    pub fn engage(&mut self, now: Instant) -> Duration {
        let delay = self.backoff.base_for(self.level);
        self.level += 1;
        let end = now + delay;
        self.until = Some(self.until.map_or(end, |current| current.max(end)));
        delay
    }

    /// Ends the cooldown if it is due and decays the level.
    pub fn release(&mut self, now: Instant) -> bool {
        match self.until {
            Some(until) if until <= now => {
                self.until = None;
                self.level = self.level.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    pub fn until(&self) -> Option<Instant> {
        self.until
    }

    pub fn is_active(&self) -> bool {
        self.until.is_some()
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Earliest instant a reconnect may start.
    pub fn defer(&self, at: Instant) -> Instant {
        self.until.map_or(at, |until| until.max(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy::new(
            BackoffPolicy::new(Duration::from_millis(1000), Duration::from_millis(30_000), 0.0),
            max_attempts,
        )
    }

    #[test]
    fn failures_grow_the_delay_until_exhausted() {
        let mut p = policy(3);
        assert_eq!(p.record_failure(), RetryDecision::RetryAfter(Duration::from_millis(2000)));
        assert_eq!(p.record_failure(), RetryDecision::RetryAfter(Duration::from_millis(4000)));
        assert_eq!(p.record_failure(), RetryDecision::GiveUp { attempts: 3 });
        assert_eq!(p.attempt_count(), 0);
    }

    #[test]
    fn success_resets_attempts() {
        let mut p = policy(10);
        p.record_failure();
        p.record_failure();
        assert_eq!(p.attempt_count(), 2);
        p.reset();
        assert_eq!(p.attempt_count(), 0);
    }

    #[test]
    fn cooldown_doubles_and_decays() {
        let mut c = RateLimitCooldown::new(BackoffPolicy::new(
            Duration::from_millis(1000),
            Duration::from_millis(30_000),
            0.0,
        ));
        let now = Instant::now();
        assert_eq!(c.engage(now), Duration::from_millis(1000));
        assert_eq!(c.engage(now), Duration::from_millis(2000));
        assert_eq!(c.level(), 2);
        assert_eq!(c.until(), Some(now + Duration::from_millis(2000)));

        assert!(!c.release(now + Duration::from_millis(1500)));
        assert!(c.release(now + Duration::from_millis(2000)));
        assert_eq!(c.level(), 1);
        assert!(!c.is_active());
    }

    #[test]
    fn cooldown_defers_reconnects() {
        let mut c = RateLimitCooldown::new(BackoffPolicy::new(
            Duration::from_millis(1000),
            Duration::from_millis(30_000),
            0.0,
        ));
        let now = Instant::now();
        assert_eq!(c.defer(now), now);
        c.engage(now);
        assert_eq!(c.defer(now), now + Duration::from_millis(1000));
        assert_eq!(c.defer(now + Duration::from_secs(5)), now + Duration::from_secs(5));
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::AuthFailed.to_string(), "auth_failed");
        assert_eq!(
            serde_json::to_value(ConnectionState::RateLimited).unwrap(),
            "rate_limited"
        );
    }
}
