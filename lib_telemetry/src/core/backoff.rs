//! # Backoff Policy
//!
//! Computes the delay before the next reconnect attempt:
//! `min(max_delay, base_delay * 2^attempt)`, perturbed by a uniform jitter of
//! up to `jitter_factor` of that value in either direction and clamped at zero.
//!
//! The policy is stateless. The caller owns the attempt counter.

use std::time::Duration;

use rand::Rng;

use crate::configs::{RateLimitConfig, ReconnectConfig};

/// Exponential backoff with symmetric jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor: jitter_factor.max(0.0),
        }
    }

    /// Reconnect backoff from configuration.
    pub fn from_reconnect(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter_factor,
        )
    }

    /// Jitter-free backoff used for the rate-limit cooldown.
    pub fn from_rate_limit(config: &RateLimitConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            0.0,
        )
    }

    /// The capped exponential delay before jitter.
    pub fn base_for(&self, attempt: u32) -> Duration {
        // 2^1024 is already infinite in f64; min() below absorbs it.
        let exp = attempt.min(1024) as i32;
        let raw = self.base_delay.as_secs_f64() * 2f64.powi(exp);
        let capped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay for `attempt`, jittered with the thread-local RNG.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::rng())
    }

    /// Delay for `attempt`, jittered with the supplied RNG.
    pub fn next_delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.base_for(attempt).as_secs_f64();
        if self.jitter_factor == 0.0 {
            return Duration::from_secs_f64(delay);
        }
        let spread = delay * self.jitter_factor;
        let jitter = spread * rng.random_range(-1.0..=1.0);
        Duration::from_secs_f64((delay + jitter).max(0.0))
    }

    /// Largest value `next_delay` can return.
    pub fn upper_bound(&self) -> Duration {
        Duration::from_secs_f64(self.max_delay.as_secs_f64() * (1.0 + self.jitter_factor))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_reconnect(&ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(1000), Duration::from_millis(30_000), 0.1)
    }

    #[test]
    fn exponential_growth_is_capped() {
        let p = policy();
        assert_eq!(p.base_for(0), Duration::from_millis(1000));
        assert_eq!(p.base_for(1), Duration::from_millis(2000));
        assert_eq!(p.base_for(4), Duration::from_millis(16_000));
        assert_eq!(p.base_for(5), Duration::from_millis(30_000));
        assert_eq!(p.base_for(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn jittered_delay_stays_in_bounds() {
        let p = policy();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..64 {
            for _ in 0..50 {
                let d = p.next_delay_with(attempt, &mut rng);
                assert!(d <= p.upper_bound(), "attempt {} produced {:?}", attempt, d);
                let base = p.base_for(attempt).as_secs_f64();
                assert!(d.as_secs_f64() >= base * 0.9 - 1e-9);
                assert!(d.as_secs_f64() <= base * 1.1 + 1e-9);
            }
        }
    }

    #[test]
    fn never_negative_even_with_large_jitter() {
        let p = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 3.0);
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 0..10 {
            let d = p.next_delay_with(attempt, &mut rng);
            assert!(d <= p.upper_bound());
        }
    }

    #[test]
    fn mean_delay_grows_until_cap() {
        let p = policy();
        let mut rng = StdRng::seed_from_u64(1);
        let mean = |attempt: u32, rng: &mut StdRng| {
            (0..400)
                .map(|_| p.next_delay_with(attempt, rng).as_secs_f64())
                .sum::<f64>()
                / 400.0
        };
        let mut previous = 0.0;
        for attempt in 0..5 {
            let m = mean(attempt, &mut rng);
            assert!(m > previous, "mean for attempt {} did not grow", attempt);
            previous = m;
        }
        let capped = mean(12, &mut rng);
        assert!((capped - 30.0).abs() < 1.0);
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let p = BackoffPolicy::new(Duration::from_millis(250), Duration::from_secs(2), 0.0);
        assert_eq!(p.next_delay(2), Duration::from_millis(1000));
        assert_eq!(p.next_delay(9), Duration::from_secs(2));
    }
}
