//! Exponential backoff between retry attempts.
//!
//! # Contract
//! ```text
//! delays(max_attempts, base, cap).len() == max_attempts - 1
//! delay[i] = min(base * 2^i, cap)
//! ```
//!
//! # Design Decisions
//! - No delay precedes the first attempt
//! - Jitter is off by default so delay sequences are reproducible
//! - Jittered delays are clamped to [previous delay, cap] to stay monotonic

use std::time::Duration;
use rand::Rng;

/// Lower and upper jitter factors applied when jitter is enabled (±20%).
const JITTER_LOW: f64 = 0.8;
const JITTER_HIGH: f64 = 1.2;

/// Compute the un-jittered delay sequence for a call of `max_attempts` attempts.
pub fn delays(max_attempts: u32, base: Duration, cap: Duration) -> Vec<Duration> {
    (0..max_attempts.saturating_sub(1))
        .map(|i| exponential_delay(i, base, cap))
        .collect()
}

/// `min(base * 2^exponent, cap)`, saturating at `cap` instead of overflowing.
pub fn exponential_delay(exponent: u32, base: Duration, cap: Duration) -> Duration {
    2u32.checked_pow(exponent)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |delay| delay.min(cap))
}

/// Backoff parameters for a retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    jitter: bool,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap, jitter: false }
    }

    /// Enable or disable ±20% jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Delay sequence for a call of `max_attempts` attempts.
    pub fn delays(&self, max_attempts: u32) -> Vec<Duration> {
        let plain = delays(max_attempts, self.base, self.cap);
        if !self.jitter {
            return plain;
        }

        let mut rng = rand::thread_rng();
        let mut previous = Duration::ZERO;
        plain
            .into_iter()
            .map(|delay| {
                let factor = rng.gen_range(JITTER_LOW..=JITTER_HIGH);
                let scaled = Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(self.cap);
                let jittered = scaled.clamp(previous, self.cap.max(previous));
                previous = jittered;
                jittered
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_doubling_sequence() {
        assert_eq!(delays(4, ms(100), ms(2000)), vec![ms(100), ms(200), ms(400)]);
    }

    #[test]
    fn test_single_attempt_has_no_delays() {
        assert!(delays(1, ms(100), ms(2000)).is_empty());
        assert!(delays(0, ms(100), ms(2000)).is_empty());
    }

    #[test]
    fn test_cap_applies() {
        let d = delays(7, ms(100), ms(1000));
        assert_eq!(d, vec![ms(100), ms(200), ms(400), ms(800), ms(1000), ms(1000)]);
    }

    #[test]
    fn test_large_exponent_saturates_at_cap() {
        assert_eq!(exponential_delay(40, ms(100), ms(5000)), ms(5000));
        assert_eq!(exponential_delay(31, Duration::from_secs(u64::MAX / 2), ms(5000)), ms(5000));
    }

    #[test]
    fn test_policy_without_jitter_matches_pure_fn() {
        let policy = BackoffPolicy::new(ms(50), ms(300));
        assert_eq!(policy.delays(5), delays(5, ms(50), ms(300)));
    }

    #[test]
    fn test_jitter_with_unbounded_cap_saturates() {
        let policy = BackoffPolicy::new(Duration::from_secs(u64::MAX / 4), Duration::MAX).with_jitter(true);
        for _ in 0..20 {
            let d = policy.delays(4);
            assert_eq!(d.len(), 3);
            assert!(d.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_jitter_stays_bounded_and_monotonic() {
        let policy = BackoffPolicy::new(ms(100), ms(1000)).with_jitter(true);
        for _ in 0..50 {
            let d = policy.delays(8);
            assert_eq!(d.len(), 7);
            assert!(d[0] >= ms(80) && d[0] <= ms(120));
            assert!(d.windows(2).all(|w| w[0] <= w[1]));
            assert!(d.iter().all(|x| *x <= ms(1000)));
        }
    }
}
