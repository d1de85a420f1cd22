//! Exponential redelivery backoff.

use rand::Rng;
use std::time::Duration;

/// Configuration for redelivery backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first redelivery (default: 1 second).
    pub initial: Duration,
    /// Upper bound on any single delay (default: 30 seconds).
    pub max: Duration,
    /// Multiplier applied per further attempt (default: 2.0).
    pub multiplier: f64,
    /// Whether to add random jitter of up to 50% (default: true).
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// A policy with no delay between attempts.
    pub fn immediate() -> Self {
        Self {
            initial: Duration::ZERO,
            max: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay before redelivering after the given failed attempt (1-based).
    ///
    /// Computes `initial * multiplier^(attempt - 1)`, capped at `max`.
    /// With jitter enabled, adds 0% to 50% of the capped delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let base_ms = self.initial.as_millis() as f64;
        let max_ms = self.max.as_millis() as f64;
        let capped = (base_ms * self.multiplier.powi(exponent)).min(max_ms).max(0.0) as u64;

        if self.jitter && capped > 1 {
            let jitter_ms = rand::thread_rng().gen_range(0..=capped / 2);
            Duration::from_millis(capped.saturating_add(jitter_ms))
        } else {
            Duration::from_millis(capped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_default() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial, Duration::from_secs(1));
        assert_eq!(config.max, Duration::from_secs(30));
        assert!(config.jitter);
    }

    #[test]
    fn test_exponential_growth() {
        let config = no_jitter();
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_capped_at_max() {
        let config = no_jitter();
        assert_eq!(config.delay_for(10), Duration::from_secs(1));
        assert_eq!(config.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_within_half() {
        let config = BackoffConfig {
            jitter: true,
            ..no_jitter()
        };
        for _ in 0..50 {
            let delay = config.delay_for(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_immediate() {
        let config = BackoffConfig::immediate();
        assert_eq!(config.delay_for(1), Duration::ZERO);
        assert_eq!(config.delay_for(7), Duration::ZERO);
    }
}
