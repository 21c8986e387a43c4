use std::time::Duration;

use config_manager::RetryConfig;

/// Reconnect timing for a supervised stream.
///
/// `delay = min(initial * multiplier^(attempts - 1), max_delay)`
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            // Anything below 1.0 would make the sequence decrease
            multiplier: if config.multiplier.is_finite() { config.multiplier.max(1.0) } else { 1.0 },
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Delay before the retry that follows failure number `attempts` (1-based).
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;

        if !delay_ms.is_finite() || delay_ms >= max_ms {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }

    /// Whether `attempts` consecutive failures end automatic retries
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }

    #[test]
    fn test_exponential_sequence() {
        let p = policy();
        let delays: Vec<u64> = (1..=7).map(|n| p.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_sequence_is_non_decreasing_and_bounded() {
        let p = RetryPolicy {
            initial_delay: Duration::from_millis(250),
            multiplier: 1.7,
            max_delay: Duration::from_secs(10),
            max_attempts: 100,
        };
        let mut previous = Duration::ZERO;
        for attempts in 1..=200 {
            let delay = p.delay_for(attempts);
            assert!(delay >= previous, "attempt {} went down", attempts);
            assert!(delay <= p.max_delay);
            previous = delay;
        }
        assert_eq!(p.delay_for(u32::MAX), p.max_delay);
    }

    #[test]
    fn test_exhaustion() {
        let p = policy();
        assert!(!p.is_exhausted(4));
        assert!(p.is_exhausted(5));
        assert!(p.is_exhausted(6));
    }

    #[test]
    fn test_from_config_clamps() {
        let p = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 0,
            initial_delay_ms: 500,
            multiplier: 0.5,
            max_delay_ms: 4000,
        });
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.multiplier, 1.0);
        assert_eq!(p.delay_for(3), Duration::from_millis(500));
    }
}
