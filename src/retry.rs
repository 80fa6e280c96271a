//! C3 RetryPolicy (spec.md §4.5 "Retry policy", §7 error taxonomy).
//!
//! A trait boundary so callers can swap in their own backoff shape, plus an
//! exponential-backoff-with-jitter default, in the spirit of the teacher's
//! `collector.rs` retry-map bookkeeping (an `lru::LruCache` tracking
//! attempt counts per item) but decoupled from any particular container
//! type — here the caller drives the loop and only asks the policy "should
//! I try again, and after how long".

use std::time::Duration;

use rand::Rng;

use crate::config::ClientConfig;
use crate::error::IngestError;

/// Decides whether a failed attempt should be retried and, if so, how long
/// to wait first.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` is 1-based: the attempt number that just failed.
    fn next_delay(&self, attempt: u32, error: &IngestError) -> Option<Duration>;
}

/// Exponential backoff with full jitter, capped at `max_attempts`
/// (spec.md §5's `maxAttempts`). Permanent errors never retry regardless
/// of remaining attempts, matching `IngestError::is_permanent`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffRetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ExponentialBackoffRetryPolicy {
    fn default() -> Self {
        ExponentialBackoffRetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ExponentialBackoffRetryPolicy {
    /// Builds the default retry policy from `config.max_attempts`, keeping
    /// the backoff shape but tying the attempt ceiling to the config bag
    /// instead of a hardcoded literal.
    pub fn from_config(config: &ClientConfig) -> Self {
        ExponentialBackoffRetryPolicy { max_attempts: config.max_attempts, ..Default::default() }
    }
}

impl RetryPolicy for ExponentialBackoffRetryPolicy {
    fn next_delay(&self, attempt: u32, error: &IngestError) -> Option<Duration> {
        if error.is_permanent() || attempt >= self.max_attempts {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(16);
        let capped = self.base_delay.saturating_mul(1u32 << exponent).min(self.max_delay);
        let jittered_millis = rand::thread_rng().gen_range(0..=capped.as_millis() as u64);
        Some(Duration::from_millis(jittered_millis))
    }
}

/// Never retries; useful for callers who want `ignoreSizeLimit`-style
/// explicit single-attempt semantics or for tests that need determinism.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn next_delay(&self, _attempt: u32, _error: &IngestError) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_errors_never_retry() {
        let policy = ExponentialBackoffRetryPolicy::default();
        assert_eq!(policy.next_delay(1, &IngestError::NoContainers), None);
    }

    #[test]
    fn transient_errors_retry_until_max_attempts() {
        let policy = ExponentialBackoffRetryPolicy { max_attempts: 2, ..Default::default() };
        let error = IngestError::Transport("timeout".into());
        assert!(policy.next_delay(1, &error).is_some());
        assert_eq!(policy.next_delay(2, &error), None);
    }

    #[test]
    fn from_config_takes_max_attempts_from_the_config_bag() {
        let config = ClientConfig { max_attempts: 7, ..Default::default() };
        let policy = ExponentialBackoffRetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 7);
    }

    #[test]
    fn delay_never_exceeds_configured_cap() {
        let policy = ExponentialBackoffRetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        };
        let error = IngestError::Transport("timeout".into());
        for attempt in 1..15 {
            if let Some(delay) = policy.next_delay(attempt, &error) {
                assert!(delay <= Duration::from_secs(5));
            }
        }
    }
}
