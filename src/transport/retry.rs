/*!
 * Retry policy with exponential backoff and jitter
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::error::{NebulaError, Result};

/// Base delay before the first retry
const INITIAL_DELAY_MS: u64 = 1_000;

/// Delays are capped here regardless of attempt number
const MAX_DELAY_MS: u64 = 30_000;

/// Fraction of the delay added as random jitter
const JITTER_FACTOR: f64 = 0.10;

/// Exponential backoff policy shared by transport fetches
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 10 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before retry number `attempt` (1-based):
    /// `min(1000 * 2^(attempt-1), 30_000)` ms plus up to 10% jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let base_ms = INITIAL_DELAY_MS
            .saturating_mul(1u64 << exp)
            .min(MAX_DELAY_MS);
        let jitter = rand::rng().random_range(0.0..JITTER_FACTOR);
        Duration::from_millis((base_ms as f64 * (1.0 + jitter)) as u64)
    }

    /// Run `operation` until it succeeds, a fatal error occurs, the
    /// shared `failed` flag trips, or the attempt budget is spent.
    ///
    /// The flag lets sibling workers short-circuit each other on the
    /// first fatal failure.
    pub fn run<T, F>(&self, failed: &AtomicBool, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let mut last_error: Option<NebulaError> = None;

        for attempt in 1..=self.max_attempts {
            if failed.load(Ordering::Relaxed) {
                return Err(NebulaError::Cancelled);
            }

            if attempt > 1 {
                let delay = self.delay_for(attempt - 1);
                tracing::debug!(
                    "retry attempt {} of {} after {:?}",
                    attempt,
                    self.max_attempts,
                    delay
                );
                thread::sleep(delay);
            }

            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if e.is_fatal() {
                        failed.store(true, Ordering::Relaxed);
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        failed.store(true, Ordering::Relaxed);
        Err(last_error.unwrap_or(NebulaError::RetriesExhausted {
            attempts: self.max_attempts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_progression() {
        let policy = RetryPolicy::default();
        for _ in 0..20 {
            let d1 = policy.delay_for(1).as_millis() as u64;
            let d2 = policy.delay_for(2).as_millis() as u64;
            let d6 = policy.delay_for(6).as_millis() as u64;
            let d10 = policy.delay_for(10).as_millis() as u64;

            assert!((1000..=1100).contains(&d1), "d1 = {}", d1);
            assert!((2000..=2200).contains(&d2), "d2 = {}", d2);
            assert!((30_000..=33_000).contains(&d6), "d6 = {}", d6);
            assert!((30_000..=33_000).contains(&d10), "d10 = {}", d10);
        }
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(5);
        let failed = AtomicBool::new(false);
        let mut calls = 0;

        // Only the invocation counter matters; delays before attempt 2+
        // are exercised with the real (second-scale) policy elsewhere
        let result: Result<u32> = policy.run(&failed, |attempt| {
            calls += 1;
            if attempt < 2 {
                Err(NebulaError::Transport("flaky".to_string()))
            } else {
                Ok(attempt)
            }
        });

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 2);
        assert!(!failed.load(Ordering::Relaxed));
    }

    #[test]
    fn test_fatal_error_stops_and_trips_flag() {
        let policy = RetryPolicy::new(5);
        let failed = AtomicBool::new(false);
        let mut calls = 0;

        let result: Result<()> = policy.run(&failed, |_| {
            calls += 1;
            Err(NebulaError::NotFound("gone".to_string()))
        });

        assert!(matches!(result, Err(NebulaError::NotFound(_))));
        assert_eq!(calls, 1);
        assert!(failed.load(Ordering::Relaxed));
    }

    #[test]
    fn test_tripped_flag_short_circuits() {
        let policy = RetryPolicy::new(5);
        let failed = AtomicBool::new(true);
        let mut calls = 0;

        let result: Result<()> = policy.run(&failed, |_| {
            calls += 1;
            Ok(())
        });

        assert!(matches!(result, Err(NebulaError::Cancelled)));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_minimum_one_attempt() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }
}
