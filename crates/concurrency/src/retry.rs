//! Conflict retry executor.
//!
//! Wraps a mutating transaction closure. A reported conflict sleeps
//! `min(50ms, 2^i ms)` plus uniform jitter in `[0, half-of-that)` and
//! retries, up to the policy's attempt budget. Any other error — and any
//! success — returns immediately. Retries are silent except for a warning
//! when the budget is exhausted.

use quartz_core::error::Result;
use rand::Rng;
use std::time::Duration;

/// Caps the backoff base.
const MAX_BACKOFF_MS: u64 = 50;

/// How many attempts a conflicting transaction gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Budget for most operations.
    pub const DEFAULT: RetryPolicy = RetryPolicy { max_attempts: 10 };

    /// Sorted-set (and geo) writes touch meta + data + index rows and
    /// collide more often under contention, so they get a deeper budget.
    pub const SORTED_SET: RetryPolicy = RetryPolicy { max_attempts: 25 };
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::DEFAULT
    }
}

/// Backoff before retry `attempt` (0-based).
fn backoff(attempt: u32) -> Duration {
    let base_ms = (1u64 << attempt.min(6)).min(MAX_BACKOFF_MS);
    let half = (base_ms / 2).max(1);
    let jitter_ms = rand::thread_rng().gen_range(0..half);
    Duration::from_millis(base_ms + jitter_ms)
}

/// Run `f` until it succeeds, fails non-retryably, or exhausts the budget.
pub fn with_retry<T>(policy: RetryPolicy, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        match f() {
            Err(e) if e.is_conflict() && attempt + 1 < policy.max_attempts => {
                std::thread::sleep(backoff(attempt));
                attempt += 1;
            }
            Err(e) if e.is_conflict() => {
                tracing::warn!(attempts = policy.max_attempts, "retry budget exhausted");
                return Err(e);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quartz_core::error::Error;

    #[test]
    fn test_success_returns_first_attempt() {
        let mut calls = 0;
        let out = with_retry(RetryPolicy::DEFAULT, || {
            calls += 1;
            Ok(42)
        })
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_conflicts_are_retried_until_success() {
        let mut calls = 0;
        let out = with_retry(RetryPolicy::DEFAULT, || {
            calls += 1;
            if calls < 3 {
                Err(Error::conflict("contended"))
            } else {
                Ok("done")
            }
        })
        .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_non_conflict_errors_surface_immediately() {
        let mut calls = 0;
        let err = with_retry(RetryPolicy::DEFAULT, || -> Result<()> {
            calls += 1;
            Err(Error::parse("not an integer"))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_budget_exhaustion_surfaces_conflict() {
        let policy = RetryPolicy { max_attempts: 3 };
        let mut calls = 0;
        let err = with_retry(policy, || -> Result<()> {
            calls += 1;
            Err(Error::conflict("always"))
        })
        .unwrap_err();
        assert_eq!(calls, 3);
        assert!(err.is_conflict());
    }

    #[test]
    fn test_backoff_is_bounded() {
        for attempt in 0..40 {
            let d = backoff(attempt);
            assert!(d >= Duration::from_millis(1));
            // base caps at 50ms, jitter at half of that
            assert!(d < Duration::from_millis(75));
        }
    }
}
