//! Exponential backoff for remote calls
//!
//! Only transient failures are retried; everything else returns on the first
//! attempt. Calls block the current thread while backing off.

use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use super::RemoteError;

/// Retry behavior for calls to the remote provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Run `operation`, retrying transient failures with backoff and jitter
pub fn with_retry<T>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: impl FnMut() -> Result<T, RemoteError>,
) -> Result<T, RemoteError> {
    let mut attempts = 0;
    let mut delay = Duration::from_millis(policy.initial_delay_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);

    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempts < policy.max_retries => {
                attempts += 1;
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    what,
                    attempts,
                    policy.max_retries + 1,
                    e,
                    delay
                );
                std::thread::sleep(delay + Duration::from_millis(rand_jitter()));
                delay = (delay * 2).min(max_delay);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Random jitter in 0..100ms
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let attempts = Cell::new(0);
        let result = with_retry(&fast_policy(), "test", || {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 {
                Err(RemoteError::unavailable("flaky"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let attempts = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), "test", || {
            attempts.set(attempts.get() + 1);
            Err(RemoteError::unavailable("down"))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 4);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let attempts = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), "test", || {
            attempts.set(attempts.get() + 1);
            Err(RemoteError::NotFound { id: "m1".to_string() })
        });
        assert!(matches!(result, Err(RemoteError::NotFound { .. })));
        assert_eq!(attempts.get(), 1);
    }
}
