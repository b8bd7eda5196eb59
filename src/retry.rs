// src/retry.rs

use serde::Deserialize;
use std::{thread, time::Duration};
use tracing::warn;

/// Exponential backoff for blocking remote operations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
        }
    }

    /// A single attempt, no sleeping.
    pub fn none() -> Self {
        Self::new(1, 1, 1)
    }

    pub fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Run `op` until it succeeds or `max_attempts` is exhausted, returning the last error.
    pub fn retry<F, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Result<T, E>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(val) => return Ok(val),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.next_delay(attempt - 1);
                    warn!(attempt, ?delay, "attempt failed, retrying: {}", err);
                    thread::sleep(delay);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 500, 5_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::new(5, 100, 350);
        assert_eq!(policy.next_delay(0), Duration::from_millis(100));
        assert_eq!(policy.next_delay(1), Duration::from_millis(200));
        assert_eq!(policy.next_delay(2), Duration::from_millis(350));
    }

    #[test]
    fn retries_until_success() {
        let policy = RetryPolicy::new(3, 1, 1);
        let mut calls = 0;
        let out: Result<usize, String> = policy.retry(|attempt| {
            calls += 1;
            if attempt < 2 {
                Err(format!("boom {}", attempt))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out, Ok(2));
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_with_last_error() {
        let policy = RetryPolicy::new(2, 1, 1);
        let out: Result<(), String> = policy.retry(|attempt| Err(format!("fail {}", attempt)));
        assert_eq!(out, Err("fail 1".to_string()));
    }
}
