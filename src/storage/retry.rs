use std::thread;
use std::time::Duration;

use rand::Rng;
use rusqlite::ErrorCode;
use tracing::{debug, warn};

use crate::metrics::{FeedMetrics, NoopMetrics};
use crate::types::{FeedError, Result};

/// Retry schedule for transient SQLite failures (`SQLITE_BUSY`, `SQLITE_LOCKED`).
///
/// Only the storage accessor retries. Everything above it treats
/// [`FeedError::StorageUnavailable`] as final for the request.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    /// Sleep before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the doubled backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Runs `f` until it succeeds, fails permanently, or attempts run out.
    pub fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        self.run_observed(op, &NoopMetrics, f)
    }

    /// Like [`RetryPolicy::run`], reporting every retry to `metrics`.
    pub fn run_observed<T, F>(&self, op: &'static str, metrics: &dyn FeedMetrics, mut f: F) -> Result<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op, attempt, "storage.retry.recovered");
                    }
                    return Ok(value);
                }
                Err(err) if is_transient(&err) => {
                    if attempt >= attempts {
                        warn!(op, attempts, error = %err, "storage.retry.exhausted");
                        return Err(FeedError::StorageUnavailable {
                            attempts,
                            message: err.to_string(),
                        });
                    }
                    let sleep = backoff + jitter(backoff);
                    warn!(
                        op,
                        attempt,
                        sleep_us = sleep.as_micros() as u64,
                        error = %err,
                        "storage.retry"
                    );
                    metrics.storage_retry(op);
                    thread::sleep(sleep);
                    backoff = (backoff * 2).min(self.max_backoff);
                    attempt += 1;
                }
                Err(err) => return Err(FeedError::Storage(err)),
            }
        }
    }
}

/// Whether `err` is worth another attempt.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

fn jitter(backoff: Duration) -> Duration {
    let half = (backoff.as_micros() / 2) as u64;
    if half == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(rand::thread_rng().gen_range(0..=half))
}
