//! Bounded exponential backoff around collaborator calls.
//!
//! Each attempt runs under an optional timeout; a timeout counts as a
//! transient failure. Non-transient errors return immediately. Backoff
//! sleeps end early on cancellation, but an attempt already in flight is
//! always allowed to finish so no half-issued request is abandoned.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::CancelSignal;

/// Errors that know whether retrying can help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for driftwatch_state::StorageError {
    fn is_transient(&self) -> bool {
        driftwatch_state::StorageError::is_transient(self)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            timeout: None,
        }
    }
}

/// A successful result and the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Why a single attempt failed.
#[derive(Debug)]
pub enum AttemptFailure<E> {
    Error(E),
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for AttemptFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Error(e) => write!(f, "{e}"),
            AttemptFailure::TimedOut(after) => write!(f, "timed out after {}ms", after.as_millis()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: fmt::Display> {
    /// Every attempt failed transiently.
    #[error("{op} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        op: String,
        attempts: u32,
        last: AttemptFailure<E>,
    },

    /// A non-transient error; not retried.
    #[error("{op} failed: {error}")]
    Permanent { op: String, attempts: u32, error: E },

    /// Cancelled before or between attempts.
    #[error("{op} cancelled after {attempts} attempt(s)")]
    Cancelled { op: String, attempts: u32 },
}

impl<E: fmt::Display> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Permanent { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }
}

impl RetryPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Backoff before retry number `retry` (0 = after the first failure).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `f` until it succeeds, fails permanently, runs out of attempts,
    /// or `cancel` fires.
    pub async fn run<T, E, F, Fut>(
        &self,
        op: &str,
        cancel: &CancelSignal,
        mut f: F,
    ) -> Result<Retried<T>, RetryError<E>>
    where
        E: Transient + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled {
                    op: op.to_string(),
                    attempts: attempt,
                });
            }
            attempt += 1;

            let outcome = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, f()).await {
                    Ok(result) => result.map_err(AttemptFailure::Error),
                    Err(_) => Err(AttemptFailure::TimedOut(limit)),
                },
                None => f().await.map_err(AttemptFailure::Error),
            };

            let failure = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op, attempts = attempt, "succeeded after retry");
                    }
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    });
                }
                Err(AttemptFailure::Error(error)) if !error.is_transient() => {
                    return Err(RetryError::Permanent {
                        op: op.to_string(),
                        attempts: attempt,
                        error,
                    });
                }
                Err(failure) => failure,
            };

            if attempt >= max_attempts {
                return Err(RetryError::Exhausted {
                    op: op.to_string(),
                    attempts: attempt,
                    last: failure,
                });
            }

            let backoff = self.backoff_for(attempt - 1);
            warn!(
                op,
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %failure,
                "transient failure, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled {
                        op: op.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }
}
