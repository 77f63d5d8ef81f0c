//! Bounded retry of fallible async actions
//!
//! The executor calls the action until it succeeds, fails with an error the
//! predicate does not consider retryable, or the attempt budget is spent.
//! Between attempts it sleeps for a linearly growing backoff
//! (1s, 3s, 5s, ...).

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Default attempt budget used by the storage layer and the worker pool
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Failure after the last attempt, carrying how many attempts were made
#[derive(Debug, thiserror::Error)]
#[error("attempts: {attempts}, {source}")]
pub struct RetryError<E>
where
    E: std::error::Error + 'static,
{
    pub attempts: u32,
    #[source]
    pub source: E,
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    pub fn into_inner(self) -> E {
        self.source
    }
}

/// Linear backoff: `(2 * attempt - 1)` seconds
pub fn linear_backoff(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt.max(1)) * 2 - 1)
}

/// Retry executor for one call site
pub struct Retry<A, P> {
    action: A,
    is_retryable: P,
    max_attempts: u32,
    backoff: fn(u32) -> Duration,
}

impl<A, P> Retry<A, P> {
    pub fn new(action: A, is_retryable: P, max_attempts: u32) -> Self {
        Self {
            action,
            is_retryable,
            max_attempts: max_attempts.max(1),
            backoff: linear_backoff,
        }
    }

    /// Replace the backoff function (tests use a zero backoff)
    pub fn with_backoff(mut self, backoff: fn(u32) -> Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run<T, E, Fut>(mut self) -> Result<T, RetryError<E>>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::error::Error + 'static,
    {
        let mut attempt = 1;

        loop {
            let err = match (self.action)().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !(self.is_retryable)(&err) || attempt >= self.max_attempts {
                if attempt > 1 {
                    warn!("giving up after {attempt} attempts: {err}");
                }
                return Err(RetryError {
                    attempts: attempt,
                    source: err,
                });
            }

            let wait = (self.backoff)(attempt);
            debug!("attempt {attempt} failed with retryable error ({err}), retrying in {wait:?}");
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}
