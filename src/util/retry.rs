//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use crate::error::TetherError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
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

    /// Fixed delay between attempts, no growth.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: delay,
            max_backoff: delay,
            multiplier: 1.0,
        }
    }

    /// Execute an async operation with retry.
    ///
    /// Only errors for which [`TetherError::is_retryable`] holds are retried.
    /// A rate-limit hint longer than the current backoff is honored, capped at
    /// `max_backoff`.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, TetherError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TetherError>>,
    {
        self.execute_when(TetherError::is_retryable, operation).await
    }

    /// Like [`execute`](Self::execute), retrying the errors `should_retry`
    /// accepts.
    pub async fn execute_when<P, F, Fut, T>(
        &self,
        should_retry: P,
        mut operation: F,
    ) -> Result<T, TetherError>
    where
        P: Fn(&TetherError) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TetherError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !should_retry(&error) || attempt >= max_attempts {
                return Err(error);
            }

            tracing::warn!(
                attempt,
                max_attempts,
                error = %error,
                "Retrying after error"
            );

            // Jitter: 75%–125% of backoff
            let jitter_factor = 0.75 + (rand_factor() * 0.5);
            let mut sleep_duration =
                Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor);
            if let TetherError::RateLimited {
                retry_after_ms: Some(hint),
            } = error
            {
                sleep_duration = sleep_duration.max(Duration::from_millis(hint));
            }
            tokio::time::sleep(sleep_duration.min(self.max_backoff)).await;

            backoff = Duration::from_secs_f64(
                (backoff.as_secs_f64() * self.multiplier).min(self.max_backoff.as_secs_f64()),
            );
        }
    }
}

/// Simple pseudo-random factor [0, 1) without pulling in rand crate.
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}
