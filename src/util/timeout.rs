//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::TetherError;

/// Wrap a future with a timeout, naming the operation in the resulting error.
pub async fn with_timeout<T>(
    operation: &str,
    duration: Duration,
    future: impl Future<Output = Result<T, TetherError>>,
) -> Result<T, TetherError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(TetherError::timeout(operation, duration)),
    }
}
