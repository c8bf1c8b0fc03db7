//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap external calls (engine commands, bus connects) with a deadline
//! - Cancel the wrapped future cleanly when the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {}ms exceeded", .0.as_millis())]
pub struct DeadlineExceeded(pub Duration);

/// Run `future` for at most `limit`. The future is dropped on expiry.
pub async fn with_deadline<F>(limit: Duration, future: F) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| DeadlineExceeded(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_in_time() {
        assert_eq!(with_deadline(Duration::from_secs(1), async { 5 }).await, Ok(5));
    }

    #[tokio::test]
    async fn test_expires() {
        let result = with_deadline(
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(result, Err(DeadlineExceeded(Duration::from_millis(10))));
        assert_eq!(result.unwrap_err().to_string(), "deadline of 10ms exceeded");
    }
}
