//! Unified retry policies for consistent backoff behavior across the crate.
//!
//! Both the transport (reconnecting a dead socket) and the router
//! (re-dispatching a failed request, re-fetching metadata) consume the same
//! primitive: a [`backon::ExponentialBuilder`] built from a
//! [`RetrySchedule`], combined with `.when(...)` classification from
//! [`crate::error::Error::is_retriable`].
//!
//! # Example
//!
//! ```rust,no_run
//! use backon::Retryable;
//! use samovar::config::RetrySchedule;
//! use samovar::retry;
//!
//! async fn example() -> samovar::error::Result<()> {
//!     let value = (|| async { fallible().await })
//!         .retry(retry::policy(&RetrySchedule::default()))
//!         .when(|e: &samovar::error::Error| e.is_retriable())
//!         .await?;
//!     Ok(())
//! }
//! # async fn fallible() -> samovar::error::Result<()> { Ok(()) }
//! ```

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::{ConnectionConfig, RetrySchedule};

/// Build a backoff policy from a configured schedule.
///
/// Jitter is always applied so a fleet of clients recovering from the same
/// broker outage does not reconnect in lockstep.
pub fn policy(schedule: &RetrySchedule) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(schedule.min_delay)
        .with_max_delay(schedule.max_delay)
        .with_max_times(schedule.max_retries)
        .with_jitter()
}

/// Policy for re-establishing a broker socket.
///
/// Starts at 100ms and is bounded by the configured connect timeout, so a
/// slow-to-accept broker cannot push the backoff past the point where the
/// next attempt would be cut off anyway.
pub fn reconnect_policy(config: &ConnectionConfig) -> ExponentialBuilder {
    let max_delay = config.connecting_timeout.min(Duration::from_secs(10));
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(max_delay)
        .with_max_times(config.max_reconnect_attempts)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use backon::Retryable;

    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_retry_succeeds_on_third_attempt() {
        let attempts = AtomicU32::new(0);

        let result = (|| async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < 2 {
                Err(Error::Timeout)
            } else {
                Ok(42)
            }
        })
        .retry(policy(&RetrySchedule {
            max_retries: 3,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }))
        .when(|e| e.is_retriable())
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let attempts = AtomicU32::new(0);

        let result: Result<i32, Error> = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Disposed)
        })
        .retry(policy(&RetrySchedule {
            max_retries: 3,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }))
        .when(|e| e.is_retriable())
        .await;

        assert_eq!(result.unwrap_err(), Error::Disposed);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_after_max_attempts() {
        let attempts = AtomicU32::new(0);

        let result: Result<i32, Error> = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Timeout)
        })
        .retry(policy(&RetrySchedule {
            max_retries: 3,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }))
        .when(|e| e.is_retriable())
        .await;

        assert_eq!(result.unwrap_err(), Error::Timeout);
        assert_eq!(attempts.load(Ordering::SeqCst), 4); // initial + 3 retries
    }
}
