//! Retry for reads against the API server
//!
//! Reads made while building the current state are retried with exponential
//! backoff and jitter when the failure looks transient (server errors,
//! throttling, connection trouble). Client errors are returned at once so the
//! reconcile pass fails fast and the controller's own requeue takes over.
//! Writes are never retried here: a failed write ends the pass.
//!
//! ```ignore
//! use lattice_topology::retry::{retry_with_backoff, RetryConfig};
//!
//! let cluster = retry_with_backoff(&RetryConfig::with_max_attempts(3), "get_cluster", || {
//!     api.get_opt("prod")
//! })
//! .await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Backoff settings
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = unbounded)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Factor applied to the delay after each failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Config giving up after `attempts` tries
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Undithered delay after `delay`, capped at `max_delay`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Errors that may succeed when the same request is repeated
pub trait Transient {
    /// Whether repeating the request could help
    fn is_transient(&self) -> bool;
}

impl Transient for kube::Error {
    fn is_transient(&self) -> bool {
        match self {
            kube::Error::Api(ae) => ae.code >= 500 || ae.code == 429,
            kube::Error::SerdeError(_) => false,
            _ => true,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of
/// attempts; the last error is returned
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Transient,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Read failed after max retries"
                    );
                    return Err(e);
                }

                // 0.5x to 1.5x
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Read failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    enum ReadError {
        Unavailable,
        Forbidden,
    }

    impl std::fmt::Display for ReadError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Transient for ReadError {
        fn is_transient(&self) -> bool {
            matches!(self, ReadError::Unavailable)
        }
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        }
    }

    /// Story: A read that fails while the API server restarts succeeds on a
    /// later attempt
    #[tokio::test]
    async fn story_transient_failures_are_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = retry_with_backoff(&fast(5), "get_cluster", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ReadError::Unavailable)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_returned_at_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, ReadError> = retry_with_backoff(&fast(5), "list_clusters", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ReadError::Forbidden)
            }
        })
        .await;

        assert_eq!(result, Err(ReadError::Forbidden));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, ReadError> = retry_with_backoff(&fast(3), "get", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ReadError::Unavailable)
            }
        })
        .await;

        assert_eq!(result, Err(ReadError::Unavailable));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delays_grow_up_to_the_cap() {
        let config = fast(0);
        assert_eq!(config.next_delay(Duration::from_millis(1)), Duration::from_millis(2));
        assert_eq!(config.next_delay(Duration::from_millis(8)), Duration::from_millis(10));
    }

    #[test]
    fn api_errors_are_classified_by_status_code() {
        let api_error = |code: u16| {
            kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: String::new(),
                reason: String::new(),
                code,
            })
        };
        assert!(api_error(503).is_transient());
        assert!(api_error(429).is_transient());
        assert!(!api_error(403).is_transient());
        assert!(!api_error(422).is_transient());
    }
}
