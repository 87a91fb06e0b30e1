//! Bounded retry for operations that fail transiently while a remote
//! service starts up or applies a configuration change.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Default attempt budget while waiting for the appliance to start.
pub const DEFAULT_STARTUP_ATTEMPTS: u32 = 20;

/// Default wait between startup probes.
pub const DEFAULT_STARTUP_INTERVAL: Duration = Duration::from_secs(60);

/// Default attempt budget while waiting for a new address to accept logins.
pub const DEFAULT_REACHABILITY_ATTEMPTS: u32 = 5;

/// Default wait between reachability probes.
pub const DEFAULT_REACHABILITY_INTERVAL: Duration = Duration::from_secs(15);

/// How many times to run an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total invocations, including the first. Zero is treated as one.
    pub max_attempts: u32,

    /// Wait after each transient failure.
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Coarse policy for an appliance that may still be booting.
    pub const fn startup() -> Self {
        Self::new(DEFAULT_STARTUP_ATTEMPTS, DEFAULT_STARTUP_INTERVAL)
    }

    /// Finer policy for an address change that may not have applied yet.
    pub const fn reachability() -> Self {
        Self::new(DEFAULT_REACHABILITY_ATTEMPTS, DEFAULT_REACHABILITY_INTERVAL)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed transiently; carries the last failure.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// A failure that retrying cannot fix.
    #[error("{0}")]
    Fatal(E),
}

impl<E> RetryError<E> {
    /// Returns true if the attempt budget ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// The underlying failure, discarding the retry context.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Fatal(e) => e,
        }
    }
}

/// Run `operation` until it succeeds, fails non-transiently, or the policy's
/// attempt budget is spent.
///
/// Failures for which `is_transient` returns false propagate immediately as
/// [`RetryError::Fatal`]. There is no wait after the final attempt.
pub async fn with_retry<T, E, F, Fut, C>(
    policy: RetryPolicy,
    is_transient: C,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !is_transient(&e) => return Err(RetryError::Fatal(e)),
            Err(e) if attempt >= max_attempts => {
                warn!(attempts = attempt, error = %e, "Retry budget exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts,
                    wait_secs = policy.interval.as_secs(),
                    error = %e,
                    "Transient failure, will retry"
                );
                tokio::time::sleep(policy.interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum ProbeError {
        Starting,
        Broken,
    }

    impl Display for ProbeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Starting => f.write_str("starting"),
                Self::Broken => f.write_str("broken"),
            }
        }
    }

    fn transient(e: &ProbeError) -> bool {
        matches!(e, ProbeError::Starting)
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_runs_exactly_max_attempts() {
        let mut calls = 0;
        let policy = RetryPolicy::new(3, Duration::from_secs(60));

        let result: Result<(), _> = with_retry(policy, transient, || {
            calls += 1;
            async { Err(ProbeError::Starting) }
        })
        .await;

        assert_eq!(calls, 3);
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, ProbeError::Starting);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_does_not_retry() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(RetryPolicy::startup(), transient, || {
            calls += 1;
            async { Err(ProbeError::Broken) }
        })
        .await;

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(RetryError::Fatal(ProbeError::Broken))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let start = tokio::time::Instant::now();

        let result = with_retry(RetryPolicy::new(5, Duration::from_secs(15)), transient, || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    Err(ProbeError::Starting)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_runs_once() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(RetryPolicy::new(0, Duration::ZERO), transient, || {
            calls += 1;
            async { Err(ProbeError::Starting) }
        })
        .await;

        assert_eq!(calls, 1);
        assert!(result.unwrap_err().is_exhausted());
    }

    #[test]
    fn test_default_policies() {
        assert_eq!(RetryPolicy::startup().max_attempts, 20);
        assert_eq!(RetryPolicy::startup().interval, Duration::from_secs(60));
        assert_eq!(RetryPolicy::reachability().interval, Duration::from_secs(15));
    }
}
