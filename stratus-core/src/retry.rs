//! Retry - Bounded retry of a remote call until a predicate stops it
//!
//! Used for remote error classes that mean "not yet consistent" (a bucket
//! that was just created, a policy still propagating). Permanent errors must
//! make the predicate return false so they surface on the first attempt.
//!
//! # Example
//!
//! ```ignore
//! let cors = retry_until(
//!     &ctx,
//!     &RetryConfig::with_timeout(timeouts.create),
//!     "put bucket CORS",
//!     || api.put_bucket_cors(&bucket, &rules),
//!     |res| matches!(res, Err(e) if e.is_no_such_bucket()),
//! )
//! .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::context::{Interrupted, OperationContext};
use crate::provider::ProviderError;

/// Default pause between attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Default upper bound for a retry loop
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Wall-clock bound for the whole loop
    pub timeout: Duration,
    /// Pause between attempts; zero is allowed for tests
    pub interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_RETRY_TIMEOUT,
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl RetryConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Why a retry loop ended without a verdict from the predicate
#[derive(Debug)]
pub enum RetryError<E> {
    /// The timeout elapsed while the predicate still asked for a retry
    Timeout {
        attempts: u32,
        elapsed: Duration,
        /// Error of the last completed attempt, if it failed
        last: Option<E>,
    },
    /// The caller cancelled the operation
    Cancelled { attempts: u32 },
    /// The predicate stopped on this error; returned verbatim
    Operation(E),
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Timeout {
                attempts,
                elapsed,
                last,
            } => {
                write!(
                    f,
                    "timed out after {} attempts in {:?}",
                    attempts, elapsed
                )?;
                if let Some(last) = last {
                    write!(f, " (last error: {})", last)?;
                }
                Ok(())
            }
            RetryError::Cancelled { attempts } => {
                write!(f, "cancelled after {} attempts", attempts)
            }
            RetryError::Operation(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

impl<E> RetryError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

impl<E> From<RetryError<E>> for ProviderError
where
    E: Into<ProviderError> + fmt::Display,
{
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Operation(e) => e.into(),
            RetryError::Cancelled { .. } => ProviderError::cancelled(err.to_string()),
            RetryError::Timeout { .. } => ProviderError::timeout(err.to_string()),
        }
    }
}

/// Invoke `operation` until `should_retry` returns false for its result.
///
/// Sleeps `config.interval` between attempts. The loop is bounded by
/// `config.timeout` and by the context's own deadline, whichever is sooner;
/// a running attempt is abandoned when the bound is hit.
pub async fn retry_until<T, E, F, Fut, P>(
    ctx: &OperationContext,
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    mut should_retry: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&Result<T, E>) -> bool,
    E: fmt::Display,
{
    let started = Instant::now();
    let bounded = ctx.child(config.timeout);
    let mut attempts = 0u32;
    let mut last: Option<E> = None;

    loop {
        attempts += 1;

        let result = match bounded.run(operation()).await {
            Ok(result) => result,
            Err(interrupted) => {
                return Err(interrupted_error(interrupted, attempts, started, last));
            }
        };

        if !should_retry(&result) {
            return result.map_err(RetryError::Operation);
        }

        match &result {
            Err(e) => warn!(
                "{} failed (attempt {}), retrying in {:?}: {}",
                operation_name, attempts, config.interval, e
            ),
            Ok(_) => debug!(
                "{} not settled (attempt {}), retrying in {:?}",
                operation_name, attempts, config.interval
            ),
        }
        last = result.err();

        if let Err(interrupted) = bounded.sleep(config.interval).await {
            return Err(interrupted_error(interrupted, attempts, started, last));
        }
    }
}

fn interrupted_error<E>(
    interrupted: Interrupted,
    attempts: u32,
    started: Instant,
    last: Option<E>,
) -> RetryError<E> {
    match interrupted {
        Interrupted::Cancelled => RetryError::Cancelled { attempts },
        Interrupted::Timeout => RetryError::Timeout {
            attempts,
            elapsed: started.elapsed(),
            last,
        },
    }
}
