//! Waiter - Poll a remote object until it reaches a stable target state
//!
//! The refresh function re-reads the remote object and labels what it sees
//! (e.g. `"pending"`, `"ready"`). The wait succeeds once a target label has
//! been observed `continuous_target_occurrence` times in a row, tolerating a
//! bounded run of not-found reads caused by replication lag.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::debug;

use crate::context::{Interrupted, OperationContext};
use crate::provider::ProviderError;

/// First pause between polls before the backoff doubles it
const INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Upper bound of the backoff when no fixed poll interval is set
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Result of one refresh
#[derive(Debug, Clone, PartialEq)]
pub enum Refresh<T> {
    /// The object was read and labelled
    Observed { snapshot: T, state: String },
    /// The object does not exist (yet, or any more)
    NotFound,
}

impl<T> Refresh<T> {
    pub fn observed(snapshot: T, state: impl Into<String>) -> Self {
        Refresh::Observed {
            snapshot,
            state: state.into(),
        }
    }
}

#[derive(Debug)]
pub enum WaitError<E> {
    /// The refresh function failed
    Refresh(E),
    /// The label is neither pending nor target
    UnexpectedState {
        state: String,
        expected: Vec<String>,
    },
    /// Not found more times in a row than tolerated
    NotFound { checks: u32 },
    /// Target not confirmed before the timeout
    Timeout {
        last_state: Option<String>,
        timeout: Duration,
    },
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for WaitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Refresh(e) => write!(f, "{}", e),
            WaitError::UnexpectedState { state, expected } => write!(
                f,
                "unexpected state '{}', wanted target '{}'",
                state,
                expected.join(", ")
            ),
            WaitError::NotFound { checks } => {
                write!(f, "couldn't find resource ({} retries)", checks)
            }
            WaitError::Timeout {
                last_state,
                timeout,
            } => write!(
                f,
                "timeout while waiting for state to become target (last state: '{}', timeout: {:?})",
                last_state.as_deref().unwrap_or(""),
                timeout
            ),
            WaitError::Cancelled => write!(f, "wait was cancelled"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for WaitError<E> {}

impl<E> From<WaitError<E>> for ProviderError
where
    E: Into<ProviderError> + fmt::Display,
{
    fn from(err: WaitError<E>) -> Self {
        match err {
            WaitError::Refresh(e) => e.into(),
            WaitError::NotFound { .. } => ProviderError::not_found(err.to_string()),
            WaitError::Timeout { .. } => ProviderError::timeout(err.to_string()),
            WaitError::Cancelled => ProviderError::cancelled(err.to_string()),
            WaitError::UnexpectedState { .. } => ProviderError::new(err.to_string()),
        }
    }
}

/// Configuration of a state wait
#[derive(Debug, Clone)]
pub struct StateWaiter {
    pub pending: Vec<String>,
    /// Empty target means "wait until the object is gone"
    pub target: Vec<String>,
    pub timeout: Duration,
    /// Initial pause before the first poll
    pub delay: Duration,
    /// Lower bound of the pause between polls
    pub min_interval: Duration,
    /// Fixed pause between polls, overriding the backoff
    pub poll_interval: Option<Duration>,
    /// Consecutive target observations required for success
    pub continuous_target_occurrence: u32,
    /// Consecutive not-found reads tolerated before failing
    pub not_found_checks: u32,
}

impl StateWaiter {
    pub fn new(pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            timeout,
            delay: Duration::ZERO,
            min_interval: Duration::ZERO,
            poll_interval: None,
            continuous_target_occurrence: 1,
            not_found_checks: 20,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn continuous_target_occurrence(mut self, n: u32) -> Self {
        self.continuous_target_occurrence = n.max(1);
        self
    }

    pub fn not_found_checks(mut self, n: u32) -> Self {
        self.not_found_checks = n;
        self
    }

    /// Poll `refresh` until the target is stable.
    ///
    /// Returns the last snapshot, or `None` when the target is empty and the
    /// object disappeared.
    pub async fn wait<T, E, F, Fut>(
        &self,
        ctx: &OperationContext,
        mut refresh: F,
    ) -> Result<Option<T>, WaitError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Refresh<T>, E>>,
    {
        let bounded = ctx.child(self.timeout);
        let mut last_state: Option<String> = None;
        let mut not_found = 0u32;
        let mut target_occurrence = 0u32;
        let mut wait = INITIAL_DELAY;

        let interrupted = |i: Interrupted, last_state: Option<String>| match i {
            Interrupted::Cancelled => WaitError::Cancelled,
            Interrupted::Timeout => WaitError::Timeout {
                last_state,
                timeout: self.timeout,
            },
        };

        if !self.delay.is_zero()
            && let Err(i) = bounded.sleep(self.delay).await
        {
            return Err(interrupted(i, last_state));
        }

        loop {
            let refreshed = match bounded.run(refresh()).await {
                Ok(r) => r.map_err(WaitError::Refresh)?,
                Err(i) => return Err(interrupted(i, last_state)),
            };

            match refreshed {
                Refresh::NotFound => {
                    target_occurrence = 0;
                    if self.target.is_empty() {
                        return Ok(None);
                    }
                    not_found += 1;
                    debug!("wait: resource not found ({}/{})", not_found, self.not_found_checks);
                    if not_found > self.not_found_checks {
                        return Err(WaitError::NotFound { checks: not_found });
                    }
                }
                Refresh::Observed { snapshot, state } => {
                    not_found = 0;
                    debug!("wait: observed state '{}'", state);
                    if self.target.contains(&state) {
                        target_occurrence += 1;
                        if target_occurrence >= self.continuous_target_occurrence {
                            return Ok(Some(snapshot));
                        }
                    } else if self.pending.contains(&state) {
                        target_occurrence = 0;
                    } else {
                        return Err(WaitError::UnexpectedState {
                            state,
                            expected: self.target.clone(),
                        });
                    }
                    last_state = Some(state);
                }
            }

            // Back off exponentially, except while confirming a target
            if target_occurrence == 0 {
                wait = wait.saturating_mul(2);
            }
            let pause = match self.poll_interval {
                Some(interval) => interval,
                None => wait.clamp(self.min_interval, MAX_BACKOFF.max(self.min_interval)),
            };

            if let Err(i) = bounded.sleep(pause).await {
                return Err(interrupted(i, last_state));
            }
        }
    }
}
