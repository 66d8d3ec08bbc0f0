//! Operation context carrying the deadline and cancellation signal of one
//! reconciliation call.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::provider::{ProviderError, ProviderResult};

/// The reconciliation verb being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Create => "create",
            Verb::Read => "read",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::Import => "import",
        };
        f.write_str(s)
    }
}

/// Why a bounded operation stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("operation timed out")]
    Timeout,
    #[error("operation was cancelled")]
    Cancelled,
}

impl From<Interrupted> for ProviderError {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Timeout => ProviderError::timeout(value.to_string()),
            Interrupted::Cancelled => ProviderError::cancelled(value.to_string()),
        }
    }
}

/// Deadline used when a timeout does not fit the clock (about 30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Debug, Clone)]
pub struct OperationContext {
    verb: Verb,
    deadline: Instant,
    cancel: CancellationToken,
}

impl OperationContext {
    pub fn new(verb: Verb, timeout: Duration) -> Self {
        Self {
            verb,
            deadline: deadline_after(timeout),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Context for a sub-step; its deadline never extends past the parent's
    pub fn child(&self, timeout: Duration) -> Self {
        let deadline = deadline_after(timeout).min(self.deadline);
        Self {
            verb: self.verb,
            deadline,
            cancel: self.cancel.child_token(),
        }
    }

    /// Same context with a different verb (e.g. read after create)
    pub fn for_verb(&self, verb: Verb) -> Self {
        Self {
            verb,
            deadline: self.deadline,
            cancel: self.cancel.clone(),
        }
    }

    /// Run a future bounded by this context's deadline and cancellation
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(Interrupted::Timeout),
            out = fut => Ok(out),
        }
    }

    /// Run a fallible step bounded by this context; an interruption becomes
    /// a timeout or cancellation error
    pub async fn bounded<T, F>(&self, fut: F) -> ProviderResult<T>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        self.run(fut).await?
    }

    /// Sleep for `duration`, waking early on deadline or cancellation
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.run(tokio::time::sleep(duration)).await
    }
}
