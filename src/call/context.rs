//! Per-call context: deadline, parent trace and cancel signal.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::call::error::CallError;
use crate::observability::trace::TraceContext;
use crate::resilience::timeouts;

/// Immutable per-call state handed to the executor.
///
/// Cloning shares the cancel signal: cancelling any clone cancels them all.
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Instant,
    trace: Option<TraceContext>,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            trace: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeouts::deadline_after(timeout))
    }

    pub fn with_trace(mut self, trace: Option<TraceContext>) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Fail if the call was cancelled or its deadline passed.
    pub fn checkpoint(&self) -> Result<(), CallError> {
        timeouts::check(self.deadline, &self.cancel).map_err(CallError::from)
    }

    /// Drive `fut` bounded by this context.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, CallError> {
        timeouts::race(fut, self.deadline, &self.cancel)
            .await
            .map_err(CallError::from)
    }

    /// Cancellable wait that refuses to run past the deadline.
    pub async fn sleep(&self, delay: Duration) -> Result<(), CallError> {
        timeouts::interruptible_sleep(delay, self.deadline, &self.cancel)
            .await
            .map_err(CallError::from)
    }
}
