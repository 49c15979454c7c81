//! Deadline and cancellation enforcement.
//!
//! # Responsibilities
//! - Race a downstream operation against the call deadline and cancel signal
//! - Provide an interruptible wait for inter-attempt delays
//!
//! # Design Decisions
//! - Uses Tokio's timer facilities; no busy waiting
//! - Losing futures are dropped, which cancels in-flight requests and frees connections
//! - Cancellation wins over the deadline when both are ready

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Horizon used when a timeout is too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Reason a call stopped before producing an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupt {
    #[error("call cancelled")]
    Cancelled,

    #[error("call deadline exceeded")]
    DeadlineExceeded,
}

/// Absolute deadline `timeout` from now, saturating instead of overflowing.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Fail fast if the call was cancelled or its deadline passed.
pub fn check(deadline: Instant, cancel: &CancellationToken) -> Result<(), Interrupt> {
    if cancel.is_cancelled() {
        Err(Interrupt::Cancelled)
    } else if Instant::now() >= deadline {
        Err(Interrupt::DeadlineExceeded)
    } else {
        Ok(())
    }
}

/// Drive `fut` until it completes, the deadline passes, or the call is cancelled.
pub async fn race<F: Future>(
    fut: F,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<F::Output, Interrupt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        _ = sleep_until(deadline) => Err(Interrupt::DeadlineExceeded),
        output = fut => Ok(output),
    }
}

/// Wait `delay`, returning early on cancellation.
///
/// A delay that would end at or after the deadline is not started at all:
/// no attempt could follow it.
pub async fn interruptible_sleep(
    delay: Duration,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<(), Interrupt> {
    check(deadline, cancel)?;

    let wake = match Instant::now().checked_add(delay) {
        Some(wake) if wake < deadline => wake,
        _ => return Err(Interrupt::DeadlineExceeded),
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        _ = sleep_until(wake) => Ok(()),
    }
}
