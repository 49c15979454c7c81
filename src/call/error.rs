//! Caller-facing call errors.

use std::time::Duration;
use http::StatusCode;
use thiserror::Error;

use crate::call::outcome::FailureCause;
use crate::resilience::circuit_breaker::CircuitOpenError;
use crate::resilience::timeouts::Interrupt;

/// Why a resilient call did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The dependency's breaker is open; nothing was sent.
    #[error("circuit for {dependency} is open")]
    CircuitOpen {
        dependency: String,
        retry_after: Option<Duration>,
    },

    #[error("call deadline exceeded")]
    DeadlineExceeded,

    #[error("call cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {cause}")]
    RetriesExhausted { attempts: u32, cause: FailureCause },

    #[error("downstream call failed: {0}")]
    PermanentFailure(FailureCause),
}

impl CallError {
    /// Status to report to the end user for this failure.
    ///
    /// `None` for cancellation: nobody is waiting for the answer.
    pub fn http_status(&self) -> Option<StatusCode> {
        match self {
            CallError::CircuitOpen { .. } | CallError::RetriesExhausted { .. } => {
                Some(StatusCode::SERVICE_UNAVAILABLE)
            }
            CallError::DeadlineExceeded => Some(StatusCode::GATEWAY_TIMEOUT),
            CallError::Cancelled => None,
            CallError::PermanentFailure(cause) => Some(match cause {
                FailureCause::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => match cause.status() {
                    Some(status) if matches!(status.as_u16(), 401 | 403 | 404) => status,
                    _ => StatusCode::BAD_GATEWAY,
                },
            }),
        }
    }

    /// Remaining breaker cool-down, when the call was short-circuited.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CallError::CircuitOpen { retry_after, .. } => *retry_after,
            CallError::PermanentFailure(FailureCause::CircuitOpen(e)) => e.retry_after,
            _ => None,
        }
    }

    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            CallError::CircuitOpen { .. } => "circuit_open",
            CallError::DeadlineExceeded => "deadline_exceeded",
            CallError::Cancelled => "cancelled",
            CallError::RetriesExhausted { .. } => "retries_exhausted",
            CallError::PermanentFailure(_) => "permanent_failure",
        }
    }
}

impl From<Interrupt> for CallError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => CallError::Cancelled,
            Interrupt::DeadlineExceeded => CallError::DeadlineExceeded,
        }
    }
}

impl From<CircuitOpenError> for CallError {
    fn from(err: CircuitOpenError) -> Self {
        CallError::CircuitOpen {
            dependency: err.dependency,
            retry_after: err.retry_after,
        }
    }
}
