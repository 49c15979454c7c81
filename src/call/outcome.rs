//! Classified attempt outcomes and failure causes.

use http::StatusCode;
use thiserror::Error;

use crate::resilience::circuit_breaker::CircuitOpenError;

/// Failure of the transport itself; no usable HTTP response was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// An oversized body will be oversized again; everything else may be transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::BodyTooLarge { .. })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("downstream responded with {status}")]
    Status { status: StatusCode, body: String },

    #[error("malformed response payload: {0}")]
    Decode(String),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("{0}")]
    Other(String),
}

impl FailureCause {
    /// True when the failure is a local breaker rejection rather than a downstream answer.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, FailureCause::CircuitOpen(_))
    }

    /// Status code reported by the downstream, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FailureCause::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Outcome of one attempt, reduced to what retry and breaker decisions need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedOutcome<T> {
    Success(T),
    RetryableFailure(FailureCause),
    PermanentFailure(FailureCause),
}

impl<T> ClassifiedOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ClassifiedOutcome::Success(_))
    }

    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            ClassifiedOutcome::Success(_) => None,
            ClassifiedOutcome::RetryableFailure(cause) | ClassifiedOutcome::PermanentFailure(cause) => Some(cause),
        }
    }

    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ClassifiedOutcome::Success(_) => "success",
            ClassifiedOutcome::RetryableFailure(_) => "retryable",
            ClassifiedOutcome::PermanentFailure(_) => "permanent",
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ClassifiedOutcome<U> {
        match self {
            ClassifiedOutcome::Success(value) => ClassifiedOutcome::Success(f(value)),
            ClassifiedOutcome::RetryableFailure(cause) => ClassifiedOutcome::RetryableFailure(cause),
            ClassifiedOutcome::PermanentFailure(cause) => ClassifiedOutcome::PermanentFailure(cause),
        }
    }
}
