//! Response classification.
//!
//! # Default Policy
//! ```text
//! transport error / timeout   → RetryableFailure
//! oversized body              → PermanentFailure (Transport)
//! 5xx                         → RetryableFailure
//! accepted 2xx, body decodes  → Success
//! accepted 2xx, bad body      → PermanentFailure (Decode)
//! anything else (4xx, ...)    → PermanentFailure (Status)
//! ```
//!
//! # Design Decisions
//! - The accepted status set is per call site (e.g. 201 for resource creation)
//! - Body decoding happens here so decode errors never reach the retry loop as raw errors

use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::call::outcome::{ClassifiedOutcome, FailureCause, TransportError};

/// Maximum number of body bytes kept in a failure cause.
const BODY_SNIPPET_LIMIT: usize = 512;

/// A fully received downstream response.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    fn body_snippet(&self) -> String {
        let end = self.body.len().min(BODY_SNIPPET_LIMIT);
        String::from_utf8_lossy(&self.body[..end]).into_owned()
    }
}

/// What a network operation hands back before classification.
pub type RawOutcome = Result<HttpReply, TransportError>;

/// Maps a raw attempt outcome to a [`ClassifiedOutcome`].
pub trait Classifier<T>: Send + Sync {
    fn classify(&self, raw: RawOutcome) -> ClassifiedOutcome<T>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Accepted {
    AnySuccess,
    Only(Vec<StatusCode>),
}

/// Default HTTP classifier with a configurable accepted status set and body decoder.
#[derive(Debug, Clone)]
pub struct HttpClassifier<T> {
    accepted: Accepted,
    decode: fn(&[u8]) -> Result<T, String>,
}

impl<T: DeserializeOwned> HttpClassifier<T> {
    /// Accept any 2xx and decode the body as JSON.
    pub fn json() -> Self {
        Self {
            accepted: Accepted::AnySuccess,
            decode: |body| serde_json::from_slice(body).map_err(|e| e.to_string()),
        }
    }
}

impl HttpClassifier<()> {
    /// Accept any 2xx and ignore the body.
    pub fn discard_body() -> Self {
        Self {
            accepted: Accepted::AnySuccess,
            decode: |_| Ok(()),
        }
    }
}

impl<T> HttpClassifier<T> {
    /// Restrict success to the given status. Repeated calls widen the set.
    pub fn expect_status(mut self, status: StatusCode) -> Self {
        match &mut self.accepted {
            Accepted::AnySuccess => self.accepted = Accepted::Only(vec![status]),
            Accepted::Only(list) => list.push(status),
        }
        self
    }

    fn accepts(&self, status: StatusCode) -> bool {
        match &self.accepted {
            Accepted::AnySuccess => status.is_success(),
            Accepted::Only(list) => list.contains(&status),
        }
    }
}

impl<T> Classifier<T> for HttpClassifier<T> {
    fn classify(&self, raw: RawOutcome) -> ClassifiedOutcome<T> {
        let reply = match raw {
            Ok(reply) => reply,
            Err(err) if err.is_retryable() => return ClassifiedOutcome::RetryableFailure(err.into()),
            Err(err) => return ClassifiedOutcome::PermanentFailure(err.into()),
        };

        if reply.status.is_server_error() {
            return ClassifiedOutcome::RetryableFailure(FailureCause::Status {
                status: reply.status,
                body: reply.body_snippet(),
            });
        }

        if !self.accepts(reply.status) {
            return ClassifiedOutcome::PermanentFailure(FailureCause::Status {
                status: reply.status,
                body: reply.body_snippet(),
            });
        }

        match (self.decode)(&reply.body) {
            Ok(value) => ClassifiedOutcome::Success(value),
            Err(message) => ClassifiedOutcome::PermanentFailure(FailureCause::Decode(message)),
        }
    }
}

/// Adapter turning a closure into a [`Classifier`].
pub struct ClassifyFn<F>(F);

/// Build a classifier from a closure, for call sites with their own contract.
pub fn classify_with<T, F>(f: F) -> ClassifyFn<F>
where
    F: Fn(RawOutcome) -> ClassifiedOutcome<T> + Send + Sync,
{
    ClassifyFn(f)
}

impl<T, F> Classifier<T> for ClassifyFn<F>
where
    F: Fn(RawOutcome) -> ClassifiedOutcome<T> + Send + Sync,
{
    fn classify(&self, raw: RawOutcome) -> ClassifiedOutcome<T> {
        (self.0)(raw)
    }
}
