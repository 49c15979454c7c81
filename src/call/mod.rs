//! Resilient inter-service calls.
//!
//! # Data Flow
//! ```text
//! Call site (downstream client):
//!     → context.rs (deadline, parent trace, cancel signal)
//!     → executor.rs (breaker gate, retry loop, spans)
//!         → operation (HTTP request with injected trace headers)
//!         → classify.rs (raw reply → ClassifiedOutcome)
//!     → error.rs (CallError returned to the caller)
//! ```
//!
//! # Design Decisions
//! - Only classified outcomes drive retry and breaker decisions
//! - Failure causes stay typed end to end; callers match, never downcast

pub mod classify;
pub mod context;
pub mod error;
pub mod executor;
pub mod outcome;

pub use classify::{classify_with, Classifier, HttpClassifier, HttpReply, RawOutcome};
pub use context::CallContext;
pub use error::CallError;
pub use executor::{Attempt, CallExecutor};
pub use outcome::{ClassifiedOutcome, FailureCause, TransportError};
