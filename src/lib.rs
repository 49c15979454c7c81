//! Resilient inter-service calls for the booking platform.

pub mod call;
pub mod config;
pub mod downstream;
pub mod http;
pub mod observability;
pub mod resilience;

pub use call::{CallContext, CallError, CallExecutor, ClassifiedOutcome};
pub use config::LinkConfig;
pub use observability::trace::{TraceContext, TracePropagator};
pub use resilience::circuit_breaker::{BreakerRegistry, BreakerSettings, CircuitState};
