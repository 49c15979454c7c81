//! Resilience primitives.
//!
//! # Data Flow
//! ```text
//! Logical call to a dependency:
//!     → circuit_breaker.rs (may this call run at all?)
//!     → backoff.rs (delays between attempts)
//!     → timeouts.rs (every attempt and delay bounded by deadline and cancel)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every call has a deadline
//! - Breaker state is per dependency; dependencies never share a lock
//! - Backoff is a pure function of its inputs

pub mod backoff;
pub mod circuit_breaker;
pub mod timeouts;
