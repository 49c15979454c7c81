//! HTTP plumbing around the call layer.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → middleware/inbound.rs (extract traceparent, Authorization)
//!     → handler builds CallContext from InboundContext
//!     → request.rs (DownstreamRequest sent once per attempt)
//!     → response.rs (CallError → status, JSON body, Retry-After)
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod response;

pub use middleware::{inbound_context_middleware, InboundContext};
pub use request::DownstreamRequest;
