pub mod inbound;

pub use inbound::{inbound_context_middleware, InboundContext};
