//! Inbound context middleware.
//! Captures trace context and the caller's credentials from incoming requests.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use http::header::AUTHORIZATION;

use crate::call::context::CallContext;
use crate::call::executor::CallExecutor;
use crate::observability::trace::{TraceContext, TracePropagator};

/// Context attached to every inbound request.
#[derive(Clone, Debug, Default)]
pub struct InboundContext {
    /// Parent trace, if the caller sent a valid `traceparent`.
    pub trace: Option<TraceContext>,
    /// `Authorization` header as received, for forwarding unchanged.
    pub authorization: Option<HeaderValue>,
}

impl InboundContext {
    pub fn from_headers(propagator: &TracePropagator, headers: &HeaderMap) -> Self {
        Self {
            trace: propagator.extract(headers),
            authorization: headers.get(AUTHORIZATION).cloned(),
        }
    }

    /// Token to forward downstream; empty when the caller sent none.
    pub fn token(&self) -> &[u8] {
        self.authorization.as_ref().map(HeaderValue::as_bytes).unwrap_or_default()
    }

    /// Call context continuing this request's trace.
    pub fn call_context(&self, executor: &CallExecutor) -> CallContext {
        executor.context(self.trace.clone())
    }
}

pub async fn inbound_context_middleware(
    State(propagator): State<TracePropagator>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let ctx = InboundContext::from_headers(&propagator, req.headers());

    if let Some(trace) = &ctx.trace {
        tracing::debug!(
            trace_id = %trace.trace_id(),
            parent_span_id = %trace.span_id(),
            "Continuing inbound trace"
        );
    }

    req.extensions_mut().insert(ctx);
    next.run(req).await
}
