//! Distributed trace propagation.
//!
//! # Responsibilities
//! - Extract trace context from inbound carriers
//! - Inject trace context into outbound requests
//! - Open a span per downstream attempt and export it when finished
//!
//! # Design Decisions
//! - W3C Trace Context (`traceparent`, `tracestate`) on the wire
//! - Malformed inbound context is ignored and a new trace is started
//! - Every span is exported exactly once, even when dropped unfinished
//! - Each span also enters a `tracing` span so attempt logs carry the ids

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;

pub const TRACEPARENT: &str = "traceparent";
pub const TRACESTATE: &str = "tracestate";

const SUPPORTED_VERSION: &str = "00";
const FLAG_SAMPLED: u8 = 0x01;

/// Errors parsing a `traceparent` value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceParseError {
    #[error("traceparent must have four dash-separated fields")]
    Shape,
    #[error("invalid traceparent version {0:?}")]
    Version(String),
    #[error("invalid trace id")]
    TraceId,
    #[error("invalid parent span id")]
    SpanId,
    #[error("invalid trace flags")]
    Flags,
}

/// 16-byte trace identifier. All-zero is invalid.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId([u8; 16]);

/// 8-byte span identifier. All-zero is invalid.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId([u8; 8]);

impl TraceId {
    pub fn random() -> Self {
        Self(random_nonzero())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0
    }
}

impl SpanId {
    pub fn random() -> Self {
        Self(random_nonzero())
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0
    }
}

fn random_nonzero<const N: usize>() -> [u8; N] {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; N];
    loop {
        rng.fill(&mut bytes[..]);
        if bytes.iter().any(|b| *b != 0) {
            return bytes;
        }
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    bytes.iter().try_for_each(|b| write!(f, "{:02x}", b))
}

/// Parse exactly `2 * N` lowercase hex digits.
fn parse_hex<const N: usize>(s: &str) -> Option<[u8; N]> {
    if s.len() != N * 2 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({})", self)
    }
}

/// Identifiers propagated between services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    sampled: bool,
    trace_state: Option<String>,
}

impl TraceContext {
    pub fn new(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
            trace_state: None,
        }
    }

    /// Start a new trace.
    pub fn new_root() -> Self {
        Self::new(TraceId::random(), SpanId::random(), true)
    }

    /// Same trace, fresh span id.
    pub fn child(&self) -> Self {
        Self {
            span_id: SpanId::random(),
            ..self.clone()
        }
    }

    pub fn with_trace_state(mut self, state: impl Into<String>) -> Self {
        self.trace_state = Some(state.into());
        self
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn trace_state(&self) -> Option<&str> {
        self.trace_state.as_deref()
    }

    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { FLAG_SAMPLED } else { 0 };
        format!("{}-{}-{}-{:02x}", SUPPORTED_VERSION, self.trace_id, self.span_id, flags)
    }
}

impl FromStr for TraceContext {
    type Err = TraceParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.trim().split('-').collect();
        if parts.len() < 4 {
            return Err(TraceParseError::Shape);
        }

        let version = parts[0];
        if parse_hex::<1>(version).is_none() || version == "ff" {
            return Err(TraceParseError::Version(version.to_string()));
        }
        // Version 00 has exactly four fields; later versions may append more.
        if version == SUPPORTED_VERSION && parts.len() != 4 {
            return Err(TraceParseError::Shape);
        }

        let trace_id = parse_hex::<16>(parts[1])
            .filter(|b| b.iter().any(|x| *x != 0))
            .ok_or(TraceParseError::TraceId)?;
        let span_id = parse_hex::<8>(parts[2])
            .filter(|b| b.iter().any(|x| *x != 0))
            .ok_or(TraceParseError::SpanId)?;
        let [flags] = parse_hex::<1>(parts[3]).ok_or(TraceParseError::Flags)?;

        Ok(Self::new(TraceId(trace_id), SpanId(span_id), flags & FLAG_SAMPLED != 0))
    }
}

/// Key/value metadata that can carry trace context.
pub trait Carrier {
    fn get_value(&self, key: &str) -> Option<&str>;
    fn set_value(&mut self, key: &str, value: String);
}

impl Carrier for HeaderMap {
    fn get_value(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.to_str().ok())
    }

    fn set_value(&mut self, key: &str, value: String) {
        match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                self.insert(name, value);
            }
            _ => tracing::debug!(key = %key, "Skipping header not representable in HTTP"),
        }
    }
}

impl Carrier for HashMap<String, String> {
    fn get_value(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }

    fn set_value(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), value);
    }
}

/// Final status of a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    Ok,
    Error(String),
}

impl SpanStatus {
    pub fn error(message: impl fmt::Display) -> Self {
        SpanStatus::Error(message.to_string())
    }
}

/// A completed span handed to the exporter.
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub name: String,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub status: SpanStatus,
    pub attributes: Vec<(&'static str, String)>,
    pub duration: Duration,
}

impl FinishedSpan {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Destination for finished spans.
pub trait SpanExporter: Send + Sync {
    fn export(&self, span: FinishedSpan);
}

/// Exports spans as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExporter;

impl SpanExporter for LogExporter {
    fn export(&self, span: FinishedSpan) {
        let duration_ms = span.duration.as_millis() as u64;
        match &span.status {
            SpanStatus::Ok => tracing::debug!(
                span = %span.name,
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                duration_ms,
                "Span finished"
            ),
            SpanStatus::Error(message) => tracing::info!(
                span = %span.name,
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                duration_ms,
                error = %message,
                "Span finished with error"
            ),
        }
    }
}

/// Keeps finished spans in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryExporter {
    spans: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl SpanExporter for InMemoryExporter {
    fn export(&self, span: FinishedSpan) {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner).push(span);
    }
}

/// An open span. Exported on `finish`, or on drop as abandoned.
pub struct SpanHandle {
    name: String,
    context: TraceContext,
    parent: Option<SpanId>,
    started: Instant,
    attributes: Vec<(&'static str, String)>,
    exporter: Arc<dyn SpanExporter>,
    span: tracing::Span,
    finished: bool,
}

impl SpanHandle {
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn set_attribute(&mut self, key: &'static str, value: impl ToString) {
        let value = value.to_string();
        self.span.record(key, value.as_str());
        self.attributes.push((key, value));
    }

    /// The `tracing` span to instrument work done under this span.
    pub fn tracing_span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn finish(mut self, status: SpanStatus) {
        self.export(status);
    }

    fn export(&mut self, status: SpanStatus) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.exporter.export(FinishedSpan {
            name: std::mem::take(&mut self.name),
            trace_id: self.context.trace_id(),
            span_id: self.context.span_id(),
            parent_span_id: self.parent,
            status,
            attributes: std::mem::take(&mut self.attributes),
            duration: self.started.elapsed(),
        });
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        self.export(SpanStatus::error("span abandoned"));
    }
}

impl fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanHandle")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Creates spans and moves trace context across process boundaries.
#[derive(Clone)]
pub struct TracePropagator {
    exporter: Arc<dyn SpanExporter>,
}

impl Default for TracePropagator {
    fn default() -> Self {
        Self::new(Arc::new(LogExporter))
    }
}

impl TracePropagator {
    pub fn new(exporter: Arc<dyn SpanExporter>) -> Self {
        Self { exporter }
    }

    /// Open a child of `parent`, or a new root when there is none.
    pub fn start_child_span(&self, parent: Option<&TraceContext>, operation: &str) -> (TraceContext, SpanHandle) {
        let context = parent.map_or_else(TraceContext::new_root, TraceContext::child);
        let span = tracing::info_span!(
            "downstream",
            operation = %operation,
            trace_id = %context.trace_id(),
            span_id = %context.span_id(),
            attempt = tracing::field::Empty,
        );
        let handle = SpanHandle {
            name: operation.to_string(),
            context: context.clone(),
            parent: parent.map(TraceContext::span_id),
            started: Instant::now(),
            attributes: Vec::new(),
            exporter: self.exporter.clone(),
            span,
            finished: false,
        };
        (context, handle)
    }

    pub fn inject(&self, context: &TraceContext, carrier: &mut impl Carrier) {
        carrier.set_value(TRACEPARENT, context.to_traceparent());
        if let Some(state) = context.trace_state() {
            carrier.set_value(TRACESTATE, state.to_string());
        }
    }

    pub fn extract(&self, carrier: &impl Carrier) -> Option<TraceContext> {
        let raw = carrier.get_value(TRACEPARENT)?;
        match raw.parse::<TraceContext>() {
            Ok(context) => Some(match carrier.get_value(TRACESTATE) {
                Some(state) => context.with_trace_state(state),
                None => context,
            }),
            Err(e) => {
                tracing::debug!(traceparent = %raw, error = %e, "Ignoring malformed trace context");
                None
            }
        }
    }
}

impl fmt::Debug for TracePropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracePropagator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_and_format_traceparent() {
        let ctx: TraceContext = SAMPLE.parse().unwrap();
        assert_eq!(ctx.trace_id().to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id().to_string(), "00f067aa0ba902b7");
        assert!(ctx.is_sampled());
        assert_eq!(ctx.to_traceparent(), SAMPLE);
    }

    #[test]
    fn test_rejects_malformed_traceparent() {
        assert_eq!("garbage".parse::<TraceContext>(), Err(TraceParseError::Shape));
        assert!(matches!(
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".parse::<TraceContext>(),
            Err(TraceParseError::Version(_))
        ));
        assert_eq!(
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01".parse::<TraceContext>(),
            Err(TraceParseError::TraceId)
        );
        assert_eq!(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01".parse::<TraceContext>(),
            Err(TraceParseError::SpanId)
        );
        assert_eq!(
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01".parse::<TraceContext>(),
            Err(TraceParseError::TraceId)
        );
        assert_eq!(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra".parse::<TraceContext>(),
            Err(TraceParseError::Shape)
        );
    }

    #[test]
    fn test_future_version_may_carry_extra_fields() {
        let ctx = "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00-future"
            .parse::<TraceContext>()
            .unwrap();
        assert!(!ctx.is_sampled());
    }

    #[test]
    fn test_child_span_keeps_trace() {
        let propagator = TracePropagator::new(Arc::new(InMemoryExporter::new()));
        let parent: TraceContext = SAMPLE.parse().unwrap();
        let (child, handle) = propagator.start_child_span(Some(&parent), "auth-service");
        assert_eq!(child.trace_id(), parent.trace_id());
        assert_ne!(child.span_id(), parent.span_id());
        handle.finish(SpanStatus::Ok);
    }

    #[test]
    fn test_root_span_without_parent() {
        let exporter = InMemoryExporter::new();
        let propagator = TracePropagator::new(Arc::new(exporter.clone()));
        let (ctx, handle) = propagator.start_child_span(None, "notifications");
        handle.finish(SpanStatus::error("boom"));

        let spans = exporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].trace_id, ctx.trace_id());
        assert_eq!(spans[0].parent_span_id, None);
        assert_eq!(spans[0].status, SpanStatus::Error("boom".into()));
    }

    #[test]
    fn test_inject_extract_roundtrip_through_headers() {
        let propagator = TracePropagator::default();
        let ctx = TraceContext::new_root().with_trace_state("vendor=abc");
        let mut headers = HeaderMap::new();
        propagator.inject(&ctx, &mut headers);

        assert_eq!(headers.get(TRACEPARENT).unwrap(), ctx.to_traceparent().as_str());
        assert_eq!(propagator.extract(&headers), Some(ctx));
    }

    #[test]
    fn test_extract_ignores_malformed_header() {
        let propagator = TracePropagator::default();
        let mut carrier = HashMap::new();
        carrier.insert(TRACEPARENT.to_string(), "00-bad".to_string());
        assert_eq!(propagator.extract(&carrier), None);
        assert_eq!(propagator.extract(&HashMap::<String, String>::new()), None);
    }

    #[test]
    fn test_dropped_span_is_exported_as_abandoned() {
        let exporter = InMemoryExporter::new();
        let propagator = TracePropagator::new(Arc::new(exporter.clone()));
        let (_, mut handle) = propagator.start_child_span(None, "reservations");
        handle.set_attribute("attempt", 2);
        drop(handle);

        let spans = exporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Error("span abandoned".into()));
        assert_eq!(spans[0].attribute("attempt"), Some("2"));
    }
}
