//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → trace.rs (W3C trace context and per-attempt spans)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Span exporter (logs by default)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Trace ids flow from the inbound request into every downstream attempt
//! - Metrics are cheap and no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
pub mod trace;
