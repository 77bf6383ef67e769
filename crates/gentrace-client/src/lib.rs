//! Client-side tracing library for gentrace.
//!
//! Owns the pieces that face the tracing backend: configuration, telemetry
//! value objects, the buffered span client, and the process-wide lifecycle
//! around it. The interception layer lives in `gentrace-shim` and only hands
//! finished spans to this crate.

pub mod client;
pub mod config;
pub mod exporter;
pub mod lifecycle;
pub mod logging;
pub mod record;

pub use client::{SpanData, SpanGuard, SpanStatus, TraceClient};
pub use config::TraceConfig;
pub use exporter::{ExportError, InMemoryExporter, LogExporter, NoopExporter, SpanExporter};
pub use lifecycle::{ClientLifecycle, FlushGuard};
pub use logging::init_logging;
pub use record::{ErrorInfo, TelemetryRecord, UsageInfo, UsageUnit};
