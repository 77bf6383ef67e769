//! Buffered trace client and RAII span guard.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TraceConfig;
use crate::exporter::{LogExporter, SpanExporter};
use crate::record::TelemetryRecord;

/// Terminal status of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
    /// The caller abandoned the call (dropped future or partially consumed
    /// stream) before it finished.
    Cancelled,
}

/// One finished span, ready for export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanData {
    pub id: Uuid,
    pub trace_id: Uuid,
    pub name: String,
    pub start: SystemTime,
    pub end: SystemTime,
    pub status: SpanStatus,
    /// Provider status classification for failed calls (e.g. 429).
    pub status_code: Option<u16>,
    /// The normalized telemetry payload, absent for spans that closed
    /// before a record could be built (errors, cancellation).
    pub record: Option<TelemetryRecord>,
}

/// Client for the tracing backend. Buffers finished spans until `flush`.
///
/// One instance per process, constructed through `ClientLifecycle`. The
/// buffer is the only shared mutable state; submission never blocks on I/O
/// and never fails toward the intercepted caller.
pub struct TraceClient {
    enabled: bool,
    debug: bool,
    buffer: Mutex<Vec<SpanData>>,
    exporter: Box<dyn SpanExporter>,
}

impl TraceClient {
    pub fn new(config: &TraceConfig, exporter: Box<dyn SpanExporter>) -> Self {
        Self {
            enabled: config.enabled,
            debug: config.debug,
            buffer: Mutex::new(Vec::new()),
            exporter,
        }
    }

    /// Construct with the default exporter (structured log lines).
    pub fn from_config(config: &TraceConfig) -> Self {
        Self::new(config, Box::new(LogExporter))
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Open a span. The returned guard must be finished (or dropped, which
    /// closes it as cancelled) before the call it covers returns.
    pub fn start_span(self: &Arc<Self>, name: &str) -> SpanGuard {
        SpanGuard {
            client: Arc::clone(self),
            data: Some(SpanData {
                id: Uuid::new_v4(),
                trace_id: Uuid::new_v4(),
                name: name.to_string(),
                start: SystemTime::now(),
                end: SystemTime::now(),
                status: SpanStatus::Ok,
                status_code: None,
                record: None,
            }),
        }
    }

    /// Number of spans waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Drain the buffer through the exporter. Idempotent: flushing an empty
    /// or already-flushed buffer is a no-op. Export failures are logged and
    /// the batch is dropped — this layer never retries.
    pub fn flush(&self) -> usize {
        let batch = match self.buffer.lock() {
            Ok(mut buffer) => std::mem::take(&mut *buffer),
            Err(_) => return 0,
        };
        if batch.is_empty() {
            return 0;
        }
        let count = batch.len();
        if let Err(e) = self.exporter.export(batch) {
            tracing::warn!(error = %e, spans = count, "Span export failed, dropping batch");
            return 0;
        }
        count
    }

    fn submit(&self, span: SpanData) {
        if self.debug {
            tracing::debug!(
                span = %span.name,
                status = ?span.status,
                "Span closed"
            );
        }
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push(span);
        }
    }
}

/// RAII handle for an open span.
///
/// Exactly one of `finish_ok` / `finish_error` closes the span normally; if
/// neither ran by the time the guard drops (abandoned future, partially
/// consumed stream), the span is closed with `Cancelled` status instead of
/// leaking.
pub struct SpanGuard {
    client: Arc<TraceClient>,
    data: Option<SpanData>,
}

impl SpanGuard {
    /// Attach the normalized record. The record is immutable once the span
    /// closes.
    pub fn set_record(&mut self, record: TelemetryRecord) {
        if let Some(data) = self.data.as_mut() {
            data.record = Some(record);
        }
    }

    pub fn finish_ok(mut self) {
        self.close(SpanStatus::Ok, None);
    }

    pub fn finish_error(mut self, status_code: Option<u16>) {
        self.close(SpanStatus::Error, status_code);
    }

    fn close(&mut self, status: SpanStatus, status_code: Option<u16>) {
        if let Some(mut data) = self.data.take() {
            data.end = SystemTime::now();
            data.status = status;
            data.status_code = status_code;
            self.client.submit(data);
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.close(SpanStatus::Cancelled, None);
    }
}
