//! Span export seam.
//!
//! The backend's ingestion transport is not implemented here; exporters only
//! shape and hand off the batch payload the backend expects. `LogExporter`
//! writes that payload as a structured log line, `NoopExporter` discards it,
//! and `InMemoryExporter` captures it for tests.

use std::sync::{Arc, Mutex};

use crate::client::SpanData;

/// Failure while exporting a span batch. Telemetry is best-effort: callers
/// log these and move on, they never reach the intercepted caller.
#[derive(Debug, thiserror::Error)]
#[error("span export failed: {message}")]
pub struct ExportError {
    pub message: String,
}

impl ExportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Destination for finished spans, drained by `TraceClient::flush`.
pub trait SpanExporter: Send + Sync {
    fn export(&self, batch: Vec<SpanData>) -> Result<(), ExportError>;
}

/// Serialize a batch into the event-list shape the backend ingests.
pub fn ingestion_payload(batch: &[SpanData]) -> serde_json::Value {
    let events: Vec<serde_json::Value> = batch
        .iter()
        .map(|span| {
            serde_json::json!({
                "id": span.id,
                "type": if span.record.is_some() { "generation-create" } else { "span-create" },
                "body": span,
            })
        })
        .collect();
    serde_json::json!({ "batch": events })
}

/// Writes each batch as one structured log line. The default exporter when
/// no backend host is configured.
#[derive(Debug, Default)]
pub struct LogExporter;

impl SpanExporter for LogExporter {
    fn export(&self, batch: Vec<SpanData>) -> Result<(), ExportError> {
        let payload = ingestion_payload(&batch);
        let json = serde_json::to_string(&payload)
            .map_err(|e| ExportError::new(format!("serialize batch: {e}")))?;
        tracing::info!(target: "gentrace::export", spans = batch.len(), payload = %json, "Exported span batch");
        Ok(())
    }
}

/// Discards every batch. Used when telemetry is disabled.
#[derive(Debug, Default)]
pub struct NoopExporter;

impl SpanExporter for NoopExporter {
    fn export(&self, _batch: Vec<SpanData>) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Captures exported spans for assertions in tests. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything exported so far.
    pub fn spans(&self) -> Vec<SpanData> {
        self.spans.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.spans.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SpanExporter for InMemoryExporter {
    fn export(&self, batch: Vec<SpanData>) -> Result<(), ExportError> {
        if let Ok(mut spans) = self.spans.lock() {
            spans.extend(batch);
        }
        Ok(())
    }
}
