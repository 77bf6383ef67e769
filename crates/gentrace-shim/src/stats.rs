//! Atomic shim statistics counters.
//!
//! Lock-free counters for call volume and token usage across all wrapped
//! targets. All atomics use `Relaxed` ordering — these are monotonic display
//! counters with no synchronization requirements.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gentrace_client::TelemetryRecord;
use serde::Serialize;

struct StatsInner {
    total_calls: AtomicU64,
    errored_calls: AtomicU64,
    input_units: AtomicU64,
    output_units: AtomicU64,
}

/// Thread-safe shim statistics. Cheap to clone (Arc).
#[derive(Clone)]
pub struct ShimStats {
    inner: Arc<StatsInner>,
}

/// Snapshot of current stats values, serializable to JSON.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub total_calls: u64,
    pub errored_calls: u64,
    pub input_units: u64,
    pub output_units: u64,
}

impl ShimStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatsInner {
                total_calls: AtomicU64::new(0),
                errored_calls: AtomicU64::new(0),
                input_units: AtomicU64::new(0),
                output_units: AtomicU64::new(0),
            }),
        }
    }

    /// Fold one finished record into the counters.
    pub fn record_call(&self, record: &TelemetryRecord) {
        self.inner.total_calls.fetch_add(1, Ordering::Relaxed);
        self.inner
            .input_units
            .fetch_add(record.usage.input_units, Ordering::Relaxed);
        self.inner
            .output_units
            .fetch_add(record.usage.output_units, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.inner.total_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.errored_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_calls: self.inner.total_calls.load(Ordering::Relaxed),
            errored_calls: self.inner.errored_calls.load(Ordering::Relaxed),
            input_units: self.inner.input_units.load(Ordering::Relaxed),
            output_units: self.inner.output_units.load(Ordering::Relaxed),
        }
    }
}

impl Default for ShimStats {
    fn default() -> Self {
        Self::new()
    }
}
