//! Process-wide client lifecycle.
//!
//! The trace client is the only shared mutable resource in the system, so its
//! construction goes through a guarded lazy-initialization cell: concurrent
//! first callers converge on a single instance, later callers reuse it.

use std::sync::{Arc, OnceLock};

use crate::client::TraceClient;
use crate::config::TraceConfig;
use crate::exporter::SpanExporter;

/// Lazily constructs and memoizes the single `TraceClient`. Cheap to clone;
/// all clones share the same cell.
#[derive(Clone, Default)]
pub struct ClientLifecycle {
    cell: Arc<OnceLock<Arc<TraceClient>>>,
}

impl ClientLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing client, or atomically construct one from `config`.
    ///
    /// Racing first callers block on the cell; exactly one constructor runs
    /// and every caller observes its result. The config of later callers is
    /// ignored — first initialization wins.
    pub fn get_or_create(&self, config: &TraceConfig) -> Arc<TraceClient> {
        Arc::clone(
            self.cell
                .get_or_init(|| Arc::new(TraceClient::from_config(config))),
        )
    }

    /// Same as `get_or_create`, with an explicit exporter. The factory runs
    /// only if this call constructs the client.
    pub fn get_or_create_with<F>(&self, config: &TraceConfig, exporter: F) -> Arc<TraceClient>
    where
        F: FnOnce() -> Box<dyn SpanExporter>,
    {
        Arc::clone(
            self.cell
                .get_or_init(|| Arc::new(TraceClient::new(config, exporter()))),
        )
    }

    /// The already-constructed client, if any.
    pub fn get(&self) -> Option<Arc<TraceClient>> {
        self.cell.get().cloned()
    }

    /// Whether telemetry is enabled. Reports `true` until a client exists;
    /// the interceptor additionally consults its own config so no telemetry
    /// work happens before initialization when disabled.
    pub fn is_enabled(&self) -> bool {
        self.cell.get().map(|c| c.enabled()).unwrap_or(true)
    }

    /// Drain buffered telemetry. Safe to call any number of times, including
    /// before any client exists (no-op).
    pub fn flush(&self) {
        if let Some(client) = self.cell.get() {
            client.flush();
        }
    }
}

/// Flushes the lifecycle when dropped. Hold one for the lifetime of the
/// application so telemetry buffered at shutdown still goes out.
pub struct FlushGuard {
    lifecycle: ClientLifecycle,
}

impl FlushGuard {
    pub fn new(lifecycle: ClientLifecycle) -> Self {
        Self { lifecycle }
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        self.lifecycle.flush();
    }
}
