//! Transparent instrumentation shim for generative-model client calls.
//!
//! The shim wraps a client library's call sites — sync, async, and
//! streaming — so every logical call produces exactly one trace span and one
//! normalized telemetry record, while the caller observes identical
//! behavior: same return values, same errors, same streaming laziness.
//!
//! Pieces, roughly in dependency order:
//! - [`registry`]: the static table of interceptable call sites;
//! - [`target`]: capability traits an application implements per call site;
//! - [`normalize`]: provider responses into [`TelemetryRecord`]s, including
//!   balance-delta costing;
//! - [`stream`]: lazy chunk-sequence wrappers that close the span at
//!   exhaustion;
//! - [`interceptor`]: the span-per-call wrapping engine;
//! - [`bootstrap`]: startup binding of the table against live adapters.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gentrace_shim::{
//!     call_fn, install, register_tracing, Callable, CallShape, ClientLifecycle, ClientSurface,
//!     GenerationKind, GenerationRequest, MethodSpec, ModelAttributes, RawResponse,
//!     TargetBinding, TargetIdentity, TraceConfig,
//! };
//!
//! # fn main() -> Result<(), gentrace_shim::ShimError> {
//! let spec = MethodSpec::new(
//!     "router.client",
//!     "Client",
//!     "generate",
//!     CallShape::Sync,
//!     GenerationKind::Completion,
//! );
//! let registry = register_tracing([spec.clone()]);
//!
//! let attrs: Arc<dyn ModelAttributes> =
//!     Arc::new(TargetIdentity::new("mistral-7b-instruct-v0.2@fireworks-ai"));
//! let surface = ClientSurface::new().provide_sync(
//!     spec.key(),
//!     TargetBinding::new(
//!         Box::new(call_fn(|_req| Ok(RawResponse::default()))),
//!         attrs,
//!     ),
//! );
//!
//! let mut shim = install(
//!     &registry,
//!     surface,
//!     ClientLifecycle::new(),
//!     TraceConfig::load("gentrace.toml").unwrap_or_default(),
//! )?;
//!
//! let request = GenerationRequest::default();
//! let response = shim.sync_call(&spec.key()).unwrap().invoke(&request);
//! shim.flush();
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod error;
pub mod interceptor;
pub mod normalize;
pub mod registry;
pub mod stats;
pub mod stream;
pub mod target;
pub mod types;

pub use bootstrap::{install, ClientSurface, InstalledShim, TargetBinding};
pub use error::{ProviderError, ShimError};
pub use interceptor::{ShimContext, Traced};
pub use normalize::{
    derive_usage, normalize_completion, normalize_stream, split_model_tag, BalanceWindow,
    RecordSlot,
};
pub use registry::{
    default_method_specs, CallShape, GenerationKind, MethodRegistry, MethodSpec, TargetKey,
    WrapStrategy,
};
pub use stats::{ShimStats, StatsSnapshot};
pub use stream::{TracedChunkStream, TracedChunks};
pub use target::{
    call_fn, AccountBalance, AsyncCallable, AsyncStreamProducer, BoxChunkIter, BoxChunkStream,
    BoxFuture, CallFn, Callable, ChunkResult, ModelAttributes, StreamProducer, TargetIdentity,
};
pub use types::{
    ChatMessage, ChunkChoice, ChunkDelta, GenerationRequest, RawResponse, RawUsage, StreamChunk,
};

// Re-exported so applications only need this crate for the common path.
pub use gentrace_client::{
    ClientLifecycle, FlushGuard, SpanData, SpanStatus, TelemetryRecord, TraceConfig, UsageInfo,
    UsageUnit,
};

/// Build a registry from an iterator of method specs. Duplicate keys replace
/// earlier entries, so re-registering a target never stacks wrappers.
pub fn register_tracing(specs: impl IntoIterator<Item = MethodSpec>) -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    for spec in specs {
        registry.register(spec);
    }
    registry
}
