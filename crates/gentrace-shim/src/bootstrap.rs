//! Startup binding of the method table to live adapters.
//!
//! The application describes its client's interceptable surface as a set of
//! adapter bindings, and `install` pairs each registered method spec with
//! the matching binding. Binding failures are fatal here, at startup, never
//! deferred to the first intercepted call.

use std::collections::HashMap;
use std::sync::Arc;

use gentrace_client::{ClientLifecycle, TraceConfig};

use crate::error::ShimError;
use crate::interceptor::{ShimContext, Traced};
use crate::registry::{MethodRegistry, MethodSpec, TargetKey, WrapStrategy};
use crate::stats::StatsSnapshot;
use crate::target::{
    AccountBalance, AsyncCallable, AsyncStreamProducer, Callable, ModelAttributes, StreamProducer,
};

/// One adapter plus the identity and balance surfaces it reports through.
pub struct TargetBinding<T> {
    pub target: T,
    pub attrs: Arc<dyn ModelAttributes>,
    pub balance: Option<Arc<dyn AccountBalance>>,
}

impl<T> TargetBinding<T> {
    pub fn new(target: T, attrs: Arc<dyn ModelAttributes>) -> Self {
        Self {
            target,
            attrs,
            balance: None,
        }
    }

    pub fn with_balance(mut self, balance: Arc<dyn AccountBalance>) -> Self {
        self.balance = Some(balance);
        self
    }
}

/// The interceptable surface of a client library, keyed by call site. Built
/// once at startup and consumed by `install`.
#[derive(Default)]
pub struct ClientSurface {
    sync: HashMap<TargetKey, TargetBinding<Box<dyn Callable>>>,
    r#async: HashMap<TargetKey, TargetBinding<Box<dyn AsyncCallable>>>,
    stream: HashMap<TargetKey, TargetBinding<Box<dyn StreamProducer>>>,
    async_stream: HashMap<TargetKey, TargetBinding<Box<dyn AsyncStreamProducer>>>,
}

impl ClientSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide_sync(
        mut self,
        key: TargetKey,
        binding: TargetBinding<Box<dyn Callable>>,
    ) -> Self {
        self.sync.insert(key, binding);
        self
    }

    pub fn provide_async(
        mut self,
        key: TargetKey,
        binding: TargetBinding<Box<dyn AsyncCallable>>,
    ) -> Self {
        self.r#async.insert(key, binding);
        self
    }

    pub fn provide_stream(
        mut self,
        key: TargetKey,
        binding: TargetBinding<Box<dyn StreamProducer>>,
    ) -> Self {
        self.stream.insert(key, binding);
        self
    }

    pub fn provide_async_stream(
        mut self,
        key: TargetKey,
        binding: TargetBinding<Box<dyn AsyncStreamProducer>>,
    ) -> Self {
        self.async_stream.insert(key, binding);
        self
    }
}

/// The bound shim: every registered call site wrapped and ready to invoke.
pub struct InstalledShim {
    ctx: ShimContext,
    sync: HashMap<TargetKey, Traced<Box<dyn Callable>>>,
    r#async: HashMap<TargetKey, Traced<Box<dyn AsyncCallable>>>,
    stream: HashMap<TargetKey, Traced<Box<dyn StreamProducer>>>,
    async_stream: HashMap<TargetKey, Traced<Box<dyn AsyncStreamProducer>>>,
}

impl std::fmt::Debug for InstalledShim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstalledShim")
            .field("sync", &self.sync.len())
            .field("async", &self.r#async.len())
            .field("stream", &self.stream.len())
            .field("async_stream", &self.async_stream.len())
            .finish_non_exhaustive()
    }
}

impl InstalledShim {
    pub fn sync_call(&mut self, key: &TargetKey) -> Option<&mut Traced<Box<dyn Callable>>> {
        self.sync.get_mut(key)
    }

    pub fn async_call(&mut self, key: &TargetKey) -> Option<&mut Traced<Box<dyn AsyncCallable>>> {
        self.r#async.get_mut(key)
    }

    pub fn stream_call(&mut self, key: &TargetKey) -> Option<&mut Traced<Box<dyn StreamProducer>>> {
        self.stream.get_mut(key)
    }

    pub fn async_stream_call(
        &mut self,
        key: &TargetKey,
    ) -> Option<&mut Traced<Box<dyn AsyncStreamProducer>>> {
        self.async_stream.get_mut(key)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    pub fn lifecycle(&self) -> &ClientLifecycle {
        &self.ctx.lifecycle
    }

    /// Drain buffered telemetry through the trace client, if one exists.
    pub fn flush(&self) {
        self.ctx.lifecycle.flush();
    }
}

fn missing(spec: &MethodSpec) -> ShimError {
    ShimError::Configuration {
        module: spec.module.clone(),
        object: spec.object.clone(),
        method: spec.method.clone(),
        shape: spec.shape.as_str().to_string(),
    }
}

/// Wrap every call site in `registry` with the adapter the surface provides
/// for it. Fails fast on the first spec with no matching adapter, naming the
/// unbound target.
pub fn install(
    registry: &MethodRegistry,
    mut surface: ClientSurface,
    lifecycle: ClientLifecycle,
    config: TraceConfig,
) -> Result<InstalledShim, ShimError> {
    let ctx = ShimContext::new(config, lifecycle);
    let mut shim = InstalledShim {
        ctx: ctx.clone(),
        sync: HashMap::new(),
        r#async: HashMap::new(),
        stream: HashMap::new(),
        async_stream: HashMap::new(),
    };

    for spec in registry.iter() {
        let key = spec.key();
        tracing::debug!(key = %key, shape = spec.shape.as_str(), "Binding interception target");
        match MethodRegistry::resolve(spec.shape) {
            WrapStrategy::Plain => {
                let binding = surface.sync.remove(&key).ok_or_else(|| missing(spec))?;
                shim.sync.insert(
                    key,
                    Traced::new(
                        binding.target,
                        spec.clone(),
                        ctx.clone(),
                        binding.attrs,
                        binding.balance,
                    ),
                );
            }
            WrapStrategy::PlainAsync => {
                let binding = surface.r#async.remove(&key).ok_or_else(|| missing(spec))?;
                shim.r#async.insert(
                    key,
                    Traced::new(
                        binding.target,
                        spec.clone(),
                        ctx.clone(),
                        binding.attrs,
                        binding.balance,
                    ),
                );
            }
            WrapStrategy::Stream => {
                let binding = surface.stream.remove(&key).ok_or_else(|| missing(spec))?;
                shim.stream.insert(
                    key,
                    Traced::new(
                        binding.target,
                        spec.clone(),
                        ctx.clone(),
                        binding.attrs,
                        binding.balance,
                    ),
                );
            }
            WrapStrategy::AsyncStream => {
                let binding = surface
                    .async_stream
                    .remove(&key)
                    .ok_or_else(|| missing(spec))?;
                shim.async_stream.insert(
                    key,
                    Traced::new(
                        binding.target,
                        spec.clone(),
                        ctx.clone(),
                        binding.attrs,
                        binding.balance,
                    ),
                );
            }
        }
    }

    tracing::info!(targets = registry.len(), "Interception shim installed");
    Ok(shim)
}
