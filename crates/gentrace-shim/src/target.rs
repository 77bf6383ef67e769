//! Capability traits for interceptable call sites.
//!
//! Instead of rewriting third-party client classes at runtime, the
//! application passes each interceptable method through one of these
//! adapters at startup. The interceptor wraps an adapter into `Traced<T>`,
//! which implements the same trait — callers cannot tell the difference.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use futures_core::Stream;

use crate::error::ProviderError;
use crate::normalize::split_model_tag;
use crate::types::{GenerationRequest, RawResponse, StreamChunk};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type ChunkResult = Result<StreamChunk, ProviderError>;

/// A finite, non-restartable lazy sequence of chunks (sync form).
pub type BoxChunkIter = Box<dyn Iterator<Item = ChunkResult> + Send>;

/// A finite, non-restartable lazy sequence of chunks (async form).
pub type BoxChunkStream = Pin<Box<dyn Stream<Item = ChunkResult> + Send>>;

/// Synchronous unary call.
pub trait Callable: Send {
    fn invoke(&mut self, request: &GenerationRequest) -> Result<RawResponse, ProviderError>;
}

/// Asynchronous unary call.
pub trait AsyncCallable: Send {
    fn invoke<'a>(
        &'a mut self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<RawResponse, ProviderError>>;
}

/// Synchronous streaming call: returns the lazy chunk sequence. Consuming
/// the sequence drives the underlying network stream.
pub trait StreamProducer: Send {
    fn invoke_stream(&mut self, request: &GenerationRequest)
        -> Result<BoxChunkIter, ProviderError>;
}

/// Asynchronous streaming call.
pub trait AsyncStreamProducer: Send {
    fn invoke_stream<'a>(
        &'a mut self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<BoxChunkStream, ProviderError>>;
}

/// Mutable identity surface of the wrapped client. The normalizer writes the
/// resolved provider back through this as responses reveal it.
pub trait ModelAttributes: Send + Sync {
    fn endpoint(&self) -> String;
    fn model(&self) -> String;
    fn provider(&self) -> String;
    fn set_model(&self, model: &str);
    fn set_provider(&self, provider: &str);
}

/// Account balance accessor, used for cost-by-delta when the provider does
/// not report usage.
pub trait AccountBalance: Send + Sync {
    fn balance(&self) -> Option<f64>;
}

impl<C: Callable + ?Sized> Callable for Box<C> {
    fn invoke(&mut self, request: &GenerationRequest) -> Result<RawResponse, ProviderError> {
        (**self).invoke(request)
    }
}

impl<C: AsyncCallable + ?Sized> AsyncCallable for Box<C> {
    fn invoke<'a>(
        &'a mut self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<RawResponse, ProviderError>> {
        (**self).invoke(request)
    }
}

impl<C: StreamProducer + ?Sized> StreamProducer for Box<C> {
    fn invoke_stream(
        &mut self,
        request: &GenerationRequest,
    ) -> Result<BoxChunkIter, ProviderError> {
        (**self).invoke_stream(request)
    }
}

impl<C: AsyncStreamProducer + ?Sized> AsyncStreamProducer for Box<C> {
    fn invoke_stream<'a>(
        &'a mut self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<BoxChunkStream, ProviderError>> {
        (**self).invoke_stream(request)
    }
}

/// Adapter turning a plain closure into a synchronous callable.
pub struct CallFn<F>(F);

/// Wrap a closure as a `Callable` adapter.
pub fn call_fn<F>(f: F) -> CallFn<F>
where
    F: FnMut(&GenerationRequest) -> Result<RawResponse, ProviderError> + Send,
{
    CallFn(f)
}

impl<F> Callable for CallFn<F>
where
    F: FnMut(&GenerationRequest) -> Result<RawResponse, ProviderError> + Send,
{
    fn invoke(&mut self, request: &GenerationRequest) -> Result<RawResponse, ProviderError> {
        (self.0)(request)
    }
}

/// Shared client identity: endpoint plus the mutable model/provider pair.
///
/// Construct from an endpoint in `model@provider` form; the split is on the
/// last `@`, matching the provider's tag format.
pub struct TargetIdentity {
    endpoint: String,
    state: Mutex<IdentityState>,
}

struct IdentityState {
    model: String,
    provider: String,
}

impl TargetIdentity {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let (model, provider) = split_model_tag(&endpoint);
        Self {
            state: Mutex::new(IdentityState {
                model: model.to_string(),
                provider: provider.unwrap_or_default().to_string(),
            }),
            endpoint,
        }
    }
}

impl ModelAttributes for TargetIdentity {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn model(&self) -> String {
        self.state.lock().map(|s| s.model.clone()).unwrap_or_default()
    }

    fn provider(&self) -> String {
        self.state
            .lock()
            .map(|s| s.provider.clone())
            .unwrap_or_default()
    }

    fn set_model(&self, model: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.model = model.to_string();
        }
    }

    fn set_provider(&self, provider: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.provider = provider.to_string();
        }
    }
}
