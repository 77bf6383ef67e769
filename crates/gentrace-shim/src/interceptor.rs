//! The wrapping engine.
//!
//! `Traced<T>` wraps one adapter and implements the same capability trait,
//! so the replacement is indistinguishable from the original aside from
//! telemetry side effects: one span and one record per logical call, errors
//! re-raised verbatim, streams returned with identical laziness.

use std::sync::Arc;
use std::time::SystemTime;

use gentrace_client::{ClientLifecycle, SpanGuard, TraceConfig};
use serde_json::Value;

use crate::error::ProviderError;
use crate::normalize::{error_record, normalize_completion, BalanceWindow, RecordSlot};
use crate::registry::MethodSpec;
use crate::stats::ShimStats;
use crate::stream::{StreamState, TracedChunkStream, TracedChunks};
use crate::target::{
    AccountBalance, AsyncCallable, AsyncStreamProducer, BoxChunkIter, BoxChunkStream, BoxFuture,
    Callable, ModelAttributes, StreamProducer,
};
use crate::types::{GenerationRequest, RawResponse};

/// Shared wiring threaded into every wrapper: configuration, the client
/// lifecycle, and the process counters. Cheap to clone.
#[derive(Clone)]
pub struct ShimContext {
    pub config: TraceConfig,
    pub lifecycle: ClientLifecycle,
    pub stats: ShimStats,
}

impl ShimContext {
    pub fn new(config: TraceConfig, lifecycle: ClientLifecycle) -> Self {
        Self {
            config,
            lifecycle,
            stats: ShimStats::new(),
        }
    }
}

/// An open call: span guard plus the pre-call snapshots the normalizer needs.
struct OpenCall {
    guard: SpanGuard,
    before: Option<f64>,
    start: SystemTime,
    input: Value,
}

/// Transparent wrapper around one adapter.
pub struct Traced<T> {
    inner: T,
    spec: MethodSpec,
    ctx: ShimContext,
    attrs: Arc<dyn ModelAttributes>,
    balance: Option<Arc<dyn AccountBalance>>,
}

impl<T> Traced<T> {
    pub fn new(
        inner: T,
        spec: MethodSpec,
        ctx: ShimContext,
        attrs: Arc<dyn ModelAttributes>,
        balance: Option<Arc<dyn AccountBalance>>,
    ) -> Self {
        Self {
            inner,
            spec,
            ctx,
            attrs,
            balance,
        }
    }

    pub fn spec(&self) -> &MethodSpec {
        &self.spec
    }

    fn enabled(&self) -> bool {
        self.ctx.config.enabled
    }

    /// Open the span and take pre-call snapshots. Only runs when enabled, so
    /// a disabled shim does zero telemetry work.
    fn open(&self, request: &GenerationRequest) -> OpenCall {
        let client = self.ctx.lifecycle.get_or_create(&self.ctx.config);
        let guard = client.start_span(&self.spec.qualified_name());
        let before = self.balance.as_ref().and_then(|b| b.balance());
        let input = serde_json::to_value(request).unwrap_or(Value::Null);
        OpenCall {
            guard,
            before,
            start: SystemTime::now(),
            input,
        }
    }

    fn finish_ok(&self, open: OpenCall, raw: &RawResponse) {
        let OpenCall {
            mut guard,
            before,
            start,
            input,
        } = open;
        let after = self.balance.as_ref().and_then(|b| b.balance());
        let window = BalanceWindow { before, after };
        let record = normalize_completion(&self.spec, self.attrs.as_ref(), raw, &window, start, input);
        self.ctx.stats.record_call(&record);
        guard.set_record(record);
        guard.finish_ok();
    }

    fn finish_err(&self, open: OpenCall, error: &ProviderError) {
        let OpenCall {
            mut guard,
            start,
            input,
            ..
        } = open;
        let record = error_record(&self.spec, self.attrs.as_ref(), error, start, input);
        self.ctx.stats.record_error();
        guard.set_record(record);
        guard.finish_error(error.status);
    }

    fn stream_state(&self, open: OpenCall) -> StreamState {
        StreamState::new(
            self.spec.clone(),
            Arc::clone(&self.attrs),
            self.balance.clone(),
            open.before,
            open.input,
            Some(open.guard),
            RecordSlot::new(),
            Some(self.ctx.stats.clone()),
        )
    }
}

impl<T: Callable> Callable for Traced<T> {
    fn invoke(&mut self, request: &GenerationRequest) -> Result<RawResponse, ProviderError> {
        if !self.enabled() {
            return self.inner.invoke(request);
        }
        let open = self.open(request);
        match self.inner.invoke(request) {
            Ok(raw) => {
                self.finish_ok(open, &raw);
                Ok(raw)
            }
            Err(e) => {
                self.finish_err(open, &e);
                Err(e)
            }
        }
    }
}

impl<T: AsyncCallable> AsyncCallable for Traced<T> {
    fn invoke<'a>(
        &'a mut self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<RawResponse, ProviderError>> {
        Box::pin(async move {
            if !self.enabled() {
                return self.inner.invoke(request).await;
            }
            // The guard inside `open` stays alive across the suspension; if
            // the caller abandons this future mid-await, its drop closes the
            // span as cancelled instead of leaking it.
            let open = self.open(request);
            let result = self.inner.invoke(request).await;
            match result {
                Ok(raw) => {
                    self.finish_ok(open, &raw);
                    Ok(raw)
                }
                Err(e) => {
                    self.finish_err(open, &e);
                    Err(e)
                }
            }
        })
    }
}

impl<T: StreamProducer> StreamProducer for Traced<T> {
    fn invoke_stream(
        &mut self,
        request: &GenerationRequest,
    ) -> Result<BoxChunkIter, ProviderError> {
        if !self.enabled() {
            return self.inner.invoke_stream(request);
        }
        let open = self.open(request);
        match self.inner.invoke_stream(request) {
            Ok(chunks) => {
                let state = self.stream_state(open);
                Ok(Box::new(TracedChunks::new(chunks, state)))
            }
            Err(e) => {
                self.finish_err(open, &e);
                Err(e)
            }
        }
    }
}

impl<T: AsyncStreamProducer> AsyncStreamProducer for Traced<T> {
    fn invoke_stream<'a>(
        &'a mut self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<BoxChunkStream, ProviderError>> {
        Box::pin(async move {
            if !self.enabled() {
                return self.inner.invoke_stream(request).await;
            }
            let open = self.open(request);
            let result = self.inner.invoke_stream(request).await;
            match result {
                Ok(chunks) => {
                    let state = self.stream_state(open);
                    let wrapped: BoxChunkStream = Box::pin(TracedChunkStream::new(chunks, state));
                    Ok(wrapped)
                }
                Err(e) => {
                    self.finish_err(open, &e);
                    Err(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CallShape, GenerationKind};
    use crate::target::TargetIdentity;
    use crate::types::{ChatMessage, RawUsage, StreamChunk};
    use futures_core::Stream;
    use gentrace_client::{InMemoryExporter, SpanStatus};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn spec(shape: CallShape) -> MethodSpec {
        MethodSpec::new(
            "router.client",
            "Client",
            "generate",
            shape,
            GenerationKind::Completion,
        )
    }

    fn request() -> GenerationRequest {
        GenerationRequest::from_messages(vec![ChatMessage::new("user", "Bulgaria")])
    }

    /// Lifecycle pre-wired to an in-memory exporter.
    fn wiring(config: TraceConfig) -> (ShimContext, InMemoryExporter) {
        let exporter = InMemoryExporter::new();
        let lifecycle = ClientLifecycle::new();
        lifecycle.get_or_create_with(&config, {
            let exporter = exporter.clone();
            move || Box::new(exporter)
        });
        (ShimContext::new(config, lifecycle), exporter)
    }

    struct FixedBalance {
        samples: Mutex<VecDeque<f64>>,
    }

    impl FixedBalance {
        fn new(samples: &[f64]) -> Arc<Self> {
            Arc::new(Self {
                samples: Mutex::new(samples.iter().copied().collect()),
            })
        }
    }

    impl AccountBalance for FixedBalance {
        fn balance(&self) -> Option<f64> {
            self.samples.lock().ok()?.pop_front()
        }
    }

    struct FixedCall {
        response: Result<RawResponse, ProviderError>,
    }

    impl Callable for FixedCall {
        fn invoke(&mut self, _request: &GenerationRequest) -> Result<RawResponse, ProviderError> {
            self.response.clone()
        }
    }

    fn traced_call(
        response: Result<RawResponse, ProviderError>,
        ctx: ShimContext,
        balance: Option<Arc<dyn AccountBalance>>,
    ) -> Traced<FixedCall> {
        Traced::new(
            FixedCall { response },
            spec(CallShape::Sync),
            ctx,
            Arc::new(TargetIdentity::new("mistral-7b-instruct-v0.2@fireworks-ai")),
            balance,
        )
    }

    #[test]
    fn sync_success_returns_original_and_records_one_span() {
        let (ctx, exporter) = wiring(TraceConfig::default());
        let raw = RawResponse {
            model: Some("mistral-7b-instruct-v0.2@fireworks-ai".into()),
            role: None,
            content: "Sofia".into(),
            usage: Some(RawUsage {
                input_tokens: 12,
                output_tokens: 3,
                ..RawUsage::default()
            }),
        };
        let mut traced = traced_call(Ok(raw.clone()), ctx.clone(), None);

        let result = traced.invoke(&request()).unwrap();
        assert_eq!(result.content, raw.content);
        assert_eq!(result.model, raw.model);

        ctx.lifecycle.flush();
        let spans = exporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Ok);
        let record = spans[0].record.as_ref().unwrap();
        assert_eq!(record.name, "router.client.Client.generate");
        assert_eq!(record.provider, "fireworks-ai");
        assert_eq!(record.usage.total_units, 15);
        assert_eq!(ctx.stats.snapshot().total_calls, 1);
    }

    #[test]
    fn sync_error_is_reraised_verbatim_with_status_on_span() {
        let (ctx, exporter) = wiring(TraceConfig::default());
        let original = ProviderError::with_status("rate limited", 429);
        let mut traced = traced_call(Err(original.clone()), ctx.clone(), None);

        let err = traced.invoke(&request()).unwrap_err();
        assert_eq!(err, original);

        ctx.lifecycle.flush();
        let spans = exporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Error);
        assert_eq!(spans[0].status_code, Some(429));
        let record = spans[0].record.as_ref().unwrap();
        assert_eq!(record.error.as_ref().unwrap().message, "rate limited");
        assert_eq!(ctx.stats.snapshot().errored_calls, 1);
    }

    #[test]
    fn balance_delta_costing_when_provider_reports_no_usage() {
        let (ctx, exporter) = wiring(TraceConfig::default());
        let raw = RawResponse {
            model: None,
            role: None,
            content: "x".into(),
            usage: None,
        };
        let balance = FixedBalance::new(&[12.50, 12.30]);
        let mut traced = traced_call(Ok(raw), ctx.clone(), Some(balance));

        traced.invoke(&request()).unwrap();

        ctx.lifecycle.flush();
        let record = exporter.spans()[0].record.clone().unwrap();
        assert!((record.usage.total_cost.unwrap() - 0.20).abs() < 1e-9);
        assert_eq!(record.usage.total_units, 0);
    }

    #[test]
    fn disabled_config_runs_original_and_builds_no_telemetry() {
        let exporter = InMemoryExporter::new();
        let lifecycle = ClientLifecycle::new();
        let ctx = ShimContext::new(TraceConfig::disabled(), lifecycle.clone());
        let raw = RawResponse {
            model: None,
            role: None,
            content: "untouched".into(),
            usage: None,
        };
        let mut traced = traced_call(Ok(raw), ctx.clone(), None);

        let result = traced.invoke(&request()).unwrap();
        assert_eq!(result.content, "untouched");

        // No client was even constructed, and nothing reached the exporter.
        assert!(lifecycle.get().is_none());
        lifecycle.flush();
        assert!(exporter.is_empty());
        assert_eq!(ctx.stats.snapshot().total_calls, 0);
    }

    struct FixedAsyncCall {
        response: Result<RawResponse, ProviderError>,
    }

    impl AsyncCallable for FixedAsyncCall {
        fn invoke<'a>(
            &'a mut self,
            _request: &'a GenerationRequest,
        ) -> BoxFuture<'a, Result<RawResponse, ProviderError>> {
            let response = self.response.clone();
            Box::pin(async move { response })
        }
    }

    #[tokio::test]
    async fn async_success_closes_span_after_suspension() {
        let (ctx, exporter) = wiring(TraceConfig::default());
        let mut traced = Traced::new(
            FixedAsyncCall {
                response: Ok(RawResponse {
                    model: Some("m@p".into()),
                    role: None,
                    content: "done".into(),
                    usage: None,
                }),
            },
            spec(CallShape::Async),
            ctx.clone(),
            Arc::new(TargetIdentity::new("m@p")),
            None,
        );

        let result = traced.invoke(&request()).await.unwrap();
        assert_eq!(result.content, "done");

        ctx.lifecycle.flush();
        let spans = exporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Ok);
    }

    struct NeverResolves;

    impl AsyncCallable for NeverResolves {
        fn invoke<'a>(
            &'a mut self,
            _request: &'a GenerationRequest,
        ) -> BoxFuture<'a, Result<RawResponse, ProviderError>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn abandoned_async_call_closes_span_as_cancelled() {
        let (ctx, exporter) = wiring(TraceConfig::default());
        let ctx_for_task = ctx.clone();

        let task = tokio::spawn(async move {
            let mut traced = Traced::new(
                NeverResolves,
                spec(CallShape::Async),
                ctx_for_task,
                Arc::new(TargetIdentity::new("m@p")),
                None,
            );
            let request = request();
            let _ = traced.invoke(&request).await;
        });

        // Let the task reach its suspension point, then abandon it.
        tokio::task::yield_now().await;
        task.abort();
        let _ = task.await;

        ctx.lifecycle.flush();
        let spans = exporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Cancelled);
    }

    struct FixedStreamCall {
        chunks: Vec<Result<StreamChunk, ProviderError>>,
    }

    impl StreamProducer for FixedStreamCall {
        fn invoke_stream(
            &mut self,
            _request: &GenerationRequest,
        ) -> Result<BoxChunkIter, ProviderError> {
            Ok(Box::new(self.chunks.clone().into_iter()))
        }
    }

    fn traced_stream(
        chunks: Vec<Result<StreamChunk, ProviderError>>,
        ctx: ShimContext,
    ) -> Traced<FixedStreamCall> {
        Traced::new(
            FixedStreamCall { chunks },
            spec(CallShape::SyncStream),
            ctx,
            Arc::new(TargetIdentity::new("m@configured")),
            None,
        )
    }

    #[test]
    fn stream_yields_original_chunks_and_one_record_total() {
        let (ctx, exporter) = wiring(TraceConfig::default());
        let chunks = vec![
            Ok(StreamChunk::delta("m@resolved", "a")),
            Ok(StreamChunk::delta("m@resolved", "b")),
            Ok(StreamChunk::delta("m@resolved", "c")),
        ];
        let mut traced = traced_stream(chunks.clone(), ctx.clone());

        let wrapped = traced.invoke_stream(&request()).unwrap();

        // Span stays open until the sequence is exhausted.
        ctx.lifecycle.flush();
        assert!(exporter.is_empty());

        let yielded: Vec<_> = wrapped.collect();
        assert_eq!(yielded, chunks);

        ctx.lifecycle.flush();
        let spans = exporter.spans();
        assert_eq!(spans.len(), 1, "one span for the whole stream");
        let record = spans[0].record.as_ref().unwrap();
        assert_eq!(record.output["choices"][0]["text"], "abc");
        assert_eq!(record.provider, "resolved");
    }

    #[test]
    fn abandoned_stream_closes_span_as_cancelled() {
        let (ctx, exporter) = wiring(TraceConfig::default());
        let mut traced = traced_stream(
            vec![
                Ok(StreamChunk::delta("m@p", "a")),
                Ok(StreamChunk::delta("m@p", "b")),
            ],
            ctx.clone(),
        );

        {
            let mut wrapped = traced.invoke_stream(&request()).unwrap();
            let _ = wrapped.next();
            // Dropped before exhaustion.
        }

        ctx.lifecycle.flush();
        let spans = exporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Cancelled);
    }

    #[test]
    fn stream_error_closes_span_and_propagates() {
        let (ctx, exporter) = wiring(TraceConfig::default());
        let mut traced = traced_stream(
            vec![
                Ok(StreamChunk::delta("m@p", "a")),
                Err(ProviderError::with_status("bad gateway", 502)),
            ],
            ctx.clone(),
        );

        let mut wrapped = traced.invoke_stream(&request()).unwrap();
        assert!(matches!(wrapped.next(), Some(Ok(_))));
        let err = wrapped.next().unwrap().unwrap_err();
        assert_eq!(err.status, Some(502));
        assert!(wrapped.next().is_none());

        ctx.lifecycle.flush();
        let spans = exporter.spans();
        assert_eq!(spans.len(), 1, "error closes the span exactly once");
        assert_eq!(spans[0].status, SpanStatus::Error);
        assert_eq!(spans[0].status_code, Some(502));
    }

    struct FixedAsyncStreamCall {
        chunks: Vec<Result<StreamChunk, ProviderError>>,
    }

    struct VecStream {
        chunks: VecDeque<Result<StreamChunk, ProviderError>>,
    }

    impl futures_core::Stream for VecStream {
        type Item = Result<StreamChunk, ProviderError>;

        fn poll_next(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<Self::Item>> {
            std::task::Poll::Ready(self.get_mut().chunks.pop_front())
        }
    }

    impl AsyncStreamProducer for FixedAsyncStreamCall {
        fn invoke_stream<'a>(
            &'a mut self,
            _request: &'a GenerationRequest,
        ) -> BoxFuture<'a, Result<BoxChunkStream, ProviderError>> {
            let chunks: VecDeque<_> = self.chunks.clone().into();
            Box::pin(async move {
                let stream: BoxChunkStream = Box::pin(VecStream { chunks });
                Ok(stream)
            })
        }
    }

    #[tokio::test]
    async fn async_stream_produces_one_record_after_consumption() {
        let (ctx, exporter) = wiring(TraceConfig::default());
        let mut traced = Traced::new(
            FixedAsyncStreamCall {
                chunks: vec![
                    Ok(StreamChunk::delta("m@p", "x")),
                    Ok(StreamChunk::delta("m@p", "y")),
                ],
            },
            spec(CallShape::AsyncStream),
            ctx.clone(),
            Arc::new(TargetIdentity::new("m@p")),
            None,
        );

        let request = request();
        let mut wrapped = traced.invoke_stream(&request).await.unwrap();

        let mut contents = String::new();
        loop {
            let next =
                std::future::poll_fn(|cx| wrapped.as_mut().poll_next(cx)).await;
            match next {
                Some(chunk) => contents.push_str(chunk.unwrap().content().unwrap_or("")),
                None => break,
            }
        }
        assert_eq!(contents, "xy");

        ctx.lifecycle.flush();
        let spans = exporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].record.as_ref().unwrap().output["choices"][0]["text"],
            "xy"
        );
    }
}
