//! Lazy-sequence wrappers for streaming call shapes.
//!
//! A wrapper passes chunks through unchanged while folding them into the
//! normalizer's accumulator. The span closes exactly once: on exhaustion
//! (normal completion), on a stream error (abnormal termination), or — via
//! the span guard's drop — when the consumer abandons the sequence early.
//! It never closes on construction.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use futures_core::Stream;
use gentrace_client::SpanGuard;
use serde_json::Value;

use crate::error::ProviderError;
use crate::normalize::{error_record, BalanceWindow, ChunkAccumulator, RecordSlot};
use crate::registry::MethodSpec;
use crate::stats::ShimStats;
use crate::target::{AccountBalance, BoxChunkIter, BoxChunkStream, ChunkResult, ModelAttributes};
use crate::types::StreamChunk;

/// Everything a stream wrapper needs to finish its span and record.
///
/// Consumed exactly once by `complete` or `fail`; if neither runs, the held
/// `SpanGuard` closes the span as cancelled when the wrapper drops.
pub(crate) struct StreamState {
    spec: MethodSpec,
    attrs: Arc<dyn ModelAttributes>,
    balance: Option<Arc<dyn AccountBalance>>,
    before: Option<f64>,
    input: Value,
    start: SystemTime,
    guard: Option<SpanGuard>,
    slot: RecordSlot,
    stats: Option<ShimStats>,
    acc: ChunkAccumulator,
}

impl StreamState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        spec: MethodSpec,
        attrs: Arc<dyn ModelAttributes>,
        balance: Option<Arc<dyn AccountBalance>>,
        before: Option<f64>,
        input: Value,
        guard: Option<SpanGuard>,
        slot: RecordSlot,
        stats: Option<ShimStats>,
    ) -> Self {
        Self {
            spec,
            attrs,
            balance,
            before,
            input,
            start: SystemTime::now(),
            guard,
            slot,
            stats,
            acc: ChunkAccumulator::default(),
        }
    }

    pub(crate) fn slot(&self) -> RecordSlot {
        self.slot.clone()
    }

    fn observe(&mut self, chunk: &StreamChunk) {
        self.acc.observe(chunk, self.attrs.as_ref());
    }

    /// Normal completion: build the stream's single record, close the span.
    fn complete(self) {
        let StreamState {
            spec,
            attrs,
            balance,
            before,
            input,
            start,
            guard,
            slot,
            stats,
            acc,
        } = self;
        let after = balance.as_ref().and_then(|b| b.balance());
        let window = BalanceWindow { before, after };
        let record = acc.finish(&spec, attrs.as_ref(), &window, start, input);
        if let Some(stats) = &stats {
            stats.record_call(&record);
        }
        if let Some(mut guard) = guard {
            guard.set_record(record.clone());
            guard.finish_ok();
        }
        slot.fill(record);
    }

    /// Abnormal termination: record the error, close the span, let the
    /// error itself propagate to the consumer untouched.
    fn fail(self, error: &ProviderError) {
        let StreamState {
            spec,
            attrs,
            input,
            start,
            guard,
            slot,
            stats,
            ..
        } = self;
        let record = error_record(&spec, attrs.as_ref(), error, start, input);
        if let Some(stats) = &stats {
            stats.record_error();
        }
        if let Some(mut guard) = guard {
            guard.set_record(record.clone());
            guard.finish_error(error.status);
        }
        slot.fill(record);
    }
}

/// Synchronous chunk sequence wrapper. Same item type and laziness as the
/// original iterator; finite; not restartable.
pub struct TracedChunks {
    inner: BoxChunkIter,
    state: Option<StreamState>,
}

impl TracedChunks {
    pub(crate) fn new(inner: BoxChunkIter, state: StreamState) -> Self {
        Self {
            inner,
            state: Some(state),
        }
    }

    /// Promise for the stream's record, resolved at exhaustion.
    pub fn record(&self) -> RecordSlot {
        self.state
            .as_ref()
            .map(|s| s.slot())
            .unwrap_or_default()
    }
}

impl Iterator for TracedChunks {
    type Item = ChunkResult;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(Ok(chunk)) => {
                if let Some(state) = self.state.as_mut() {
                    state.observe(&chunk);
                }
                Some(Ok(chunk))
            }
            Some(Err(e)) => {
                if let Some(state) = self.state.take() {
                    state.fail(&e);
                }
                Some(Err(e))
            }
            None => {
                if let Some(state) = self.state.take() {
                    state.complete();
                }
                None
            }
        }
    }
}

/// Asynchronous chunk sequence wrapper.
pub struct TracedChunkStream {
    inner: BoxChunkStream,
    state: Option<StreamState>,
}

impl TracedChunkStream {
    pub(crate) fn new(inner: BoxChunkStream, state: StreamState) -> Self {
        Self {
            inner,
            state: Some(state),
        }
    }

    pub fn record(&self) -> RecordSlot {
        self.state
            .as_ref()
            .map(|s| s.slot())
            .unwrap_or_default()
    }
}

impl Stream for TracedChunkStream {
    type Item = ChunkResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(state) = this.state.as_mut() {
                    state.observe(&chunk);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                if let Some(state) = this.state.take() {
                    state.fail(&e);
                }
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if let Some(state) = this.state.take() {
                    state.complete();
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_stream;
    use crate::registry::{CallShape, GenerationKind};
    use crate::target::TargetIdentity;
    use std::collections::VecDeque;

    fn spec() -> MethodSpec {
        MethodSpec::new(
            "router.client",
            "Client",
            "generate_stream",
            CallShape::SyncStream,
            GenerationKind::Completion,
        )
    }

    fn chunk_iter(chunks: Vec<ChunkResult>) -> BoxChunkIter {
        Box::new(chunks.into_iter())
    }

    #[test]
    fn forwards_chunks_unchanged_and_fills_slot_at_exhaustion() {
        let attrs: Arc<dyn ModelAttributes> = Arc::new(TargetIdentity::new("m@p"));
        let original = vec![
            Ok(StreamChunk::delta("m@p", "Hel")),
            Ok(StreamChunk::delta("m@p", "lo")),
        ];
        let (wrapped, slot) = normalize_stream(
            &spec(),
            Arc::clone(&attrs),
            None,
            Value::Null,
            chunk_iter(original.clone()),
        );

        let yielded: Vec<ChunkResult> = wrapped.collect();
        assert_eq!(yielded, original);

        let record = slot.get().expect("record after exhaustion");
        assert_eq!(record.output["choices"][0]["text"], "Hello");
    }

    #[test]
    fn slot_stays_empty_until_exhaustion() {
        let attrs: Arc<dyn ModelAttributes> = Arc::new(TargetIdentity::new("m@p"));
        let (mut wrapped, slot) = normalize_stream(
            &spec(),
            attrs,
            None,
            Value::Null,
            chunk_iter(vec![
                Ok(StreamChunk::delta("m@p", "a")),
                Ok(StreamChunk::delta("m@p", "b")),
            ]),
        );

        assert!(wrapped.next().is_some());
        assert!(!slot.is_filled());
        assert!(wrapped.next().is_some());
        assert!(!slot.is_filled());
        assert!(wrapped.next().is_none());
        assert!(slot.is_filled());
    }

    #[test]
    fn stream_error_fills_slot_with_error_record_and_propagates() {
        let attrs: Arc<dyn ModelAttributes> = Arc::new(TargetIdentity::new("m@p"));
        let (mut wrapped, slot) = normalize_stream(
            &spec(),
            attrs,
            None,
            Value::Null,
            chunk_iter(vec![
                Ok(StreamChunk::delta("m@p", "partial")),
                Err(ProviderError::with_status("connection reset", 502)),
            ]),
        );

        assert!(matches!(wrapped.next(), Some(Ok(_))));
        let err = wrapped.next().unwrap().unwrap_err();
        assert_eq!(err.message, "connection reset");
        assert_eq!(err.status, Some(502));

        let record = slot.get().unwrap();
        assert_eq!(record.error.unwrap().status, Some(502));
    }

    struct ChunkStream {
        chunks: VecDeque<ChunkResult>,
    }

    impl Stream for ChunkStream {
        type Item = ChunkResult;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(self.get_mut().chunks.pop_front())
        }
    }

    async fn next_item(stream: &mut TracedChunkStream) -> Option<ChunkResult> {
        let mut pinned = Pin::new(stream);
        std::future::poll_fn(|cx| pinned.as_mut().poll_next(cx)).await
    }

    #[tokio::test]
    async fn async_wrapper_yields_same_chunks_and_one_record() {
        let attrs: Arc<dyn ModelAttributes> = Arc::new(TargetIdentity::new("m@configured"));
        let inner: BoxChunkStream = Box::pin(ChunkStream {
            chunks: VecDeque::from(vec![
                Ok(StreamChunk::delta("m@resolved", "one ")),
                Ok(StreamChunk::delta("m@resolved", "two")),
            ]),
        });
        let slot = RecordSlot::new();
        let state = StreamState::new(
            spec(),
            Arc::clone(&attrs),
            None,
            None,
            Value::Null,
            None,
            slot.clone(),
            None,
        );
        let mut wrapped = TracedChunkStream::new(inner, state);

        let mut contents = String::new();
        while let Some(item) = next_item(&mut wrapped).await {
            contents.push_str(item.unwrap().content().unwrap_or(""));
        }
        assert_eq!(contents, "one two");

        let record = slot.get().expect("one record for the whole stream");
        assert_eq!(record.output["choices"][0]["text"], "one two");
        assert_eq!(record.provider, "resolved");
        assert_eq!(attrs.provider(), "resolved");
    }
}
