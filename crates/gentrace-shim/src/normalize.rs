//! Response normalization.
//!
//! Converts provider-specific response shapes — a unary completion, a chat
//! reply, or an accumulated chunk stream — into one `TelemetryRecord`, and
//! derives usage from an account-balance delta when the provider reports
//! none.

use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use gentrace_client::{ErrorInfo, TelemetryRecord, UsageInfo, UsageUnit};
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::registry::{GenerationKind, MethodSpec};
use crate::stream::TracedChunks;
use crate::target::{AccountBalance, BoxChunkIter, ModelAttributes};
use crate::types::{RawResponse, RawUsage, StreamChunk};

/// Split a composite `model@provider` tag on the *last* `@`.
///
/// This is a format contract, not a heuristic: `@` characters inside the
/// model name are tolerated, and an empty suffix means the whole string is
/// the model.
pub fn split_model_tag(tag: &str) -> (&str, Option<&str>) {
    match tag.rsplit_once('@') {
        Some((model, provider)) if !provider.is_empty() => (model, Some(provider)),
        _ => (tag, None),
    }
}

/// Account balance sampled before and after a call.
///
/// The delta is inherently racy when concurrent calls share the account;
/// that imprecision is inherited from the costing contract and accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BalanceWindow {
    pub before: Option<f64>,
    pub after: Option<f64>,
}

impl BalanceWindow {
    pub fn delta(&self) -> Option<f64> {
        match (self.before, self.after) {
            (Some(before), Some(after)) => Some(before - after),
            _ => None,
        }
    }
}

/// Build usage from the provider report, or fall back to balance-delta
/// costing. In the fallback the unit counts stay 0 — never guessed.
pub fn derive_usage(reported: Option<&RawUsage>, window: &BalanceWindow) -> UsageInfo {
    match reported {
        Some(usage) => {
            let total_units = usage
                .total_tokens
                .unwrap_or(usage.input_tokens + usage.output_tokens);
            let total_cost = usage.total_cost.or(match (usage.input_cost, usage.output_cost) {
                (Some(input), Some(output)) => Some(input + output),
                _ => None,
            });
            UsageInfo {
                input_units: usage.input_tokens,
                output_units: usage.output_tokens,
                total_units,
                unit: UsageUnit::Tokens,
                input_cost: usage.input_cost,
                output_cost: usage.output_cost,
                total_cost,
            }
        }
        None => UsageInfo {
            total_cost: window.delta(),
            ..UsageInfo::default()
        },
    }
}

/// Resolve model and provider for the record, writing a provider revealed by
/// a composite tag back to the client's attribute surface.
fn resolve_identity(tag: Option<&str>, attrs: &dyn ModelAttributes) -> (String, String) {
    match tag {
        Some(tag) => {
            let (model, provider) = split_model_tag(tag);
            if let Some(provider) = provider {
                attrs.set_provider(provider);
            }
            let provider = provider
                .map(str::to_string)
                .unwrap_or_else(|| attrs.provider());
            (model.to_string(), provider)
        }
        None => (attrs.model(), attrs.provider()),
    }
}

/// Wrap raw output into the normalized `{choices, usage}` shape.
fn shape_output(kind: GenerationKind, role: Option<&str>, content: &str, usage: &UsageInfo) -> Value {
    let usage_json = serde_json::to_value(usage).unwrap_or(Value::Null);
    match kind {
        GenerationKind::Completion => json!({
            "choices": [{"text": content}],
            "usage": usage_json,
        }),
        GenerationKind::Chat => json!({
            "choices": [{"message": {
                "role": role.unwrap_or("assistant"),
                "content": content,
            }}],
            "usage": usage_json,
        }),
    }
}

/// Normalize a non-streaming response into a telemetry record.
pub fn normalize_completion(
    spec: &MethodSpec,
    attrs: &dyn ModelAttributes,
    raw: &RawResponse,
    window: &BalanceWindow,
    start: SystemTime,
    input: Value,
) -> TelemetryRecord {
    let (model, provider) = resolve_identity(raw.model.as_deref(), attrs);
    let usage = derive_usage(raw.usage.as_ref(), window);
    let output = shape_output(spec.kind, raw.role.as_deref(), &raw.content, &usage);
    TelemetryRecord {
        name: spec.qualified_name(),
        input,
        output,
        model,
        provider,
        endpoint: attrs.endpoint(),
        usage,
        start_time: start,
        end_time: SystemTime::now(),
        error: None,
    }
}

/// Record for a failed call: no output, error message and status attached.
pub fn error_record(
    spec: &MethodSpec,
    attrs: &dyn ModelAttributes,
    error: &ProviderError,
    start: SystemTime,
    input: Value,
) -> TelemetryRecord {
    TelemetryRecord {
        name: spec.qualified_name(),
        input,
        output: Value::Null,
        model: attrs.model(),
        provider: attrs.provider(),
        endpoint: attrs.endpoint(),
        usage: UsageInfo::default(),
        start_time: start,
        end_time: SystemTime::now(),
        error: Some(ErrorInfo {
            message: error.message.clone(),
            status: error.status,
        }),
    }
}

/// Resolves to the stream's telemetry record once the wrapped sequence is
/// exhausted. Readable from sync and async consumers; filled exactly once.
#[derive(Clone, Default)]
pub struct RecordSlot {
    inner: Arc<OnceLock<TelemetryRecord>>,
}

impl RecordSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<TelemetryRecord> {
        self.inner.get().cloned()
    }

    pub fn is_filled(&self) -> bool {
        self.inner.get().is_some()
    }

    pub(crate) fn fill(&self, record: TelemetryRecord) {
        let _ = self.inner.set(record);
    }
}

/// Incremental normalizer state for a chunk stream. One accumulator covers
/// the whole stream and produces exactly one record at exhaustion.
#[derive(Default)]
pub(crate) struct ChunkAccumulator {
    content: String,
    last_model: Option<String>,
    role: Option<String>,
    reported: Option<RawUsage>,
    chunks: u64,
}

impl ChunkAccumulator {
    /// Fold one chunk in. Writes a provider revealed by the chunk's model
    /// tag back to the client as the stream is consumed.
    pub(crate) fn observe(&mut self, chunk: &StreamChunk, attrs: &dyn ModelAttributes) {
        self.chunks += 1;
        if let Some(content) = chunk.content() {
            self.content.push_str(content);
        }
        if !chunk.model.is_empty() {
            if let (_, Some(provider)) = split_model_tag(&chunk.model) {
                attrs.set_provider(provider);
            }
            self.last_model = Some(chunk.model.clone());
        }
        if self.role.is_none() {
            if let Some(choice) = chunk.choices.first() {
                self.role = choice
                    .delta
                    .as_ref()
                    .and_then(|d| d.role.clone())
                    .or_else(|| choice.message.as_ref().map(|m| m.role.clone()));
            }
        }
        if chunk.usage.is_some() {
            self.reported = chunk.usage.clone();
        }
    }

    pub(crate) fn chunk_count(&self) -> u64 {
        self.chunks
    }

    /// Build the stream's single record at exhaustion.
    pub(crate) fn finish(
        self,
        spec: &MethodSpec,
        attrs: &dyn ModelAttributes,
        window: &BalanceWindow,
        start: SystemTime,
        input: Value,
    ) -> TelemetryRecord {
        let raw = RawResponse {
            model: self.last_model,
            role: self.role,
            content: self.content,
            usage: self.reported,
        };
        normalize_completion(spec, attrs, &raw, window, start, input)
    }
}

/// Wrap a chunk sequence for normalization without span management: the
/// returned sequence forwards chunks unchanged and the slot resolves to the
/// record once the sequence is exhausted.
pub fn normalize_stream(
    spec: &MethodSpec,
    attrs: Arc<dyn ModelAttributes>,
    balance: Option<Arc<dyn AccountBalance>>,
    input: Value,
    chunks: BoxChunkIter,
) -> (TracedChunks, RecordSlot) {
    let slot = RecordSlot::new();
    let before = balance.as_ref().and_then(|b| b.balance());
    let wrapped = TracedChunks::new(
        chunks,
        crate::stream::StreamState::new(
            spec.clone(),
            attrs,
            balance,
            before,
            input,
            None,
            slot.clone(),
            None,
        ),
    );
    (wrapped, slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CallShape, GenerationKind};
    use crate::target::TargetIdentity;

    fn spec(kind: GenerationKind) -> MethodSpec {
        MethodSpec::new("router.client", "Client", "generate", CallShape::Sync, kind)
    }

    #[test]
    fn splits_on_last_at_only() {
        assert_eq!(
            split_model_tag("mistral-7b-instruct-v0.2@fireworks-ai"),
            ("mistral-7b-instruct-v0.2", Some("fireworks-ai"))
        );
        assert_eq!(
            split_model_tag("odd@model@name@provider"),
            ("odd@model@name", Some("provider"))
        );
        assert_eq!(split_model_tag("no-provider"), ("no-provider", None));
        assert_eq!(split_model_tag("trailing@"), ("trailing@", None));
    }

    #[test]
    fn balance_delta_costing_without_reported_usage() {
        let window = BalanceWindow {
            before: Some(12.50),
            after: Some(12.30),
        };
        let usage = derive_usage(None, &window);
        assert!((usage.total_cost.unwrap() - 0.20).abs() < 1e-9);
        // Token counts are never guessed.
        assert_eq!(usage.input_units, 0);
        assert_eq!(usage.output_units, 0);
        assert_eq!(usage.total_units, 0);
    }

    #[test]
    fn missing_balance_sample_means_no_cost() {
        let window = BalanceWindow {
            before: Some(12.50),
            after: None,
        };
        assert_eq!(derive_usage(None, &window).total_cost, None);
    }

    #[test]
    fn reported_usage_keeps_sum_invariants() {
        let reported = RawUsage {
            input_tokens: 100,
            output_tokens: 50,
            total_tokens: None,
            input_cost: Some(0.01),
            output_cost: Some(0.02),
            total_cost: None,
        };
        let usage = derive_usage(Some(&reported), &BalanceWindow::default());
        assert_eq!(usage.total_units, usage.input_units + usage.output_units);
        assert!(
            (usage.total_cost.unwrap() - (usage.input_cost.unwrap() + usage.output_cost.unwrap()))
                .abs()
                < 1e-12
        );
    }

    #[test]
    fn completion_kind_wraps_text_choice() {
        let attrs = TargetIdentity::new("m@p");
        let raw = RawResponse {
            model: None,
            role: None,
            content: "Sofia".into(),
            usage: None,
        };
        let record = normalize_completion(
            &spec(GenerationKind::Completion),
            &attrs,
            &raw,
            &BalanceWindow::default(),
            SystemTime::now(),
            json!({"messages": []}),
        );
        assert_eq!(record.output["choices"][0]["text"], "Sofia");
        assert_eq!(record.model, "m");
        assert_eq!(record.provider, "p");
    }

    #[test]
    fn chat_kind_wraps_role_content_message() {
        let attrs = TargetIdentity::new("m@p");
        let raw = RawResponse {
            model: None,
            role: Some("assistant".into()),
            content: "hello".into(),
            usage: None,
        };
        let record = normalize_completion(
            &spec(GenerationKind::Chat),
            &attrs,
            &raw,
            &BalanceWindow::default(),
            SystemTime::now(),
            Value::Null,
        );
        let message = &record.output["choices"][0]["message"];
        assert_eq!(message["role"], "assistant");
        assert_eq!(message["content"], "hello");
    }

    #[test]
    fn composite_model_tag_updates_client_provider() {
        let attrs = TargetIdentity::new("mistral-7b-instruct-v0.2@open-router");
        let raw = RawResponse {
            model: Some("mistral-7b-instruct-v0.2@fireworks-ai".into()),
            role: None,
            content: String::new(),
            usage: None,
        };
        let record = normalize_completion(
            &spec(GenerationKind::Completion),
            &attrs,
            &raw,
            &BalanceWindow::default(),
            SystemTime::now(),
            Value::Null,
        );
        assert_eq!(record.model, "mistral-7b-instruct-v0.2");
        assert_eq!(record.provider, "fireworks-ai");
        assert_eq!(attrs.provider(), "fireworks-ai");
    }

    #[test]
    fn error_record_carries_status_classification() {
        let attrs = TargetIdentity::new("m@p");
        let record = error_record(
            &spec(GenerationKind::Completion),
            &attrs,
            &ProviderError::with_status("rate limited", 429),
            SystemTime::now(),
            Value::Null,
        );
        let error = record.error.unwrap();
        assert_eq!(error.message, "rate limited");
        assert_eq!(error.status, Some(429));
        assert_eq!(record.output, Value::Null);
    }

    #[test]
    fn accumulator_produces_one_record_for_whole_stream() {
        let attrs = TargetIdentity::new("m@configured");
        let mut acc = ChunkAccumulator::default();
        acc.observe(&StreamChunk::delta("m@resolved", "Hello"), &attrs);
        acc.observe(&StreamChunk::delta("m@resolved", " world"), &attrs);
        assert_eq!(acc.chunk_count(), 2);

        let record = acc.finish(
            &spec(GenerationKind::Completion),
            &attrs,
            &BalanceWindow::default(),
            SystemTime::now(),
            Value::Null,
        );
        assert_eq!(record.output["choices"][0]["text"], "Hello world");
        assert_eq!(record.provider, "resolved");
        assert_eq!(attrs.provider(), "resolved");
    }
}
