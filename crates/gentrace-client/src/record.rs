//! Normalized telemetry value objects.
//!
//! One `TelemetryRecord` describes one intercepted call: its input, output,
//! resolved model identity, and usage. Records are built by the shim's
//! normalizer and attached to a span before it closes; once attached they are
//! never mutated.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unit in which usage is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UsageUnit {
    #[default]
    Tokens,
    Characters,
    Milliseconds,
    Images,
}

/// Usage and cost for one call.
///
/// Either reported directly by the provider, or derived from a before/after
/// account-balance delta when the provider stays silent. In the derived case
/// only `total_cost` is set and the unit counts remain 0 — the shim never
/// guesses token counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UsageInfo {
    pub input_units: u64,
    pub output_units: u64,
    pub total_units: u64,
    pub unit: UsageUnit,
    pub input_cost: Option<f64>,
    pub output_cost: Option<f64>,
    pub total_cost: Option<f64>,
}

/// Error captured from a failed original call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    /// Provider status classification (e.g. 429), when the error carried one.
    pub status: Option<u16>,
}

/// The normalized payload describing one intercepted call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Span name, `module.object.method` of the intercepted target.
    pub name: String,
    /// Request payload as handed to the original method.
    pub input: Value,
    /// Normalized response: `{choices: [...], usage}` for both kinds.
    pub output: Value,
    pub model: String,
    pub provider: String,
    pub endpoint: String,
    pub usage: UsageInfo,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub error: Option<ErrorInfo>,
}
