//! Wire shapes of the wrapped model client.
//!
//! These mirror what the provider client passes and returns: a chat-style
//! request, a raw unary response, and token-by-token stream chunks shaped
//! `{model, choices: [{delta | message}]}`. Everything is serde-friendly so
//! records can carry requests and responses as opaque JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One chat message, role/content pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Request payload passed through to the original method unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Provider-specific options, forwarded opaquely.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl GenerationRequest {
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: None,
            params: Map::new(),
        }
    }
}

/// Usage as reported by the provider, when it reports any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
}

/// Unary response from the provider, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResponse {
    /// Resolved model tag, possibly in composite `model@provider` form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Role of the reply for chat-kind calls; completions leave it unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<RawUsage>,
}

/// Incremental content inside a stream chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One choice within a stream chunk: either a delta (streaming) or a full
/// message (some providers send the last chunk this way).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChunkDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
}

/// One element of a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Model tag as reported by the provider for this chunk; composite
    /// `model@provider` form reveals the resolved provider mid-stream.
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<RawUsage>,
}

impl StreamChunk {
    /// Convenience constructor for a single text delta.
    pub fn delta(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            choices: vec![ChunkChoice {
                delta: Some(ChunkDelta {
                    role: None,
                    content: Some(content.into()),
                }),
                message: None,
            }],
            usage: None,
        }
    }

    /// Text carried by this chunk, from the first choice's delta or message.
    pub fn content(&self) -> Option<&str> {
        let choice = self.choices.first()?;
        if let Some(delta) = &choice.delta {
            return delta.content.as_deref();
        }
        choice.message.as_ref().map(|m| m.content.as_str())
    }
}
