//! Error types for the shim.
//!
//! Three failure classes with distinct propagation rules: configuration
//! errors are fatal at bootstrap, original-call errors pass through the
//! wrapper verbatim, and telemetry failures are logged inside the client
//! layer and never surface here at all.

/// Fatal shim setup failure. Raised at bootstrap, never at first call.
#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    /// A registered method spec has no adapter to bind to.
    #[error("cannot bind {module}.{object}.{method} ({shape}): no matching adapter provided")]
    Configuration {
        module: String,
        object: String,
        method: String,
        shape: String,
    },
}

/// Error raised by the wrapped provider call.
///
/// The interceptor records it on the span and re-raises it unchanged; it is
/// never retried or replaced by this layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    /// Provider status classification (e.g. 429 for rate limiting).
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}
