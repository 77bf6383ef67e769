//! Tracing configuration types.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

/// Configuration for the tracing client.
///
/// Unset credentials default to `None`; `enabled` defaults to `true` so the
/// shim traces out of the box once credentials are supplied. Every consumer
/// receives this struct explicitly — there is no process-wide implicit
/// configuration surface.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceConfig {
    /// Public API key for the tracing backend.
    #[serde(default)]
    pub public_key: Option<String>,

    /// Secret API key for the tracing backend.
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Base URL of the tracing backend. When `None`, spans are exported
    /// through the default log exporter instead of a network transport.
    #[serde(default)]
    pub host: Option<String>,

    /// Log every submitted span at debug level.
    #[serde(default)]
    pub debug: bool,

    /// Master switch. When `false`, intercepted calls run untouched and no
    /// telemetry is constructed at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level filter (e.g. "info", "debug", "gentrace_shim=debug,info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            public_key: None,
            secret_key: None,
            host: None,
            debug: false,
            enabled: true,
            log_level: default_log_level(),
        }
    }
}

impl TraceConfig {
    /// Load configuration from a TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (GENTRACE_ prefix)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let config: TraceConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("GENTRACE_"))
            .extract()?;

        Ok(config)
    }

    /// A config with telemetry switched off entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}
