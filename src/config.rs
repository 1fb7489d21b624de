//! Layered configuration: defaults, then an optional TOML file, then
//! `LOBFEED__SECTION__KEY` environment variables.

use std::path::Path;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use crate::engine::types::DEFAULT_DEPTH;
use crate::pipeline::PipelineConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub pipeline: PipelineConfig,
    pub book: BookConfig,
    pub display: DisplayConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub url: String,
    pub channel: String,
    pub symbols: Vec<String>,
    pub snapshot: bool,
    /// Fixed token; wins over `token_command`.
    pub token: Option<String>,
    /// Program and arguments that print a token on stdout.
    pub token_command: Option<Vec<String>>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: "wss://ws-auth.kraken.com/v2".into(),
            channel: "level3".into(),
            symbols: vec!["BTC/USD".into()],
            snapshot: true,
            token: None,
            token_command: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    pub depth: usize,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self { depth: DEFAULT_DEPTH }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub interval_ms: u64,
    /// Print the serialized snapshot instead of a top-of-book summary.
    pub json: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { interval_ms: 500, json: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_filter: String,
    /// Prometheus listener port; only used with the `metrics-exporter` feature.
    pub metrics_port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { log_filter: "info".into(), metrics_port: 9000 }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("LOBFEED")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("feed.symbols")
                .with_list_parse_key("feed.token_command")
                .try_parsing(true),
        );
        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }
}
