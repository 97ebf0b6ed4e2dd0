// Pipeline Configuration
// Aggregates every component's settings into one TOML document

use crate::confidence::ConfidenceConfig;
use crate::stages::{MomentumConfig, TrapDetectionConfig};
use anyhow::Context;
use data_ingestion::IngestionConfig;
use exchange_hub::ExchangeConfig;
use execution::DeliveryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::Level;

/// Environment variable that overrides the executor endpoint
pub const EXECUTOR_URL_ENV: &str = "SIGNAL_EXECUTOR_URL";

/// Top-level pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub exchange: ExchangeConfig,

    #[serde(default)]
    pub trap_detection: TrapDetectionConfig,

    #[serde(default)]
    pub momentum: MomentumConfig,

    #[serde(default)]
    pub confidence: ConfidenceConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            ingestion: IngestionConfig::default(),
            exchange: ExchangeConfig::default(),
            trap_detection: TrapDetectionConfig::default(),
            momentum: MomentumConfig::default(),
            confidence: ConfidenceConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PipelineSettings {
    /// Tracing level for `log_level`, INFO when unrecognized
    pub fn tracing_level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }

    /// Apply environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(EXECUTOR_URL_ENV) {
            if !url.trim().is_empty() {
                self.delivery.endpoint = Some(url.trim().to_string());
            }
        }
        self
    }

    /// Reject settings that would fail at component construction
    pub fn validate(&self) -> anyhow::Result<()> {
        self.trap_detection.validate()?;
        self.confidence.validate()?;
        self.delivery.validate()?;
        if self.momentum.lookback == 0 {
            anyhow::bail!("momentum lookback must be at least 1");
        }
        Ok(())
    }
}

/// Load settings from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<PipelineSettings> {
    let path = path.as_ref();
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    let settings: PipelineSettings =
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(settings)
}

/// Save settings to a TOML file
pub fn save_config(settings: &PipelineSettings, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Write a commented configuration template
pub fn create_config_template(path: impl AsRef<Path>) -> anyhow::Result<()> {
    let template = "# Signal Pipeline Configuration

# trace, debug, info, warn or error
log_level = \"info\"

[ingestion]
# Directory scanned for *.csv price sources
data_dir = \"data\"

# Write processed_<file>.csv next to each source
write_processed = false

[ingestion.schema]
timestamp_field = \"unix\"
price_field = \"close\"
volume_fallbacks = [\"volume usdt\", \"volume eth\"]

[exchange]
# Durable snapshot of every published stage output
snapshot_path = \"data/exchange_snapshot.json\"

# How often waiting stages re-check the snapshot (milliseconds)
poll_interval_ms = 1000

# Give up waiting for an upstream stage after this many seconds
await_timeout_secs = 300

[trap_detection]
short_window = 20
long_window = 50

# Close above short SMA by this factor
price_multiplier = 1.05

# Volume above mean volume by this factor
volume_multiplier = 1.5

[momentum]
# Percent-change look-back (rows)
lookback = 10
confidence_per_pct = 5.0

[confidence]
# Suppress signals whose trap confidence exceeds this percentage
trap_threshold = 80
ledger_path = \"data/schema.json\"

[confidence.weights]
trap = 0.45
volume = 0.30
momentum = 0.15
orderbook = 0.10

[confidence.scoring.trap]
baseline = 0.5
trap_likely = 0.85
depth_ratio = 0.5

[confidence.scoring.volume]
threshold = 0.1
high = 1.0
low = 0.5

[confidence.scoring.momentum]
threshold = 0.05
high = 1.0
low = 0.5

[confidence.scoring.order_book]
present = 1.0
absent = 0.5

[delivery]
# Executor endpoint (or set SIGNAL_EXECUTOR_URL)
# endpoint = \"http://localhost:8080/signals\"
max_attempts = 3

# Delay between attempts (milliseconds)
backoff_ms = 5000
request_timeout_secs = 10
staging_path = \"data/signal.json\"
";

    std::fs::write(path, template)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.confidence.trap_threshold, 80);
        assert_eq!(settings.delivery.max_attempts, 3);
        assert_eq!(settings.tracing_level(), Level::INFO);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        create_config_template(&path).unwrap();

        let settings = load_config(&path).unwrap();
        let defaults = PipelineSettings::default();
        assert_eq!(settings.confidence.weights, defaults.confidence.weights);
        assert_eq!(settings.trap_detection.long_window, 50);
        assert_eq!(settings.exchange.poll_interval_ms, 1000);
        assert!(settings.delivery.endpoint.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_config_round_trip_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");

        let mut settings = PipelineSettings::default();
        settings.log_level = "debug".to_string();
        settings.delivery.endpoint = Some("http://executor/signals".to_string());
        save_config(&settings, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.tracing_level(), Level::DEBUG);
        assert_eq!(loaded.delivery.endpoint.as_deref(), Some("http://executor/signals"));

        std::fs::write(&path, "[momentum]\nlookback = 3\n").unwrap();
        let partial = load_config(&path).unwrap();
        assert_eq!(partial.momentum.lookback, 3);
        assert_eq!(partial.confidence.trap_threshold, 80);
    }

    #[test]
    fn test_invalid_weights_fail_validation() {
        let mut settings = PipelineSettings::default();
        settings.confidence.weights.volume = 0.9;
        assert!(settings.validate().is_err());
    }
}
