use super::namespaced;
use crate::indicators::{mean_present, rolling_mean};
use crate::pipeline::{Stage, Upstream};
use common::{FlaggedSubset, PipelineError, Result, SeriesRecord};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const TRAP_DETECTION_KEY: &str = "trap_detection_results";

/// Configuration for trap detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapDetectionConfig {
    /// Short moving-average window (periods)
    #[serde(default = "default_short_window")]
    pub short_window: usize,

    /// Long moving-average window (periods)
    #[serde(default = "default_long_window")]
    pub long_window: usize,

    /// Close must exceed the short average by this factor (1.05 = 5% above)
    #[serde(default = "default_price_multiplier")]
    pub price_multiplier: f64,

    /// Volume must exceed the series mean volume by this factor
    #[serde(default = "default_volume_multiplier")]
    pub volume_multiplier: f64,
}

impl Default for TrapDetectionConfig {
    fn default() -> Self {
        Self {
            short_window: default_short_window(),
            long_window: default_long_window(),
            price_multiplier: default_price_multiplier(),
            volume_multiplier: default_volume_multiplier(),
        }
    }
}

impl TrapDetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.short_window == 0 || self.short_window >= self.long_window {
            return Err(PipelineError::InvalidConfig(format!(
                "trap detection windows must satisfy 0 < short < long (got {} and {})",
                self.short_window, self.long_window
            )));
        }
        if self.price_multiplier <= 0.0 || self.volume_multiplier <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "trap detection multipliers must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_short_window() -> usize {
    20
}

fn default_long_window() -> usize {
    50
}

fn default_price_multiplier() -> f64 {
    1.05
}

fn default_volume_multiplier() -> f64 {
    1.5
}

/// Published output of trap detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrapDetectionOutput {
    pub processed: SeriesRecord,
    pub flagged: FlaggedSubset,
}

/// Adds short/long moving averages and flags candidate traps: rows where the
/// close runs well above the short average on outsized volume.
pub struct TrapDetectionStage {
    config: TrapDetectionConfig,
    namespace: Option<String>,
}

impl TrapDetectionStage {
    pub fn new(config: TrapDetectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, namespace: None })
    }

    /// Publish under a key scoped to one instrument
    pub fn for_instrument(mut self, instrument: impl Into<String>) -> Self {
        self.namespace = Some(instrument.into());
        self
    }

    pub fn preprocess(&self, series: &SeriesRecord) -> Result<SeriesRecord> {
        if let Some(bar) = series.bars().iter().find(|b| !b.close.is_finite()) {
            return Err(PipelineError::compute(
                self.name(),
                format!("non-finite close at timestamp {}", bar.timestamp),
            ));
        }

        let closes = series.closes();
        let sma_short = rolling_mean(&closes, self.config.short_window);
        let sma_long = rolling_mean(&closes, self.config.long_window);

        let mut processed = series.clone();
        for ((bar, short), long) in processed.bars_mut().iter_mut().zip(sma_short).zip(sma_long) {
            bar.sma_short = short;
            bar.sma_long = long;
        }
        Ok(processed)
    }

    /// Set trap flags on a preprocessed series and return the flagged view
    pub fn detect_traps(&self, processed: &mut SeriesRecord) -> FlaggedSubset {
        let mean_volume = mean_present(&processed.volumes());

        for bar in processed.bars_mut() {
            bar.trap_flag = match (bar.sma_short, bar.volume, mean_volume) {
                (Some(sma), Some(volume), Some(mean)) => {
                    bar.close > sma * self.config.price_multiplier && volume > mean * self.config.volume_multiplier
                }
                _ => false,
            };
        }

        FlaggedSubset::from_series(processed)
    }
}

impl Stage for TrapDetectionStage {
    type Input = SeriesRecord;
    type Output = TrapDetectionOutput;

    fn name(&self) -> &str {
        "trap_detection"
    }

    fn output_key(&self) -> String {
        namespaced(self.namespace.as_deref(), TRAP_DETECTION_KEY)
    }

    fn compute(&self, series: &SeriesRecord, _upstream: &Upstream) -> Result<TrapDetectionOutput> {
        let mut processed = self.preprocess(series)?;
        let flagged = self.detect_traps(&mut processed);

        info!(
            instrument = %processed.instrument,
            rows = processed.len(),
            traps = flagged.len(),
            "Detected potential traps"
        );

        Ok(TrapDetectionOutput { processed, flagged })
    }
}
