//! Time-indexed price/volume series and views over them.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observation of the series plus the fields derived by the stages.
///
/// Derived fields stay `None` until their defining window is fully populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<f64>,
    #[serde(default)]
    pub sma_short: Option<f64>,
    #[serde(default)]
    pub sma_long: Option<f64>,
    #[serde(default)]
    pub momentum: Option<f64>,
    #[serde(default)]
    pub trap_flag: bool,
}

impl Bar {
    pub fn new(timestamp: i64, close: f64) -> Self {
        Self {
            timestamp,
            open: None,
            high: None,
            low: None,
            close,
            volume: None,
            sma_short: None,
            sma_long: None,
            momentum: None,
            trap_flag: false,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Bar time as UTC. Values above 10^11 are read as epoch milliseconds,
    /// smaller ones as epoch seconds.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        if self.timestamp.abs() > 100_000_000_000 {
            DateTime::from_timestamp_millis(self.timestamp)
        } else {
            DateTime::from_timestamp(self.timestamp, 0)
        }
    }
}

/// Ordered series for one instrument. Timestamps are strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub instrument: String,
    bars: Vec<Bar>,
}

impl SeriesRecord {
    /// Build a series from bars that must already be in strictly increasing order
    pub fn new(instrument: impl Into<String>, bars: Vec<Bar>) -> Result<Self> {
        let instrument = instrument.into();
        if let Some(pair) = bars.windows(2).find(|w| w[1].timestamp <= w[0].timestamp) {
            return Err(PipelineError::schema(
                instrument,
                format!(
                    "timestamps not strictly increasing ({} followed by {})",
                    pair[0].timestamp, pair[1].timestamp
                ),
            ));
        }
        Ok(Self { instrument, bars })
    }

    /// Sort by timestamp and drop later duplicates of the same timestamp
    pub fn from_unsorted(instrument: impl Into<String>, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);
        Self {
            instrument: instrument.into(),
            bars,
        }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn bars_mut(&mut self) -> &mut [Bar] {
        &mut self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<Option<f64>> {
        self.bars.iter().map(|b| b.volume).collect()
    }
}

/// View over the rows of a series whose trap flag is set.
///
/// Holds row timestamps only; the rows themselves stay owned by the parent series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlaggedSubset {
    timestamps: Vec<i64>,
}

impl FlaggedSubset {
    pub fn from_series(series: &SeriesRecord) -> Self {
        Self {
            timestamps: series
                .bars()
                .iter()
                .filter(|b| b.trap_flag)
                .map(|b| b.timestamp)
                .collect(),
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.timestamps.binary_search(&timestamp).is_ok()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// Resolve the view against its parent series
    pub fn rows<'a>(&'a self, series: &'a SeriesRecord) -> impl Iterator<Item = &'a Bar> + 'a {
        series.bars().iter().filter(move |b| self.contains(b.timestamp))
    }
}
