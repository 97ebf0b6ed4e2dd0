// Evidence Scorers
// Component sub-models the confidence engine combines into a final score

use common::EvidenceBundle;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A scoring sub-model: pure function of the evidence into [0, 1]
pub trait EvidenceScorer: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, evidence: &EvidenceBundle) -> f64;
}

/// Configuration for the trap-likelihood model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapModelConfig {
    /// Trap confidence when no manipulation evidence is present
    #[serde(default = "default_trap_baseline")]
    pub baseline: f64,

    /// Trap confidence once skid or a thin bid side is observed
    #[serde(default = "default_trap_likely")]
    pub trap_likely: f64,

    /// Bid depth below this fraction of ask depth counts as a thin bid side
    #[serde(default = "default_depth_ratio")]
    pub depth_ratio: f64,
}

impl Default for TrapModelConfig {
    fn default() -> Self {
        Self {
            baseline: default_trap_baseline(),
            trap_likely: default_trap_likely(),
            depth_ratio: default_depth_ratio(),
        }
    }
}

fn default_trap_baseline() -> f64 {
    0.5
}

fn default_trap_likely() -> f64 {
    0.85
}

fn default_depth_ratio() -> f64 {
    0.5
}

/// High/low score selected by comparing a metric against a threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdScoreConfig {
    pub threshold: f64,

    #[serde(default = "default_high_score")]
    pub high: f64,

    #[serde(default = "default_low_score")]
    pub low: f64,
}

impl ThresholdScoreConfig {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            high: default_high_score(),
            low: default_low_score(),
        }
    }

    fn pick(&self, value: f64) -> f64 {
        if value > self.threshold {
            self.high
        } else {
            self.low
        }
    }
}

fn default_high_score() -> f64 {
    1.0
}

fn default_low_score() -> f64 {
    0.5
}

/// Scores for the order-book presence check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceScoreConfig {
    #[serde(default = "default_high_score")]
    pub present: f64,

    #[serde(default = "default_low_score")]
    pub absent: f64,
}

impl Default for PresenceScoreConfig {
    fn default() -> Self {
        Self {
            present: default_high_score(),
            absent: default_low_score(),
        }
    }
}

/// Parameters for the default scorers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    #[serde(default)]
    pub trap: TrapModelConfig,

    #[serde(default = "default_volume_score")]
    pub volume: ThresholdScoreConfig,

    #[serde(default = "default_momentum_score")]
    pub momentum: ThresholdScoreConfig,

    #[serde(default)]
    pub order_book: PresenceScoreConfig,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            trap: TrapModelConfig::default(),
            volume: default_volume_score(),
            momentum: default_momentum_score(),
            order_book: PresenceScoreConfig::default(),
        }
    }
}

fn default_volume_score() -> ThresholdScoreConfig {
    ThresholdScoreConfig::new(0.1)
}

fn default_momentum_score() -> ThresholdScoreConfig {
    ThresholdScoreConfig::new(0.05)
}

/// Trap likelihood from skid and order-book imbalance.
///
/// Returns the trap confidence itself, not the component score; the engine
/// uses `1 - trap_confidence` as the trap component.
pub struct DepthImbalanceTrapScorer {
    config: TrapModelConfig,
}

impl DepthImbalanceTrapScorer {
    pub fn new(config: TrapModelConfig) -> Self {
        Self { config }
    }

    fn thin_bids(&self, evidence: &EvidenceBundle) -> bool {
        evidence.order_book.as_ref().map_or(false, |book| {
            (book.bid_depth() as f64) < self.config.depth_ratio * book.ask_depth() as f64
        })
    }
}

impl EvidenceScorer for DepthImbalanceTrapScorer {
    fn name(&self) -> &str {
        "trap"
    }

    fn score(&self, evidence: &EvidenceBundle) -> f64 {
        let skid = evidence.volume.skid;
        let thin_bids = self.thin_bids(evidence);
        debug!(skid, thin_bids, "Trap evidence");

        if skid || thin_bids {
            self.config.trap_likely
        } else {
            self.config.baseline
        }
    }
}

pub struct VolumeAccelerationScorer {
    config: ThresholdScoreConfig,
}

impl VolumeAccelerationScorer {
    pub fn new(config: ThresholdScoreConfig) -> Self {
        Self { config }
    }
}

impl EvidenceScorer for VolumeAccelerationScorer {
    fn name(&self) -> &str {
        "volume"
    }

    fn score(&self, evidence: &EvidenceBundle) -> f64 {
        self.config.pick(evidence.volume.acceleration)
    }
}

/// Same acceleration metric as the volume scorer, with a lower bar
pub struct MomentumAccelerationScorer {
    config: ThresholdScoreConfig,
}

impl MomentumAccelerationScorer {
    pub fn new(config: ThresholdScoreConfig) -> Self {
        Self { config }
    }
}

impl EvidenceScorer for MomentumAccelerationScorer {
    fn name(&self) -> &str {
        "momentum"
    }

    fn score(&self, evidence: &EvidenceBundle) -> f64 {
        self.config.pick(evidence.volume.acceleration)
    }
}

pub struct OrderBookPresenceScorer {
    config: PresenceScoreConfig,
}

impl OrderBookPresenceScorer {
    pub fn new(config: PresenceScoreConfig) -> Self {
        Self { config }
    }
}

impl EvidenceScorer for OrderBookPresenceScorer {
    fn name(&self) -> &str {
        "orderbook"
    }

    fn score(&self, evidence: &EvidenceBundle) -> f64 {
        if evidence.order_book.is_some() {
            self.config.present
        } else {
            self.config.absent
        }
    }
}
