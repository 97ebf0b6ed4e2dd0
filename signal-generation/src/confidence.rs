// Confidence Engine
// Scores candidate signals against market evidence and decides go / suppressed

use crate::ledger::{LedgerStats, LedgerStore, SignalLogEntry, StatisticsLedger, TradeRecord};
use crate::scoring::{
    DepthImbalanceTrapScorer, EvidenceScorer, MomentumAccelerationScorer, OrderBookPresenceScorer, ScorerConfig,
    VolumeAccelerationScorer,
};
use common::{CandidateSignal, EvidenceBundle, PipelineError, Result, SignalStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Component weights; must sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub trap: f64,
    pub volume: f64,
    pub momentum: f64,
    pub orderbook: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            trap: 0.45,
            volume: 0.30,
            momentum: 0.15,
            orderbook: 0.10,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.trap + self.volume + self.momentum + self.orderbook
    }
}

/// Configuration for the confidence engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    /// Signals whose trap confidence exceeds this percentage are suppressed
    #[serde(default = "default_trap_threshold")]
    pub trap_threshold: u8,

    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    #[serde(default)]
    pub weights: ScoringWeights,

    #[serde(default)]
    pub scoring: ScorerConfig,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            trap_threshold: default_trap_threshold(),
            ledger_path: default_ledger_path(),
            weights: ScoringWeights::default(),
            scoring: ScorerConfig::default(),
        }
    }
}

fn default_trap_threshold() -> u8 {
    80
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/schema.json")
}

impl ConfidenceConfig {
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        if [w.trap, w.volume, w.momentum, w.orderbook].iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "scoring weights must be non-negative: {:?}",
                w
            )));
        }
        if (w.sum() - 1.0).abs() > 1e-6 {
            return Err(PipelineError::InvalidConfig(format!(
                "scoring weights must sum to 1.0 (got {})",
                w.sum()
            )));
        }
        if self.trap_threshold > 100 {
            return Err(PipelineError::InvalidConfig(format!(
                "trap threshold must be within 0-100 (got {})",
                self.trap_threshold
            )));
        }
        Ok(())
    }
}

/// Per-component scores in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub trap: f64,
    pub volume: f64,
    pub momentum: f64,
    pub orderbook: f64,
}

/// Pure scoring result for one signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub trap_confidence: f64,
    pub components: ComponentScores,
    pub final_confidence: u8,
    pub go: bool,
}

impl Assessment {
    pub fn status(&self) -> SignalStatus {
        SignalStatus::from_go(self.go)
    }
}

/// A signal after the engine has annotated it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedSignal {
    pub signal: CandidateSignal,
    pub status: SignalStatus,
    /// Absent for overrides
    pub trap_confidence: Option<f64>,
    pub overridden: bool,
}

impl ValidatedSignal {
    pub fn go(&self) -> bool {
        self.signal.go
    }

    pub fn final_confidence(&self) -> u8 {
        self.signal.confidence
    }
}

/// Weighted evidence scoring with a persisted statistics ledger
pub struct ConfidenceEngine {
    config: ConfidenceConfig,
    trap_model: Box<dyn EvidenceScorer>,
    volume_model: Box<dyn EvidenceScorer>,
    momentum_model: Box<dyn EvidenceScorer>,
    orderbook_model: Box<dyn EvidenceScorer>,
    ledger: LedgerStore,
}

impl ConfidenceEngine {
    /// Engine with the default scorers, rejecting invalid weights or threshold
    pub fn new(config: ConfidenceConfig) -> Result<Self> {
        config.validate()?;
        let scoring = config.scoring.clone();
        Ok(Self {
            ledger: LedgerStore::new(config.ledger_path.clone()),
            trap_model: Box::new(DepthImbalanceTrapScorer::new(scoring.trap)),
            volume_model: Box::new(VolumeAccelerationScorer::new(scoring.volume)),
            momentum_model: Box::new(MomentumAccelerationScorer::new(scoring.momentum)),
            orderbook_model: Box::new(OrderBookPresenceScorer::new(scoring.order_book)),
            config,
        })
    }

    /// Replace the trap model; it must return trap confidence, not a component score
    pub fn with_trap_model(mut self, model: impl EvidenceScorer + 'static) -> Self {
        self.trap_model = Box::new(model);
        self
    }

    pub fn with_volume_model(mut self, model: impl EvidenceScorer + 'static) -> Self {
        self.volume_model = Box::new(model);
        self
    }

    pub fn with_momentum_model(mut self, model: impl EvidenceScorer + 'static) -> Self {
        self.momentum_model = Box::new(model);
        self
    }

    pub fn with_orderbook_model(mut self, model: impl EvidenceScorer + 'static) -> Self {
        self.orderbook_model = Box::new(model);
        self
    }

    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    /// Score evidence without touching the ledger
    pub fn assess(&self, evidence: &EvidenceBundle) -> Assessment {
        let trap_confidence = bounded(self.trap_model.score(evidence));
        let components = ComponentScores {
            trap: 1.0 - trap_confidence,
            volume: bounded(self.volume_model.score(evidence)),
            momentum: bounded(self.momentum_model.score(evidence)),
            orderbook: bounded(self.orderbook_model.score(evidence)),
        };

        let w = &self.config.weights;
        let weighted = w.trap * components.trap
            + w.volume * components.volume
            + w.momentum * components.momentum
            + w.orderbook * components.orderbook;
        // Truncated to an integer; the epsilon absorbs float error at exact boundaries.
        let final_confidence = (100.0 * weighted + 1e-9).floor().clamp(0.0, 100.0) as u8;

        Assessment {
            trap_confidence,
            components,
            final_confidence,
            go: trap_confidence <= f64::from(self.config.trap_threshold) / 100.0,
        }
    }

    /// Score, decide, and log the signal to the ledger.
    ///
    /// The decision is only returned once the ledger entry is durable.
    pub async fn validate(&self, signal: &CandidateSignal, evidence: &EvidenceBundle) -> Result<ValidatedSignal> {
        let assessment = self.assess(evidence);

        let mut annotated = signal.clone();
        annotated.confidence = assessment.final_confidence;
        annotated.go = assessment.go;

        let entry = SignalLogEntry {
            signal: annotated.clone(),
            status: assessment.status(),
            logged_at: Utc::now(),
            trap_confidence: Some(assessment.trap_confidence),
            overridden: false,
        };
        self.ledger.transact(|ledger| ledger.log_signal(entry)).await?;

        if assessment.go {
            info!(
                signal_id = %annotated.id,
                instrument = %annotated.instrument,
                confidence = assessment.final_confidence,
                trap_confidence = assessment.trap_confidence,
                "Signal approved for execution"
            );
        } else {
            warn!(
                signal_id = %annotated.id,
                instrument = %annotated.instrument,
                confidence = assessment.final_confidence,
                trap_confidence = assessment.trap_confidence,
                "Signal suppressed: trap confidence above threshold"
            );
        }

        Ok(ValidatedSignal {
            signal: annotated,
            status: assessment.status(),
            trap_confidence: Some(assessment.trap_confidence),
            overridden: false,
        })
    }

    /// Force a signal through without scoring; still logged exactly once
    pub async fn override_signal(&self, signal: &CandidateSignal) -> Result<ValidatedSignal> {
        let mut annotated = signal.clone();
        annotated.go = true;

        let entry = SignalLogEntry {
            signal: annotated.clone(),
            status: SignalStatus::AwaitingExecution,
            logged_at: Utc::now(),
            trap_confidence: None,
            overridden: true,
        };
        self.ledger.transact(|ledger| ledger.log_signal(entry)).await?;

        warn!(signal_id = %annotated.id, instrument = %annotated.instrument, "Signal overridden");
        Ok(ValidatedSignal {
            signal: annotated,
            status: SignalStatus::AwaitingExecution,
            trap_confidence: None,
            overridden: true,
        })
    }

    /// Log a closed trade and refresh the trade statistics
    pub async fn record_trade(&self, trade: TradeRecord) -> Result<LedgerStats> {
        info!(instrument = %trade.instrument, roi_pct = trade.roi_pct, "Recording trade outcome");
        self.ledger
            .transact(|ledger| {
                ledger.record_trade(trade);
                ledger.stats.clone()
            })
            .await
    }

    pub async fn stats(&self) -> Result<LedgerStats> {
        Ok(self.ledger.load().await?.stats)
    }

    pub async fn ledger(&self) -> Result<StatisticsLedger> {
        self.ledger.load().await
    }
}

fn bounded(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
