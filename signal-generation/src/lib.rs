// Signal Generation Framework
// Stages, confidence scoring, and the statistics ledger behind the signal pipeline

pub mod confidence;
pub mod config;
pub mod indicators;
pub mod ledger;
pub mod orchestrator;
pub mod pipeline;
pub mod scoring;
pub mod stages;

pub use confidence::{Assessment, ComponentScores, ConfidenceConfig, ConfidenceEngine, ScoringWeights, ValidatedSignal};
pub use config::{create_config_template, load_config, save_config, PipelineSettings, EXECUTOR_URL_ENV};
pub use ledger::{LedgerStats, LedgerStore, SignalLogEntry, StatisticsLedger, TradeRecord};
pub use orchestrator::{volume_metrics, SeriesOutcome, SignalPipeline};
pub use pipeline::{Stage, StageRunner, Upstream};
pub use scoring::{
    DepthImbalanceTrapScorer, EvidenceScorer, MomentumAccelerationScorer, OrderBookPresenceScorer,
    PresenceScoreConfig, ScorerConfig, ThresholdScoreConfig, TrapModelConfig, VolumeAccelerationScorer,
};
pub use stages::{
    MomentumConfig, MomentumOutput, MomentumStage, TrapDetectionConfig, TrapDetectionOutput, TrapDetectionStage,
};
