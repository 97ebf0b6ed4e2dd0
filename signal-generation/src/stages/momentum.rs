use super::namespaced;
use super::trap_detection::{TrapDetectionOutput, TRAP_DETECTION_KEY};
use crate::indicators::pct_change;
use crate::pipeline::{Stage, Upstream};
use common::{CandidateSignal, PipelineError, Result, SeriesRecord, SignalSide, Uuid};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const MOMENTUM_KEY: &str = "momentum_results";

/// Configuration for the momentum stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumConfig {
    /// Look-back period for percent change (rows)
    #[serde(default = "default_lookback")]
    pub lookback: usize,

    /// Raw confidence added per percent of momentum, around a base of 50
    #[serde(default = "default_confidence_per_pct")]
    pub confidence_per_pct: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
            confidence_per_pct: default_confidence_per_pct(),
        }
    }
}

fn default_lookback() -> usize {
    10
}

fn default_confidence_per_pct() -> f64 {
    5.0
}

/// Per-row trade decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowDecision {
    pub timestamp: i64,
    pub side: SignalSide,
}

/// Published output of the momentum stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumOutput {
    pub series: SeriesRecord,
    pub decisions: Vec<RowDecision>,
    /// Candidate for the most recent row, `None` for an empty series
    pub candidate: Option<CandidateSignal>,
}

impl MomentumOutput {
    pub fn count(&self, side: SignalSide) -> usize {
        self.decisions.iter().filter(|d| d.side == side).count()
    }
}

/// Computes momentum over the trap-detection output and proposes BUY on rows
/// with positive momentum that were not flagged as traps, HOLD otherwise.
pub struct MomentumStage {
    config: MomentumConfig,
    namespace: Option<String>,
}

impl MomentumStage {
    pub fn new(config: MomentumConfig) -> Result<Self> {
        if config.lookback == 0 {
            return Err(PipelineError::InvalidConfig(
                "momentum lookback must be at least 1".to_string(),
            ));
        }
        Ok(Self { config, namespace: None })
    }

    pub fn for_instrument(mut self, instrument: impl Into<String>) -> Self {
        self.namespace = Some(instrument.into());
        self
    }

    fn upstream_key(&self) -> String {
        namespaced(self.namespace.as_deref(), TRAP_DETECTION_KEY)
    }

    fn raw_confidence(&self, momentum: Option<f64>) -> u8 {
        let momentum = momentum.unwrap_or(0.0);
        (50.0 + momentum * self.config.confidence_per_pct)
            .clamp(0.0, 100.0)
            .round() as u8
    }

    fn candidate(&self, series: &SeriesRecord, decisions: &[RowDecision]) -> Result<Option<CandidateSignal>> {
        let (Some(bar), Some(decision)) = (series.last(), decisions.last()) else {
            return Ok(None);
        };

        let time = bar.time().ok_or_else(|| {
            PipelineError::compute(self.name(), format!("timestamp {} out of range", bar.timestamp))
        })?;

        // Stable id so a re-run republishes an identical candidate.
        let id = Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{}:{}:{:?}", series.instrument, bar.timestamp, decision.side).as_bytes(),
        );

        let mut candidate = CandidateSignal::new(
            series.instrument.clone(),
            decision.side,
            self.raw_confidence(bar.momentum),
            time,
        )
        .with_id(id)
        .annotate("close", bar.close)
        .annotate("trap_flag", bar.trap_flag);
        if let Some(momentum) = bar.momentum {
            candidate = candidate.annotate("momentum", momentum);
        }
        if let Some(sma) = bar.sma_short {
            candidate = candidate.annotate("sma_short", sma);
        }

        Ok(Some(candidate))
    }
}

impl Stage for MomentumStage {
    type Input = ();
    type Output = MomentumOutput;

    fn name(&self) -> &str {
        "momentum"
    }

    fn output_key(&self) -> String {
        namespaced(self.namespace.as_deref(), MOMENTUM_KEY)
    }

    fn required_keys(&self) -> Vec<String> {
        vec![self.upstream_key()]
    }

    fn compute(&self, _input: &(), upstream: &Upstream) -> Result<MomentumOutput> {
        let TrapDetectionOutput { processed, flagged } = upstream.decode(self.name(), &self.upstream_key())?;

        let mut series = processed;
        let momentum = pct_change(&series.closes(), self.config.lookback);
        for (bar, value) in series.bars_mut().iter_mut().zip(momentum) {
            bar.momentum = value;
        }

        let decisions: Vec<RowDecision> = series
            .bars()
            .iter()
            .map(|bar| {
                let buy = bar.momentum.map_or(false, |m| m > 0.0) && !flagged.contains(bar.timestamp);
                RowDecision {
                    timestamp: bar.timestamp,
                    side: if buy { SignalSide::Buy } else { SignalSide::Hold },
                }
            })
            .collect();

        let candidate = self.candidate(&series, &decisions)?;
        let output = MomentumOutput {
            series,
            decisions,
            candidate,
        };

        info!(
            instrument = %output.series.instrument,
            buy = output.count(SignalSide::Buy),
            hold = output.count(SignalSide::Hold),
            "Generated trade signals"
        );
        Ok(output)
    }
}
