// Signal Generation Pipeline
// Drives one series through both stages, the confidence engine and delivery

use crate::confidence::{ConfidenceEngine, ValidatedSignal};
use crate::pipeline::{Stage, StageRunner};
use crate::stages::{MomentumConfig, MomentumStage, TrapDetectionConfig, TrapDetectionStage};
use common::{EvidenceBundle, PipelineError, Result, SeriesRecord, VolumeMetrics};
use execution::{DeliveryAck, DeliveryClient, Transport};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What happened to one series
#[derive(Debug, Clone)]
pub struct SeriesOutcome {
    pub instrument: String,
    /// `None` when the series produced no candidate
    pub validated: Option<ValidatedSignal>,
    /// `None` when the signal was suppressed or delivery is disabled
    pub delivery: Option<DeliveryAck>,
}

/// Signal generation pipeline
pub struct SignalPipeline<T: Transport> {
    runner: StageRunner,
    trap_detection: TrapDetectionConfig,
    momentum: MomentumConfig,
    engine: ConfidenceEngine,
    delivery: Option<DeliveryClient<T>>,
}

impl<T: Transport> SignalPipeline<T> {
    pub fn new(
        runner: StageRunner,
        trap_detection: TrapDetectionConfig,
        momentum: MomentumConfig,
        engine: ConfidenceEngine,
    ) -> Self {
        Self {
            runner,
            trap_detection,
            momentum,
            engine,
            delivery: None,
        }
    }

    /// Hand approved signals to this client
    pub fn with_delivery(mut self, delivery: DeliveryClient<T>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn engine(&self) -> &ConfidenceEngine {
        &self.engine
    }

    pub fn runner(&self) -> &StageRunner {
        &self.runner
    }

    /// Run both stages as concurrent tasks that meet in the exchange store,
    /// then score the candidate and deliver it when approved.
    pub async fn process_series(&self, series: SeriesRecord) -> Result<SeriesOutcome> {
        let instrument = series.instrument.clone();
        let trap_stage = TrapDetectionStage::new(self.trap_detection.clone())?.for_instrument(&instrument);
        let momentum_stage = MomentumStage::new(self.momentum.clone())?.for_instrument(&instrument);

        // A snapshot from an earlier run may already hold Stage A's key, so
        // Stage B waits for a version newer than the one seen now.
        let mut baseline = HashMap::new();
        for key in momentum_stage.required_keys() {
            if let Some(entry) = self.runner.store().fetch_entry(&key).await? {
                baseline.insert(key, entry.version);
            }
        }

        let stage_b = {
            let runner = self.runner.clone();
            tokio::spawn(async move { runner.run_after(&momentum_stage, &(), &baseline).await })
        };
        let stage_a = {
            let runner = self.runner.clone();
            tokio::spawn(async move { runner.run(&trap_stage, &series).await })
        };

        let (_, momentum) = join_stages(stage_a, stage_b).await?;

        let Some(candidate) = momentum.candidate.as_ref() else {
            debug!(instrument = %instrument, "No candidate signal for empty series");
            return Ok(SeriesOutcome {
                instrument,
                validated: None,
                delivery: None,
            });
        };

        let evidence = EvidenceBundle::new(None, volume_metrics(&momentum.series));
        let validated = self.engine.validate(candidate, &evidence).await?;

        let delivery = match (&self.delivery, validated.go()) {
            (Some(client), true) => Some(client.deliver(&validated.signal).await?),
            (None, true) => {
                warn!(instrument = %instrument, "Signal approved but no executor endpoint is configured");
                None
            }
            (_, false) => None,
        };

        info!(
            instrument = %instrument,
            side = ?validated.signal.side,
            confidence = validated.final_confidence(),
            status = validated.status.as_str(),
            delivered = delivery.is_some(),
            "Series processed"
        );

        Ok(SeriesOutcome {
            instrument,
            validated: Some(validated),
            delivery,
        })
    }
}

/// Wait for both stage tasks. Stage B is aborted when Stage A fails or
/// panics, since its upstream key will never be published.
async fn join_stages<A, B>(stage_a: JoinHandle<Result<A>>, stage_b: JoinHandle<Result<B>>) -> Result<(A, B)> {
    let first = match stage_a.await {
        Ok(result) => result,
        Err(e) => Err(PipelineError::compute("trap_detection", format!("task failed: {}", e))),
    };
    let first = match first {
        Ok(output) => output,
        Err(e) => {
            stage_b.abort();
            return Err(e);
        }
    };

    let second = stage_b
        .await
        .map_err(|e| PipelineError::compute("momentum", format!("task failed: {}", e)))??;
    Ok((first, second))
}

/// Volume evidence from the last two bars with volume.
///
/// Acceleration is the relative change of the latest volume; skid is rising
/// volume on a falling close.
pub fn volume_metrics(series: &SeriesRecord) -> VolumeMetrics {
    let with_volume: Vec<(f64, f64)> = series
        .bars()
        .iter()
        .filter_map(|bar| bar.volume.map(|volume| (bar.close, volume)))
        .collect();

    match with_volume.as_slice() {
        [.., (prev_close, prev_volume), (close, volume)] if *prev_volume > 0.0 => {
            let acceleration = volume / prev_volume - 1.0;
            VolumeMetrics {
                acceleration,
                skid: acceleration > 0.0 && close < prev_close,
            }
        }
        _ => VolumeMetrics::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{Bar, SignalSide, SignalStatus};
    use exchange_hub::ExchangeStore;
    use execution::{DeliveryConfig, TransportAck, TransportError};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingTransport {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, _signal: &common::CandidateSignal) -> std::result::Result<TransportAck, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TransportAck { status: 202, body: None })
        }
    }

    fn pipeline(dir: &tempfile::TempDir, calls: &Arc<AtomicU32>) -> SignalPipeline<CountingTransport> {
        let store = Arc::new(ExchangeStore::new(dir.path().join("exchange.json")));
        let runner = StageRunner::new(store, Duration::from_millis(10), Duration::from_secs(2));
        let engine = ConfidenceEngine::new(crate::confidence::ConfidenceConfig {
            ledger_path: dir.path().join("schema.json"),
            ..Default::default()
        })
        .unwrap();
        let delivery = DeliveryClient::new(
            DeliveryConfig {
                backoff_ms: 1,
                staging_path: dir.path().join("signal.json"),
                ..Default::default()
            },
            CountingTransport { calls: Arc::clone(calls) },
        )
        .unwrap();

        SignalPipeline::new(
            runner,
            TrapDetectionConfig {
                short_window: 2,
                long_window: 4,
                ..Default::default()
            },
            MomentumConfig {
                lookback: 1,
                ..Default::default()
            },
            engine,
        )
        .with_delivery(delivery)
    }

    fn rising_series() -> SeriesRecord {
        let bars = (0..8)
            .map(|i| Bar::new(1_700_000_000 + i * 60, 100.0 + i as f64).with_volume(1_000.0))
            .collect();
        SeriesRecord::new("ETHUSDT", bars).unwrap()
    }

    #[tokio::test]
    async fn test_approved_signal_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = pipeline(&dir, &calls);

        let outcome = pipeline.process_series(rising_series()).await.unwrap();
        let validated = outcome.validated.unwrap();
        assert_eq!(validated.signal.side, SignalSide::Buy);
        assert_eq!(validated.status, SignalStatus::AwaitingExecution);
        assert_eq!(outcome.delivery.unwrap().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let store = pipeline.runner().store();
        assert!(store.exists("ETHUSDT:trap_detection_results").await.unwrap());
        assert!(store.exists("ETHUSDT:momentum_results").await.unwrap());
        assert_eq!(pipeline.engine().ledger().await.unwrap().signals.len(), 1);
    }

    #[tokio::test]
    async fn test_suppressed_signal_is_not_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = pipeline(&dir, &calls);

        // volume jumps while the close drops: skid
        let mut bars: Vec<Bar> = (0..7)
            .map(|i| Bar::new(1_700_000_000 + i * 60, 100.0).with_volume(1_000.0))
            .collect();
        bars.push(Bar::new(1_700_000_420, 95.0).with_volume(3_000.0));
        let series = SeriesRecord::new("BTCUSDT", bars).unwrap();

        let outcome = pipeline.process_series(series).await.unwrap();
        let validated = outcome.validated.unwrap();
        assert_eq!(validated.status, SignalStatus::Suppressed);
        assert!(outcome.delivery.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rerun_waits_for_fresh_stage_output() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = pipeline(&dir, &calls);

        pipeline.process_series(rising_series()).await.unwrap();
        let store = pipeline.runner().store();
        let first = store.fetch_entry("ETHUSDT:momentum_results").await.unwrap().unwrap();

        let outcome = pipeline.process_series(rising_series()).await.unwrap();
        let second = store.fetch_entry("ETHUSDT:momentum_results").await.unwrap().unwrap();
        assert!(second.version > first.version);
        assert_eq!(first.value, second.value);
        assert_eq!(outcome.validated.unwrap().signal.id, {
            let published: crate::stages::MomentumOutput = serde_json::from_value(second.value).unwrap();
            published.candidate.unwrap().id
        });
        assert_eq!(pipeline.engine().ledger().await.unwrap().signals.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_series_yields_no_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = pipeline(&dir, &calls);

        let outcome = pipeline
            .process_series(SeriesRecord::new("EMPTY", Vec::new()).unwrap())
            .await
            .unwrap();
        assert!(outcome.validated.is_none());
        assert!(pipeline.engine().ledger().await.unwrap().signals.is_empty());
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_stage_b_aborted_when_stage_a_panics() {
        let dropped = Arc::new(AtomicBool::new(false));

        let stage_a: JoinHandle<Result<()>> = tokio::spawn(async { panic!("stage a blew up") });
        let stage_b = {
            let flag = DropFlag(Arc::clone(&dropped));
            tokio::spawn(async move {
                let _flag = flag;
                tokio::time::sleep(Duration::from_secs(300)).await;
                Ok::<(), PipelineError>(())
            })
        };

        let err = join_stages(stage_a, stage_b).await.unwrap_err();
        assert!(matches!(err, PipelineError::Compute { .. }));

        tokio::time::timeout(Duration::from_secs(1), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stage_b_aborted_when_stage_a_errors() {
        let dropped = Arc::new(AtomicBool::new(false));

        let stage_a = tokio::spawn(async { Err::<(), PipelineError>(PipelineError::compute("trap_detection", "bad close")) });
        let stage_b = {
            let flag = DropFlag(Arc::clone(&dropped));
            tokio::spawn(async move {
                let _flag = flag;
                tokio::time::sleep(Duration::from_secs(300)).await;
                Ok::<(), PipelineError>(())
            })
        };

        assert!(join_stages(stage_a, stage_b).await.is_err());
        tokio::time::timeout(Duration::from_secs(1), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_volume_metrics() {
        assert_eq!(volume_metrics(&rising_series()), VolumeMetrics::default());

        let bars = vec![
            Bar::new(1, 100.0).with_volume(100.0),
            Bar::new(2, 101.0),
            Bar::new(3, 99.0).with_volume(150.0),
        ];
        let metrics = volume_metrics(&SeriesRecord::new("X", bars).unwrap());
        assert!((metrics.acceleration - 0.5).abs() < 1e-9);
        assert!(metrics.skid);
    }
}
