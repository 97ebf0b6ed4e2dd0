// Statistics Ledger
// Persisted log of validated signals and closed trades plus aggregate stats

use common::{read_json, write_json_atomic, CandidateSignal, Result, SignalSide, SignalStatus, Uuid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Trades considered by the rolling hit rate
const ROLLING_WINDOW: usize = 5;

/// Aggregate statistics recomputed on every ledger mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Fraction of closed trades with positive ROI
    #[serde(default)]
    pub win_rate: f64,

    /// Running mean of "trap confidence above 0.5" over scored signals
    #[serde(default)]
    pub trap_accuracy: f64,

    /// Mean ROI across closed trades, in percent
    #[serde(default)]
    pub avg_roi: f64,

    /// Fraction of the last five trades with positive ROI
    #[serde(default)]
    pub rolling5_hit_rate: f64,

    /// Win rate of momentum-extension trades, in percent
    #[serde(default)]
    pub extension_win_pct: f64,

    #[serde(default = "default_module")]
    pub most_accurate_module: String,
}

impl Default for LedgerStats {
    fn default() -> Self {
        Self {
            win_rate: 0.0,
            trap_accuracy: 0.0,
            avg_roi: 0.0,
            rolling5_hit_rate: 0.0,
            extension_win_pct: 0.0,
            most_accurate_module: default_module(),
        }
    }
}

fn default_module() -> String {
    "N/A".to_string()
}

/// One logged validation or override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalLogEntry {
    #[serde(flatten)]
    pub signal: CandidateSignal,
    pub status: SignalStatus,
    pub logged_at: DateTime<Utc>,
    /// Absent for overrides, which bypass scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trap_confidence: Option<f64>,
    #[serde(rename = "override", default)]
    pub overridden: bool,
}

/// Outcome of a closed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(default)]
    pub signal_id: Option<Uuid>,
    pub instrument: String,
    pub side: SignalSide,
    pub roi_pct: f64,
    /// Module credited with the trade, e.g. "trap_detection"
    #[serde(default)]
    pub module: Option<String>,
    /// Trade was a momentum extension
    #[serde(default)]
    pub extension: bool,
    pub closed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn new(instrument: impl Into<String>, side: SignalSide, roi_pct: f64) -> Self {
        Self {
            signal_id: None,
            instrument: instrument.into(),
            side,
            roi_pct,
            module: None,
            extension: false,
            closed_at: Utc::now(),
        }
    }

    pub fn for_signal(mut self, signal_id: Uuid) -> Self {
        self.signal_id = Some(signal_id);
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn as_extension(mut self) -> Self {
        self.extension = true;
        self
    }

    pub fn is_win(&self) -> bool {
        self.roi_pct > 0.0
    }
}

/// The persisted ledger document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsLedger {
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
    #[serde(default)]
    pub signals: Vec<SignalLogEntry>,
    #[serde(default)]
    pub stats: LedgerStats,
}

impl StatisticsLedger {
    /// Append a signal entry, folding its trap confidence into `trap_accuracy`
    pub fn log_signal(&mut self, entry: SignalLogEntry) {
        let trap_confidence = entry.trap_confidence;
        self.signals.push(entry);

        if let Some(trap_confidence) = trap_confidence {
            let scored = self.signals.iter().filter(|s| s.trap_confidence.is_some()).count();
            let indicator = if trap_confidence > 0.5 { 1.0 } else { 0.0 };
            let old = self.stats.trap_accuracy;
            self.stats.trap_accuracy = (old + (indicator - old) / scored as f64).clamp(0.0, 1.0);
        }
    }

    pub fn record_trade(&mut self, trade: TradeRecord) {
        self.trades.push(trade);
        self.recompute_trade_stats();
    }

    fn recompute_trade_stats(&mut self) {
        let stats = &mut self.stats;
        stats.win_rate = win_fraction(self.trades.iter());
        stats.avg_roi = if self.trades.is_empty() {
            0.0
        } else {
            self.trades.iter().map(|t| t.roi_pct).sum::<f64>() / self.trades.len() as f64
        };

        let recent = self.trades.len().saturating_sub(ROLLING_WINDOW);
        stats.rolling5_hit_rate = win_fraction(self.trades[recent..].iter());
        stats.extension_win_pct = win_fraction(self.trades.iter().filter(|t| t.extension)) * 100.0;

        let mut by_module: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for trade in &self.trades {
            if let Some(module) = trade.module.as_deref() {
                let entry = by_module.entry(module).or_default();
                entry.1 += 1;
                if trade.is_win() {
                    entry.0 += 1;
                }
            }
        }
        // Ties go to the alphabetically first module.
        stats.most_accurate_module = by_module
            .into_iter()
            .map(|(module, (wins, total))| (module, wins as f64 / total as f64))
            .fold(None::<(&str, f64)>, |best, (module, rate)| match best {
                Some((_, best_rate)) if best_rate >= rate => best,
                _ => Some((module, rate)),
            })
            .map(|(module, _)| module.to_string())
            .unwrap_or_else(default_module);
    }
}

fn win_fraction<'a>(trades: impl Iterator<Item = &'a TradeRecord>) -> f64 {
    let (wins, total) = trades.fold((0usize, 0usize), |(wins, total), t| {
        (wins + usize::from(t.is_win()), total + 1)
    });
    if total == 0 {
        0.0
    } else {
        wins as f64 / total as f64
    }
}

/// File-backed ledger with serialized load-mutate-save transactions
pub struct LedgerStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current ledger; zeroed defaults when the file does not exist yet
    pub async fn load(&self) -> Result<StatisticsLedger> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    /// Load, apply `mutate`, and atomically replace the file.
    ///
    /// Transactions on the same store never interleave. If the save fails
    /// the error is returned and the mutation is lost with it.
    pub async fn transact<R>(&self, mutate: impl FnOnce(&mut StatisticsLedger) -> R) -> Result<R> {
        let _guard = self.lock.lock().await;
        let mut ledger = self.read().await?;
        let result = mutate(&mut ledger);
        write_json_atomic(&self.path, &ledger).await?;
        debug!(
            path = %self.path.display(),
            signals = ledger.signals.len(),
            trades = ledger.trades.len(),
            "Ledger saved"
        );
        Ok(result)
    }

    async fn read(&self) -> Result<StatisticsLedger> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(trap_confidence: Option<f64>) -> SignalLogEntry {
        let signal = CandidateSignal::new("ETHUSDT", SignalSide::Buy, 60, Utc::now());
        SignalLogEntry {
            signal,
            status: SignalStatus::AwaitingExecution,
            logged_at: Utc::now(),
            trap_confidence,
            overridden: trap_confidence.is_none(),
        }
    }

    #[test]
    fn test_trap_accuracy_is_running_mean() {
        let mut ledger = StatisticsLedger::default();
        ledger.log_signal(entry(Some(0.85)));
        ledger.log_signal(entry(Some(0.5)));
        ledger.log_signal(entry(None));
        ledger.log_signal(entry(Some(0.85)));

        assert_eq!(ledger.signals.len(), 4);
        assert!((ledger.stats.trap_accuracy - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_trap_accuracy_clamped_for_corrupt_ledgers() {
        let mut ledger = StatisticsLedger::default();
        ledger.stats.trap_accuracy = 7.0;
        ledger.signals.push(entry(Some(0.85)));
        ledger.log_signal(entry(Some(0.85)));
        assert!(ledger.stats.trap_accuracy <= 1.0);
    }

    #[test]
    fn test_trade_stats() {
        let mut ledger = StatisticsLedger::default();
        ledger.record_trade(TradeRecord::new("ETH", SignalSide::Buy, 4.0).with_module("trap_detection"));
        ledger.record_trade(TradeRecord::new("ETH", SignalSide::Buy, -2.0).with_module("momentum").as_extension());
        ledger.record_trade(TradeRecord::new("ETH", SignalSide::Buy, 1.0).with_module("momentum").as_extension());

        let stats = &ledger.stats;
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.avg_roi - 1.0).abs() < 1e-9);
        assert!((stats.extension_win_pct - 50.0).abs() < 1e-9);
        assert_eq!(stats.most_accurate_module, "trap_detection");
    }

    #[test]
    fn test_rolling_hit_rate_uses_last_five() {
        let mut ledger = StatisticsLedger::default();
        for roi in [-1.0, -1.0, 1.0, 1.0, 1.0, 1.0, -1.0] {
            ledger.record_trade(TradeRecord::new("BTC", SignalSide::Buy, roi));
        }
        assert!((ledger.stats.rolling5_hit_rate - 0.8).abs() < 1e-9);
        assert_eq!(ledger.stats.most_accurate_module, "N/A");
    }

    #[test]
    fn test_override_field_name_on_disk() {
        let value = serde_json::to_value(entry(None)).unwrap();
        assert_eq!(value["override"], true);
        assert_eq!(value["instrument"], "ETHUSDT");
        assert_eq!(value["status"], "awaiting_execution");
        assert!(value.get("trap_confidence").is_none());
    }

    #[tokio::test]
    async fn test_missing_file_loads_zeroed_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("schema.json"));

        let ledger = store.load().await.unwrap();
        assert!(ledger.signals.is_empty());
        assert_eq!(ledger.stats, LedgerStats::default());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_transact_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let store = LedgerStore::new(&path);

        let count = store
            .transact(|ledger| {
                ledger.log_signal(entry(Some(0.85)));
                ledger.signals.len()
            })
            .await
            .unwrap();
        assert_eq!(count, 1);

        let reopened = LedgerStore::new(&path).load().await.unwrap();
        assert_eq!(reopened.signals.len(), 1);
        assert_eq!(reopened.stats.trap_accuracy, 1.0);
    }

    #[tokio::test]
    async fn test_failed_save_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger_dir");
        std::fs::create_dir_all(path.join("occupied")).unwrap();
        let store = LedgerStore::new(&path);

        let err = store.transact(|ledger| ledger.log_signal(entry(Some(0.5)))).await.unwrap_err();
        assert!(matches!(err, common::PipelineError::Storage { .. }));
    }
}
