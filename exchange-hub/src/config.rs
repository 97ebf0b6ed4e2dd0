use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Exchange store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Snapshot file holding every published entry
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// How often a waiting stage re-checks the durable snapshot (milliseconds).
    /// Lower values pick up producers in other processes sooner at the cost of
    /// more snapshot reads; in-process publishes wake waiters immediately.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deadline for waiting on an upstream key (seconds)
    #[serde(default = "default_await_timeout_secs")]
    pub await_timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            poll_interval_ms: default_poll_interval_ms(),
            await_timeout_secs: default_await_timeout_secs(),
        }
    }
}

impl ExchangeConfig {
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn await_timeout(&self) -> Duration {
        Duration::from_secs(self.await_timeout_secs)
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/exchange_snapshot.json")
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_await_timeout_secs() -> u64 {
    300
}
