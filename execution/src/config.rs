use common::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for signal delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Executor endpoint; delivery is skipped when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Total attempts per signal, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts (milliseconds)
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// File holding the most recently attempted signal
    #[serde(default = "default_staging_path")]
    pub staging_path: PathBuf,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            staging_path: default_staging_path(),
        }
    }
}

impl DeliveryConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "delivery needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    5_000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_staging_path() -> PathBuf {
    PathBuf::from("data/signal.json")
}
