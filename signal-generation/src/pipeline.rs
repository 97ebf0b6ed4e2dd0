// Stage Pipeline
// Runs a stage against its upstream exchange entries and publishes the result

use common::{PipelineError, Result};
use exchange_hub::{ExchangeConfig, ExchangeStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Upstream values a stage waited for, keyed by exchange key
#[derive(Debug, Clone, Default)]
pub struct Upstream {
    values: HashMap<String, Value>,
}

impl Upstream {
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Decode a declared upstream value; failures are reported against `stage`
    pub fn decode<T: DeserializeOwned>(&self, stage: &str, key: &str) -> Result<T> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| PipelineError::compute(stage, format!("upstream key '{}' not provided", key)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| PipelineError::compute(stage, format!("malformed upstream '{}': {}", key, e)))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One step of the pipeline.
///
/// `compute` must be a pure function of its input and upstream values so that
/// re-running a stage republishes the same output.
pub trait Stage: Send + Sync {
    type Input: Send + Sync;
    type Output: Serialize + Send;

    fn name(&self) -> &str;

    /// Exchange key the output is published under
    fn output_key(&self) -> String;

    /// Exchange keys that must be published before this stage can run
    fn required_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn compute(&self, input: &Self::Input, upstream: &Upstream) -> Result<Self::Output>;
}

/// Executes stages against a shared exchange store
#[derive(Clone)]
pub struct StageRunner {
    store: Arc<ExchangeStore>,
    poll_interval: Duration,
    timeout: Duration,
}

impl StageRunner {
    pub fn new(store: Arc<ExchangeStore>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            store,
            poll_interval,
            timeout,
        }
    }

    pub fn from_config(store: Arc<ExchangeStore>, config: &ExchangeConfig) -> Self {
        Self::new(store, config.poll_interval(), config.await_timeout())
    }

    pub fn store(&self) -> &Arc<ExchangeStore> {
        &self.store
    }

    /// Wait for upstream keys, compute, publish.
    ///
    /// Nothing is published when waiting or computing fails.
    pub async fn run<S: Stage>(&self, stage: &S, input: &S::Input) -> Result<S::Output> {
        self.run_after(stage, input, &HashMap::new()).await
    }

    /// Like [`run`](Self::run), but an upstream key listed in `baseline` is
    /// only accepted once its version is greater than the recorded one.
    pub async fn run_after<S: Stage>(
        &self,
        stage: &S,
        input: &S::Input,
        baseline: &HashMap<String, u64>,
    ) -> Result<S::Output> {
        let name = stage.name().to_string();
        let mut upstream = Upstream::default();

        for key in stage.required_keys() {
            let newer_than = baseline.get(&key).copied();
            debug!(stage = %name, key = %key, ?newer_than, "Waiting for upstream output");
            let entry = self
                .store
                .await_entry(&key, newer_than, self.poll_interval, self.timeout)
                .await
                .map_err(|e| {
                    error!(stage = %name, key = %key, "Upstream wait failed: {}", e);
                    e
                })?;
            upstream.insert(key, entry.value);
        }

        let output = stage.compute(input, &upstream).map_err(|e| {
            error!(stage = %name, "Stage computation failed: {}", e);
            e
        })?;

        let key = stage.output_key();
        self.store.publish_as(&key, &output).await.map_err(|e| {
            error!(stage = %name, key = %key, "Failed to publish stage output: {}", e);
            e
        })?;

        info!(stage = %name, key = %key, "Stage results stored in exchange");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Doubler {
        upstream: Option<String>,
    }

    impl Stage for Doubler {
        type Input = i64;
        type Output = i64;

        fn name(&self) -> &str {
            "doubler"
        }

        fn output_key(&self) -> String {
            "doubled".to_string()
        }

        fn required_keys(&self) -> Vec<String> {
            self.upstream.iter().cloned().collect()
        }

        fn compute(&self, input: &i64, upstream: &Upstream) -> Result<i64> {
            let base = match &self.upstream {
                Some(key) => upstream.decode::<i64>(self.name(), key)?,
                None => 0,
            };
            if *input < 0 {
                return Err(PipelineError::compute(self.name(), "negative input"));
            }
            Ok(base + input * 2)
        }
    }

    fn runner(dir: &tempfile::TempDir, timeout: Duration) -> StageRunner {
        let store = Arc::new(ExchangeStore::new(dir.path().join("hub.json")));
        StageRunner::new(store, Duration::from_millis(10), timeout)
    }

    #[tokio::test]
    async fn test_run_publishes_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir, Duration::from_secs(1));

        let out = runner.run(&Doubler { upstream: None }, &21).await.unwrap();
        assert_eq!(out, 42);
        assert_eq!(runner.store().fetch("doubled").await.unwrap(), Some(json!(42)));

        // same input, same published value
        runner.run(&Doubler { upstream: None }, &21).await.unwrap();
        assert_eq!(runner.store().fetch("doubled").await.unwrap(), Some(json!(42)));
    }

    #[tokio::test]
    async fn test_failed_compute_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir, Duration::from_secs(1));

        let err = runner.run(&Doubler { upstream: None }, &-1).await.unwrap_err();
        assert!(matches!(err, PipelineError::Compute { .. }));
        assert!(!runner.store().exists("doubled").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_upstream_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir, Duration::from_millis(50));

        let stage = Doubler {
            upstream: Some("base".to_string()),
        };
        let err = runner.run(&stage, &1).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!runner.store().exists("doubled").await.unwrap());
    }

    #[tokio::test]
    async fn test_waits_for_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir, Duration::from_secs(2));

        let consumer = {
            let runner = runner.clone();
            tokio::spawn(async move {
                let stage = Doubler {
                    upstream: Some("base".to_string()),
                };
                runner.run(&stage, &5).await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        runner.store().publish("base", json!(100)).await.unwrap();

        assert_eq!(consumer.await.unwrap().unwrap(), 110);
    }

    #[tokio::test]
    async fn test_run_after_ignores_stale_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir, Duration::from_secs(2));
        let stale = runner.store().publish("base", json!(1)).await.unwrap();

        let consumer = {
            let runner = runner.clone();
            let baseline = HashMap::from([("base".to_string(), stale.version)]);
            tokio::spawn(async move {
                let stage = Doubler {
                    upstream: Some("base".to_string()),
                };
                runner.run_after(&stage, &5, &baseline).await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        runner.store().publish("base", json!(100)).await.unwrap();

        assert_eq!(consumer.await.unwrap().unwrap(), 110);
    }

    #[test]
    fn test_upstream_decode_errors() {
        let mut upstream = Upstream::default();
        upstream.insert("k", json!("not a number"));

        assert!(upstream.decode::<i64>("s", "missing").is_err());
        assert!(matches!(
            upstream.decode::<i64>("s", "k"),
            Err(PipelineError::Compute { .. })
        ));
    }
}
