// Exchange Store
// In-memory entry map mirrored to a durable snapshot, with publish notification

use crate::config::ExchangeConfig;
use chrono::{DateTime, Utc};
use common::{read_json, write_json_atomic, PipelineError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};

/// A published value together with its version stamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeEntry {
    pub key: String,
    pub value: Value,
    /// Store-wide monotonically increasing publish counter
    pub version: u64,
    pub published_at: DateTime<Utc>,
}

type Snapshot = BTreeMap<String, ExchangeEntry>;

/// Durable publish-and-wait store shared by pipeline stages.
///
/// Share it behind an `Arc`. Publishes are serialized within one store;
/// readers never observe a partially written snapshot. Other processes may
/// read and wait on the same snapshot, but only one process should publish to
/// it at a time: the snapshot file is not locked across processes, so two
/// concurrent writers can drop each other's keys from disk.
pub struct ExchangeStore {
    snapshot_path: PathBuf,
    entries: RwLock<HashMap<String, ExchangeEntry>>,
    publish_lock: Mutex<()>,
    published: Notify,
}

impl ExchangeStore {
    /// Create a store without reading the snapshot; lookups fall back to disk lazily
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            entries: RwLock::new(HashMap::new()),
            publish_lock: Mutex::new(()),
            published: Notify::new(),
        }
    }

    /// Create a store and restore every entry from an existing snapshot
    pub async fn open(config: &ExchangeConfig) -> Result<Self> {
        let store = Self::new(config.snapshot_path.clone());
        if let Some(snapshot) = store.load_snapshot().await? {
            let restored = snapshot.len();
            store.entries.write().await.extend(snapshot);
            info!(path = %store.snapshot_path.display(), restored, "Restored exchange snapshot");
        }
        Ok(store)
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Store `value` under `key` and rewrite the durable snapshot.
    ///
    /// The in-memory entry stays visible even when the durable write fails;
    /// the failure is still reported as a storage error.
    pub async fn publish(&self, key: &str, value: Value) -> Result<ExchangeEntry> {
        let _guard = self.publish_lock.lock().await;

        // Keep entries another process wrote since we last looked.
        let on_disk = match self.load_snapshot().await {
            Ok(snapshot) => snapshot.unwrap_or_default(),
            Err(e) => {
                warn!(key = %key, "Ignoring unreadable exchange snapshot: {}", e);
                Snapshot::new()
            }
        };

        let (entry, snapshot) = {
            let mut entries = self.entries.write().await;
            for (k, disk_entry) in on_disk {
                let newer = entries.get(&k).map_or(true, |mem| disk_entry.version > mem.version);
                if newer {
                    entries.insert(k, disk_entry);
                }
            }

            let version = entries.values().map(|e| e.version).max().unwrap_or(0) + 1;
            let entry = ExchangeEntry {
                key: key.to_string(),
                value,
                version,
                published_at: Utc::now(),
            };
            entries.insert(key.to_string(), entry.clone());

            let snapshot: Snapshot = entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            (entry, snapshot)
        };

        self.published.notify_waiters();

        if let Err(e) = write_json_atomic(&self.snapshot_path, &snapshot).await {
            error!(key = %key, "Failed to persist exchange snapshot: {}", e);
            return Err(e);
        }

        info!(key = %key, version = entry.version, "Published exchange entry");
        Ok(entry)
    }

    /// Serialize and publish any `serde` value
    pub async fn publish_as<T: Serialize>(&self, key: &str, value: &T) -> Result<ExchangeEntry> {
        let value = serde_json::to_value(value)
            .map_err(|e| PipelineError::storage(format!("encoding value for key '{}'", key), e))?;
        self.publish(key, value).await
    }

    /// Latest entry for `key`, consulting the snapshot when it is not in memory
    pub async fn fetch_entry(&self, key: &str) -> Result<Option<ExchangeEntry>> {
        if let Some(entry) = self.entries.read().await.get(key) {
            return Ok(Some(entry.clone()));
        }

        let Some(mut snapshot) = self.load_snapshot().await? else {
            debug!(key = %key, "No exchange snapshot on disk");
            return Ok(None);
        };
        let Some(entry) = snapshot.remove(key) else {
            return Ok(None);
        };

        let mut entries = self.entries.write().await;
        let cached = entries.entry(key.to_string()).or_insert(entry);
        Ok(Some(cached.clone()))
    }

    pub async fn fetch(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.fetch_entry(key).await?.map(|e| e.value))
    }

    pub async fn fetch_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.fetch(key).await? {
            Some(value) => decode(key, value).map(Some),
            None => Ok(None),
        }
    }

    /// Whether `key` was published, in this process or in the snapshot
    pub async fn exists(&self, key: &str) -> Result<bool> {
        if self.entries.read().await.contains_key(key) {
            return Ok(true);
        }
        Ok(self
            .load_snapshot()
            .await?
            .map_or(false, |snapshot| snapshot.contains_key(key)))
    }

    /// Block until `key` is published, then return its value.
    ///
    /// Wakes immediately on in-process publishes and re-checks the snapshot
    /// every `poll_interval` for producers running elsewhere. Fails with a
    /// timeout error once `timeout` elapses.
    pub async fn await_key(&self, key: &str, poll_interval: Duration, timeout: Duration) -> Result<Value> {
        Ok(self.await_entry(key, None, poll_interval, timeout).await?.value)
    }

    /// Like [`await_key`](Self::await_key), but only accepts an entry whose
    /// version is greater than `newer_than`. Passing the version seen before
    /// starting a producer waits for that producer's publish rather than a
    /// value left over from an earlier run.
    pub async fn await_entry(
        &self,
        key: &str,
        newer_than: Option<u64>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<ExchangeEntry> {
        debug!(key = %key, ?newer_than, ?timeout, "Waiting for exchange key");

        let wait = async {
            loop {
                let notified = self.published.notified();
                tokio::pin!(notified);
                // Register before checking so a publish in between is not missed.
                notified.as_mut().enable();

                let found = match newer_than {
                    None => self.fetch_entry(key).await?,
                    Some(baseline) => self.latest_entry(key).await?.filter(|e| e.version > baseline),
                };
                if let Some(entry) = found {
                    return Ok::<ExchangeEntry, PipelineError>(entry);
                }

                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!(key = %key, ?timeout, "Timed out waiting for exchange key");
                Err(PipelineError::Timeout {
                    key: key.to_string(),
                    waited: timeout,
                })
            }
        }
    }

    pub async fn await_as<T: DeserializeOwned>(&self, key: &str, poll_interval: Duration, timeout: Duration) -> Result<T> {
        let value = self.await_key(key, poll_interval, timeout).await?;
        decode(key, value)
    }

    /// Keys currently visible in memory
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    // Newest of the in-memory and on-disk entries, caching a newer disk entry.
    async fn latest_entry(&self, key: &str) -> Result<Option<ExchangeEntry>> {
        let on_disk = self.load_snapshot().await?.and_then(|mut snapshot| snapshot.remove(key));

        let mut entries = self.entries.write().await;
        if let Some(disk_entry) = on_disk {
            let newer = entries.get(key).map_or(true, |mem| disk_entry.version > mem.version);
            if newer {
                entries.insert(key.to_string(), disk_entry);
            }
        }
        Ok(entries.get(key).cloned())
    }

    async fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        read_json(&self.snapshot_path).await
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| PipelineError::storage(format!("decoding value for key '{}'", key), e))
}
