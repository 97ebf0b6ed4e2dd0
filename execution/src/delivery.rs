use crate::config::DeliveryConfig;
use crate::transport::{HttpTransport, Transport, TransportAck, TransportError};
use chrono::{DateTime, Utc};
use common::{write_json_atomic, CandidateSignal, PipelineError, Result, Uuid};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Contents of the staging file: the signal currently being delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedDelivery {
    pub signal: CandidateSignal,
    pub attempt: u32,
    pub staged_at: DateTime<Utc>,
}

/// Successful delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAck {
    pub signal_id: Uuid,
    pub attempts: u32,
    pub response: TransportAck,
}

/// Hands approved signals to the executor with bounded retry
pub struct DeliveryClient<T: Transport> {
    config: DeliveryConfig,
    transport: T,
}

impl DeliveryClient<HttpTransport> {
    /// HTTP client for the configured endpoint; `None` when no endpoint is set
    pub fn from_config(config: DeliveryConfig) -> Result<Option<Self>> {
        let Some(endpoint) = config.endpoint.clone() else {
            return Ok(None);
        };
        let transport = HttpTransport::new(endpoint, config.request_timeout()).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot build HTTP transport: {}", e))
        })?;
        Ok(Some(Self::new(config, transport)?))
    }
}

impl<T: Transport> DeliveryClient<T> {
    pub fn new(config: DeliveryConfig, transport: T) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, transport })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Deliver `signal`, returning an ack or a `Delivery` error after the
    /// retry budget is spent. A failed staging write aborts the call.
    pub async fn deliver(&self, signal: &CandidateSignal) -> Result<DeliveryAck> {
        let max_attempts = self.config.max_attempts;
        let mut last_error: Option<TransportError> = None;

        for attempt in 1..=max_attempts {
            self.stage(signal, attempt).await?;

            match self.transport.send(signal).await {
                Ok(response) => {
                    info!(
                        signal_id = %signal.id,
                        instrument = %signal.instrument,
                        attempt,
                        status = response.status,
                        "Signal delivered"
                    );
                    return Ok(DeliveryAck {
                        signal_id: signal.id,
                        attempts: attempt,
                        response,
                    });
                }
                Err(e) => {
                    warn!(signal_id = %signal.id, attempt, max_attempts, "Delivery attempt failed: {}", e);
                    last_error = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.backoff()).await;
                    }
                }
            }
        }

        error!(signal_id = %signal.id, attempts = max_attempts, "Giving up on signal delivery");
        let source = last_error.unwrap_or_else(|| TransportError::Unavailable("no attempt was made".to_string()));
        Err(PipelineError::Delivery {
            attempts: max_attempts,
            source: Box::new(source),
        })
    }

    async fn stage(&self, signal: &CandidateSignal, attempt: u32) -> Result<()> {
        let staged = StagedDelivery {
            signal: signal.clone(),
            attempt,
            staged_at: Utc::now(),
        };
        write_json_atomic(&self.config.staging_path, &staged).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{read_json, SignalSide};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` sends, then acknowledges
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, _signal: &CandidateSignal) -> std::result::Result<TransportAck, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(TransportError::Unavailable(format!("connection refused (call {})", call)))
            } else {
                Ok(TransportAck { status: 200, body: None })
            }
        }
    }

    fn config(dir: &tempfile::TempDir) -> DeliveryConfig {
        DeliveryConfig {
            backoff_ms: 5,
            staging_path: dir.path().join("signal.json"),
            ..Default::default()
        }
    }

    fn signal() -> CandidateSignal {
        let mut signal = CandidateSignal::new("ETHUSDT", SignalSide::Buy, 72, Utc::now());
        signal.go = true;
        signal
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let client = DeliveryClient::new(config(&dir), FlakyTransport::new(2)).unwrap();

        let ack = client.deliver(&signal()).await.unwrap();
        assert_eq!(ack.attempts, 3);
        assert_eq!(client.transport.calls(), 3);
        assert_eq!(ack.response.status, 200);
    }

    #[tokio::test]
    async fn test_always_failing_transport_exhausts_budget() {
        let dir = tempfile::tempdir().unwrap();
        let client = DeliveryClient::new(config(&dir), FlakyTransport::new(u32::MAX)).unwrap();

        let err = client.deliver(&signal()).await.unwrap_err();
        match &err {
            PipelineError::Delivery { attempts, source } => {
                assert_eq!(*attempts, 3);
                assert!(source.to_string().contains("call 3"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(client.transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_signal_staged_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let client = DeliveryClient::new(config(&dir), FlakyTransport::new(u32::MAX)).unwrap();
        let signal = signal();

        assert!(client.deliver(&signal).await.is_err());

        let staged: StagedDelivery = read_json(&client.config().staging_path).await.unwrap().unwrap();
        assert_eq!(staged.signal, signal);
        assert_eq!(staged.attempt, 3);
    }

    #[tokio::test]
    async fn test_unwritable_staging_aborts_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(staging.join("occupied")).unwrap();
        let config = DeliveryConfig {
            staging_path: staging,
            ..config(&dir)
        };
        let client = DeliveryClient::new(config, FlakyTransport::new(0)).unwrap();

        let err = client.deliver(&signal()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage { .. }));
        assert_eq!(client.transport.calls(), 0);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = DeliveryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(DeliveryClient::new(config, FlakyTransport::new(0)).is_err());
    }

    #[test]
    fn test_missing_endpoint_disables_http_client() {
        assert!(DeliveryClient::from_config(DeliveryConfig::default()).unwrap().is_none());
        let client = DeliveryClient::from_config(DeliveryConfig::default().with_endpoint("http://127.0.0.1:9/signal"))
            .unwrap()
            .unwrap();
        assert_eq!(client.transport.endpoint(), "http://127.0.0.1:9/signal");
    }
}
