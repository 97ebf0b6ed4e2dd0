use async_trait::async_trait;
use common::CandidateSignal;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Executor response to an accepted signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportAck {
    pub status: u16,
    /// Response body, when the executor returned JSON
    pub body: Option<serde_json::Value>,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("executor rejected signal with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

/// One attempt at handing a signal to the executor
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, signal: &CandidateSignal) -> std::result::Result<TransportAck, TransportError>;
}

/// POSTs the signal as JSON; any non-2xx response is an error
pub struct HttpTransport {
    endpoint: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> std::result::Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, signal: &CandidateSignal) -> std::result::Result<TransportAck, TransportError> {
        debug!(endpoint = %self.endpoint, signal_id = %signal.id, "Posting signal");
        let response = self.client.post(&self.endpoint).json(signal).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        Ok(TransportAck {
            status: status.as_u16(),
            body: serde_json::from_str(&text).ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{SignalSide, Utc};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP request with a canned response, returning the endpoint URL
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // read headers and the declared body before answering
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}/signals", addr)
    }

    fn signal() -> CandidateSignal {
        CandidateSignal::new("ETHUSDT", SignalSide::Buy, 70, Utc::now())
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let endpoint = serve_once("503 Service Unavailable", "busy").await;
        let transport = HttpTransport::new(endpoint, Duration::from_secs(5)).unwrap();

        match transport.send(&signal()).await {
            Err(TransportError::Rejected { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_parses_json_body() {
        let endpoint = serve_once("202 Accepted", r#"{"accepted":true}"#).await;
        let transport = HttpTransport::new(endpoint, Duration::from_secs(5)).unwrap();

        let ack = transport.send(&signal()).await.unwrap();
        assert_eq!(ack.status, 202);
        assert_eq!(ack.body, Some(serde_json::json!({"accepted": true})));
    }
}
