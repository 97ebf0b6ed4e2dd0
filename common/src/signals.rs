use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trade direction proposed by a stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalSide {
    Buy,
    Sell,
    Hold,
}

/// Terminal state of a validated signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    AwaitingExecution,
    Suppressed,
}

impl SignalStatus {
    pub fn from_go(go: bool) -> Self {
        if go {
            SignalStatus::AwaitingExecution
        } else {
            SignalStatus::Suppressed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::AwaitingExecution => "awaiting_execution",
            SignalStatus::Suppressed => "suppressed",
        }
    }
}

/// Candidate trade signal.
///
/// Created by a stage with a raw confidence; only the confidence engine
/// rewrites `confidence` and `go`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub id: Uuid,
    pub instrument: String,
    pub side: SignalSide,
    pub confidence: u8, // 0 to 100
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub go: bool,
    #[serde(default)]
    pub annotations: serde_json::Map<String, serde_json::Value>,
}

impl CandidateSignal {
    pub fn new(instrument: impl Into<String>, side: SignalSide, raw_confidence: u8, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument: instrument.into(),
            side,
            confidence: raw_confidence.min(100),
            timestamp,
            go: false,
            annotations: serde_json::Map::new(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}
