//! Shared domain types for the signal pipeline: price series, candidate
//! signals, scoring evidence, the error taxonomy, and atomic JSON persistence.

pub mod error;
pub mod evidence;
pub mod persist;
pub mod series;
pub mod signals;

pub use error::{PipelineError, Result};
pub use evidence::{EvidenceBundle, Level, OrderBookSnapshot, VolumeMetrics};
pub use persist::{read_json, write_json_atomic};
pub use series::{Bar, FlaggedSubset, SeriesRecord};
pub use signals::{CandidateSignal, SignalSide, SignalStatus};

pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
