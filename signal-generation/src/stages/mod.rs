//! Concrete pipeline stages.
//!
//! Trap detection runs first on the raw series; momentum waits for its
//! published output and turns the latest row into a candidate signal.

pub mod momentum;
pub mod trap_detection;

pub use momentum::{MomentumConfig, MomentumOutput, MomentumStage, RowDecision, MOMENTUM_KEY};
pub use trap_detection::{TrapDetectionConfig, TrapDetectionOutput, TrapDetectionStage, TRAP_DETECTION_KEY};

/// Prefix a base exchange key with an instrument namespace
pub(crate) fn namespaced(namespace: Option<&str>, key: &str) -> String {
    match namespace {
        Some(ns) => format!("{}:{}", ns, key),
        None => key.to_string(),
    }
}
