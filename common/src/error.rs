//! Error taxonomy shared by every pipeline layer.

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can surface from any stage of the signal pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Durable read or write failed (exchange snapshot, ledger, staging file)
    #[error("storage error ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// An awaited exchange key was never published before the deadline
    #[error("timed out after {waited:?} waiting for key '{key}'")]
    Timeout { key: String, waited: Duration },

    /// A required input field is absent or malformed in one source
    #[error("schema error in {source_name}: {reason}")]
    Schema { source_name: String, reason: String },

    /// The executor never acknowledged the signal within the retry budget
    #[error("delivery failed after {attempts} attempt(s): {source}")]
    Delivery {
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A stage transform failed on its inputs
    #[error("stage '{stage}' failed: {reason}")]
    Compute { stage: String, reason: String },

    /// A configuration value was rejected at construction time
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub fn storage(context: impl Into<String>, source: impl Into<std::io::Error>) -> Self {
        PipelineError::Storage {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn storage_at(action: &str, path: &Path, source: impl Into<std::io::Error>) -> Self {
        Self::storage(format!("{} {}", action, path.display()), source)
    }

    pub fn schema(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Schema {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn compute(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Compute {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PipelineError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::Timeout {
            key: "trap_detection".to_string(),
            waited: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "timed out after 2s waiting for key 'trap_detection'");
        assert!(err.is_timeout());

        let err = PipelineError::schema("eth.csv", "missing required column 'close'");
        assert!(err.to_string().contains("eth.csv"));
    }

    #[test]
    fn test_storage_error_keeps_source() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = PipelineError::storage_at("writing", Path::new("/tmp/ledger.json"), io);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/tmp/ledger.json"));
    }
}
