//! Whole-document JSON persistence with write-temp-then-rename replacement.

use crate::error::{PipelineError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Serialize `value` and atomically replace the file at `path`.
///
/// Readers see either the previous document or the new one, never a prefix.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| PipelineError::storage_at("serializing", path, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::storage_at("creating directory for", path, e))?;
    }

    let tmp = temp_path(path);
    if let Err(e) = tokio::fs::write(&tmp, &json).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(PipelineError::storage_at("writing", &tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(PipelineError::storage_at("replacing", path, e));
    }
    Ok(())
}

/// Read and deserialize a JSON document; `Ok(None)` when the file does not exist
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PipelineError::storage_at("reading", path, e)),
    };
    let value = serde_json::from_slice(&bytes).map_err(|e| PipelineError::storage_at("parsing", path, e))?;
    Ok(Some(value))
}

// Same directory as the target so the rename never crosses filesystems.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}
