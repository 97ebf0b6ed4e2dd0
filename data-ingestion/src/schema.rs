use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Minimal column contract every source must satisfy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaContract {
    /// Normalized name of the timestamp column
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,

    /// Normalized name of the price column
    #[serde(default = "default_price_field")]
    pub price_field: String,

    /// Columns tried in order when there is no plain `volume` column
    #[serde(default = "default_volume_fallbacks")]
    pub volume_fallbacks: Vec<String>,
}

impl Default for SchemaContract {
    fn default() -> Self {
        Self {
            timestamp_field: default_timestamp_field(),
            price_field: default_price_field(),
            volume_fallbacks: default_volume_fallbacks(),
        }
    }
}

impl SchemaContract {
    pub fn required(&self) -> [&str; 2] {
        [self.timestamp_field.as_str(), self.price_field.as_str()]
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Directory scanned for `*.csv` sources
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Write `processed_<file>` next to each source after normalization
    #[serde(default)]
    pub write_processed: bool,

    #[serde(default)]
    pub schema: SchemaContract,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            write_processed: false,
            schema: SchemaContract::default(),
        }
    }
}

/// Lowercase, trim, and strip a UTF-8 byte order mark from a header cell
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_lowercase()
}

fn default_timestamp_field() -> String {
    "unix".to_string()
}

fn default_price_field() -> String {
    "close".to_string()
}

fn default_volume_fallbacks() -> Vec<String> {
    vec!["volume usdt".to_string(), "volume eth".to_string()]
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
