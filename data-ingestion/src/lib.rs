//! Bulk ingestion of raw tabular price data into normalized series.
//!
//! Each CSV source is loaded independently: a source that violates the
//! required-field contract is reported and skipped, the others continue.

pub mod loader;
pub mod schema;

pub use loader::{ingest_directory, load_csv, write_processed, IngestReport, SourceFailure};
pub use schema::{normalize_header, IngestionConfig, SchemaContract};
