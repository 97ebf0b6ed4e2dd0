use crate::schema::{normalize_header, IngestionConfig, SchemaContract};
use common::{Bar, PipelineError, Result, SeriesRecord};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A source that could not be turned into a series
#[derive(Debug)]
pub struct SourceFailure {
    pub path: PathBuf,
    pub error: PipelineError,
}

/// Outcome of ingesting a directory of sources
#[derive(Debug, Default)]
pub struct IngestReport {
    pub loaded: Vec<(PathBuf, SeriesRecord)>,
    pub failures: Vec<SourceFailure>,
}

impl IngestReport {
    pub fn total_sources(&self) -> usize {
        self.loaded.len() + self.failures.len()
    }
}

struct Columns {
    timestamp: usize,
    close: usize,
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    volume: Option<usize>,
    symbol: Option<usize>,
}

impl Columns {
    fn resolve(headers: &[String], contract: &SchemaContract, source_name: &str) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);

        let missing: Vec<&str> = contract
            .required()
            .into_iter()
            .filter(|name| find(*name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::schema(
                source_name,
                format!("missing required columns {:?} (found {:?})", missing, headers),
            ));
        }

        let volume = find("volume").or_else(|| contract.volume_fallbacks.iter().find_map(|name| find(name.as_str())));

        Ok(Self {
            timestamp: find(contract.timestamp_field.as_str()).unwrap_or_default(),
            close: find(contract.price_field.as_str()).unwrap_or_default(),
            open: find("open"),
            high: find("high"),
            low: find("low"),
            volume,
            symbol: find("symbol"),
        })
    }
}

/// Load one CSV source into a normalized series.
///
/// Rows missing a required field are dropped; optional numeric fields that do
/// not parse become absent. Fails with a schema error when a required column
/// is missing or no usable row remains.
pub fn load_csv(path: &Path, contract: &SchemaContract) -> Result<SeriesRecord> {
    let source_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_error("opening", path, e))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| csv_error("reading header of", path, e))?
        .iter()
        .map(normalize_header)
        .collect();
    let columns = Columns::resolve(&headers, contract, &source_name)?;

    let mut bars = Vec::new();
    let mut symbol: Option<String> = None;
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                debug!(source = %source_name, "Skipping malformed line: {}", e);
                skipped += 1;
                continue;
            }
        };

        let field = |idx: Option<usize>| idx.and_then(|i| record.get(i)).filter(|v| !v.is_empty());
        let number = |idx: Option<usize>| field(idx).and_then(parse_number);

        let (Some(timestamp), Some(close)) = (
            field(Some(columns.timestamp)).and_then(parse_timestamp),
            number(Some(columns.close)),
        ) else {
            skipped += 1;
            continue;
        };

        if symbol.is_none() {
            symbol = field(columns.symbol).map(str::to_string);
        }

        bars.push(Bar {
            open: number(columns.open),
            high: number(columns.high),
            low: number(columns.low),
            volume: number(columns.volume),
            ..Bar::new(timestamp, close)
        });
    }

    if bars.is_empty() {
        return Err(PipelineError::schema(
            &source_name,
            format!("no rows with both '{}' and '{}'", contract.timestamp_field, contract.price_field),
        ));
    }

    let instrument = symbol.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_name.clone())
    });
    let series = SeriesRecord::from_unsorted(instrument, bars);

    info!(
        source = %source_name,
        instrument = %series.instrument,
        rows = series.len(),
        skipped,
        "Loaded series"
    );
    Ok(series)
}

/// Load every `*.csv` source in a directory.
///
/// Only an unreadable directory fails the whole call; per-source problems are
/// collected in the report.
pub fn ingest_directory(config: &IngestionConfig) -> Result<IngestReport> {
    let dir = &config.data_dir;
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::storage_at("scanning", dir, e))?;

    let mut sources: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("csv")))
        .filter(|p| !is_processed_output(p))
        .collect();
    sources.sort();

    if sources.is_empty() {
        warn!(dir = %dir.display(), "No CSV sources found");
    } else {
        info!(dir = %dir.display(), count = sources.len(), "Found CSV sources");
    }

    let mut report = IngestReport::default();
    for path in sources {
        match load_csv(&path, &config.schema) {
            Ok(series) => {
                if config.write_processed {
                    let out = processed_path(&path);
                    if let Err(e) = write_processed(&series, &out) {
                        warn!(source = %path.display(), "Failed to write processed copy: {}", e);
                    }
                }
                report.loaded.push((path, series));
            }
            Err(error) => {
                warn!(source = %path.display(), "Skipping source: {}", error);
                report.failures.push(SourceFailure { path, error });
            }
        }
    }

    Ok(report)
}

/// Write the normalized OHLCV columns of a series as CSV
pub fn write_processed(series: &SeriesRecord, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error("creating", path, e))?;

    writer
        .write_record(["unix", "symbol", "open", "high", "low", "close", "volume"])
        .map_err(|e| csv_error("writing", path, e))?;

    let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for bar in series.bars() {
        writer
            .write_record([
                bar.timestamp.to_string(),
                series.instrument.clone(),
                opt(bar.open),
                opt(bar.high),
                opt(bar.low),
                bar.close.to_string(),
                opt(bar.volume),
            ])
            .map_err(|e| csv_error("writing", path, e))?;
    }

    writer
        .flush()
        .map_err(|e| PipelineError::storage_at("flushing", path, e))?;
    debug!(path = %path.display(), rows = series.len(), "Wrote processed series");
    Ok(())
}

fn processed_path(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!("processed_{}", name))
}

fn is_processed_output(path: &Path) -> bool {
    path.file_name()
        .map_or(false, |n| n.to_string_lossy().starts_with("processed_"))
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    raw.parse::<i64>()
        .ok()
        .or_else(|| parse_number(raw).map(|v| v as i64))
}

fn csv_error(action: &str, path: &Path, e: csv::Error) -> PipelineError {
    PipelineError::storage_at(action, path, std::io::Error::other(e))
}
