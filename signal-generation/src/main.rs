use anyhow::{Context, Result};
use data_ingestion::ingest_directory;
use exchange_hub::ExchangeStore;
use execution::{DeliveryClient, HttpTransport};
use signal_generation::{
    create_config_template, load_config, ConfidenceEngine, PipelineSettings, SignalPipeline, StageRunner,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "pipeline.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let first = args.next();

    // `signal-pipeline init [path]` writes a commented config template
    if first.as_deref() == Some("init") {
        let path = args.next().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        create_config_template(&path)?;
        println!("Wrote configuration template to {}", path);
        return Ok(());
    }

    let config_path = first.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let from_file = Path::new(&config_path).exists();
    let settings = if from_file {
        load_config(&config_path)?
    } else {
        PipelineSettings::default()
    }
    .with_env_overrides();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(settings.tracing_level())
        .init();

    info!("Starting signal pipeline");
    if from_file {
        info!(path = %config_path, "Loaded configuration");
    } else {
        warn!(path = %config_path, "Configuration file not found, using defaults");
    }
    settings.validate().context("invalid configuration")?;

    let store = Arc::new(
        ExchangeStore::open(&settings.exchange)
            .await
            .context("opening exchange store")?,
    );
    let runner = StageRunner::from_config(store, &settings.exchange);
    let engine = ConfidenceEngine::new(settings.confidence.clone())?;

    let mut pipeline = SignalPipeline::new(
        runner,
        settings.trap_detection.clone(),
        settings.momentum.clone(),
        engine,
    );
    match DeliveryClient::<HttpTransport>::from_config(settings.delivery.clone())? {
        Some(client) => pipeline = pipeline.with_delivery(client),
        None => warn!("No executor endpoint configured, approved signals will not be delivered"),
    }

    let ingestion = settings.ingestion.clone();
    let report = tokio::task::spawn_blocking(move || ingest_directory(&ingestion))
        .await
        .context("ingestion task panicked")?
        .context("ingesting data directory")?;

    for failure in &report.failures {
        warn!(source = %failure.path.display(), "Source rejected: {}", failure.error);
    }

    let total_sources = report.total_sources();
    let mut approved = 0;
    let mut failed = 0;
    for (path, series) in report.loaded {
        match pipeline.process_series(series).await {
            Ok(outcome) => {
                if outcome.validated.as_ref().map_or(false, |v| v.go()) {
                    approved += 1;
                }
            }
            Err(e) => {
                failed += 1;
                error!(source = %path.display(), "Series failed: {}", e);
            }
        }
    }

    let stats = pipeline.engine().stats().await?;
    info!(
        sources = total_sources,
        rejected_sources = report.failures.len(),
        approved,
        failed,
        trap_accuracy = stats.trap_accuracy,
        win_rate = stats.win_rate,
        "Pipeline run complete"
    );

    Ok(())
}
