use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pfx_adapters::{
    collect_search_results, BrowserSession, HtmlSnapshotSession, ListingExtractor, ListingMode,
    Pacing, SearchListing, WebDriverSession,
};
use pfx_core::{InputTable, PropertyDetails};
use pfx_storage::{
    read_input_table, Geocoder, GoogleGeocoder, HttpClientConfig, NullGeocoder, RecordStore,
};
use serde::Serialize;
use tracing::{error, info, warn};

pub mod alert;
pub mod config;
pub mod dataset;
pub mod pipeline;

#[cfg(test)]
mod testing;

pub use alert::{alert_from_command, AlertSignal, CommandAlert, LogAlert};
pub use config::PipelineConfig;
pub use dataset::{render_dataset, write_dataset, DatasetSummary};
pub use pipeline::{ExtractionPipeline, RowOutcome, RunTotals};

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_rows: usize,
    pub processed: usize,
    pub already_resolved: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate_percent: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_hours: f64,
    pub output_path: String,
    pub removed_stale: usize,
    pub legacy_failed_loaded: usize,
}

/// Input and store loaded and reconciled, ready for extraction or export.
#[derive(Debug)]
pub struct PreparedRun {
    pub table: InputTable,
    pub store: RecordStore,
    pub removed_stale: usize,
}

/// Reads the input and the record store and prunes stale records.
///
/// An unusable input file is logged and yields `Ok(None)`; nothing is written.
pub async fn prepare_run(config: &PipelineConfig) -> Result<Option<PreparedRun>> {
    let table = match read_input_table(&config.input_path).await {
        Ok(table) => table,
        Err(err) => {
            error!(error = %err, "no usable input; nothing to do");
            return Ok(None);
        }
    };

    let mut store = RecordStore::load(&config.data_path, Some(&config.data_dir))
        .await
        .context("loading record store")?;
    let removed_stale = store.reconcile(&table);
    Ok(Some(PreparedRun {
        table,
        store,
        removed_stale,
    }))
}

/// Runs extraction over a prepared input, then writes the dataset.
pub async fn execute_run(
    config: &PipelineConfig,
    prepared: PreparedRun,
    pipeline: &ExtractionPipeline,
) -> Result<RunSummary> {
    let started_at = Utc::now();
    let PreparedRun {
        table,
        mut store,
        removed_stale,
    } = prepared;

    info!(
        rows = table.len(),
        stored = store.len(),
        removed_stale,
        "starting extraction run"
    );
    let totals = pipeline.process_all(&table, &mut store).await?;
    let dataset = write_dataset(&config.output_path, &table, store.records()).await?;

    let finished_at = Utc::now();
    let summary = RunSummary {
        total_rows: totals.total,
        processed: totals.processed,
        already_resolved: totals.already_resolved,
        succeeded: totals.succeeded,
        failed: totals.failed,
        success_rate_percent: totals.success_rate_percent(),
        started_at,
        finished_at,
        elapsed_hours: elapsed_hours(started_at, finished_at),
        output_path: dataset.path,
        removed_stale,
        legacy_failed_loaded: store.legacy_failed().len(),
    };
    info!(
        total = summary.total_rows,
        succeeded = summary.succeeded,
        failed = summary.failed,
        success_rate_percent = summary.success_rate_percent,
        elapsed_hours = summary.elapsed_hours,
        "run complete"
    );
    Ok(summary)
}

fn elapsed_hours(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> f64 {
    (finished_at - started_at).num_milliseconds().max(0) as f64 / 3_600_000.0
}

fn build_geocoder(config: &PipelineConfig) -> Result<Box<dyn Geocoder>> {
    match &config.geocoding_api_key {
        Some(key) => {
            let http = HttpClientConfig {
                timeout: Duration::from_secs(config.http_timeout_secs),
                ..Default::default()
            };
            Ok(Box::new(GoogleGeocoder::new(key.clone(), http)?))
        }
        None => {
            warn!("GOOGLE_MAPS_API_KEY not set; geocoded retries will fail");
            Ok(Box::new(NullGeocoder))
        }
    }
}

/// Full run against a live browser. Returns `None` when the input is unusable.
pub async fn run(config: &PipelineConfig) -> Result<Option<RunSummary>> {
    let Some(prepared) = prepare_run(config).await? else {
        return Ok(None);
    };

    let session = WebDriverSession::connect(config.webdriver.clone())
        .await
        .with_context(|| format!("connecting to webdriver at {}", config.webdriver.endpoint))?;
    let pipeline = ExtractionPipeline::new(
        Box::new(session),
        build_geocoder(config)?,
        alert_from_command(config.alert_command.as_deref()),
        config.site.clone(),
        config.pacing,
    );

    let result = execute_run(config, prepared, &pipeline).await;
    if let Err(err) = pipeline.session().close().await {
        warn!(error = %err, "closing browser session failed");
    }
    result.map(Some)
}

pub async fn run_pipeline_from_env() -> Result<Option<RunSummary>> {
    run(&PipelineConfig::from_env()).await
}

/// Rewrites the dataset from stored records without a browser.
pub async fn export_dataset(config: &PipelineConfig) -> Result<Option<DatasetSummary>> {
    let Some(prepared) = prepare_run(config).await? else {
        return Ok(None);
    };
    let summary = write_dataset(&config.output_path, &prepared.table, prepared.store.records()).await?;
    Ok(Some(summary))
}

/// Runs every field strategy against a saved detail page.
pub async fn inspect_page(url: &str, html: &str) -> Result<PropertyDetails> {
    let session = HtmlSnapshotSession::open(url, html);
    let details = ListingExtractor::new(Pacing::immediate())
        .extract(&session)
        .await
        .context("extracting saved page")?;
    Ok(details)
}

/// Lists every search result for `query` in a live browser.
pub async fn search_listings(
    config: &PipelineConfig,
    mode: ListingMode,
    query: &str,
) -> Result<Vec<SearchListing>> {
    let session = WebDriverSession::connect(config.webdriver.clone())
        .await
        .with_context(|| format!("connecting to webdriver at {}", config.webdriver.endpoint))?;
    let results = collect_search_results(&session, &config.site, mode, query, &config.pacing).await;
    if let Err(err) = session.close().await {
        warn!(error = %err, "closing browser session failed");
    }
    info!(query, results = results.len(), "search finished");
    Ok(results)
}
