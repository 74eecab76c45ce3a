//! `;`-delimited dataset with one column per fact label seen in any record.
//!
//! Cells are written as they are, without CSV quoting; only the delimiter and
//! line breaks are replaced.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use pfx_core::{sanitize_cell, InputTable, PropertyRecord, OUTPUT_COLUMNS};
use pfx_storage::write_atomic;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub path: String,
    pub rows: usize,
    pub fact_columns: usize,
}

/// Sorted union of every record's fact labels.
pub fn fact_columns(records: &[PropertyRecord]) -> Vec<String> {
    records
        .iter()
        .flat_map(|record| record.facts.iter().map(|fact| fact.label.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn header_row(table: &InputTable, fact_labels: &[String]) -> Vec<String> {
    table
        .headers()
        .iter()
        .cloned()
        .chain(OUTPUT_COLUMNS.iter().map(|c| c.to_string()))
        .chain(fact_labels.iter().cloned())
        .collect()
}

pub fn record_row(record: &PropertyRecord, input_cells: &[String], fact_labels: &[String]) -> Vec<String> {
    let text = |value: &Option<String>| value.as_deref().map(sanitize_cell).unwrap_or_default();
    let number = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();

    input_cells
        .iter()
        .map(|cell| sanitize_cell(cell))
        .chain([
            record.status.to_string(),
            text(&record.resolved_address),
            text(&record.url),
            number(record.beds),
            number(record.baths),
            number(record.area),
            number(record.estimate),
            number(record.estimate_rent),
            number(record.value),
        ])
        .chain(
            fact_labels
                .iter()
                .map(|label| sanitize_cell(record.fact_value(label).unwrap_or_default())),
        )
        .collect()
}

/// Renders the dataset in input-row order.
pub fn render_dataset(table: &InputTable, records: &[PropertyRecord]) -> Result<(Vec<u8>, usize, usize)> {
    let labels = fact_columns(records);

    let mut ordered: Vec<(usize, &PropertyRecord)> = Vec::with_capacity(records.len());
    for record in records {
        match record.input_row.filter(|row| *row < table.len()) {
            Some(row) => ordered.push((row, record)),
            None => warn!(address = %record.raw_address, "record has no input row; left out of dataset"),
        }
    }
    ordered.sort_by_key(|(row, _)| *row);

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(Vec::new());
    writer
        .write_record(header_row(table, &labels))
        .context("writing dataset header")?;
    for (row, record) in &ordered {
        writer
            .write_record(record_row(record, &table.rows()[*row].cells, &labels))
            .with_context(|| format!("writing dataset row for {}", record.raw_address))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow!("flushing dataset writer: {err}"))?;
    Ok((bytes, ordered.len(), labels.len()))
}

pub async fn write_dataset(
    path: &Path,
    table: &InputTable,
    records: &[PropertyRecord],
) -> Result<DatasetSummary> {
    let (bytes, rows, fact_columns) = render_dataset(table, records)?;
    write_atomic(path, &bytes)
        .await
        .with_context(|| format!("writing dataset {}", path.display()))?;
    info!(path = %path.display(), rows, fact_columns, "wrote dataset");
    Ok(DatasetSummary {
        path: path.display().to_string(),
        rows,
        fact_columns,
    })
}
