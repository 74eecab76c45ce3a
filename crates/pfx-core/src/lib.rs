//! Core domain model for the property facts extractor.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Input column that carries the lookup address.
pub const ADDRESS_HEADER: &str = "NORMALIZED ADDRESS";

/// Fixed columns appended after the input columns in the synthesized dataset.
pub const OUTPUT_COLUMNS: [&str; 9] = [
    "STATUS",
    "ADDRESS",
    "URL",
    "BEDS",
    "BATHS",
    "AREA",
    "ZESTIMATE",
    "ZESTIMATE RENT",
    "VALUE",
];

/// Key used to compare raw addresses across runs.
pub fn normalize_address_key(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Replaces the output delimiter and line breaks so scraped text cannot
/// shift columns or split a row.
pub fn sanitize_cell(value: &str) -> String {
    value
        .replace(';', ",")
        .replace("\r\n", " ")
        .replace(['\r', '\n'], " ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "GOOGLE-SUCCESS")]
    GoogleSuccess,
    #[serde(rename = "FAIL")]
    Fail,
}

impl ExtractionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::GoogleSuccess => "GOOGLE-SUCCESS",
            Self::Fail => "FAIL",
        }
    }

    /// Resolved records are never extracted again.
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Success | Self::GoogleSuccess)
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized label/value pair from a property's facts section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub label: String,
    pub value: String,
}

impl Fact {
    /// Uppercases the label and strips the output delimiter from both halves.
    pub fn new(label: &str, value: &str) -> Self {
        Self {
            label: sanitize_cell(&label.to_uppercase()),
            value: sanitize_cell(value),
        }
    }
}

/// Everything read off a property detail page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyDetails {
    pub url: Option<String>,
    pub address: Option<String>,
    pub value: Option<f64>,
    pub estimate: Option<f64>,
    pub estimate_rent: Option<f64>,
    pub beds: Option<f64>,
    pub baths: Option<f64>,
    pub area: Option<f64>,
    pub facts: Vec<Fact>,
}

/// One persisted outcome per input address.
///
/// Field names follow the data file layout so older data files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_row: Option<usize>,
    pub status: ExtractionStatus,
    pub raw_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "address", default, skip_serializing_if = "Option::is_none")]
    pub resolved_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baths: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(rename = "zestimate", default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<f64>,
    #[serde(rename = "zestimateRent", default, skip_serializing_if = "Option::is_none")]
    pub estimate_rent: Option<f64>,
    #[serde(default)]
    pub facts: Vec<Fact>,
}

impl PropertyRecord {
    pub fn extracted(
        raw_address: impl Into<String>,
        input_row: usize,
        status: ExtractionStatus,
        details: PropertyDetails,
        extracted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            input_row: Some(input_row),
            status,
            raw_address: raw_address.into(),
            extraction_time: Some(format_extraction_time(extracted_at)),
            url: details.url,
            resolved_address: details.address,
            value: details.value,
            baths: details.baths,
            beds: details.beds,
            area: details.area,
            estimate: details.estimate,
            estimate_rent: details.estimate_rent,
            facts: details.facts,
        }
    }

    pub fn failed(raw_address: impl Into<String>, input_row: usize) -> Self {
        Self {
            input_row: Some(input_row),
            status: ExtractionStatus::Fail,
            raw_address: raw_address.into(),
            extraction_time: None,
            url: None,
            resolved_address: None,
            value: None,
            baths: None,
            beds: None,
            area: None,
            estimate: None,
            estimate_rent: None,
            facts: Vec::new(),
        }
    }

    pub fn address_key(&self) -> String {
        normalize_address_key(&self.raw_address)
    }

    pub fn fact_value(&self, label: &str) -> Option<&str> {
        let wanted = label.trim().to_uppercase();
        self.facts
            .iter()
            .find(|fact| fact.label.trim().to_uppercase() == wanted)
            .map(|fact| fact.value.as_str())
    }
}

/// RFC 7231 style UTC stamp, e.g. `Fri, 16 Oct 2026 08:00:00 GMT`.
pub fn format_extraction_time(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// One data line of the input file, aligned to the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRow {
    /// 1-based line number in the source file.
    pub line: usize,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTable {
    headers: Vec<String>,
    rows: Vec<InputRow>,
    address_column: usize,
}

impl InputTable {
    /// Returns `None` when no header matches [`ADDRESS_HEADER`].
    pub fn new(headers: Vec<String>, rows: Vec<InputRow>) -> Option<Self> {
        let address_column = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(ADDRESS_HEADER))?;
        Some(Self {
            headers,
            rows,
            address_column,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[InputRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn address_of<'a>(&self, row: &'a InputRow) -> &'a str {
        row.cells
            .get(self.address_column)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Raw addresses in row order.
    pub fn addresses(&self) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(|row| self.address_of(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> InputTable {
        InputTable::new(
            vec!["ID".to_string(), "Normalized Address".to_string()],
            vec![
                InputRow {
                    line: 2,
                    cells: vec!["1".to_string(), "10 Elm St, Springfield".to_string()],
                },
                InputRow {
                    line: 3,
                    cells: vec!["2".to_string(), "22 Oak Ave".to_string()],
                },
            ],
        )
        .expect("address column")
    }

    #[test]
    fn fact_labels_are_uppercased_and_delimiters_replaced() {
        let fact = Fact::new("Parking; covered", "Garage; 2 spaces");
        assert_eq!(fact.label, "PARKING, COVERED");
        assert_eq!(fact.value, "Garage, 2 spaces");

        let fact = Fact::new("Ceiling", "9' 6\"\r\nvaulted");
        assert_eq!(fact.value, "9' 6\" vaulted");
    }

    #[test]
    fn status_serializes_with_data_file_names() {
        let json = serde_json::to_string(&ExtractionStatus::GoogleSuccess).expect("serialize");
        assert_eq!(json, "\"GOOGLE-SUCCESS\"");
        let parsed: ExtractionStatus = serde_json::from_str("\"FAIL\"").expect("parse");
        assert_eq!(parsed, ExtractionStatus::Fail);
        assert!(!parsed.is_resolved());
        assert!(ExtractionStatus::Success.is_resolved());
    }

    #[test]
    fn record_round_trips_through_data_file_field_names() {
        let raw = r#"{
            "inputRow": 0,
            "status": "SUCCESS",
            "rawAddress": "10 Elm St",
            "address": "10 Elm St, Springfield, IL",
            "zestimate": 250000,
            "zestimateRent": 1800,
            "beds": 3,
            "facts": [{"label": "TYPE", "value": "Single Family"}]
        }"#;
        let record: PropertyRecord = serde_json::from_str(raw).expect("parse record");
        assert_eq!(record.resolved_address.as_deref(), Some("10 Elm St, Springfield, IL"));
        assert_eq!(record.estimate, Some(250000.0));
        assert_eq!(record.estimate_rent, Some(1800.0));
        assert_eq!(record.baths, None);
        assert_eq!(record.fact_value("type"), Some("Single Family"));

        let value = serde_json::to_value(&record).expect("serialize");
        assert!(value.get("baths").is_none());
        assert_eq!(value["zestimateRent"], 1800.0);
    }

    #[test]
    fn input_table_finds_address_column_case_insensitively() {
        let table = table();
        let addresses: Vec<_> = table.addresses().collect();
        assert_eq!(addresses, vec!["10 Elm St, Springfield", "22 Oak Ave"]);
        assert!(InputTable::new(vec!["ADDRESS".to_string()], Vec::new()).is_none());
    }

    #[test]
    fn address_keys_ignore_case_and_padding() {
        assert_eq!(normalize_address_key("  10 elm st "), "10 ELM ST");
    }

    #[test]
    fn extraction_time_uses_gmt_stamp() {
        let at = DateTime::parse_from_rfc3339("2026-10-16T08:05:09Z")
            .expect("ts")
            .with_timezone(&Utc);
        assert_eq!(format_extraction_time(at), "Fri, 16 Oct 2026 08:05:09 GMT");
    }
}
