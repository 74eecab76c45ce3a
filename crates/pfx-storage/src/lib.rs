//! Input parsing, durable record storage and geocoding utilities.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use pfx_core::{normalize_address_key, InputRow, InputTable, PropertyRecord};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const GOOGLE_GEOCODE_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";

#[derive(Debug, Error)]
pub enum InputError {
    #[error("input file {} does not exist", .0.display())]
    Missing(PathBuf),
    #[error("reading input file {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("input has a header but no usable data rows")]
    NoRows,
    #[error("input has no header line")]
    Empty,
    #[error("input header has no `{}` column", pfx_core::ADDRESS_HEADER)]
    MissingAddressColumn,
    #[error("malformed input: {0}")]
    Malformed(#[from] csv::Error),
}

/// Parses `;`-delimited input text. Header names are trimmed and uppercased.
///
/// Quotes are ordinary characters, so every line is exactly one row. Data
/// lines whose cell count differs from the header are skipped with a warning.
pub fn parse_input_table(text: &str) -> Result<InputTable, InputError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .quoting(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(header) => header?.iter().map(|h| h.trim().to_uppercase()).collect(),
        None => return Err(InputError::Empty),
    };

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        let line = record.position().map(|p| p.line() as usize).unwrap_or_default();
        if record.len() != headers.len() {
            warn!(
                line,
                cells = record.len(),
                expected = headers.len(),
                "input line does not match header column count; skipping"
            );
            continue;
        }
        rows.push(InputRow {
            line,
            cells: record.iter().map(|c| c.trim().to_string()).collect(),
        });
    }

    let table = InputTable::new(headers, rows).ok_or(InputError::MissingAddressColumn)?;
    if table.is_empty() {
        return Err(InputError::NoRows);
    }
    Ok(table)
}

pub async fn read_input_table(path: impl AsRef<Path>) -> Result<InputTable, InputError> {
    let path = path.as_ref();
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(InputError::Missing(path.to_path_buf()))
        }
        Err(source) => {
            return Err(InputError::Unreadable {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let table = parse_input_table(&text)?;
    info!(path = %path.display(), rows = table.len(), "loaded input rows");
    Ok(table)
}

/// Replaces `path` with `bytes` through a temp file in the same directory and a rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("serializing records: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Write(#[from] anyhow::Error),
}

/// Property records keyed by raw address, persisted as a JSON array.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    records: Vec<PropertyRecord>,
    legacy_failed: Vec<String>,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
            legacy_failed: Vec::new(),
        }
    }

    /// Loads persisted records (a missing file is an empty store) and any
    /// `failed*.txt` lists found in `failed_dir`.
    pub async fn load(
        path: impl Into<PathBuf>,
        failed_dir: Option<&Path>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => {
                let parsed: Vec<PropertyRecord> =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                collapse_duplicates(parsed)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        let legacy_failed = match failed_dir {
            Some(dir) => load_failed_lists(dir).await?,
            None => Vec::new(),
        };

        info!(
            path = %path.display(),
            records = records.len(),
            legacy_failed = legacy_failed.len(),
            "loaded record store"
        );
        Ok(Self {
            path,
            records,
            legacy_failed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[PropertyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Addresses read from legacy failed lists. Informational only.
    pub fn legacy_failed(&self) -> &[String] {
        &self.legacy_failed
    }

    /// Drops records whose address is not in `table` and re-points the
    /// survivors at their current input row. Returns the number removed.
    pub fn reconcile(&mut self, table: &InputTable) -> usize {
        let mut first_row: HashMap<String, usize> = HashMap::new();
        for (index, address) in table.addresses().enumerate() {
            first_row.entry(normalize_address_key(address)).or_insert(index);
        }

        let before = self.records.len();
        self.records.retain(|record| first_row.contains_key(&record.address_key()));
        for record in &mut self.records {
            record.input_row = first_row.get(&record.address_key()).copied();
        }
        let removed = before - self.records.len();
        if removed > 0 {
            info!(removed, "removed records no longer present in input");
        }
        removed
    }

    pub fn find_by_raw_address(&self, raw_address: &str) -> Option<&PropertyRecord> {
        let key = normalize_address_key(raw_address);
        self.records.iter().find(|record| record.address_key() == key)
    }

    /// Adds `record`, replacing any earlier record for the same address.
    pub fn append(&mut self, record: PropertyRecord) {
        let key = record.address_key();
        self.records.retain(|existing| existing.address_key() != key);
        self.records.push(record);
    }

    /// Rewrites the whole backing file.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&self.records)?;
        write_atomic(&self.path, &bytes).await?;
        debug!(path = %self.path.display(), records = self.records.len(), "saved record store");
        Ok(())
    }
}

/// Keeps one record per address; a later success replaces an earlier failure.
fn collapse_duplicates(records: Vec<PropertyRecord>) -> Vec<PropertyRecord> {
    let mut index_by_key: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<PropertyRecord> = Vec::with_capacity(records.len());
    for record in records {
        let key = record.address_key();
        match index_by_key.get(&key) {
            Some(&index) => {
                if !out[index].status.is_resolved() && record.status.is_resolved() {
                    out[index] = record;
                }
            }
            None => {
                index_by_key.insert(key, out.len());
                out.push(record);
            }
        }
    }
    out
}

/// Reads every `failed*.txt` in `dir`, one address per line.
pub async fn load_failed_lists(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Read {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut files = Vec::new();
    loop {
        let entry = entries.next_entry().await.map_err(|source| StoreError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let Some(entry) = entry else { break };
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("failed") && name.ends_with(".txt") {
            files.push(entry.path());
        }
    }
    files.sort();

    let mut seen = HashSet::new();
    let mut addresses = Vec::new();
    for file in files {
        let text = fs::read_to_string(&file)
            .await
            .map_err(|source| StoreError::Read {
                path: file.clone(),
                source,
            })?;
        for line in text.lines() {
            let address = normalize_address_key(line);
            if !address.is_empty() && seen.insert(address.clone()) {
                addresses.push(address);
            }
        }
    }
    Ok(addresses)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Free-text address to formatted address. Errors and misses yield an empty string.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn resolve(&self, address: &str) -> String;
}

/// Geocoder used when no API key is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGeocoder;

#[async_trait]
impl Geocoder for NullGeocoder {
    async fn resolve(&self, address: &str) -> String {
        debug!(address, "no geocoder configured");
        String::new()
    }
}

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status}")]
    HttpStatus { status: u16 },
    #[error("decoding geocoding response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("geocoding service answered {status}: {message}")]
    Rejected { status: String, message: String },
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    formatted_address: Option<String>,
}

/// Extracts the first formatted address from a Geocoding API body.
pub fn formatted_address_from(body: &str) -> Result<String, GeocodeError> {
    let response: GeocodeResponse = serde_json::from_str(body)?;
    match response.status.as_str() {
        "OK" => Ok(response
            .results
            .into_iter()
            .filter_map(|r| r.formatted_address)
            .map(|a| a.trim().to_string())
            .find(|a| !a.is_empty())
            .unwrap_or_default()),
        "ZERO_RESULTS" => Ok(String::new()),
        _ => Err(GeocodeError::Rejected {
            status: response.status,
            message: response.error_message.unwrap_or_default(),
        }),
    }
}

#[derive(Debug)]
pub struct GoogleGeocoder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    backoff: BackoffPolicy,
}

impl GoogleGeocoder {
    pub fn new(api_key: impl Into<String>, config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            endpoint: GOOGLE_GEOCODE_ENDPOINT.to_string(),
            api_key: api_key.into(),
            backoff: config.backoff,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub async fn lookup(&self, address: &str) -> Result<String, GeocodeError> {
        let mut attempt = 0usize;
        loop {
            let sent = self
                .client
                .get(&self.endpoint)
                .query(&[("address", address), ("key", self.api_key.as_str())])
                .send()
                .await;

            match sent {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp.text().await?;
                        return formatted_address_from(&body);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(GeocodeError::HttpStatus {
                        status: status.as_u16(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(GeocodeError::Request(err));
                }
            }
        }
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn resolve(&self, address: &str) -> String {
        let span = info_span!("geocode", address);
        match self.lookup(address).instrument(span).await {
            Ok(formatted) => {
                info!(address, formatted = %formatted, "geocoded address");
                formatted
            }
            Err(err) => {
                warn!(address, error = %err, "geocoding failed");
                String::new()
            }
        }
    }
}
