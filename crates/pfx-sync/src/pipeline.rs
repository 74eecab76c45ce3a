//! Per-address extraction state machine.
//!
//! Each row goes through a cache check, a direct search with the raw address
//! and at most one geocoded retry. Transient session errors repeat the same
//! attempt after a fixed backoff and never produce a record.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::Utc;
use pfx_adapters::{
    is_challenge_url, pause, submit_search, BrowserSession, ListingExtractor, Pacing, SearchError,
    SessionError, SiteProfile, DETAIL_CONTAINER,
};
use pfx_core::{normalize_address_key, ExtractionStatus, InputTable, PropertyDetails, PropertyRecord};
use pfx_storage::{Geocoder, RecordStore};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::alert::AlertSignal;

/// What one attempt saw once the page settled.
#[derive(Debug)]
enum Attempt {
    Found(Box<PropertyDetails>),
    NoData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// Resolved in an earlier run, or already handled earlier in this one.
    Cached(ExtractionStatus),
    Extracted(ExtractionStatus),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub total: usize,
    pub processed: usize,
    pub already_resolved: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunTotals {
    fn record(&mut self, outcome: RowOutcome) {
        let status = match outcome {
            RowOutcome::Cached(status) => {
                self.already_resolved += 1;
                status
            }
            RowOutcome::Extracted(status) => {
                self.processed += 1;
                status
            }
        };
        if status.is_resolved() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn success_rate_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 * 100.0 / self.total as f64
        }
    }
}

pub struct ExtractionPipeline {
    session: Box<dyn BrowserSession>,
    geocoder: Box<dyn Geocoder>,
    alert: Box<dyn AlertSignal>,
    site: SiteProfile,
    pacing: Pacing,
    extractor: ListingExtractor,
}

impl ExtractionPipeline {
    pub fn new(
        session: Box<dyn BrowserSession>,
        geocoder: Box<dyn Geocoder>,
        alert: Box<dyn AlertSignal>,
        site: SiteProfile,
        pacing: Pacing,
    ) -> Self {
        Self {
            session,
            geocoder,
            alert,
            site,
            pacing,
            extractor: ListingExtractor::new(pacing),
        }
    }

    pub fn session(&self) -> &dyn BrowserSession {
        self.session.as_ref()
    }

    /// Walks every input row in order, persisting the store after each new record.
    ///
    /// Only a failed save aborts the run.
    pub async fn process_all(&self, table: &InputTable, store: &mut RecordStore) -> Result<RunTotals> {
        let mut totals = RunTotals {
            total: table.len(),
            ..Default::default()
        };
        let mut attempted = HashSet::new();

        for (index, row) in table.rows().iter().enumerate() {
            let address = table.address_of(row);
            let span = info_span!("row", n = index + 1, total = totals.total, line = row.line);
            let outcome = self
                .process_row(index, address, store, &mut attempted)
                .instrument(span)
                .await?;
            totals.record(outcome);
        }

        self.alert.stop();
        Ok(totals)
    }

    pub async fn process_row(
        &self,
        index: usize,
        address: &str,
        store: &mut RecordStore,
        attempted: &mut HashSet<String>,
    ) -> Result<RowOutcome> {
        let key = normalize_address_key(address);
        if let Some(existing) = store.find_by_raw_address(address) {
            if existing.status.is_resolved() || attempted.contains(&key) {
                info!(address, status = %existing.status, "already processed; skipping");
                return Ok(RowOutcome::Cached(existing.status));
            }
        }
        attempted.insert(key.clone());

        let record = if key.is_empty() {
            warn!("row has no address");
            PropertyRecord::failed(address, index)
        } else {
            info!(address, "extracting");
            self.extract_address(address, index).await
        };

        let status = record.status;
        store.append(record);
        store
            .persist()
            .await
            .with_context(|| format!("saving record for {address}"))?;
        info!(address, %status, "saved");
        Ok(RowOutcome::Extracted(status))
    }

    async fn extract_address(&self, raw_address: &str, row: usize) -> PropertyRecord {
        if let Attempt::Found(details) = self.attempt_until_settled(raw_address).await {
            return self.found(raw_address, row, ExtractionStatus::Success, raw_address, *details);
        }

        info!(address = raw_address, "no listing found; trying geocoded address");
        let geocoded = self.geocoder.resolve(raw_address).await;
        let geocoded = geocoded.trim();
        if geocoded.is_empty() {
            warn!(address = raw_address, "geocoder had no match");
            return PropertyRecord::failed(raw_address, row);
        }

        match self.attempt_until_settled(geocoded).await {
            Attempt::Found(details) => {
                self.found(raw_address, row, ExtractionStatus::GoogleSuccess, geocoded, *details)
            }
            Attempt::NoData => {
                warn!(address = raw_address, geocoded, "no listing for geocoded address either");
                PropertyRecord::failed(raw_address, row)
            }
        }
    }

    fn found(
        &self,
        raw_address: &str,
        row: usize,
        status: ExtractionStatus,
        query: &str,
        mut details: PropertyDetails,
    ) -> PropertyRecord {
        if details.address.is_none() {
            details.address = Some(query.to_string());
        }
        PropertyRecord::extracted(raw_address, row, status, details, Utc::now())
    }

    async fn attempt_until_settled(&self, query: &str) -> Attempt {
        let mut retries = 0usize;
        loop {
            match self.attempt(query).await {
                Ok(attempt) => return attempt,
                Err(err) => {
                    retries += 1;
                    warn!(query, retries, error = %err, "attempt failed; retrying after backoff");
                    pause(self.pacing.transient_backoff).await;
                }
            }
        }
    }

    async fn attempt(&self, query: &str) -> Result<Attempt, SearchError> {
        let session = self.session();
        session.navigate(&self.site.home_url()).await?;
        session.wait_until_ready().await?;
        submit_search(session, query).await?;
        pause(self.pacing.detail_settle).await;
        self.await_challenge().await?;

        if session.locate(DETAIL_CONTAINER).await?.is_none() {
            return Ok(Attempt::NoData);
        }
        let details = self.extractor.extract(session).await?;
        Ok(Attempt::Found(Box::new(details)))
    }

    /// Blocks until the page is no longer a challenge page. There is no timeout.
    async fn await_challenge(&self) -> Result<(), SessionError> {
        let mut alerted = false;
        while is_challenge_url(&self.session.current_url().await?) {
            if !alerted {
                self.alert.play();
                alerted = true;
            }
            pause(self.pacing.challenge_poll).await;
        }
        if alerted {
            self.alert.stop();
            info!("challenge cleared; resuming");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use pfx_core::InputRow;
    use tempfile::tempdir;

    use crate::testing::{scripted_pipeline as pipeline, Counters};

    fn table(addresses: &[&str]) -> InputTable {
        InputTable::new(
            vec!["NORMALIZED ADDRESS".to_string()],
            addresses
                .iter()
                .enumerate()
                .map(|(i, a)| InputRow {
                    line: i + 2,
                    cells: vec![a.to_string()],
                })
                .collect(),
        )
        .expect("table")
    }

    fn status_of(store: &RecordStore, address: &str) -> Option<ExtractionStatus> {
        store.find_by_raw_address(address).map(|r| r.status)
    }

    #[tokio::test]
    async fn direct_geocoded_and_failed_rows_are_recorded() {
        let dir = tempdir().expect("tempdir");
        let counters = Arc::new(Counters::default());
        let pipeline = pipeline(&counters, &[("22 Oak Ave", "22 Oak Avenue, Springfield, IL 62701, USA")]);
        let mut store = RecordStore::new(dir.path().join("data.json"));

        let totals = pipeline
            .process_all(&table(&["10 Elm St", "22 Oak Ave", "5 Pine Rd"]), &mut store)
            .await
            .expect("run");

        assert_eq!(status_of(&store, "10 Elm St"), Some(ExtractionStatus::Success));
        assert_eq!(status_of(&store, "22 Oak Ave"), Some(ExtractionStatus::GoogleSuccess));
        assert_eq!(status_of(&store, "5 Pine Rd"), Some(ExtractionStatus::Fail));
        assert_eq!(
            totals,
            RunTotals {
                total: 3,
                processed: 3,
                already_resolved: 0,
                succeeded: 2,
                failed: 1,
            }
        );

        let elm = store.find_by_raw_address("10 elm st").expect("elm");
        assert_eq!(elm.input_row, Some(0));
        assert_eq!(elm.value, Some(325000.0));
        assert_eq!(elm.fact_value("TYPE"), Some("Condo"));
        let oak = store.find_by_raw_address("22 Oak Ave").expect("oak");
        assert_eq!(oak.resolved_address.as_deref(), Some("22 Oak Ave, Springfield, IL"));

        let reloaded = RecordStore::load(dir.path().join("data.json"), None)
            .await
            .expect("reload");
        assert_eq!(reloaded.records(), store.records());
    }

    #[tokio::test]
    async fn no_data_escalates_exactly_once() {
        let dir = tempdir().expect("tempdir");
        let counters = Arc::new(Counters::default());
        let pipeline = pipeline(&counters, &[("5 Pine Rd", "5 Pine Road, Nowhere, USA")]);
        let mut store = RecordStore::new(dir.path().join("data.json"));

        pipeline
            .process_all(&table(&["5 Pine Rd"]), &mut store)
            .await
            .expect("run");

        assert_eq!(status_of(&store, "5 Pine Rd"), Some(ExtractionStatus::Fail));
        assert_eq!(counters.geocodes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.navigations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_geocode_fails_without_second_attempt() {
        let dir = tempdir().expect("tempdir");
        let counters = Arc::new(Counters::default());
        let pipeline = pipeline(&counters, &[]);
        let mut store = RecordStore::new(dir.path().join("data.json"));

        pipeline
            .process_all(&table(&["5 Pine Rd"]), &mut store)
            .await
            .expect("run");

        assert_eq!(status_of(&store, "5 Pine Rd"), Some(ExtractionStatus::Fail));
        assert_eq!(counters.navigations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_retry_the_same_attempt() {
        let dir = tempdir().expect("tempdir");
        let counters = Arc::new(Counters::default());
        counters.failing_navigations.store(3, Ordering::SeqCst);
        let pipeline = pipeline(&counters, &[]);
        let mut store = RecordStore::new(dir.path().join("data.json"));

        pipeline
            .process_all(&table(&["10 Elm St"]), &mut store)
            .await
            .expect("run");

        assert_eq!(status_of(&store, "10 Elm St"), Some(ExtractionStatus::Success));
        assert_eq!(counters.navigations.load(Ordering::SeqCst), 4);
        assert_eq!(counters.geocodes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn challenge_raises_the_alert_once_and_waits() {
        let dir = tempdir().expect("tempdir");
        let counters = Arc::new(Counters::default());
        counters.challenge_polls.store(4, Ordering::SeqCst);
        let pipeline = pipeline(&counters, &[]);
        let mut store = RecordStore::new(dir.path().join("data.json"));

        pipeline
            .process_all(&table(&["10 Elm St"]), &mut store)
            .await
            .expect("run");

        assert_eq!(status_of(&store, "10 Elm St"), Some(ExtractionStatus::Success));
        assert_eq!(counters.plays.load(Ordering::SeqCst), 1);
        assert_eq!(counters.challenge_polls.load(Ordering::SeqCst), 0);
        assert!(counters.stops.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn resolved_records_are_never_fetched_again() {
        let dir = tempdir().expect("tempdir");
        let counters = Arc::new(Counters::default());
        let pipeline = pipeline(&counters, &[]);
        let mut store = RecordStore::new(dir.path().join("data.json"));
        let input = table(&["10 Elm St"]);

        pipeline.process_all(&input, &mut store).await.expect("first run");
        let first = store.records().to_vec();
        let navigations = counters.navigations.load(Ordering::SeqCst);

        let totals = pipeline.process_all(&input, &mut store).await.expect("second run");

        assert_eq!(counters.navigations.load(Ordering::SeqCst), navigations);
        assert_eq!(totals.already_resolved, 1);
        assert_eq!(totals.processed, 0);
        assert_eq!(store.records(), first.as_slice());
    }

    #[tokio::test]
    async fn earlier_failures_are_retried_on_a_new_run() {
        let dir = tempdir().expect("tempdir");
        let counters = Arc::new(Counters::default());
        let pipeline = pipeline(&counters, &[]);
        let mut store = RecordStore::new(dir.path().join("data.json"));
        store.append(PropertyRecord::failed("10 Elm St", 0));

        let totals = pipeline
            .process_all(&table(&["10 Elm St"]), &mut store)
            .await
            .expect("run");

        assert_eq!(totals.processed, 1);
        assert_eq!(status_of(&store, "10 Elm St"), Some(ExtractionStatus::Success));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_rows_are_extracted_once_per_run() {
        let dir = tempdir().expect("tempdir");
        let counters = Arc::new(Counters::default());
        let pipeline = pipeline(&counters, &[]);
        let mut store = RecordStore::new(dir.path().join("data.json"));

        let totals = pipeline
            .process_all(&table(&["5 Pine Rd", "5 PINE RD ", "", ""]), &mut store)
            .await
            .expect("run");

        assert_eq!(counters.navigations.load(Ordering::SeqCst), 1);
        assert_eq!(totals.processed, 2);
        assert_eq!(totals.already_resolved, 2);
        assert_eq!(totals.failed, 4);
        assert_eq!(store.len(), 2);
    }
}
