//! Fact collection from the detail page and label/value normalization.

use std::collections::HashSet;

use pfx_core::Fact;
use tracing::{debug, info};

use crate::session::{BrowserSession, ElementHandle, SessionError};
use crate::strategies::leading_integer;
use crate::{pause, Pacing};

const FACTS_READ_MORE: &str = ".home-details-facts-container .read-more a";
const CARD_READ_MORE: &str = "a.ds-expandable-card-footer-text.ds-text-button";

pub const FLOOR_SIZE_LABEL: &str = "Floor size (sqft.)";
pub const LAST_SOLD_DATE_LABEL: &str = "LAST SOLD DATE";
pub const LAST_SOLD_VALUE_LABEL: &str = "LAST SOLD VALUE";

/// Accumulates raw label/value pairs into a deduplicated fact list.
///
/// The first fact seen for a label wins. `LAST SOLD` is split into a date
/// and a value fact; `FLOOR SIZE` is relabeled with an integer value.
#[derive(Debug, Default, Clone)]
pub struct FactNormalizer {
    facts: Vec<Fact>,
    seen: HashSet<String>,
}

impl FactNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: &str, value: &str) {
        let label = clean_label(label);
        if label.is_empty() {
            return;
        }

        match label.to_uppercase().as_str() {
            "FLOOR SIZE" => {
                let value = value.trim();
                let cleaned: String = value.chars().filter(|c| *c != ',').collect();
                let area = leading_integer(&cleaned)
                    .map(|v| format!("{v}"))
                    .unwrap_or_else(|| value.to_string());
                self.add(FLOOR_SIZE_LABEL, &area);
            }
            "LAST SOLD" => {
                let (date, price) = split_last_sold(value);
                self.add(LAST_SOLD_DATE_LABEL, &date);
                if let Some(price) = price {
                    self.add(LAST_SOLD_VALUE_LABEL, &price);
                }
            }
            _ => self.add(&label, value),
        }
    }

    pub fn finish(self) -> Vec<Fact> {
        self.facts
    }

    fn add(&mut self, label: &str, value: &str) {
        let fact = Fact::new(label, value);
        if self.seen.insert(fact.label.clone()) {
            self.facts.push(fact);
        }
    }
}

pub fn normalize_facts<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<Fact> {
    let mut normalizer = FactNormalizer::new();
    for (label, value) in pairs {
        normalizer.push(label, value);
    }
    normalizer.finish()
}

fn clean_label(label: &str) -> String {
    label.trim().trim_end_matches(':').trim_end().to_string()
}

/// `January 2020 for $450,000` into (`January 2020`, `450000`).
fn split_last_sold(value: &str) -> (String, Option<String>) {
    match value.find("for") {
        Some(pos) => {
            let date = value[..pos].trim().to_string();
            let rest: String = value[pos + "for".len()..]
                .chars()
                .filter(|c| *c != ',' && *c != '$')
                .collect();
            (date, leading_integer(&rest).map(|v| format!("{v}")))
        }
        None => (value.trim().to_string(), None),
    }
}

/// One of the page regions that has carried the facts list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactRegion {
    /// Items with a label and a value child.
    Labeled {
        layout: &'static str,
        expanders: &'static [&'static str],
        items: &'static str,
        label: &'static str,
        value: &'static str,
    },
    /// Two-cell table rows; the value sits in a span in the second cell.
    TableRows {
        layout: &'static str,
        expanders: &'static [&'static str],
        value: &'static str,
    },
}

pub const FACT_REGIONS: [FactRegion; 3] = [
    FactRegion::Labeled {
        layout: "fact-container",
        expanders: &[FACTS_READ_MORE],
        items: ".fact-container",
        label: ".fact-label",
        value: ".fact-value",
    },
    FactRegion::Labeled {
        layout: "home-fact-list",
        expanders: &[FACTS_READ_MORE],
        items: ".ds-home-fact-list-item",
        label: ".ds-home-fact-label",
        value: ".ds-home-fact-value",
    },
    FactRegion::TableRows {
        layout: "fact-table",
        expanders: &[FACTS_READ_MORE, CARD_READ_MORE],
        value: "span.ds-home-fact-value",
    },
];

impl FactRegion {
    pub fn layout(&self) -> &'static str {
        match self {
            Self::Labeled { layout, .. } | Self::TableRows { layout, .. } => *layout,
        }
    }

    fn expanders(&self) -> &'static [&'static str] {
        match self {
            Self::Labeled { expanders, .. } | Self::TableRows { expanders, .. } => *expanders,
        }
    }

    /// Raw pairs in page order. Items that fail to read are skipped.
    pub async fn collect(
        &self,
        session: &dyn BrowserSession,
        pacing: &Pacing,
    ) -> Vec<(String, String)> {
        for expander in self.expanders() {
            expand(session, expander, pacing).await;
        }

        let items = match self {
            Self::Labeled { items, .. } => session.locate_all(items).await,
            Self::TableRows { .. } => session.locate_all("tr").await,
        };
        let items = match items {
            Ok(items) => items,
            Err(err) => {
                debug!(layout = self.layout(), error = %err, "facts region unreadable");
                return Vec::new();
            }
        };

        let mut pairs = Vec::new();
        for item in &items {
            match self.read_item(session, item).await {
                Ok(Some(pair)) => pairs.push(pair),
                Ok(None) => {}
                Err(err) => debug!(layout = self.layout(), error = %err, "skipping fact item"),
            }
        }
        pairs
    }

    async fn read_item(
        &self,
        session: &dyn BrowserSession,
        item: &ElementHandle,
    ) -> Result<Option<(String, String)>, SessionError> {
        match self {
            Self::Labeled { label, value, .. } => {
                let label = session.locate_in(item, label).await?;
                let value = session.locate_in(item, value).await?;
                match (label, value) {
                    (Some(label), Some(value)) => Ok(Some((
                        session.text(&label).await?,
                        session.text(&value).await?,
                    ))),
                    _ => Ok(None),
                }
            }
            Self::TableRows { value, .. } => {
                let cells = session.locate_all_in(item, "td").await?;
                let [label_cell, value_cell] = cells.as_slice() else {
                    return Ok(None);
                };
                let Some(value) = session.locate_in(value_cell, value).await? else {
                    return Ok(None);
                };
                Ok(Some((
                    session.text(label_cell).await?,
                    session.text(&value).await?,
                )))
            }
        }
    }
}

async fn expand(session: &dyn BrowserSession, selector: &str, pacing: &Pacing) {
    if let Ok(Some(expander)) = session.locate(selector).await {
        if session.click(&expander).await.is_ok() {
            pause(pacing.expand_settle).await;
        }
    }
}

/// Reads every facts region and normalizes the union.
pub async fn collect_facts(session: &dyn BrowserSession, pacing: &Pacing) -> Vec<Fact> {
    let mut normalizer = FactNormalizer::new();
    for region in &FACT_REGIONS {
        for (label, value) in region.collect(session, pacing).await {
            normalizer.push(&label, &value);
        }
    }
    let facts = normalizer.finish();
    info!(facts = facts.len(), "extracted facts");
    facts
}
