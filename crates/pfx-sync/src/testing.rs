//! Scripted collaborators for pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pfx_adapters::{BrowserSession, ElementHandle, HtmlSnapshotSession, Pacing, SessionError, SiteProfile};
use pfx_storage::Geocoder;

use crate::alert::AlertSignal;
use crate::pipeline::ExtractionPipeline;

const BASE: &str = "https://listings.example.test";
const HOME: &str = r#"<html><body><input class="react-autosuggest__input"/></body></html>"#;

fn detail_page(address: &str, price: &str) -> String {
    format!(
        r#"<html><body><div id="home-details-content">
             <h1>{address}</h1>
             <div class="ds-summary-row-content"><span class="ds-value">{price}</span></div>
             <h3 class="edit-facts-light"><span>3 bd</span><span>2 ba</span><span>1,500 sqft</span></h3>
             <div class="fact-container"><span class="fact-label">Type:</span><span class="fact-value">Condo</span></div>
           </div></body></html>"#
    )
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) navigations: AtomicUsize,
    pub(crate) failing_navigations: AtomicUsize,
    pub(crate) challenge_polls: AtomicUsize,
    pub(crate) plays: AtomicUsize,
    pub(crate) stops: AtomicUsize,
    pub(crate) geocodes: AtomicUsize,
}

struct ScriptedSession {
    inner: HtmlSnapshotSession,
    counters: Arc<Counters>,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.counters.navigations.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.counters.failing_navigations) {
            return Err(SessionError::Transport("connection reset".into()));
        }
        self.inner.navigate(url).await
    }

    async fn current_url(&self) -> Result<String, SessionError> {
        if take_one(&self.counters.challenge_polls) {
            return Ok(format!("{BASE}/captchaPerimeterX/"));
        }
        self.inner.current_url().await
    }

    async fn wait_until_ready(&self) -> Result<(), SessionError> {
        self.inner.wait_until_ready().await
    }

    async fn locate(&self, selector: &str) -> Result<Option<ElementHandle>, SessionError> {
        self.inner.locate(selector).await
    }

    async fn locate_all(&self, selector: &str) -> Result<Vec<ElementHandle>, SessionError> {
        self.inner.locate_all(selector).await
    }

    async fn locate_in(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Option<ElementHandle>, SessionError> {
        self.inner.locate_in(parent, selector).await
    }

    async fn locate_all_in(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, SessionError> {
        self.inner.locate_all_in(parent, selector).await
    }

    async fn text(&self, element: &ElementHandle) -> Result<String, SessionError> {
        self.inner.text(element).await
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        self.inner.attribute(element, name).await
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), SessionError> {
        self.inner.click(element).await
    }

    async fn clear(&self, element: &ElementHandle) -> Result<(), SessionError> {
        self.inner.clear(element).await
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<(), SessionError> {
        self.inner.send_keys(element, text).await
    }
}

struct MapGeocoder {
    answers: HashMap<String, String>,
    counters: Arc<Counters>,
}

#[async_trait]
impl Geocoder for MapGeocoder {
    async fn resolve(&self, address: &str) -> String {
        self.counters.geocodes.fetch_add(1, Ordering::SeqCst);
        self.answers.get(address).cloned().unwrap_or_default()
    }
}

struct CountingAlert(Arc<Counters>);

impl AlertSignal for CountingAlert {
    fn play(&self) {
        self.0.plays.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.0.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Site where "10 Elm St" is listed directly and "22 Oak Ave" only
/// under its geocoded form.
pub(crate) fn scripted_pipeline(counters: &Arc<Counters>, geocoded: &[(&str, &str)]) -> ExtractionPipeline {
    let session = HtmlSnapshotSession::new()
        .with_page(format!("{BASE}/"), HOME)
        .with_search("10 Elm St", format!("{BASE}/homedetails/1_zpid/"))
        .with_page(format!("{BASE}/homedetails/1_zpid/"), detail_page("10 Elm St, Springfield, IL", "$325,000"))
        .with_search("22 Oak Avenue, Springfield, IL 62701, USA", format!("{BASE}/homedetails/2_zpid/"))
        .with_page(format!("{BASE}/homedetails/2_zpid/"), detail_page("22 Oak Ave, Springfield, IL", "$210,000"));

    ExtractionPipeline::new(
        Box::new(ScriptedSession {
            inner: session,
            counters: Arc::clone(counters),
        }),
        Box::new(MapGeocoder {
            answers: geocoded
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            counters: Arc::clone(counters),
        }),
        Box::new(CountingAlert(Arc::clone(counters))),
        SiteProfile::new(BASE),
        Pacing::immediate(),
    )
}
