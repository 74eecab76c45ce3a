//! Offline [`BrowserSession`] over saved HTML pages.
//!
//! Pages are registered by URL and searches by query. Every call re-parses the
//! current page with `scraper`, so element handles are positions in document
//! order and go stale on navigation the way live handles do.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use pfx_core::normalize_address_key;
use scraper::{ElementRef, Html, Selector};

use crate::session::{BrowserSession, ElementHandle, SessionError, ENTER_KEY};

const EMPTY_PAGE: &str = "<html><head></head><body></body></html>";
const HANDLE_PREFIX: &str = "snapshot-";

#[derive(Debug, Default)]
struct SnapshotState {
    pages: HashMap<String, String>,
    searches: HashMap<String, String>,
    current_url: String,
    current_html: String,
    typed: String,
    visited: Vec<String>,
    clicked: Vec<String>,
}

impl SnapshotState {
    fn open(&mut self, url: &str) {
        self.current_url = url.to_string();
        self.current_html = self
            .pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| EMPTY_PAGE.to_string());
        self.typed.clear();
        self.visited.push(url.to_string());
    }
}

#[derive(Debug, Default)]
pub struct HtmlSnapshotSession {
    state: Mutex<SnapshotState>,
}

impl HtmlSnapshotSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session already showing `html` at `url`.
    pub fn open(url: impl Into<String>, html: impl Into<String>) -> Self {
        let url = url.into();
        let mut session = Self::new().with_page(url.clone(), html);
        session.state_mut().open(&url);
        session
    }

    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.state_mut().pages.insert(url.into(), html.into());
        self
    }

    /// Submitting `query` in any input sends the session to `url`.
    pub fn with_search(mut self, query: &str, url: impl Into<String>) -> Self {
        self.state_mut()
            .searches
            .insert(normalize_address_key(query), url.into());
        self
    }

    /// URLs opened so far, in order.
    pub fn visited(&self) -> Vec<String> {
        self.lock().map(|s| s.visited.clone()).unwrap_or_default()
    }

    /// Ids of clicked elements, in order.
    pub fn clicked(&self) -> Vec<String> {
        self.lock().map(|s| s.clicked.clone()).unwrap_or_default()
    }

    fn state_mut(&mut self) -> &mut SnapshotState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SnapshotState>, SessionError> {
        self.state
            .lock()
            .map_err(|_| SessionError::Transport("snapshot state lock poisoned".into()))
    }

    fn with_document<T>(
        &self,
        f: impl FnOnce(&[ElementRef<'_>]) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let html = self.lock()?.current_html.clone();
        let document = Html::parse_document(&html);
        let elements: Vec<ElementRef<'_>> = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .collect();
        f(&elements)
    }

    fn find(
        &self,
        parent: Option<&ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, SessionError> {
        let selector = parse_selector(selector)?;
        self.with_document(|elements| {
            let matches: Vec<ElementRef<'_>> = match parent {
                Some(handle) => {
                    let scope = resolve(elements, handle)?;
                    scope
                        .select(&selector)
                        .filter(|el| *el != scope)
                        .collect()
                }
                None => {
                    return Ok(elements
                        .iter()
                        .enumerate()
                        .filter(|(_, el)| selector.matches(el))
                        .map(|(index, _)| handle_for(index))
                        .collect())
                }
            };
            Ok(matches
                .iter()
                .filter_map(|el| elements.iter().position(|candidate| candidate == el))
                .map(handle_for)
                .collect())
        })
    }

    fn element_text(&self, handle: &ElementHandle) -> Result<String, SessionError> {
        self.with_document(|elements| {
            let element = resolve(elements, handle)?;
            Ok(collapse_whitespace(&element.text().collect::<String>()))
        })
    }

    fn element_attribute(
        &self,
        handle: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        self.with_document(|elements| {
            let element = resolve(elements, handle)?;
            Ok(element.value().attr(name).map(str::to_string))
        })
    }
}

fn parse_selector(selector: &str) -> Result<Selector, SessionError> {
    Selector::parse(selector).map_err(|_| SessionError::InvalidSelector(selector.to_string()))
}

fn handle_for(index: usize) -> ElementHandle {
    ElementHandle(format!("{HANDLE_PREFIX}{index}"))
}

fn resolve<'a>(
    elements: &[ElementRef<'a>],
    handle: &ElementHandle,
) -> Result<ElementRef<'a>, SessionError> {
    handle
        .id()
        .strip_prefix(HANDLE_PREFIX)
        .and_then(|index| index.parse::<usize>().ok())
        .and_then(|index| elements.get(index).copied())
        .ok_or_else(|| SessionError::StaleElement(handle.id().to_string()))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl BrowserSession for HtmlSnapshotSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.lock()?.open(url);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, SessionError> {
        Ok(self.lock()?.current_url.clone())
    }

    async fn wait_until_ready(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn locate(&self, selector: &str) -> Result<Option<ElementHandle>, SessionError> {
        Ok(self.find(None, selector)?.into_iter().next())
    }

    async fn locate_all(&self, selector: &str) -> Result<Vec<ElementHandle>, SessionError> {
        self.find(None, selector)
    }

    async fn locate_in(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Option<ElementHandle>, SessionError> {
        Ok(self.find(Some(parent), selector)?.into_iter().next())
    }

    async fn locate_all_in(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, SessionError> {
        self.find(Some(parent), selector)
    }

    async fn text(&self, element: &ElementHandle) -> Result<String, SessionError> {
        self.element_text(element)
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        self.element_attribute(element, name)
    }

    /// Follows `href` when it points at a registered page.
    async fn click(&self, element: &ElementHandle) -> Result<(), SessionError> {
        let href = self.element_attribute(element, "href")?;
        let mut state = self.lock()?;
        state.clicked.push(element.id().to_string());
        if let Some(href) = href {
            if state.pages.contains_key(&href) {
                state.open(&href);
            }
        }
        Ok(())
    }

    async fn clear(&self, element: &ElementHandle) -> Result<(), SessionError> {
        resolve_exists(self, element)?;
        self.lock()?.typed.clear();
        Ok(())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<(), SessionError> {
        resolve_exists(self, element)?;
        let mut state = self.lock()?;
        match text.split_once(ENTER_KEY) {
            Some((before, _)) => {
                let query = format!("{}{}", state.typed, before);
                let target = state.searches.get(&normalize_address_key(&query)).cloned();
                match target {
                    Some(target) => state.open(&target),
                    None => {
                        let miss = format!("{}#search={}", state.current_url, query.trim());
                        state.open(&miss);
                    }
                }
            }
            None => state.typed.push_str(text),
        }
        Ok(())
    }
}

fn resolve_exists(session: &HtmlSnapshotSession, element: &ElementHandle) -> Result<(), SessionError> {
    session.with_document(|elements| resolve(elements, element).map(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <h1>10 Elm St
              Springfield, IL</h1>
          <ul class="facts">
            <li class="fact"><span class="label">Type</span><span class="value">Condo</span></li>
            <li class="fact"><span class="label">Year</span><span class="value">1999</span></li>
          </ul>
          <a class="next" href="https://example.test/page/2">Next</a>
          <input class="search" />
        </body></html>"#;

    #[tokio::test]
    async fn scoped_lookups_stay_inside_parent() {
        let session = HtmlSnapshotSession::open("https://example.test/", PAGE);
        let items = session.locate_all(".fact").await.expect("facts");
        assert_eq!(items.len(), 2);

        let label = session
            .locate_in(&items[1], ".label")
            .await
            .expect("lookup")
            .expect("label");
        assert_eq!(session.text(&label).await.expect("text"), "Year");
        assert!(session
            .locate_in(&items[0], "h1")
            .await
            .expect("lookup")
            .is_none());
    }

    #[tokio::test]
    async fn text_is_whitespace_collapsed_and_missing_elements_are_none() {
        let session = HtmlSnapshotSession::open("https://example.test/", PAGE);
        let heading = session.locate("h1").await.expect("lookup").expect("h1");
        assert_eq!(
            session.text(&heading).await.expect("text"),
            "10 Elm St Springfield, IL"
        );
        assert!(session.locate(".price").await.expect("lookup").is_none());
        assert!(matches!(
            session.locate("div[").await,
            Err(SessionError::InvalidSelector(_))
        ));
    }

    #[tokio::test]
    async fn clicking_registered_links_navigates() {
        let session = HtmlSnapshotSession::open("https://example.test/", PAGE)
            .with_page("https://example.test/page/2", "<html><body><p>two</p></body></html>");
        let next = session.locate("a.next").await.expect("lookup").expect("next");
        assert_eq!(
            session.attribute(&next, "href").await.expect("attr").as_deref(),
            Some("https://example.test/page/2")
        );

        session.click(&next).await.expect("click");

        assert_eq!(
            session.current_url().await.expect("url"),
            "https://example.test/page/2"
        );
        assert_eq!(session.clicked().len(), 1);
    }

    #[tokio::test]
    async fn submitted_searches_follow_registered_routes() {
        let session = HtmlSnapshotSession::open("https://example.test/", PAGE)
            .with_search("10 elm st", "https://example.test/homedetails/1")
            .with_page("https://example.test/homedetails/1", "<html><body><h1>Found</h1></body></html>");
        let input = session.locate("input.search").await.expect("lookup").expect("input");

        session.clear(&input).await.expect("clear");
        session.send_keys(&input, "10 Elm St").await.expect("type");
        session.send_keys(&input, ENTER_KEY).await.expect("submit");
        assert_eq!(
            session.current_url().await.expect("url"),
            "https://example.test/homedetails/1"
        );

        session.navigate("https://example.test/").await.expect("navigate");
        let input = session.locate("input.search").await.expect("lookup").expect("input");
        session
            .send_keys(&input, &format!("Nowhere{ENTER_KEY}"))
            .await
            .expect("submit");
        assert!(session.locate("h1").await.expect("lookup").is_none());
        assert_eq!(session.visited().len(), 4);
    }
}
