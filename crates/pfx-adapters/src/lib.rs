//! Listing-site adapter: browser session contract, session implementations,
//! layout-aware field strategies and fact normalization.

use std::time::Duration;

pub mod facts;
pub mod search;
pub mod session;
pub mod snapshot;
pub mod strategies;
pub mod webdriver;

pub use facts::{collect_facts, normalize_facts, FactNormalizer, FactRegion};
pub use search::{collect_search_results, submit_search, ListingMode, SearchError, SearchListing};
pub use session::{BrowserSession, ElementHandle, SessionError, ENTER_KEY};
pub use snapshot::HtmlSnapshotSession;
pub use strategies::{FieldStrategy, ListingExtractor, StrategyChain};
pub use webdriver::{WebDriverConfig, WebDriverSession};

/// Element that only exists on a property detail page.
pub const DETAIL_CONTAINER: &str = "#home-details-content";

/// Substring of the page URL while an anti-bot challenge is shown.
pub const CHALLENGE_MARKER: &str = "captcha";

/// Fixed waits between page interactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Between retries of an attempt that raised a session error.
    pub transient_backoff: Duration,
    /// After submitting a search that should land on a detail page.
    pub detail_settle: Duration,
    /// After submitting a search that lands on a results grid.
    pub results_settle: Duration,
    /// After clicking through to the next results page.
    pub next_page_pause: Duration,
    /// Between URL checks while a challenge page is up.
    pub challenge_poll: Duration,
    /// After clicking a "read more" expander.
    pub expand_settle: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            transient_backoff: Duration::from_secs(5),
            detail_settle: Duration::from_secs(15),
            results_settle: Duration::from_secs(5),
            next_page_pause: Duration::from_secs(30),
            challenge_poll: Duration::from_secs(5),
            expand_settle: Duration::from_secs(3),
        }
    }
}

impl Pacing {
    /// No waits at all. Used with snapshot sessions.
    pub fn immediate() -> Self {
        Self {
            transient_backoff: Duration::ZERO,
            detail_settle: Duration::ZERO,
            results_settle: Duration::ZERO,
            next_page_pause: Duration::ZERO,
            challenge_poll: Duration::ZERO,
            expand_settle: Duration::ZERO,
        }
    }
}

pub async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteProfile {
    pub base_url: String,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            base_url: "https://www.zillow.com/".to_string(),
        }
    }
}

impl SiteProfile {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn home_url(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }

    pub fn search_url(&self, mode: ListingMode) -> String {
        format!("{}{}", self.home_url(), mode.path())
    }
}

/// True when `url` is an anti-bot challenge page.
pub fn is_challenge_url(url: &str) -> bool {
    url.to_lowercase().contains(CHALLENGE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_urls_are_joined_without_double_slashes() {
        let site = SiteProfile::new("https://listings.example.test");
        assert_eq!(site.home_url(), "https://listings.example.test/");
        assert_eq!(
            site.search_url(ListingMode::Rent),
            "https://listings.example.test/homes/for_rent/"
        );
        assert_eq!(
            SiteProfile::default().search_url(ListingMode::Buy),
            "https://www.zillow.com/homes/for_buy/"
        );
    }

    #[test]
    fn challenge_detection_ignores_case() {
        assert!(is_challenge_url("https://www.zillow.com/CaptchaPerimeterX/?url=%2f"));
        assert!(!is_challenge_url("https://www.zillow.com/homedetails/1_zpid/"));
    }
}
