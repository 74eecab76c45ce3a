//! Search-box submission and search-results crawling.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::session::{BrowserSession, SessionError, ENTER_KEY};
use crate::{pause, Pacing, SiteProfile};

pub const SEARCH_INPUT: &str = ".react-autosuggest__input";
const RESULTS_GRID: &str = "#grid-search-results";
const RESULT_CARD: &str = "article.list-card";
const RESULT_TITLE: &str = "h3";
const RESULT_LINK: &str = "a.list-card-link";
const NEXT_PAGE: &str = "li.zsg-pagination-next";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search input `{0}` not found on page")]
    InputMissing(&'static str),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingMode {
    Buy,
    Rent,
}

impl ListingMode {
    pub fn path(self) -> &'static str {
        match self {
            Self::Buy => "homes/for_buy/",
            Self::Rent => "homes/for_rent/",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchListing {
    pub title: String,
    pub url: String,
}

/// Clears the search box, types `query` and presses Enter.
pub async fn submit_search(session: &dyn BrowserSession, query: &str) -> Result<(), SearchError> {
    let input = session
        .locate(SEARCH_INPUT)
        .await?
        .ok_or(SearchError::InputMissing(SEARCH_INPUT))?;
    session.clear(&input).await?;
    session.send_keys(&input, query).await?;
    session.send_keys(&input, ENTER_KEY).await?;
    Ok(())
}

/// Collects listing links across every results page for `query`.
///
/// Stops at the first page without a next link. A session error ends the
/// crawl early and keeps what was collected so far.
pub async fn collect_search_results(
    session: &dyn BrowserSession,
    site: &SiteProfile,
    mode: ListingMode,
    query: &str,
    pacing: &Pacing,
) -> Vec<SearchListing> {
    let mut results = Vec::new();
    if let Err(err) = crawl(session, site, mode, query, pacing, &mut results).await {
        warn!(error = %err, collected = results.len(), "search crawl ended early");
    }
    results
}

async fn crawl(
    session: &dyn BrowserSession,
    site: &SiteProfile,
    mode: ListingMode,
    query: &str,
    pacing: &Pacing,
    results: &mut Vec<SearchListing>,
) -> Result<(), SearchError> {
    session.navigate(&site.search_url(mode)).await?;
    session.wait_until_ready().await?;
    submit_search(session, query).await?;
    pause(pacing.results_settle).await;

    let mut page = 1usize;
    loop {
        let Some(grid) = session.locate(RESULTS_GRID).await? else {
            warn!(page, "no results grid on page");
            return Ok(());
        };

        let mut added = 0usize;
        for card in session.locate_all_in(&grid, RESULT_CARD).await? {
            let title = session.locate_in(&card, RESULT_TITLE).await?;
            let link = session.locate_in(&card, RESULT_LINK).await?;
            let (Some(title), Some(link)) = (title, link) else {
                continue;
            };
            let Some(url) = session.attribute(&link, "href").await? else {
                continue;
            };
            results.push(SearchListing {
                title: session.text(&title).await?,
                url,
            });
            added += 1;
        }

        let next = match session.locate_in(&grid, NEXT_PAGE).await? {
            Some(item) => session.locate_in(&item, "a").await?,
            None => None,
        };
        match next {
            Some(anchor) => {
                info!(page, added, "results page done; going to next page");
                session.click(&anchor).await?;
                pause(pacing.next_page_pause).await;
                page += 1;
            }
            None => {
                info!(page, added, "results page done; no more pages");
                return Ok(());
            }
        }
    }
}
