//! Per-field extraction strategies.
//!
//! The site has shipped several page layouts for the same content. Each field
//! gets an ordered [`StrategyChain`]; the first strategy that yields a value
//! wins and every failure along the way is absorbed.

use async_trait::async_trait;
use pfx_core::PropertyDetails;
use tracing::debug;

use crate::facts::collect_facts;
use crate::session::{BrowserSession, SessionError};
use crate::Pacing;

const ADDRESS_HEADING: &str = "h1";
const SUMMARY_ROW: &str = "div.ds-summary-row-content";
const SUMMARY_VALUE: &str = ".ds-value";
const PRIMARY_ESTIMATE: &str = ".zestimate.primary-quote";
const RENT_ESTIMATE: &str = ".rent-zestimate";
const SHARED_ESTIMATE: &str = ".ds-estimate";
const INLINE_FIGURES: &str = ".edit-facts-light";
const INLINE_FIGURE_ITEMS: &str = "span:not(.middle-dot)";
const GROUPED_FIGURES: &str = "span.ds-bed-bath-living-area";
const GROUPED_FIGURE_VALUE: &str = "span:not(.ds-summary-row-label-secondary)";

const RENT_KEYWORD: &str = "RENT";

/// Headline figure positions.
pub const BEDS_INDEX: usize = 0;
pub const BATHS_INDEX: usize = 1;
pub const AREA_INDEX: usize = 2;

/// One layout-specific way to read a field.
#[async_trait]
pub trait FieldStrategy<T>: Send + Sync {
    fn layout(&self) -> &'static str;

    /// `Ok(None)` when this layout has no usable value.
    async fn attempt(&self, session: &dyn BrowserSession) -> Result<Option<T>, SessionError>;
}

pub struct StrategyChain<T> {
    field: &'static str,
    strategies: Vec<Box<dyn FieldStrategy<T>>>,
}

impl<T: Send + 'static> StrategyChain<T> {
    pub fn new(field: &'static str) -> Self {
        Self {
            field,
            strategies: Vec::new(),
        }
    }

    pub fn then(mut self, strategy: impl FieldStrategy<T> + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub async fn resolve(&self, session: &dyn BrowserSession) -> Option<T> {
        for strategy in &self.strategies {
            match strategy.attempt(session).await {
                Ok(Some(value)) => {
                    debug!(field = self.field, layout = strategy.layout(), "field resolved");
                    return Some(value);
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(field = self.field, layout = strategy.layout(), error = %err, "strategy failed");
                }
            }
        }
        debug!(field = self.field, "no layout produced a value");
        None
    }
}

/// Case-insensitive keyword filter for regions shared between fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordRule {
    Any,
    Require(&'static str),
    Reject(&'static str),
}

impl KeywordRule {
    fn admits(self, text: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Require(keyword) => text.to_uppercase().contains(keyword),
            Self::Reject(keyword) => !text.to_uppercase().contains(keyword),
        }
    }
}

/// Reads the text of `selector` (optionally inside `within`) and parses it.
pub struct TextStrategy<T> {
    pub layout: &'static str,
    pub within: Option<&'static str>,
    pub selector: &'static str,
    pub keyword: KeywordRule,
    pub parse: fn(&str) -> Option<T>,
}

#[async_trait]
impl<T: Send + 'static> FieldStrategy<T> for TextStrategy<T> {
    fn layout(&self) -> &'static str {
        self.layout
    }

    async fn attempt(&self, session: &dyn BrowserSession) -> Result<Option<T>, SessionError> {
        let element = match self.within {
            Some(within) => match session.locate(within).await? {
                Some(scope) => session.locate_in(&scope, self.selector).await?,
                None => None,
            },
            None => session.locate(self.selector).await?,
        };
        let Some(element) = element else {
            return Ok(None);
        };
        let text = session.text(&element).await?;
        if !self.keyword.admits(&text) {
            return Ok(None);
        }
        Ok((self.parse)(&text))
    }
}

/// Where the bed/bath/area strip lives on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FigureLayout {
    /// One container whose spans are the figures in order.
    Inline {
        container: &'static str,
        items: &'static str,
    },
    /// One group element per figure with the number in a child span.
    Grouped {
        groups: &'static str,
        value: &'static str,
    },
}

pub struct HeadlineFigure {
    pub layout: &'static str,
    pub shape: FigureLayout,
    pub index: usize,
}

#[async_trait]
impl FieldStrategy<f64> for HeadlineFigure {
    fn layout(&self) -> &'static str {
        self.layout
    }

    async fn attempt(&self, session: &dyn BrowserSession) -> Result<Option<f64>, SessionError> {
        let element = match self.shape {
            FigureLayout::Inline { container, items } => {
                let Some(container) = session.locate(container).await? else {
                    return Ok(None);
                };
                session
                    .locate_all_in(&container, items)
                    .await?
                    .into_iter()
                    .nth(self.index)
            }
            FigureLayout::Grouped { groups, value } => {
                match session.locate_all(groups).await?.into_iter().nth(self.index) {
                    Some(group) => session.locate_in(&group, value).await?,
                    None => None,
                }
            }
        };
        match element {
            Some(element) => Ok(parse_figure(&session.text(&element).await?)),
            None => Ok(None),
        }
    }
}

pub fn address_chain() -> StrategyChain<String> {
    StrategyChain::new("address").then(TextStrategy {
        layout: "heading",
        within: None,
        selector: ADDRESS_HEADING,
        keyword: KeywordRule::Any,
        parse: parse_address,
    })
}

pub fn value_chain() -> StrategyChain<f64> {
    StrategyChain::new("value").then(TextStrategy {
        layout: "summary-row",
        within: Some(SUMMARY_ROW),
        selector: SUMMARY_VALUE,
        keyword: KeywordRule::Any,
        parse: parse_currency,
    })
}

pub fn estimate_chain() -> StrategyChain<f64> {
    StrategyChain::new("estimate")
        .then(TextStrategy {
            layout: "primary-quote",
            within: None,
            selector: PRIMARY_ESTIMATE,
            keyword: KeywordRule::Any,
            parse: parse_quote,
        })
        .then(TextStrategy {
            layout: "shared-estimate",
            within: None,
            selector: SHARED_ESTIMATE,
            keyword: KeywordRule::Reject(RENT_KEYWORD),
            parse: parse_quote,
        })
}

pub fn estimate_rent_chain() -> StrategyChain<f64> {
    StrategyChain::new("estimate_rent")
        .then(TextStrategy {
            layout: "rent-quote",
            within: None,
            selector: RENT_ESTIMATE,
            keyword: KeywordRule::Any,
            parse: parse_quote,
        })
        .then(TextStrategy {
            layout: "shared-estimate",
            within: None,
            selector: SHARED_ESTIMATE,
            keyword: KeywordRule::Require(RENT_KEYWORD),
            parse: parse_quote,
        })
}

pub fn figure_chain(field: &'static str, index: usize) -> StrategyChain<f64> {
    StrategyChain::new(field)
        .then(HeadlineFigure {
            layout: "inline-figures",
            shape: FigureLayout::Inline {
                container: INLINE_FIGURES,
                items: INLINE_FIGURE_ITEMS,
            },
            index,
        })
        .then(HeadlineFigure {
            layout: "grouped-figures",
            shape: FigureLayout::Grouped {
                groups: GROUPED_FIGURES,
                value: GROUPED_FIGURE_VALUE,
            },
            index,
        })
}

/// Reads every field of the detail page currently shown in a session.
pub struct ListingExtractor {
    pacing: Pacing,
    address: StrategyChain<String>,
    value: StrategyChain<f64>,
    estimate: StrategyChain<f64>,
    estimate_rent: StrategyChain<f64>,
    beds: StrategyChain<f64>,
    baths: StrategyChain<f64>,
    area: StrategyChain<f64>,
}

impl ListingExtractor {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            pacing,
            address: address_chain(),
            value: value_chain(),
            estimate: estimate_chain(),
            estimate_rent: estimate_rent_chain(),
            beds: figure_chain("beds", BEDS_INDEX),
            baths: figure_chain("baths", BATHS_INDEX),
            area: figure_chain("area", AREA_INDEX),
        }
    }

    /// Only the URL lookup can fail; field misses leave the field empty.
    pub async fn extract(&self, session: &dyn BrowserSession) -> Result<PropertyDetails, SessionError> {
        let url = session.current_url().await?;
        Ok(PropertyDetails {
            url: Some(url).filter(|u| !u.is_empty()),
            address: self.address.resolve(session).await,
            value: self.value.resolve(session).await,
            estimate: self.estimate.resolve(session).await,
            estimate_rent: self.estimate_rent.resolve(session).await,
            beds: self.beds.resolve(session).await,
            baths: self.baths.resolve(session).await,
            area: self.area.resolve(session).await,
            facts: collect_facts(session, &self.pacing).await,
        })
    }
}

/// Heading text with line breaks folded into comma separators.
pub fn parse_address(text: &str) -> Option<String> {
    let address = text.replace("\r\n", "\n").replace('\n', ", ");
    let address = address.trim();
    if address.is_empty() {
        None
    } else {
        Some(address.to_string())
    }
}

/// `$1,234,567` style amounts. Trailing text such as `/mo` is ignored.
pub fn parse_currency(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| *c != ',' && *c != '$').collect();
    leading_integer(&cleaned)
}

/// An amount quoted somewhere after a label, e.g. `Zestimate: $1,234`.
pub fn parse_quote(text: &str) -> Option<f64> {
    let from_dollar = text.find('$').map(|pos| &text[pos..]).unwrap_or(text);
    parse_currency(from_dollar)
}

/// A number followed by a unit, e.g. `3 bd` or `1,850 sqft`.
pub fn parse_figure(text: &str) -> Option<f64> {
    let head = match text.find(' ') {
        Some(space) if space > 0 => &text[..space],
        _ => text,
    };
    let cleaned: String = head.chars().filter(|c| *c != ',').collect();
    leading_float(&cleaned)
}

/// Integer at the start of `text` after leading whitespace.
pub fn leading_integer(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let (sign, digits) = split_sign(text);
    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].parse::<f64>().ok().map(|v| sign * v)
}

/// Decimal number at the start of `text` after leading whitespace.
pub fn leading_float(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let (sign, rest) = split_sign(text);
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, c) in rest.char_indices() {
        if c.is_ascii_digit() {
            seen_digit = true;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
        } else {
            break;
        }
        end = i + c.len_utf8();
    }
    if !seen_digit {
        return None;
    }
    rest[..end]
        .trim_end_matches('.')
        .parse::<f64>()
        .ok()
        .map(|v| sign * v)
}

fn split_sign(text: &str) -> (f64, &str) {
    if let Some(rest) = text.strip_prefix('-') {
        (-1.0, rest)
    } else if let Some(rest) = text.strip_prefix('+') {
        (1.0, rest)
    } else {
        (1.0, text)
    }
}
