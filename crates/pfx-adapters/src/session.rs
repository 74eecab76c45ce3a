//! Browser session contract shared by the live driver and the snapshot fixture.

use async_trait::async_trait;
use thiserror::Error;

/// WebDriver key code for Enter.
pub const ENTER_KEY: &str = "\u{E007}";

/// Opaque reference to an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

impl ElementHandle {
    pub fn id(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("driver returned {status} `{error}`: {message}")]
    Protocol {
        status: u16,
        error: String,
        message: String,
    },
    #[error("invalid selector `{0}`")]
    InvalidSelector(String),
    #[error("element {0} is no longer attached to the page")]
    StaleElement(String),
    #[error("no browser session is open")]
    NotConnected,
}

impl SessionError {
    pub fn is_no_such_element(&self) -> bool {
        matches!(self, Self::Protocol { error, .. } if error == "no such element")
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Page automation primitives used by the extractor.
///
/// Lookups return `Ok(None)` / an empty list when nothing matches; only
/// driver or transport faults surface as errors.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), SessionError>;
    async fn current_url(&self) -> Result<String, SessionError>;
    async fn wait_until_ready(&self) -> Result<(), SessionError>;

    async fn locate(&self, selector: &str) -> Result<Option<ElementHandle>, SessionError>;
    async fn locate_all(&self, selector: &str) -> Result<Vec<ElementHandle>, SessionError>;
    async fn locate_in(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Option<ElementHandle>, SessionError>;
    async fn locate_all_in(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, SessionError>;

    async fn text(&self, element: &ElementHandle) -> Result<String, SessionError>;
    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError>;
    async fn click(&self, element: &ElementHandle) -> Result<(), SessionError>;
    async fn clear(&self, element: &ElementHandle) -> Result<(), SessionError>;
    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<(), SessionError>;

    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}
