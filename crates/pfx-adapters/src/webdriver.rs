//! W3C WebDriver client backing [`BrowserSession`] with a live browser.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::session::{BrowserSession, ElementHandle, SessionError};

/// Key under which W3C drivers return element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    pub endpoint: String,
    pub browser: String,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub request_timeout: Duration,
    pub ready_timeout: Duration,
    pub ready_poll: Duration,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4444".to_string(),
            browser: "firefox".to_string(),
            headless: false,
            window_width: 900,
            window_height: 900,
            request_timeout: Duration::from_secs(60),
            ready_timeout: Duration::from_secs(30),
            ready_poll: Duration::from_millis(250),
        }
    }
}

pub struct WebDriverSession {
    client: reqwest::Client,
    endpoint: String,
    session_id: String,
    ready_timeout: Duration,
    ready_poll: Duration,
}

impl WebDriverSession {
    /// Opens a new browser session and sizes its window.
    pub async fn connect(config: WebDriverConfig) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let endpoint = config.endpoint.trim_end_matches('/').to_string();

        let resp = client
            .post(format!("{endpoint}/session"))
            .json(&new_session_payload(&config))
            .send()
            .await?;
        let value = decode_response(resp).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::Transport("new session response has no sessionId".into()))?
            .to_string();

        let session = Self {
            client,
            endpoint,
            session_id,
            ready_timeout: config.ready_timeout,
            ready_poll: config.ready_poll,
        };
        session
            .command(
                Method::POST,
                "/window/rect",
                Some(json!({ "width": config.window_width, "height": config.window_height })),
            )
            .await?;
        info!(
            session_id = %session.session_id,
            browser = %config.browser,
            headless = config.headless,
            "opened webdriver session"
        );
        Ok(session)
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, SessionError> {
        let url = format!("{}/session/{}{}", self.endpoint, self.session_id, path);
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        decode_response(request.send().await?).await
    }

    async fn find_one(
        &self,
        path: &str,
        selector: &str,
    ) -> Result<Option<ElementHandle>, SessionError> {
        match self
            .command(Method::POST, path, Some(css_locator(selector)))
            .await
        {
            Ok(value) => Ok(element_from(&value)),
            Err(err) if err.is_no_such_element() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn find_many(&self, path: &str, selector: &str) -> Result<Vec<ElementHandle>, SessionError> {
        let value = self
            .command(Method::POST, path, Some(css_locator(selector)))
            .await?;
        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(element_from).collect())
            .unwrap_or_default())
    }
}

fn css_locator(selector: &str) -> Value {
    json!({ "using": "css selector", "value": selector })
}

pub fn new_session_payload(config: &WebDriverConfig) -> Value {
    let mut always_match = json!({ "browserName": config.browser });
    if config.headless {
        let (key, flag) = match config.browser.as_str() {
            "chrome" | "chromium" => ("goog:chromeOptions", "--headless=new"),
            "MicrosoftEdge" | "msedge" => ("ms:edgeOptions", "--headless=new"),
            _ => ("moz:firefoxOptions", "-headless"),
        };
        always_match[key] = json!({ "args": [flag] });
    }
    json!({ "capabilities": { "alwaysMatch": always_match } })
}

async fn decode_response(resp: reqwest::Response) -> Result<Value, SessionError> {
    let status = resp.status().as_u16();
    let body: Value = resp.json().await?;
    unwrap_value(status, body)
}

/// Unwraps the `value` member of a driver reply, mapping W3C error codes.
pub fn unwrap_value(status: u16, body: Value) -> Result<Value, SessionError> {
    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if (200..300).contains(&status) {
        return Ok(value);
    }

    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match error.as_str() {
        "stale element reference" => Err(SessionError::StaleElement(message)),
        "invalid selector" => Err(SessionError::InvalidSelector(message)),
        "invalid session id" => Err(SessionError::NotConnected),
        _ => Err(SessionError::Protocol {
            status,
            error,
            message,
        }),
    }
}

pub fn element_from(value: &Value) -> Option<ElementHandle> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementHandle(id.to_string()))
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn current_url(&self) -> Result<String, SessionError> {
        let value = self.command(Method::GET, "/url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn wait_until_ready(&self) -> Result<(), SessionError> {
        let started = Instant::now();
        loop {
            let state = self
                .command(
                    Method::POST,
                    "/execute/sync",
                    Some(json!({ "script": "return document.readyState", "args": [] })),
                )
                .await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if started.elapsed() >= self.ready_timeout {
                debug!(state = %state, "document not complete before ready timeout; continuing");
                return Ok(());
            }
            tokio::time::sleep(self.ready_poll).await;
        }
    }

    async fn locate(&self, selector: &str) -> Result<Option<ElementHandle>, SessionError> {
        self.find_one("/element", selector).await
    }

    async fn locate_all(&self, selector: &str) -> Result<Vec<ElementHandle>, SessionError> {
        self.find_many("/elements", selector).await
    }

    async fn locate_in(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Option<ElementHandle>, SessionError> {
        self.find_one(&format!("/element/{}/element", parent.id()), selector)
            .await
    }

    async fn locate_all_in(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, SessionError> {
        self.find_many(&format!("/element/{}/elements", parent.id()), selector)
            .await
    }

    async fn text(&self, element: &ElementHandle) -> Result<String, SessionError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element.id()), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        let value = self
            .command(
                Method::GET,
                &format!("/element/{}/attribute/{}", element.id(), name),
                None,
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), SessionError> {
        self.command(
            Method::POST,
            &format!("/element/{}/click", element.id()),
            Some(json!({})),
        )
        .await
        .map(|_| ())
    }

    async fn clear(&self, element: &ElementHandle) -> Result<(), SessionError> {
        self.command(
            Method::POST,
            &format!("/element/{}/clear", element.id()),
            Some(json!({})),
        )
        .await
        .map(|_| ())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<(), SessionError> {
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.id()),
            Some(json!({ "text": text })),
        )
        .await
        .map(|_| ())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.command(Method::DELETE, "", None).await.map(|_| ())
    }
}
