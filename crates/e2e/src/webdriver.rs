//! Minimal W3C WebDriver client
//!
//! Talks JSON over HTTP to the shared driver server. Only the commands the
//! SPA navigation checks need are implemented.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::BrowserConfig;
use crate::error::{E2eError, E2eResult};
use harness_common::RetryPolicy;

/// W3C web element reference key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Legacy JSON wire protocol element key
const LEGACY_ELEMENT_KEY: &str = "ELEMENT";

/// Element location strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    PartialLinkText(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn partial_link_text(text: impl Into<String>) -> Self {
        Locator::PartialLinkText(text.into())
    }

    fn to_body(&self) -> Value {
        let (using, value) = match self {
            Locator::Css(v) => ("css selector", v),
            Locator::PartialLinkText(v) => ("partial link text", v),
            Locator::XPath(v) => ("xpath", v),
        };
        json!({ "using": using, "value": value })
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Css(v) => write!(f, "css '{}'", v),
            Locator::PartialLinkText(v) => write!(f, "link text '{}'", v),
            Locator::XPath(v) => write!(f, "xpath '{}'", v),
        }
    }
}

/// Reference to an element in the current page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    value: Value,
}

/// One browser session on the driver
pub struct BrowserSession {
    client: reqwest::Client,
    base: String,
    session_id: String,
    wait: RetryPolicy,
    closed: bool,
}

impl BrowserSession {
    /// Create a session on the driver at `driver_uri`
    pub async fn start(driver_uri: &str, config: &BrowserConfig) -> E2eResult<Self> {
        let client = reqwest::Client::builder().build()?;
        let base = driver_uri.trim_end_matches('/').to_string();

        let mut args = Vec::new();
        if config.headless {
            args.push("--headless");
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": config.name,
                    "goog:chromeOptions": { "args": args },
                    "moz:firefoxOptions": { "args": args },
                }
            }
        });

        let reply = client
            .post(format!("{}/session", base))
            .json(&capabilities)
            .send()
            .await?;
        let body: Value = reply.json().await?;
        let session_id = parse_session_id(&body)?;

        info!("Started {} browser session {}", config.name, session_id);

        Ok(Self {
            client,
            base,
            session_id,
            wait: config.wait_policy(),
            closed: false,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn goto(&self, url: &str) -> E2eResult<()> {
        debug!("Navigating browser to {}", url);
        self.post("url", json!({ "url": url })).await?;
        Ok(())
    }

    pub async fn title(&self) -> E2eResult<String> {
        let value = self.get("title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn current_url(&self) -> E2eResult<String> {
        let value = self.get("url").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn find(&self, locator: &Locator) -> E2eResult<Element> {
        let value = self.post("element", locator.to_body()).await?;
        parse_element(&value)
    }

    pub async fn find_all(&self, locator: &Locator) -> E2eResult<Vec<Element>> {
        let value = self.post("elements", locator.to_body()).await?;
        parse_elements(&value)
    }

    /// Find the first match below `parent`
    pub async fn find_in(&self, parent: &Element, locator: &Locator) -> E2eResult<Element> {
        let value = self
            .post(&format!("element/{}/element", parent.id), locator.to_body())
            .await?;
        parse_element(&value)
    }

    pub async fn find_all_in(&self, parent: &Element, locator: &Locator) -> E2eResult<Vec<Element>> {
        let value = self
            .post(&format!("element/{}/elements", parent.id), locator.to_body())
            .await?;
        parse_elements(&value)
    }

    pub async fn parent(&self, element: &Element) -> E2eResult<Element> {
        self.find_in(element, &Locator::XPath("..".to_string())).await
    }

    pub async fn text(&self, element: &Element) -> E2eResult<String> {
        let value = self.get(&format!("element/{}/text", element.id)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn click(&self, element: &Element) -> E2eResult<()> {
        self.post(&format!("element/{}/click", element.id), json!({})).await?;
        Ok(())
    }

    /// Poll until an element matching `locator` exists
    pub async fn wait_for(&self, locator: &Locator) -> E2eResult<Element> {
        self.wait
            .run(move |_| self.find(locator), |found| found.is_ok())
            .await
            .unwrap_or_else(|_| Err(E2eError::Timeout(format!("element {}", locator))))
    }

    /// Poll until `locator` exists below `parent`
    pub async fn wait_for_in(&self, parent: &Element, locator: &Locator) -> E2eResult<Element> {
        self.wait
            .run(move |_| self.find_in(parent, locator), |found| found.is_ok())
            .await
            .unwrap_or_else(|_| Err(E2eError::Timeout(format!("element {} below {}", locator, parent.id))))
    }

    /// Poll until the current URL contains `fragment`
    pub async fn wait_for_url(&self, fragment: &str) -> E2eResult<()> {
        self.wait
            .run(
                move |_| self.current_url(),
                |url| matches!(url, Ok(url) if url.contains(fragment)),
            )
            .await
            .map(|_| ())
            .map_err(|exhausted| {
                let last = exhausted.into_last().unwrap_or_default();
                E2eError::Timeout(format!("URL containing '{}' (last was '{}')", fragment, last))
            })
    }

    /// Poll until the text of `locator` below `parent` equals `expected`
    pub async fn wait_for_text(&self, parent: &Element, locator: &Locator, expected: &str) -> E2eResult<()> {
        self.wait
            .run(
                move |_| async move {
                    let element = self.find_in(parent, locator).await?;
                    self.text(&element).await
                },
                |text| matches!(text, Ok(text) if text == expected),
            )
            .await
            .map(|_| ())
            .map_err(|exhausted| {
                let last = exhausted.into_last().unwrap_or_default();
                E2eError::AssertionFailed(format!(
                    "Expected text of {} to be '{}' but was '{}'",
                    locator, expected, last
                ))
            })
    }

    /// End the session. Safe to call more than once.
    pub async fn close(&mut self) -> E2eResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let reply = self
            .client
            .delete(format!("{}/session/{}", self.base, self.session_id))
            .send()
            .await?;
        check_reply(reply).await?;
        Ok(())
    }

    async fn get(&self, command: &str) -> E2eResult<Value> {
        let reply = self.client.get(self.command_url(command)).send().await?;
        check_reply(reply).await
    }

    async fn post(&self, command: &str, body: Value) -> E2eResult<Value> {
        let reply = self
            .client
            .post(self.command_url(command))
            .json(&body)
            .send()
            .await?;
        check_reply(reply).await
    }

    fn command_url(&self, command: &str) -> String {
        format!("{}/session/{}/{}", self.base, self.session_id, command)
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Best effort; the driver reaps abandoned sessions when it exits
        let client = self.client.clone();
        let url = format!("{}/session/{}", self.base, self.session_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = client.delete(url).send().await;
            });
        }
    }
}

async fn check_reply(reply: reqwest::Response) -> E2eResult<Value> {
    let status = reply.status();
    let reply: Reply = reply.json().await?;

    if let Some(error) = reply.value.get("error").and_then(Value::as_str) {
        let message = reply
            .value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(E2eError::WebDriver(format!("{} ({}): {}", error, status, message)));
    }
    if !status.is_success() {
        return Err(E2eError::WebDriver(format!("driver returned {}", status)));
    }

    Ok(reply.value)
}

fn parse_session_id(body: &Value) -> E2eResult<String> {
    body.pointer("/value/sessionId")
        .or_else(|| body.get("sessionId"))
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| E2eError::WebDriver(format!("no session id in new-session response: {}", body)))
}

fn parse_element(value: &Value) -> E2eResult<Element> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get(LEGACY_ELEMENT_KEY))
        .and_then(Value::as_str)
        .map(|id| Element { id: id.to_string() })
        .ok_or_else(|| E2eError::WebDriver(format!("not an element reference: {}", value)))
}

fn parse_elements(value: &Value) -> E2eResult<Vec<Element>> {
    value
        .as_array()
        .ok_or_else(|| E2eError::WebDriver(format!("expected an element list: {}", value)))?
        .iter()
        .map(parse_element)
        .collect()
}
