//! W3C WebDriver wire protocol over blocking HTTP
//!
//! Speaks to a chromedriver-compatible endpoint. Replies are JSON objects with
//! a top-level `value`; failures carry `value.error` and `value.message`.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// Key under which element references are returned
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Per-request HTTP timeout; must exceed the implicit wait
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// How to find an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    Css(String),
    XPath(String),
    Tag(String),
    Class(String),
}

impl Locator {
    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(path: impl Into<String>) -> Self {
        Locator::XPath(path.into())
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Locator::Tag(name.into())
    }

    pub fn class(name: impl Into<String>) -> Self {
        Locator::Class(name.into())
    }

    /// The `{using, value}` body for find commands. W3C has no id or class
    /// strategy, so both become CSS selectors.
    pub fn to_json(&self) -> Value {
        let (using, value) = match self {
            Locator::Id(id) => ("css selector", format!("[id=\"{}\"]", id)),
            Locator::Css(selector) => ("css selector", selector.clone()),
            Locator::XPath(path) => ("xpath", path.clone()),
            Locator::Tag(name) => ("tag name", name.clone()),
            Locator::Class(name) => ("css selector", format!(".{}", name)),
        };
        json!({ "using": using, "value": value })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "#{}", id),
            Locator::Css(selector) => write!(f, "css {}", selector),
            Locator::XPath(path) => write!(f, "xpath {}", path),
            Locator::Tag(name) => write!(f, "<{}>", name),
            Locator::Class(name) => write!(f, ".{}", name),
        }
    }
}

/// New-session capabilities for Chrome
pub fn capabilities(headless: bool) -> Value {
    let mut args = Vec::new();
    if headless {
        args.push("--headless");
    }
    args.extend([
        "--no-sandbox",
        "--disable-dev-shm-usage",
        "--disable-blink-features=AutomationControlled",
    ]);

    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": { "args": args }
            }
        }
    })
}

/// Unwrap a reply body into its `value`, turning error replies into
/// [`E2eError::WebDriver`].
pub fn parse_reply(command: &str, success: bool, body: &str) -> E2eResult<Value> {
    let reply: Value = serde_json::from_str(body).map_err(|e| E2eError::Protocol {
        command: command.to_string(),
        detail: format!("reply is not JSON ({}): {}", e, truncate(body, 200)),
    })?;

    let value = reply.get("value").cloned().unwrap_or(Value::Null);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(E2eError::WebDriver {
            command: command.to_string(),
            error: error.to_string(),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }

    if !success {
        return Err(E2eError::Protocol {
            command: command.to_string(),
            detail: format!("error status without error body: {}", truncate(body, 200)),
        });
    }

    Ok(value)
}

pub fn session_id(value: &Value) -> E2eResult<String> {
    value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| E2eError::Protocol {
            command: "new session".to_string(),
            detail: "reply has no sessionId".to_string(),
        })
}

pub fn element_id(command: &str, value: &Value) -> E2eResult<String> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| E2eError::Protocol {
            command: command.to_string(),
            detail: format!("not an element reference: {}", value),
        })
}

pub fn element_ids(command: &str, value: &Value) -> E2eResult<Vec<String>> {
    match value.as_array() {
        Some(items) => items.iter().map(|item| element_id(command, item)).collect(),
        None => Err(E2eError::Protocol {
            command: command.to_string(),
            detail: format!("expected an array of elements: {}", value),
        }),
    }
}

/// String reply, e.g. element text or current URL
pub fn string_value(command: &str, value: &Value) -> E2eResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| E2eError::Protocol {
            command: command.to_string(),
            detail: format!("expected a string: {}", value),
        })
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Raw protocol client bound to one WebDriver endpoint
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: Client,
    endpoint: String,
}

impl WebDriverClient {
    pub fn new(endpoint: &str) -> E2eResult<Self> {
        let http = Client::builder().timeout(COMMAND_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Create a browser session and return its id
    pub fn new_session(&self, capabilities: &Value) -> E2eResult<String> {
        let value = self
            .command(Method::POST, "/session", Some(capabilities.clone()))
            .map_err(|e| match e {
                E2eError::Http(http) => E2eError::SessionStartup(format!(
                    "WebDriver at {} unreachable: {}",
                    self.endpoint, http
                )),
                E2eError::WebDriver { error, message, .. } => {
                    E2eError::SessionStartup(format!("{}: {}", error, message))
                }
                other => other,
            })?;
        session_id(&value)
    }

    pub fn delete_session(&self, session_id: &str) -> E2eResult<()> {
        self.command(Method::DELETE, &format!("/session/{}", session_id), None)?;
        Ok(())
    }

    /// Send one command. POST always carries a body, `{}` when empty.
    pub fn command(&self, method: Method, path: &str, body: Option<Value>) -> E2eResult<Value> {
        let label = format!("{} {}", method, path);
        debug!("WebDriver {}", label);

        let url = format!("{}{}", self.endpoint, path);
        let mut request = self.http.request(method.clone(), &url);
        if method == Method::POST {
            request = request.json(&body.unwrap_or_else(|| json!({})));
        }

        let response = request.send()?;
        let success = response.status().is_success();
        let text = response.text()?;
        parse_reply(&label, success, &text)
    }
}
