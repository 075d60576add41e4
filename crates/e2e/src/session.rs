//! Browser session lifecycle
//!
//! A [`Session`] owns one WebDriver session with a fixed implicit wait. It is
//! closed exactly once: explicitly through [`Session::close`], or on drop.

use std::fmt;
use std::time::Duration;

use crudcheck_common::{ConvergencePoller, Error, HarnessConfig};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::webdriver::{self, Locator, WebDriverClient};

/// Implicit wait applied to every element lookup
pub const DEFAULT_IMPLICIT_WAIT: Duration = Duration::from_secs(10);

/// Pause between checks of the post-login URL
const LOGIN_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Where and how to log in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSurface {
    pub path: String,
    pub username: Locator,
    pub password: Locator,
    pub submit: Locator,
    /// Substring of the URL reached after a successful login
    pub success_pattern: String,
}

impl Default for LoginSurface {
    fn default() -> Self {
        Self {
            path: "/login.php".to_string(),
            username: Locator::id("inputUsername"),
            password: Locator::id("inputPassword"),
            submit: Locator::xpath("//button[@type='submit']"),
            success_pattern: "/index.php".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub identifier: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"***")
            .finish()
    }
}

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub webdriver_url: String,
    pub base_url: String,
    pub headless: bool,
    pub implicit_wait: Duration,
    pub login_timeout: Duration,
    pub login: LoginSurface,
    /// Budget for in-page waits such as [`Session::wait_for_url`]
    pub poller: ConvergencePoller,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_harness(&HarnessConfig::default())
    }
}

impl SessionConfig {
    pub fn from_harness(config: &HarnessConfig) -> Self {
        Self {
            webdriver_url: config.app.webdriver_url.clone(),
            base_url: config.app.base_url.clone(),
            headless: config.app.headless,
            implicit_wait: Duration::from_millis(config.app.implicit_wait_ms),
            login_timeout: Duration::from_millis(config.app.login_timeout_ms),
            login: LoginSurface::default(),
            poller: config.poller(),
        }
    }

    /// Absolute URL for an application path; absolute URLs pass through
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Poller bounding the post-login redirect by `login_timeout`
    pub fn login_poller(&self) -> ConvergencePoller {
        let checks = self.login_timeout.as_millis() / LOGIN_CHECK_INTERVAL.as_millis();
        ConvergencePoller::new(
            (checks.min(u32::MAX as u128) as u32).saturating_add(1),
            LOGIN_CHECK_INTERVAL,
        )
    }
}

/// One live browser session
pub struct Session {
    client: WebDriverClient,
    id: Option<String>,
    config: SessionConfig,
    authenticated: bool,
}

impl Session {
    /// Start a browser, set the implicit wait, and maximize the window.
    pub fn open(config: SessionConfig) -> E2eResult<Self> {
        let client = WebDriverClient::new(&config.webdriver_url)?;
        let id = client.new_session(&webdriver::capabilities(config.headless))?;

        let session = Session {
            client,
            id: Some(id),
            config,
            authenticated: false,
        };

        session.command(
            Method::POST,
            "timeouts",
            Some(json!({ "implicit": session.config.implicit_wait.as_millis() as u64 })),
        )?;

        if let Err(e) = session.command(Method::POST, "window/maximize", None) {
            warn!("Could not maximize window: {}", e);
        }

        info!(
            "Opened {} browser session {}",
            if session.config.headless { "headless" } else { "visible" },
            session.id().unwrap_or_default()
        );
        Ok(session)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// End the browser session
    pub fn close(mut self) -> E2eResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> E2eResult<()> {
        match self.id.take() {
            Some(id) => {
                self.client.delete_session(&id)?;
                info!("Closed browser session {}", id);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Log in through the login form and wait for the redirect into the
    /// authenticated area. On timeout the session is closed on drop.
    pub fn authenticate(mut self, credentials: &Credentials) -> E2eResult<Self> {
        let login = self.config.login.clone();

        self.open_page(&login.path)?;
        self.find(&login.username)?.send_keys(&credentials.identifier)?;
        self.find(&login.password)?.send_keys(&credentials.secret)?;
        self.find(&login.submit)?.click()?;

        let poller = self.config.login_poller();
        match self.wait_for_url(&login.success_pattern, &poller) {
            Ok(url) => {
                info!("Authenticated as {} ({})", credentials.identifier, url);
                self.authenticated = true;
                Ok(self)
            }
            Err(E2eError::Harness(Error::ConvergenceTimeout { attempts, .. })) => {
                let url = self.current_url().unwrap_or_default();
                Err(E2eError::AuthenticationTimeout { url, attempts })
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn command(&self, method: Method, suffix: &str, body: Option<Value>) -> E2eResult<Value> {
        let id = self.id.as_deref().ok_or(E2eError::SessionClosed)?;
        let path = if suffix.is_empty() {
            format!("/session/{}", id)
        } else {
            format!("/session/{}/{}", id, suffix)
        };
        self.client.command(method, &path, body)
    }

    pub fn navigate(&self, url: &str) -> E2eResult<()> {
        debug!("Navigating to {}", url);
        self.command(Method::POST, "url", Some(json!({ "url": url })))?;
        Ok(())
    }

    /// Navigate to a path under the application base URL
    pub fn open_page(&self, path: &str) -> E2eResult<()> {
        self.navigate(&self.config.url_for(path))
    }

    pub fn current_url(&self) -> E2eResult<String> {
        let value = self.command(Method::GET, "url", None)?;
        webdriver::string_value("GET url", &value)
    }

    pub fn refresh(&self) -> E2eResult<()> {
        self.command(Method::POST, "refresh", None)?;
        Ok(())
    }

    /// First matching element, waiting up to the implicit wait
    pub fn find(&self, locator: &Locator) -> E2eResult<Element<'_>> {
        let value = self.command(Method::POST, "element", Some(locator.to_json()))?;
        let id = webdriver::element_id(&format!("find {}", locator), &value)?;
        Ok(Element { session: self, id })
    }

    /// All matching elements; empty once the implicit wait passes with none
    pub fn find_all(&self, locator: &Locator) -> E2eResult<Vec<Element<'_>>> {
        let value = self.command(Method::POST, "elements", Some(locator.to_json()))?;
        let ids = webdriver::element_ids(&format!("find all {}", locator), &value)?;
        Ok(ids.into_iter().map(|id| Element { session: self, id }).collect())
    }

    /// Bounded presence wait for a single element
    pub fn wait_for(&self, locator: &Locator) -> E2eResult<Element<'_>> {
        let converged = self.config.poller.poll_until(
            &format!("element {} present", locator),
            || self.find(locator),
            |_| true,
        )?;
        Ok(converged.sample)
    }

    /// Poll until at least one element matches
    pub fn wait_for_all(&self, locator: &Locator) -> E2eResult<Vec<Element<'_>>> {
        let converged = self.config.poller.poll_until(
            &format!("elements {} present", locator),
            || self.find_all(locator),
            |found| !found.is_empty(),
        )?;
        Ok(converged.sample)
    }

    /// Poll the current URL until it contains `pattern`
    pub fn wait_for_url(&self, pattern: &str, poller: &ConvergencePoller) -> E2eResult<String> {
        let converged = poller.poll_until(
            &format!("URL containing {:?}", pattern),
            || self.current_url(),
            |url| url.contains(pattern),
        )?;
        Ok(converged.sample)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("webdriver", &self.client.endpoint())
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Failed to close browser session: {}", e);
        }
    }
}

/// An element reference scoped to its session
pub struct Element<'s> {
    session: &'s Session,
    id: String,
}

impl fmt::Debug for Element<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Element").field(&self.id).finish()
    }
}

impl<'s> Element<'s> {
    fn command(&self, method: Method, action: &str, body: Option<Value>) -> E2eResult<Value> {
        self.session
            .command(method, &format!("element/{}/{}", self.id, action), body)
    }

    pub fn click(&self) -> E2eResult<()> {
        self.command(Method::POST, "click", None)?;
        Ok(())
    }

    pub fn clear(&self) -> E2eResult<()> {
        self.command(Method::POST, "clear", None)?;
        Ok(())
    }

    pub fn send_keys(&self, text: &str) -> E2eResult<()> {
        self.command(Method::POST, "value", Some(json!({ "text": text })))?;
        Ok(())
    }

    /// Replace the field's content
    pub fn fill(&self, text: &str) -> E2eResult<()> {
        self.clear()?;
        self.send_keys(text)
    }

    /// Rendered text
    pub fn text(&self) -> E2eResult<String> {
        let value = self.command(Method::GET, "text", None)?;
        webdriver::string_value("GET text", &value)
    }

    /// Markup attribute as written, if present
    pub fn attribute(&self, name: &str) -> E2eResult<Option<String>> {
        let value = self.command(Method::GET, &format!("attribute/{}", name), None)?;
        Ok(value.as_str().map(str::to_string))
    }

    /// DOM property; for `href` this is the resolved absolute URL
    pub fn property(&self, name: &str) -> E2eResult<Option<String>> {
        let value = self.command(Method::GET, &format!("property/{}", name), None)?;
        Ok(value.as_str().map(str::to_string))
    }

    /// Descendants of this element matching `locator`
    pub fn find_all_within(&self, locator: &Locator) -> E2eResult<Vec<Element<'s>>> {
        let value = self.command(Method::POST, "elements", Some(locator.to_json()))?;
        let ids = webdriver::element_ids(&format!("find all {} in element", locator), &value)?;
        Ok(ids
            .into_iter()
            .map(|id| Element {
                session: self.session,
                id,
            })
            .collect())
    }
}
