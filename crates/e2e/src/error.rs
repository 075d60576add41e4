//! Error types for E2E testing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error(transparent)]
    Harness(#[from] crudcheck_common::Error),

    #[error("WebDriver session could not be created: {0}")]
    SessionStartup(String),

    #[error("WebDriver command {command} failed: {error}: {message}")]
    WebDriver {
        command: String,
        error: String,
        message: String,
    },

    #[error("Unexpected WebDriver response to {command}: {detail}")]
    Protocol { command: String, detail: String },

    /// Login did not land on the authenticated area in time
    #[error("Authentication timed out: still at {url} after {attempts} check(s)")]
    AuthenticationTimeout { url: String, attempts: u32 },

    #[error("Session already closed")]
    SessionClosed,

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl E2eError {
    /// Whether this is a lookup miss rather than a broken session
    pub fn is_no_such_element(&self) -> bool {
        matches!(self, E2eError::WebDriver { error, .. } if error == "no such element")
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
