//! Error types for crudcheck

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the crudcheck Error
pub type Result<T> = std::result::Result<T, Error>;

/// crudcheck error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("Snapshot parse error: {0}")]
    SnapshotParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The fixture lock could not be obtained within the bound.
    #[error("Timed out after {waited:?} waiting for fixture lock {resource}")]
    LockTimeout { resource: String, waited: Duration },

    /// A store mutation failed during reset; the transaction was rolled back.
    #[error("Fixture reset of table '{table}' failed: {source}")]
    Reset {
        table: String,
        #[source]
        source: Box<Error>,
    },

    /// The expectation never held within the attempt budget.
    #[error("Convergence timeout: {expectation} not met after {attempts} attempt(s); last sample: {last_sample}")]
    ConvergenceTimeout {
        expectation: String,
        attempts: u32,
        last_sample: String,
    },

    #[error("Store error: {0}")]
    Store(String),

    /// A rendered view could not be sampled.
    #[error("View error: {0}")]
    View(String),
}

impl Error {
    /// Wrap a failure that happened while resetting `table`.
    pub fn reset(table: impl Into<String>, source: Error) -> Self {
        Error::Reset {
            table: table.into(),
            source: Box::new(source),
        }
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }

    pub fn is_convergence_timeout(&self) -> bool {
        matches!(self, Error::ConvergenceTimeout { .. })
    }
}
