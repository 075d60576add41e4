//! Harness configuration
//!
//! Loaded once at startup: an optional TOML file, then `CRUDCHECK_*`
//! environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lock::{FixtureLock, DEFAULT_LOCK_TIMEOUT, DEFAULT_STALE_AFTER, LOCK_POLL_INTERVAL};
use crate::orchestrator::{FixtureOrchestrator, LockPolicy, DEFAULT_SETTLE_DELAY};
use crate::poller::{ConvergencePoller, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use crate::snapshot::{FixtureSnapshot, CONTACTS_TABLE};
use crate::store::SqliteStore;
use crate::{Error, Result};

pub const ENV_DB_PATH: &str = "CRUDCHECK_DB_PATH";
pub const ENV_LOCK_PATH: &str = "CRUDCHECK_LOCK_PATH";
pub const ENV_BASE_URL: &str = "CRUDCHECK_BASE_URL";
pub const ENV_WEBDRIVER_URL: &str = "CRUDCHECK_WEBDRIVER_URL";
pub const ENV_HEADLESS: &str = "CRUDCHECK_HEADLESS";
pub const ENV_USERNAME: &str = "CRUDCHECK_USERNAME";
pub const ENV_PASSWORD: &str = "CRUDCHECK_PASSWORD";

/// Top-level harness configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub store: StoreConfig,
    pub lock: LockConfig,
    pub poll: PollConfig,
    pub reset: ResetConfig,
    pub app: AppConfig,
}

/// Shared backing store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file shared with the application under test
    pub db_path: PathBuf,

    /// Table the fixture snapshot seeds
    pub table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("db/damncrud.db"),
            table: CONTACTS_TABLE.to_string(),
        }
    }
}

/// Fixture lock settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Token file; must be on a filesystem every worker can see
    pub path: PathBuf,

    pub timeout_ms: u64,

    pub poll_interval_ms: u64,

    /// Age after which a token is swept; 0 disables sweeping
    pub stale_after_ms: u64,

    pub policy: LockPolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tests/.db_lock"),
            timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            poll_interval_ms: LOCK_POLL_INTERVAL.as_millis() as u64,
            stale_after_ms: DEFAULT_STALE_AFTER.as_millis() as u64,
            policy: LockPolicy::BestEffort,
        }
    }
}

/// Convergence poller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

/// Reset settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    pub settle_delay_ms: u64,

    /// Snapshot file (TOML or YAML); the built-in contacts seed when unset
    pub snapshot: Option<PathBuf>,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: DEFAULT_SETTLE_DELAY.as_millis() as u64,
            snapshot: None,
        }
    }
}

/// Application under test and the browser driving it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,

    /// WebDriver endpoint (chromedriver)
    pub webdriver_url: String,

    pub headless: bool,

    /// Implicit wait applied to every element lookup
    pub implicit_wait_ms: u64,

    /// Bound on the post-login redirect
    pub login_timeout_ms: u64,

    pub username: String,

    pub password: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost/DamnCRUD".to_string(),
            webdriver_url: "http://127.0.0.1:9515".to_string(),
            headless: false,
            implicit_wait_ms: 10_000,
            login_timeout_ms: 10_000,
            username: "admin".to_string(),
            password: "nimda666!".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when missing
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Load `path` (if given) and apply the environment
    pub fn from_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var(ENV_DB_PATH) {
            self.store.db_path = PathBuf::from(v);
        }
        if let Some(v) = var(ENV_LOCK_PATH) {
            self.lock.path = PathBuf::from(v);
        }
        if let Some(v) = var(ENV_BASE_URL) {
            self.app.base_url = v;
        }
        if let Some(v) = var(ENV_WEBDRIVER_URL) {
            self.app.webdriver_url = v;
        }
        if let Some(v) = var(ENV_HEADLESS) {
            self.app.headless = parse_flag(ENV_HEADLESS, &v)?;
        }
        if let Some(v) = var(ENV_USERNAME) {
            self.app.username = v;
        }
        if let Some(v) = var(ENV_PASSWORD) {
            self.app.password = v;
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock.timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.reset.settle_delay_ms)
    }

    pub fn poller(&self) -> ConvergencePoller {
        ConvergencePoller::new(self.poll.max_attempts, Duration::from_millis(self.poll.interval_ms))
    }

    pub fn fixture_lock(&self) -> FixtureLock {
        let stale_after = match self.lock.stale_after_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        FixtureLock::file(&self.lock.path)
            .with_poll_interval(Duration::from_millis(self.lock.poll_interval_ms))
            .with_stale_after(stale_after)
    }

    /// The snapshot to reset to: the configured file, or the built-in seed
    /// retargeted at the configured table
    pub fn snapshot(&self) -> Result<FixtureSnapshot> {
        match &self.reset.snapshot {
            Some(path) => FixtureSnapshot::load(path),
            None => {
                let mut snapshot = FixtureSnapshot::contacts();
                snapshot.table = self.store.table.clone();
                Ok(snapshot)
            }
        }
    }

    pub fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.store.db_path)
    }

    /// Wire store, lock and snapshot into an orchestrator
    pub fn orchestrator(&self) -> Result<FixtureOrchestrator<SqliteStore>> {
        Ok(FixtureOrchestrator::new(self.open_store()?, self.fixture_lock())
            .with_snapshot(self.snapshot()?)
            .with_lock_timeout(self.lock_timeout())
            .with_lock_policy(self.lock.policy)
            .with_settle_delay(self.settle_delay()))
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::InvalidConfig(format!("{} must be a boolean, got {:?}", name, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = HarnessConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.poller(), ConvergencePoller::new(3, Duration::from_secs(1)));
        assert_eq!(config.lock_timeout(), Duration::from_secs(10));
        assert_eq!(config.settle_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_save_load_partial_sections() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("crudcheck.toml");
        std::fs::write(
            &path,
            r#"
[lock]
timeout_ms = 2000
policy = "abort"

[poll]
max_attempts = 5
"#,
        )
        .unwrap();

        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.lock.timeout_ms, 2000);
        assert_eq!(config.lock.policy, LockPolicy::Abort);
        assert_eq!(config.lock.poll_interval_ms, 500);
        assert_eq!(config.poll.max_attempts, 5);
        assert_eq!(config.app, AppConfig::default());

        let saved = tmp.path().join("out").join("saved.toml");
        config.save(&saved).unwrap();
        assert_eq!(HarnessConfig::load(&saved).unwrap(), config);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_DB_PATH, "/tmp/app.db"),
            (ENV_BASE_URL, "http://app.test"),
            (ENV_HEADLESS, "true"),
            (ENV_PASSWORD, "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = HarnessConfig::default();
        config
            .apply_vars(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.store.db_path, PathBuf::from("/tmp/app.db"));
        assert_eq!(config.app.base_url, "http://app.test");
        assert!(config.app.headless);
        assert_eq!(config.app.password, "secret");
        assert_eq!(config.app.username, "admin");
    }

    #[test_case("1", true ; "one")]
    #[test_case("TRUE", true ; "upper true")]
    #[test_case("off", false ; "off")]
    #[test_case("", false ; "empty")]
    fn test_parse_flag(value: &str, expected: bool) {
        assert_eq!(parse_flag("X", value).unwrap(), expected);
    }

    #[test]
    fn test_parse_flag_rejects_garbage() {
        assert!(matches!(parse_flag("X", "maybe"), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_snapshot_follows_configured_table() {
        let mut config = HarnessConfig::default();
        config.store.table = "people".to_string();
        let snapshot = config.snapshot().unwrap();
        assert_eq!(snapshot.table, "people");
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn test_orchestrator_from_config() {
        let tmp = TempDir::new().unwrap();
        let mut config = HarnessConfig::default();
        config.store.db_path = tmp.path().join("app.db");
        config.lock.path = tmp.path().join(".db_lock");
        config.reset.settle_delay_ms = 0;

        let orch = config.orchestrator().unwrap();
        assert_eq!(orch.reset().unwrap().inserted, 3);
        assert!(!config.lock.path.exists());
    }
}
