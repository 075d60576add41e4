//! Scenario runner: reset the store, open a session, run, close

use std::path::{Path, PathBuf};
use std::time::Instant;

use crudcheck_common::{
    ConvergencePoller, FixtureOrchestrator, FixtureStore, HarnessConfig, ResetReport, SqliteStore,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::scenarios::{self, Scenario, ScenarioContext};
use crate::session::{Credentials, Session, SessionConfig};

/// Name of the results file written by [`ScenarioRunner::write_results`]
pub const RESULTS_FILE: &str = "scenario-results.json";

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    /// The fixture reset that preceded the run, if it got that far
    pub reset: Option<ResetReport>,
    pub error: Option<String>,
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Runs scenarios one after another against a live application
pub struct ScenarioRunner<S: FixtureStore> {
    orchestrator: FixtureOrchestrator<S>,
    session_config: SessionConfig,
    credentials: Credentials,
    poller: ConvergencePoller,
    output_dir: PathBuf,
}

impl ScenarioRunner<SqliteStore> {
    /// Runner wired from harness configuration
    pub fn from_config(config: &HarnessConfig) -> E2eResult<Self> {
        Ok(Self::new(
            config.orchestrator()?,
            SessionConfig::from_harness(config),
            Credentials::new(&config.app.username, &config.app.password),
        )
        .with_poller(config.poller()))
    }
}

impl<S: FixtureStore> ScenarioRunner<S> {
    pub fn new(
        orchestrator: FixtureOrchestrator<S>,
        session_config: SessionConfig,
        credentials: Credentials,
    ) -> Self {
        Self {
            orchestrator,
            session_config,
            credentials,
            poller: ConvergencePoller::default(),
            output_dir: PathBuf::from("test-results"),
        }
    }

    pub fn with_poller(mut self, poller: ConvergencePoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn orchestrator(&self) -> &FixtureOrchestrator<S> {
        &self.orchestrator
    }

    /// Run the whole catalogue
    pub fn run_all(&self) -> SuiteResult {
        self.run_scenarios(&scenarios::catalogue())
    }

    /// Run one scenario by name
    pub fn run_named(&self, name: &str) -> E2eResult<SuiteResult> {
        let scenario = scenarios::find(name).ok_or_else(|| E2eError::ScenarioNotFound(name.to_string()))?;
        Ok(self.run_scenarios(&[scenario]))
    }

    pub fn run_scenarios(&self, scenarios: &[Box<dyn Scenario>]) -> SuiteResult {
        let start = Instant::now();
        let mut results = Vec::new();
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} scenario(s)...", scenarios.len());

        for scenario in scenarios {
            let result = self.run_scenario(scenario.as_ref());
            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!("✗ {} - {}", result.name, result.error.as_deref().unwrap_or("unknown error"));
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        info!("");
        info!("Scenario Results: {} passed, {} failed ({} ms)", passed, failed, duration_ms);

        SuiteResult {
            total: scenarios.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    /// Run a single scenario; failures are captured in the result
    pub fn run_scenario(&self, scenario: &dyn Scenario) -> ScenarioResult {
        let start = Instant::now();
        debug!("Running scenario: {}", scenario.name());

        let mut reset = None;
        let outcome = self.execute(scenario, &mut reset);

        ScenarioResult {
            name: scenario.name().to_string(),
            success: outcome.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
            reset,
            error: outcome.err().map(|e| e.to_string()),
        }
    }

    fn execute(&self, scenario: &dyn Scenario, reset: &mut Option<ResetReport>) -> E2eResult<()> {
        *reset = Some(self.orchestrator.reset_to(&scenario.snapshot())?);

        let session = Session::open(self.session_config.clone())?;
        let session = if scenario.requires_login() {
            session.authenticate(&self.credentials)?
        } else {
            session
        };

        let outcome = scenario.run(&ScenarioContext::new(&session, self.poller));

        if let Err(e) = session.close() {
            warn!("Closing session after {} failed: {}", scenario.name(), e);
        }

        outcome
    }

    /// Write suite results to JSON in the output directory
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;

        let path = self.output_dir.join(RESULTS_FILE);
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crudcheck_common::{FixtureLock, FixtureSnapshot, Record};
    use std::time::Duration;
    use tempfile::TempDir;

    fn runner(tmp: &TempDir) -> ScenarioRunner<SqliteStore> {
        let store = SqliteStore::open(tmp.path().join("damncrud.db")).unwrap();
        let lock = FixtureLock::file(tmp.path().join(".db_lock"));
        let orchestrator = FixtureOrchestrator::new(store, lock).with_settle_delay(Duration::ZERO);
        let session_config = SessionConfig {
            webdriver_url: "http://127.0.0.1:1".to_string(),
            ..SessionConfig::default()
        };
        ScenarioRunner::new(orchestrator, session_config, Credentials::new("admin", "nimda666!"))
            .with_output_dir(tmp.path().join("results"))
    }

    #[test]
    fn test_unreachable_driver_fails_after_reset() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp);
        let store = runner.orchestrator().store();
        store
            .insert_many("contacts", &[Record::new().with("name", "Leftover").with("email", "l@x")])
            .unwrap();

        let result = runner.run_scenario(&scenarios::ViewContactList);

        assert!(!result.success);
        assert!(result.error.unwrap().contains("WebDriver"));
        let reset = result.reset.unwrap();
        assert!(reset.lock_held);
        assert_eq!(reset.inserted, 3);

        let rows = store.query_all("contacts").unwrap();
        assert!(FixtureSnapshot::contacts().matches_rows(&rows));
        assert!(!tmp.path().join(".db_lock").exists());
    }

    #[test]
    fn test_unknown_scenario_name() {
        let tmp = TempDir::new().unwrap();
        let err = runner(&tmp).run_named("nope").unwrap_err();
        assert!(matches!(err, E2eError::ScenarioNotFound(_)));
    }

    #[test]
    fn test_suite_counts_and_results_file() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp);

        let suite = runner.run_named("protected-page-redirect").unwrap();
        assert_eq!(suite.total, 1);
        assert_eq!(suite.failed, 1);
        assert!(!suite.success());

        let path = runner.write_results(&suite).unwrap();
        assert_eq!(path.file_name().unwrap(), RESULTS_FILE);
        let written: SuiteResult = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.results[0].name, "protected-page-redirect");
    }
}
