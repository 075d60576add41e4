//! Scenario Commands

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use crudcheck_common::HarnessConfig;
use crudcheck_e2e::scenarios::{self, Scenario};
use crudcheck_e2e::{ScenarioResult, ScenarioRunner, SuiteResult};

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct RunArgs {
    /// Run only this scenario
    #[arg(short, long)]
    pub scenario: Option<String>,

    /// Directory for scenario-results.json
    #[arg(short, long, default_value = "test-results")]
    pub output: PathBuf,
}

/// Catalogue entry display wrapper
#[derive(Serialize)]
pub struct ScenarioDisplay {
    pub name: String,
    pub login: bool,
    pub description: String,
}

impl From<&dyn Scenario> for ScenarioDisplay {
    fn from(scenario: &dyn Scenario) -> Self {
        Self {
            name: scenario.name().to_string(),
            login: scenario.requires_login(),
            description: scenario.description().to_string(),
        }
    }
}

impl TableDisplay for ScenarioDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Login", "Description"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            if self.login { "yes" } else { "no" }.to_string(),
            self.description.clone(),
        ]
    }
}

impl TableDisplay for ScenarioResult {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario", "Result", "Duration", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            if self.success {
                "PASS".green().to_string()
            } else {
                "FAIL".red().bold().to_string()
            },
            format!("{} ms", self.duration_ms),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

/// List the scenario catalogue
pub fn list(format: OutputFormat) -> Result<()> {
    let displays: Vec<ScenarioDisplay> = scenarios::catalogue()
        .iter()
        .map(|s| ScenarioDisplay::from(s.as_ref()))
        .collect();
    print_list(&displays, format);
    Ok(())
}

/// Run one scenario or the whole catalogue against the live application
pub fn run(args: RunArgs, config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    let runner = ScenarioRunner::from_config(config)?.with_output_dir(&args.output);

    let suite = match &args.scenario {
        Some(name) => runner.run_named(name)?,
        None => runner.run_all(),
    };
    runner.write_results(&suite)?;

    report(&suite, format)
}

fn report(suite: &SuiteResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(suite)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(suite)?),
        _ => {
            print_list(&suite.results, format);
            println!(
                "{} passed, {} failed ({} ms)",
                suite.passed.to_string().green(),
                suite.failed.to_string().red(),
                suite.duration_ms
            );
        }
    }

    if !suite.success() {
        bail!("{} of {} scenario(s) failed", suite.failed, suite.total);
    }
    Ok(())
}
