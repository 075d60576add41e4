//! Fixture lock commands

use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use crudcheck_common::lock::TokenInfo;
use crudcheck_common::HarnessConfig;

use crate::output::{print_info, print_item, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum LockCommands {
    /// Show whether the lock token is present and who holds it
    Status,

    /// Remove the token regardless of holder
    Clear,

    /// Remove the token if it is older than the stale bound
    Sweep {
        /// Override the configured stale bound (milliseconds)
        #[arg(long)]
        max_age_ms: Option<u64>,
    },
}

/// Lock token display wrapper for serialization
#[derive(Serialize)]
pub struct LockDisplay {
    pub resource: String,
    pub present: bool,
    pub holder: Option<String>,
    pub pid: Option<u32>,
    pub acquired_at: Option<String>,
    pub age_ms: Option<u64>,
}

impl LockDisplay {
    fn new(resource: String, token: Option<TokenInfo>) -> Self {
        let age_ms = token.as_ref().map(|t| t.age.as_millis() as u64);
        let record = token.and_then(|t| t.record);
        Self {
            resource,
            present: age_ms.is_some(),
            holder: record.as_ref().map(|r| r.holder.to_string()),
            pid: record.as_ref().map(|r| r.pid),
            acquired_at: record
                .as_ref()
                .map(|r| r.acquired_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            age_ms,
        }
    }
}

impl TableDisplay for LockDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Resource", "State", "Holder", "PID", "Acquired", "Age"]
    }

    fn row(&self) -> Vec<String> {
        let dash = || "-".to_string();
        vec![
            self.resource.clone(),
            if self.present { "held" } else { "free" }.to_string(),
            self.holder.clone().unwrap_or_else(dash),
            self.pid.map(|p| p.to_string()).unwrap_or_else(dash),
            self.acquired_at.clone().unwrap_or_else(dash),
            self.age_ms
                .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
                .unwrap_or_else(dash),
        ]
    }
}

pub fn execute(cmd: LockCommands, config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    let lock = config.fixture_lock();

    match cmd {
        LockCommands::Status => {
            let display = LockDisplay::new(lock.describe(), lock.inspect()?);
            print_item(&display, format);
        }

        LockCommands::Clear => {
            if lock.clear()? {
                print_warning(&format!("Removed lock token {}", lock.describe()));
            } else {
                print_info("No lock token present");
            }
        }

        LockCommands::Sweep { max_age_ms } => {
            let lock = match max_age_ms {
                Some(ms) => lock.with_stale_after(Some(Duration::from_millis(ms))),
                None => lock,
            };
            if lock.sweep()? {
                print_success(&format!("Swept stale lock token {}", lock.describe()));
            } else {
                print_info("No stale lock token");
            }
        }
    }

    Ok(())
}
