//! Database Commands

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;

use crudcheck_common::{FixtureSnapshot, HarnessConfig, ResetReport, StoreReport};

use crate::output::{print_info, print_item, print_success, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct SetupArgs {
    /// Skip the sample contacts
    #[arg(long)]
    pub no_sample: bool,
}

#[derive(Args)]
pub struct ResetArgs {
    /// Snapshot file (.toml, .yaml) to reset to instead of the configured one
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

/// Store report display wrapper
#[derive(Serialize)]
pub struct StoreDisplay {
    pub database: String,
    pub tables: Vec<String>,
    pub users: i64,
    pub admin: Option<String>,
    pub contacts: i64,
}

impl StoreDisplay {
    fn new(config: &HarnessConfig, report: StoreReport) -> Self {
        Self {
            database: config.store.db_path.display().to_string(),
            tables: report.tables,
            users: report.users,
            admin: report.admin,
            contacts: report.contacts,
        }
    }
}

impl TableDisplay for StoreDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Database", "Tables", "Users", "Admin", "Contacts"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.database.clone(),
            self.tables.join(", "),
            self.users.to_string(),
            self.admin.clone().unwrap_or_else(|| "-".to_string()),
            self.contacts.to_string(),
        ]
    }
}

impl TableDisplay for ResetReport {
    fn headers() -> Vec<&'static str> {
        vec!["Table", "Deleted", "Inserted", "Locked", "Duration"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.table.clone(),
            self.deleted.to_string(),
            self.inserted.to_string(),
            if self.lock_held { "yes" } else { "no" }.to_string(),
            format!("{} ms", self.duration_ms),
        ]
    }
}

/// Create the schema, the admin account and (optionally) sample contacts
pub fn setup(args: SetupArgs, config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    let store = config.open_store()?;

    if store.seed_admin(&config.app.username, &config.app.password)? {
        print_success(&format!("Admin user '{}' created", config.app.username));
    } else {
        print_info(&format!("Admin user '{}' already exists", config.app.username));
    }

    if !args.no_sample {
        let inserted = store.seed_sample_contacts()?;
        print_success(&format!("{} sample contact(s) inserted", inserted));
    }

    let report = store.verify()?;
    print_item(&StoreDisplay::new(config, report), format);
    Ok(())
}

/// Report what the database holds; fails if no admin account exists or the
/// configured credentials do not log in
pub fn verify(config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    let store = config.open_store()?;
    let report = store.verify()?;
    let missing_admin = report.admin.is_none();
    print_item(&StoreDisplay::new(config, report), format);

    if missing_admin {
        bail!("no user in {}; run `crudcheck setup`", config.store.db_path.display());
    }
    if !store.check_credentials(&config.app.username, &config.app.password)? {
        bail!(
            "configured credentials for '{}' do not match {}",
            config.app.username,
            config.store.db_path.display()
        );
    }
    Ok(())
}

/// Reset the contacts table to the fixture snapshot under the lock
pub fn reset(args: ResetArgs, config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    let mut orchestrator = config.orchestrator()?;
    if let Some(path) = args.snapshot {
        orchestrator = orchestrator.with_snapshot(FixtureSnapshot::load(&path)?);
    }

    let report = orchestrator.reset()?;
    print_success(&format!("Table '{}' reset to snapshot", report.table));
    print_item(&report, format);
    Ok(())
}
