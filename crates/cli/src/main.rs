//! crudcheck CLI - Main Entry Point
//!
//! Provisions the application database, resets fixtures, inspects the
//! fixture lock and runs browser scenarios.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crudcheck_common::HarnessConfig;

mod commands;
mod output;

use commands::{db, lock, scenario};

/// crudcheck CLI - fixture control for CRUD end-to-end tests
#[derive(Parser)]
#[command(name = "crudcheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Harness configuration file (TOML)
    #[arg(long, env = "CRUDCHECK_CONFIG", default_value = "crudcheck.toml", global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema, admin account and sample contacts
    Setup(db::SetupArgs),

    /// Check the database contents
    Verify,

    /// Reset the contacts table to the fixture snapshot
    Reset(db::ResetArgs),

    /// Inspect or clean up the fixture lock
    #[command(subcommand)]
    Lock(lock::LockCommands),

    /// List available scenarios
    Scenarios,

    /// Run scenarios against the live application
    Run(scenario::RunArgs),

    /// Write the effective configuration to the config path
    InitConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let config = HarnessConfig::from_env(Some(&cli.config))?;
    tracing::debug!(
        "Store {}, lock {}, app {}",
        config.store.db_path.display(),
        config.lock.path.display(),
        config.app.base_url
    );

    match cli.command {
        Commands::Setup(args) => db::setup(args, &config, cli.format)?,
        Commands::Verify => db::verify(&config, cli.format)?,
        Commands::Reset(args) => db::reset(args, &config, cli.format)?,
        Commands::Lock(cmd) => lock::execute(cmd, &config, cli.format)?,
        Commands::Scenarios => scenario::list(cli.format)?,
        Commands::Run(args) => scenario::run(args, &config, cli.format)?,
        Commands::InitConfig => {
            config.save(&cli.config)?;
            output::print_message(&format!("Configuration written to {}", cli.config.display()), cli.format);
        }
    }

    Ok(())
}
