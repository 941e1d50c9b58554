//! Modulkassa service entry point.
//!
//! Invoked by the billing panel once per register pass. Pass-level failures
//! are printed to stdout as a structured error document the panel decodes;
//! per-receipt failures and a not-ready service are normal outcomes, not
//! process errors.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use cashier_core::error::PassError;
use cashier_core::observability::init_tracing;
use modulkassa_service::config::Config;
use modulkassa_service::services::database::Database;
use modulkassa_service::services::reconcile::{PassOutcome, ReconcileEngine};

#[derive(Debug, Parser)]
#[command(name = "modulkassa-service", about = "Modulkassa receipt fiscalization")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit fiscal documents for newly created receipts.
    Send {
        #[arg(long)]
        register: i64,
    },
    /// Submit fiscal documents for pre-staged receipts.
    SendPrepared {
        #[arg(long)]
        register: i64,
    },
    /// Poll fiscalization outcomes for waiting receipts.
    Check {
        #[arg(long)]
        register: i64,
    },
    /// Verify register credentials and service readiness.
    CheckConnection {
        #[arg(long)]
        register: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            let err = PassError::Config(e);
            println!("{}", err.to_document().render());
            eprintln!("Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.service_name, &config.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting modulkassa-service"
    );

    match run(&config, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(kind = err.kind(), error = %err, "pass failed");
            println!("{}", err.to_document().render());
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config, command: Command) -> Result<(), PassError> {
    let database = Database::new(&config.database)
        .await
        .map_err(|e| PassError::Database(anyhow::anyhow!(e)))?;
    database
        .health_check()
        .await
        .map_err(|e| PassError::Database(anyhow::anyhow!(e)))?;

    let engine = ReconcileEngine::new(database, config.lock_dir.clone(), config.http_timeout);

    let outcome = match command {
        Command::Send { register } => engine.send(register).await?,
        Command::SendPrepared { register } => engine.send_prepared(register).await?,
        Command::Check { register } => engine.check(register).await?,
        Command::CheckConnection { register } => {
            engine.check_connection(register).await?;
            tracing::info!(register, "connection verified");
            return Ok(());
        }
    };

    match outcome {
        PassOutcome::Completed(summary) => {
            tracing::info!(?summary, "pass summary");
        }
        PassOutcome::ServiceNotReady(status) => {
            tracing::info!(status = status.as_str(), "service not ready, nothing done");
        }
    }

    Ok(())
}
