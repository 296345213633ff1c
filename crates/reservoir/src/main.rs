//! Reservoir - command-line front end for the shared PostgreSQL pool.

use clap::{Parser, Subcommand};
use reservoir_core::logging::{init_logging, LogConfig};
use reservoir_core::{ConnectionConfig, NamedParams, ParamValue, ReservoirError, ReservoirState};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "reservoir")]
#[command(about = "Shared PostgreSQL pool with health checks and retrying connects")]
#[command(version)]
struct Cli {
    /// JSON connection config; RESERVOIR_DB_* variables are used when omitted
    #[arg(long, env = "RESERVOIR_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter directive (overrides RESERVOIR_LOG)
    #[arg(long)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire the pool and run a health statement
    Health,
    /// Connect and print the pool snapshot
    Status,
    /// Run one statement
    Exec {
        /// SQL with :name or @name placeholders
        sql: String,
        /// Parameters as name=value (null, booleans and numbers are typed)
        params: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default();
    if let Some(filter) = &cli.log_filter {
        log_config = log_config.with_filter(filter);
    }
    let _logging_guard = init_logging(log_config);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(category = e.category(), error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, ReservoirError> {
    let config = match &cli.config {
        Some(path) => ConnectionConfig::from_json_file(path)?,
        None => ConnectionConfig::from_env()?,
    };
    let state = ReservoirState::new(config)?;

    let code = match cli.command {
        Commands::Health => {
            let report = state.health().await;
            print_json(&report)?;
            if report.healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Status => {
            let health = state.health().await;
            if let Some(error) = &health.error {
                tracing::warn!(error = %error, "Pool is not healthy");
            }
            print_json(&state.status())?;
            ExitCode::SUCCESS
        }
        Commands::Exec { sql, params } => {
            let params = parse_params(&params)?;
            match state.execute(&sql, &params).await {
                Ok(outcome) => {
                    print_json(&outcome)?;
                    ExitCode::SUCCESS
                }
                Err(failure) => {
                    print_json(&failure)?;
                    ExitCode::FAILURE
                }
            }
        }
    };

    state.shutdown().await?;
    Ok(code)
}

fn parse_params(raw: &[String]) -> Result<NamedParams, ReservoirError> {
    let mut params = NamedParams::new();
    for pair in raw {
        let (name, value) = pair.split_once('=').ok_or_else(|| {
            ReservoirError::config(format!("Parameter '{pair}' must look like name=value"))
        })?;
        let name = name.trim_start_matches([':', '@']);
        if name.is_empty() {
            return Err(ReservoirError::config(format!("Parameter '{pair}' has no name")));
        }
        params.insert(name, ParamValue::parse_literal(value));
    }
    Ok(params)
}

fn print_json(value: &impl serde::Serialize) -> Result<(), ReservoirError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
