//! Rollcall CLI - operator tooling for the member roll and its replica
//!
//! Admin mutations go to the relational store; reconciliation and the
//! inspection commands work against the replica.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use cli::{Cli, Commands};
use commands::common::Context;
use commands::history::{run_audit, run_runs};
use commands::member::run_member;
use commands::profile::run_profile;
use commands::queue::run_queue;
use commands::reconcile::{run_reconcile, run_schedule};
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rollcall=info,rollcall_core=warn")),
        )
        .init();

    let cli = Cli::parse();
    let context = Context::from_env(cli.relational_db, cli.replica_db)?;

    match cli.command {
        Commands::Member { command } => run_member(&context, command).await?,
        Commands::Profile {
            entity_key,
            assignments,
        } => run_profile(&context, &entity_key, &assignments).await?,
        Commands::Reconcile { json } => run_reconcile(&context, json).await?,
        Commands::Schedule {
            interval_secs,
            max_runs,
        } => run_schedule(&context, interval_secs, max_runs).await?,
        Commands::Queue { command } => run_queue(&context, command).await?,
        Commands::Runs { limit, json } => run_runs(&context, limit, json).await?,
        Commands::Audit {
            entity_key,
            limit,
            json,
        } => run_audit(&context, entity_key.as_deref(), limit, json).await?,
    }

    Ok(())
}
