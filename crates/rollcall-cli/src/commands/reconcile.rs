use std::time::Duration;

use rollcall_core::models::{RunStatus, SyncRun};
use rollcall_core::sync::{Reconciler, RelationalApi};
use rollcall_core::ReplicaService;

use crate::commands::common::{format_millis, print_json, Context, RelationalTarget};
use crate::error::CliError;

pub async fn run_reconcile(context: &Context, as_json: bool) -> Result<(), CliError> {
    let replica = context.replica_service().await?;
    let run = match context.relational_target().await? {
        RelationalTarget::Remote(client) => reconcile_once(&replica, &client).await?,
        RelationalTarget::Local(service) => reconcile_once(&replica, &service).await?,
    };

    if as_json {
        print_json(&run)?;
    } else {
        for line in format_run_summary(&run) {
            println!("{line}");
        }
    }

    match run.status {
        RunStatus::Success => Ok(()),
        RunStatus::Failed => Err(CliError::RunFailed {
            id: run.id,
            message: run.error.unwrap_or_default(),
        }),
    }
}

pub async fn run_schedule(
    context: &Context,
    interval_secs: Option<u64>,
    max_runs: Option<usize>,
) -> Result<(), CliError> {
    let period = interval_secs.map_or(context.settings.sync_interval, Duration::from_secs);
    let replica = context.replica_service().await?;
    tracing::info!(
        interval_secs = period.as_secs(),
        max_runs = ?max_runs,
        "Starting scheduled reconciliation"
    );

    match context.relational_target().await? {
        RelationalTarget::Remote(client) => schedule(&replica, &client, period, max_runs).await,
        RelationalTarget::Local(service) => schedule(&replica, &service, period, max_runs).await,
    }
}

async fn reconcile_once<R: RelationalApi>(
    replica: &ReplicaService,
    relational: &R,
) -> Result<SyncRun, CliError> {
    Ok(Reconciler::new(replica, relational).run_once().await?)
}

async fn schedule<R: RelationalApi>(
    replica: &ReplicaService,
    relational: &R,
    period: Duration,
    max_runs: Option<usize>,
) -> Result<(), CliError> {
    Reconciler::new(replica, relational)
        .with_run_type("scheduled")
        .run_on_interval(period, max_runs)
        .await?;
    Ok(())
}

pub fn format_run_summary(run: &SyncRun) -> Vec<String> {
    let to_relational = &run.stats.replica_to_relational;
    let to_replica = &run.stats.relational_to_replica;
    let mut lines = vec![
        format!(
            "Run {} ({}) {} in {} ms",
            run.id, run.run_type, run.status, run.stats.duration_ms
        ),
        format!(
            "  replica -> relational: {} pulled, {} entities, {} applied, {} failed, {} rejected",
            to_relational.pulled,
            to_relational.entities,
            to_relational.applied,
            to_relational.failed,
            to_relational.rejected
        ),
        format!(
            "  relational -> replica: {} pulled, {} entities, {} applied, {} failed, {} rejected",
            to_replica.pulled,
            to_replica.entities,
            to_replica.applied,
            to_replica.failed,
            to_replica.rejected
        ),
        format!("  next cursor: {}", format_millis(run.next_cursor)),
    ];
    if let Some(error) = &run.error {
        lines.push(format!("  error: {error}"));
    }
    lines
}
