use rollcall_core::models::{AuditEntry, SyncRun};

use crate::commands::common::{format_millis, parse_key, print_json, Context};
use crate::error::CliError;

pub async fn run_runs(context: &Context, limit: usize, as_json: bool) -> Result<(), CliError> {
    let runs = context.replica_service().await?.list_runs(limit).await?;
    if as_json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("No reconciliation runs recorded.");
        return Ok(());
    }
    for run in &runs {
        println!("{}", format_run_line(run));
    }
    Ok(())
}

pub async fn run_audit(
    context: &Context,
    entity_key: Option<&str>,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let replica = context.replica_service().await?;
    let entries = match entity_key {
        Some(raw) => replica.audit_for(&parse_key(raw)?, limit).await?,
        None => replica.recent_audit(limit).await?,
    };
    if as_json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No audit entries.");
        return Ok(());
    }
    for entry in &entries {
        println!("{}", format_audit_line(entry));
    }
    Ok(())
}

pub fn format_run_line(run: &SyncRun) -> String {
    let applied =
        run.stats.replica_to_relational.applied + run.stats.relational_to_replica.applied;
    let failed = run.stats.replica_to_relational.failed
        + run.stats.replica_to_relational.rejected
        + run.stats.relational_to_replica.failed
        + run.stats.relational_to_replica.rejected;
    let error = run
        .error
        .as_deref()
        .map(|error| format!("  {error}"))
        .unwrap_or_default();
    format!(
        "#{} {} {:<9} {:<7} applied={applied} failed={failed}{error}",
        run.id,
        format_millis(run.started_at),
        run.run_type,
        run.status.as_str(),
    )
}

pub fn format_audit_line(entry: &AuditEntry) -> String {
    format!(
        "{} {} {} by {} [{}]",
        format_millis(entry.created_at),
        entry.action,
        entry.member_name.as_deref().unwrap_or("-"),
        entry.actor,
        entry.changed_keys.join(",")
    )
}
