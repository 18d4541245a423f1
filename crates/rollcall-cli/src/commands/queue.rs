use chrono::Duration;
use rollcall_core::models::{QueueEntry, QueueStatus, QueueSummary};
use rollcall_core::util::now_millis;
use rollcall_core::sync::StatusResponse;

use crate::cli::{QueueCommands, QueueSide, QueueStatusFilter};
use crate::commands::common::{format_millis, print_json, Context};
use crate::error::CliError;

pub async fn run_queue(context: &Context, command: QueueCommands) -> Result<(), CliError> {
    match command {
        QueueCommands::Status { side, json } => {
            let summary = queue_summary(context, side).await?;
            if json {
                print_json(&StatusResponse::from(summary))?;
            } else {
                println!("{}", format_summary(side, &summary));
            }
        }
        QueueCommands::List {
            side,
            status,
            limit,
            json,
        } => {
            let status = status.map(queue_status);
            let entries = match side {
                QueueSide::Relational => {
                    context
                        .relational_service()
                        .await?
                        .list_queue(status, limit)
                        .await?
                }
                QueueSide::Replica => {
                    context
                        .replica_service()
                        .await?
                        .list_queue(status, limit)
                        .await?
                }
            };
            if json {
                print_json(&entries)?;
            } else if entries.is_empty() {
                println!("Queue is empty.");
            } else {
                for entry in &entries {
                    println!("{}", format_entry(entry));
                }
            }
        }
        QueueCommands::Cleanup {
            side,
            older_than_days,
        } => {
            let threshold = cleanup_threshold(now_millis(), older_than_days);
            let removed = match side {
                QueueSide::Relational => {
                    context
                        .relational_service()
                        .await?
                        .cleanup_synced(threshold)
                        .await?
                }
                QueueSide::Replica => {
                    context
                        .replica_service()
                        .await?
                        .cleanup_synced(threshold)
                        .await?
                }
            };
            tracing::info!(count = removed, older_than_days, "Cleaned up synced queue entries");
            println!("Removed {removed} synced entries");
        }
    }
    Ok(())
}

async fn queue_summary(context: &Context, side: QueueSide) -> Result<QueueSummary, CliError> {
    Ok(match side {
        QueueSide::Relational => context.relational_service().await?.queue_summary().await?,
        QueueSide::Replica => context.replica_service().await?.queue_summary().await?,
    })
}

pub const fn queue_status(filter: QueueStatusFilter) -> QueueStatus {
    match filter {
        QueueStatusFilter::Pending => QueueStatus::Pending,
        QueueStatusFilter::Synced => QueueStatus::Synced,
        QueueStatusFilter::Failed => QueueStatus::Failed,
    }
}

/// Synced entries whose `synced_at` is before this instant are removed.
pub fn cleanup_threshold(now: i64, older_than_days: u32) -> i64 {
    now - Duration::days(i64::from(older_than_days)).num_milliseconds()
}

pub fn format_summary(side: QueueSide, summary: &QueueSummary) -> String {
    let side = match side {
        QueueSide::Relational => "relational",
        QueueSide::Replica => "replica",
    };
    let oldest = summary
        .oldest_pending
        .map_or_else(|| "-".to_string(), format_millis);
    format!(
        "{side} queue: {} pending, {} synced, {} failed (oldest pending: {oldest})",
        summary.pending, summary.synced, summary.failed
    )
}

pub fn format_entry(entry: &QueueEntry) -> String {
    let fields = entry
        .field_changes
        .keys()
        .cloned()
        .collect::<Vec<_>>()
        .join(",");
    let error = entry
        .error
        .as_deref()
        .map(|error| format!("  error: {error}"))
        .unwrap_or_default();
    format!(
        "#{} {} {} {} {} attempts={} [{fields}]{error}",
        entry.id,
        format_millis(entry.created_at),
        entry.entity_key.masked(),
        entry.action,
        entry.status,
        entry.attempts
    )
}
