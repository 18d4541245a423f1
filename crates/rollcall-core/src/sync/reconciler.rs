//! Scheduled reconciler: the correctness backstop for both directions.
//!
//! One run pulls replica-origin changes and applies them to the relational
//! store, then replays relational-origin changes onto the replica. Per-item
//! failures stay local to the item; a failing orchestration step aborts the
//! run, which is then recorded as `failed` so the same window is retried.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::{ApplyChange, ApplyStatus, ChangeRecord, FailureReport, RelationalApi};
use crate::error::{Error, Result};
use crate::models::{
    DirectionStats, EntityKey, FieldChanges, NewSyncRun, QueueEntry, RunStats, RunStatus,
    StepOutcome, SyncAction, SyncRun,
};
use crate::services::ReplicaService;
use crate::util::{datetime_from_millis, now_millis, sanitize};

/// Window used when no successful run has been recorded yet
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);

/// Overlap subtracted from a run's start when it becomes the next cursor.
pub const CURSOR_OVERLAP: Duration = Duration::from_secs(1);

/// Replica-origin changes for one entity, merged in creation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedChange {
    pub entity_key: EntityKey,
    pub action: SyncAction,
    pub changes: FieldChanges,
    /// Queue entries that contributed
    pub entry_ids: Vec<i64>,
}

/// Group entries by entity, later values winning.
///
/// Entities keep the order of their first entry. A create followed by
/// updates stays a create; otherwise the latest action wins.
pub fn merge_by_entity(entries: &[QueueEntry]) -> Vec<MergedChange> {
    let mut merged: Vec<MergedChange> = Vec::new();
    let mut index: HashMap<EntityKey, usize> = HashMap::new();

    for entry in entries {
        if let Some(&position) = index.get(&entry.entity_key) {
            let current = &mut merged[position];
            current.action = match (current.action, entry.action) {
                (SyncAction::Create, SyncAction::Update) => SyncAction::Create,
                (_, next) => next,
            };
            current
                .changes
                .extend(entry.field_changes.iter().map(|(k, v)| (k.clone(), v.clone())));
            current.entry_ids.push(entry.id);
        } else {
            index.insert(entry.entity_key.clone(), merged.len());
            merged.push(MergedChange {
                entity_key: entry.entity_key.clone(),
                action: entry.action,
                changes: entry.field_changes.clone(),
                entry_ids: vec![entry.id],
            });
        }
    }
    merged
}

/// Runs reconciliation between a replica service and a relational API.
pub struct Reconciler<'a, R: RelationalApi> {
    replica: &'a ReplicaService,
    relational: &'a R,
    run_type: String,
}

/// Why a run stopped early
struct Abort {
    step: &'static str,
    error: Error,
}

impl<'a, R: RelationalApi> Reconciler<'a, R> {
    pub fn new(replica: &'a ReplicaService, relational: &'a R) -> Self {
        Self {
            replica,
            relational,
            run_type: "manual".to_string(),
        }
    }

    /// Label recorded on each run row (`manual`, `scheduled`)
    #[must_use]
    pub fn with_run_type(mut self, run_type: impl Into<String>) -> Self {
        self.run_type = run_type.into();
        self
    }

    /// Execute one run and persist its run-log entry.
    ///
    /// Only a failure to write the run log itself is returned as an error.
    pub async fn run_once(&self) -> Result<SyncRun> {
        let started_at = now_millis();
        let mut stats = RunStats::default();

        let cursor = match self.resolve_cursor(started_at).await {
            Ok(cursor) => {
                stats.steps.push(StepOutcome::ok("resolve-cursor"));
                cursor
            }
            Err(error) => {
                let abort = Abort {
                    step: "resolve-cursor",
                    error,
                };
                let fallback = started_at - duration_millis(DEFAULT_LOOKBACK);
                return self.finish(started_at, fallback, stats, Some(abort)).await;
            }
        };

        tracing::info!(
            run_type = %self.run_type,
            cursor = %datetime_from_millis(cursor),
            "Starting reconciliation run"
        );

        let outcome = self.run_steps(cursor, &mut stats).await;
        self.finish(started_at, cursor, stats, outcome.err()).await
    }

    async fn run_steps(&self, cursor: i64, stats: &mut RunStats) -> std::result::Result<(), Abort> {
        self.replica_to_relational(cursor, stats).await?;
        self.relational_to_replica(cursor, stats).await
    }

    async fn resolve_cursor(&self, started_at: i64) -> Result<i64> {
        let latest = self.replica.latest_successful_run().await?;
        Ok(latest.map_or_else(
            || started_at - duration_millis(DEFAULT_LOOKBACK),
            |run| run.next_cursor,
        ))
    }

    /// Steps 2-3: merged replica changes are applied in one batch call.
    async fn replica_to_relational(
        &self,
        cursor: i64,
        stats: &mut RunStats,
    ) -> std::result::Result<(), Abort> {
        let pending = self
            .replica
            .pending_changes(Some(cursor))
            .await
            .map_err(|error| abort("pull-replica-changes", error))?;
        let backlog = self
            .replica
            .retry_backlog(cursor)
            .await
            .map_err(|error| abort("pull-replica-changes", error))?;
        let entries = combine(pending, backlog, |entry| (entry.created_at, entry.id));
        stats.steps.push(StepOutcome::ok("pull-replica-changes"));

        let direction = &mut stats.replica_to_relational;
        direction.pulled = entries.len();
        let merged = merge_by_entity(&entries);
        direction.entities = merged.len();
        if merged.is_empty() {
            stats.steps.push(StepOutcome::ok("apply-to-relational"));
            return Ok(());
        }

        let request: Vec<ApplyChange> = merged
            .iter()
            .map(|change| ApplyChange {
                entity_key: change.entity_key.as_str().to_string(),
                action: change.action,
                changes: change.changes.clone(),
            })
            .collect();
        let results = self
            .relational
            .apply(request)
            .await
            .map_err(|error| abort("apply-to-relational", error))?;
        let mut by_key: HashMap<String, _> = results
            .into_iter()
            .map(|result| (result.entity_key.clone(), result))
            .collect();

        for change in &merged {
            let result = by_key.remove(change.entity_key.as_str());
            let (status, message) = result.map_or_else(
                || (ApplyStatus::Error, "no result returned for entity".to_string()),
                |result| {
                    let message = result.message.unwrap_or_else(|| "apply failed".to_string());
                    (result.status, message)
                },
            );
            match status {
                ApplyStatus::Success => {
                    self.replica
                        .mark_synced(&change.entry_ids)
                        .await
                        .map_err(|error| abort("apply-to-relational", error))?;
                    direction.applied += 1;
                }
                ApplyStatus::Error | ApplyStatus::Rejected => {
                    let permanent = status == ApplyStatus::Rejected;
                    tracing::warn!(
                        entity = %change.entity_key.masked(),
                        permanent,
                        "Relational apply failed: {message}"
                    );
                    for id in &change.entry_ids {
                        self.replica
                            .record_failure(*id, &message, permanent)
                            .await
                            .map_err(|error| abort("apply-to-relational", error))?;
                    }
                    if permanent {
                        direction.rejected += 1;
                    } else {
                        direction.failed += 1;
                    }
                }
            }
        }

        stats.steps.push(StepOutcome::ok("apply-to-relational"));
        Ok(())
    }

    /// Steps 4-5: relational changes are replayed onto the replica in order.
    async fn relational_to_replica(
        &self,
        cursor: i64,
        stats: &mut RunStats,
    ) -> std::result::Result<(), Abort> {
        let since = datetime_from_millis(cursor);
        let pending = self
            .relational
            .changes_since(Some(since))
            .await
            .map_err(|error| abort("pull-relational-changes", error))?;
        let backlog = self
            .relational
            .retry_backlog(since)
            .await
            .map_err(|error| abort("pull-relational-changes", error))?;
        let changes = combine(pending, backlog, |change| (change.created_at, change.id));
        stats.steps.push(StepOutcome::ok("pull-relational-changes"));

        let direction = &mut stats.relational_to_replica;
        direction.pulled = changes.len();
        direction.entities = changes
            .iter()
            .map(|change| &change.entity_key)
            .collect::<HashSet<_>>()
            .len();

        let mut synced = Vec::new();
        let mut failures = Vec::new();
        for change in &changes {
            match self.apply_to_replica(change).await {
                Ok(()) => {
                    synced.push(change.id);
                    direction.applied += 1;
                }
                Err(error @ Error::Config(_)) => return Err(abort("apply-to-replica", error)),
                Err(error) => {
                    let permanent = !error.is_transient();
                    tracing::warn!(
                        entity = %change.entity_key.masked(),
                        action = %change.action,
                        permanent,
                        "Replica apply failed: {}",
                        sanitize(&error)
                    );
                    if permanent {
                        direction.rejected += 1;
                    } else {
                        direction.failed += 1;
                    }
                    failures.push(FailureReport {
                        id: change.id,
                        error: sanitize(&error),
                        permanent,
                    });
                }
            }
        }
        stats.steps.push(StepOutcome::ok("apply-to-replica"));

        if !synced.is_empty() {
            self.relational
                .mark_synced(&synced)
                .await
                .map_err(|error| abort("mark-synced", error))?;
        }
        stats.steps.push(StepOutcome::ok("mark-synced"));

        if !failures.is_empty() {
            self.relational
                .mark_failed(failures)
                .await
                .map_err(|error| abort("mark-failed", error))?;
        }
        stats.steps.push(StepOutcome::ok("mark-failed"));
        Ok(())
    }

    async fn apply_to_replica(&self, change: &ChangeRecord) -> Result<()> {
        match change.action {
            SyncAction::Create => {
                let record = self.relational.fetch_member(&change.entity_key).await?;
                self.replica.apply_relational_create(&record).await
            }
            SyncAction::Update => {
                self.replica
                    .apply_relational_update(&change.entity_key, &change.fields_changed)
                    .await
            }
            SyncAction::Delete => self.replica.soft_delete(&change.entity_key).await,
        }
    }

    async fn finish(
        &self,
        started_at: i64,
        window_start: i64,
        mut stats: RunStats,
        abort: Option<Abort>,
    ) -> Result<SyncRun> {
        let completed_at = now_millis();
        stats.duration_ms = completed_at - started_at;

        let (status, next_cursor, error) = match abort {
            None => (
                RunStatus::Success,
                started_at - duration_millis(CURSOR_OVERLAP),
                None,
            ),
            Some(Abort { step, error }) => {
                let message = format!("{step}: {}", sanitize(&error));
                stats.steps.push(StepOutcome::failed(step, sanitize(&error)));
                (RunStatus::Failed, window_start, Some(message))
            }
        };

        let run = self
            .replica
            .record_run(&NewSyncRun {
                run_type: self.run_type.clone(),
                status,
                started_at,
                completed_at,
                window_start,
                next_cursor,
                stats,
                error,
            })
            .await?;

        match run.status {
            RunStatus::Success if run.stats.has_partial_failures() => tracing::warn!(
                run_id = run.id,
                duration_ms = run.stats.duration_ms,
                "Reconciliation finished with partial failures"
            ),
            RunStatus::Success => tracing::info!(
                run_id = run.id,
                duration_ms = run.stats.duration_ms,
                "Reconciliation finished"
            ),
            RunStatus::Failed => tracing::error!(
                run_id = run.id,
                "Reconciliation aborted: {}",
                run.error.as_deref().unwrap_or_default()
            ),
        }
        Ok(run)
    }

    /// Run on a fixed interval, one run at a time.
    ///
    /// The first tick fires immediately. A tick whose run log cannot be
    /// written is logged and the loop carries on. `max_runs` bounds the
    /// number of ticks.
    pub async fn run_on_interval(&self, period: Duration, max_runs: Option<usize>) -> Result<()> {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut completed = 0usize;
        loop {
            interval.tick().await;
            if let Err(error) = self.run_once().await {
                tracing::error!(
                    run_type = %self.run_type,
                    "Reconciliation tick could not be recorded: {}",
                    sanitize(&error)
                );
            }
            completed += 1;
            if max_runs.is_some_and(|max| completed >= max) {
                return Ok(());
            }
        }
    }
}

fn abort(step: &'static str, error: Error) -> Abort {
    Abort { step, error }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Union of two pulls without duplicate ids, sorted by `key`.
fn combine<T, K: Ord>(first: Vec<T>, second: Vec<T>, key: impl Fn(&T) -> (K, i64)) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut combined: Vec<T> = first
        .into_iter()
        .chain(second)
        .filter(|item| seen.insert(key(item).1))
        .collect();
    combined.sort_by(|a, b| key(a).cmp(&key(b)));
    combined
}
