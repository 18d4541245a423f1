//! Relational system of record service.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use super::open_store;
use crate::db::{
    Database, LibSqlMemberRepository, LibSqlQueueRepository, MemberRepository, QueueRepository,
    Store,
};
use crate::detect::{detect_relational_change, DetectedChange};
use crate::error::{Error, Result};
use crate::models::{
    EntityKey, FieldChanges, MemberInput, MemberRecord, QueueEntry, QueueStatus, QueueSummary,
    StoreSide, SyncAction,
};
use crate::sync::{
    AddressUpdate, ApplyChange, ApplyResult, FailureReport, ReplicaPushClient, SyncMessage,
};
use crate::transform::paths_to_columns;
use crate::util::{now_millis, sanitize};

/// Result of one relational write
struct WriteOutcome {
    record: MemberRecord,
    change: Option<DetectedChange>,
    updated_fields: Vec<String>,
}

/// Thread-safe service over the relational store.
///
/// Every mutation runs its change detector and queue insert inside the
/// write's transaction, then fires the push channel once committed.
#[derive(Clone)]
pub struct RelationalService {
    db: Arc<Mutex<Database>>,
    push: Option<ReplicaPushClient>,
}

impl RelationalService {
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db = open_store(&db_path.into(), Store::Relational).await?;
        Ok(Self::from_database(db))
    }

    /// Open an in-memory service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory(Store::Relational).await?;
        Ok(Self::from_database(db))
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            push: None,
        }
    }

    /// Fire the push channel after every committed change.
    #[must_use]
    pub fn with_push(mut self, push: ReplicaPushClient) -> Self {
        self.push = Some(push);
        self
    }

    /// Create a member through the admin interface.
    pub async fn create_member(
        &self,
        entity_key: EntityKey,
        input: MemberInput,
    ) -> Result<MemberRecord> {
        let key = entity_key.clone();
        let outcome = self
            .write(&key, move |existing, now| match existing {
                Some(_) => Err(Error::InvalidInput(format!(
                    "member {} already exists",
                    entity_key.masked()
                ))),
                None => Ok(MemberRecord::from_input(entity_key, input, now)),
            })
            .await?;
        Ok(outcome.record)
    }

    /// Set column values on an active member.
    pub async fn update_member(
        &self,
        entity_key: &EntityKey,
        columns: &FieldChanges,
    ) -> Result<MemberRecord> {
        Ok(self.update_columns(entity_key, columns).await?.record)
    }

    pub async fn update_address(
        &self,
        entity_key: &EntityKey,
        address: &AddressUpdate,
    ) -> Result<MemberRecord> {
        self.update_member(entity_key, &address.to_columns()).await
    }

    /// Soft-delete a member. The row is kept with `deleted_at` set.
    pub async fn delete_member(&self, entity_key: &EntityKey) -> Result<MemberRecord> {
        let outcome = self
            .write(entity_key, |existing, now| {
                let mut record = existing.ok_or_else(|| not_found(entity_key))?;
                if record.deleted_at.is_none() {
                    record.deleted_at = Some(now);
                    record.updated_at = now;
                }
                Ok(record)
            })
            .await?;
        Ok(outcome.record)
    }

    /// Active member by key; soft-deleted members are not found.
    pub async fn get_member(&self, entity_key: &EntityKey) -> Result<MemberRecord> {
        let db = self.db.lock().await;
        let repo = LibSqlMemberRepository::new(db.connection());
        repo.get_by_key(entity_key)
            .await?
            .filter(|record| !record.is_deleted())
            .ok_or_else(|| not_found(entity_key))
    }

    pub async fn list_members(
        &self,
        include_deleted: bool,
        limit: usize,
    ) -> Result<Vec<MemberRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlMemberRepository::new(db.connection());
        repo.list(include_deleted, limit).await
    }

    /// Pending outbound changes created after `since` (Unix ms).
    pub async fn changes_since(&self, since: Option<i64>) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.get_pending_changes(since).await
    }

    pub async fn retry_backlog(&self, before: i64) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.get_retry_backlog(before).await
    }

    /// Apply merged replica changes, one independent write per entity.
    ///
    /// Failures are reported per item and never abort the batch.
    pub async fn apply_changes(&self, changes: Vec<ApplyChange>) -> Vec<ApplyResult> {
        let mut results = Vec::with_capacity(changes.len());
        for change in changes {
            let result = match self.apply_one(&change).await {
                Ok(updated_fields) => ApplyResult::success(&change.entity_key, updated_fields),
                Err(error) => {
                    tracing::warn!(
                        action = %change.action,
                        "Apply failed for replica change: {}",
                        sanitize(&error)
                    );
                    ApplyResult::failure(&change.entity_key, &error)
                }
            };
            results.push(result);
        }
        tracing::info!(count = results.len(), "Applied replica change batch");
        results
    }

    async fn apply_one(&self, change: &ApplyChange) -> Result<Vec<String>> {
        let entity_key = EntityKey::parse(&change.entity_key)?;
        let columns = paths_to_columns(&change.changes);
        let outcome = match change.action {
            SyncAction::Update => self.update_columns(&entity_key, &columns).await?,
            SyncAction::Create => self.upsert_columns(&entity_key, &columns).await?,
            SyncAction::Delete => match self.delete_member(&entity_key).await {
                Ok(_) | Err(Error::NotFound(_)) => return Ok(Vec::new()),
                Err(error) => return Err(error),
            },
        };
        Ok(outcome.updated_fields)
    }

    pub async fn mark_synced(&self, ids: &[i64]) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.mark_synced(ids, now_millis()).await
    }

    /// Record failures reported by the reconciler; returns entries changed.
    pub async fn mark_failed(&self, failures: &[FailureReport]) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let mut marked = 0;
        for failure in failures {
            if repo
                .record_failure(failure.id, &failure.error, failure.permanent)
                .await?
            {
                marked += 1;
            }
        }
        Ok(marked)
    }

    pub async fn queue_summary(&self) -> Result<QueueSummary> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.status_summary().await
    }

    pub async fn list_queue(
        &self,
        status: Option<QueueStatus>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.list(status, limit).await
    }

    pub async fn cleanup_synced(&self, older_than: i64) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.cleanup_synced(older_than).await
    }

    async fn update_columns(
        &self,
        entity_key: &EntityKey,
        columns: &FieldChanges,
    ) -> Result<WriteOutcome> {
        self.write(entity_key, |existing, now| {
            let record = existing
                .filter(|record| !record.is_deleted())
                .ok_or_else(|| not_found(entity_key))?;
            set_columns(record, columns, now)
        })
        .await
    }

    async fn upsert_columns(
        &self,
        entity_key: &EntityKey,
        columns: &FieldChanges,
    ) -> Result<WriteOutcome> {
        self.write(entity_key, |existing, now| {
            let record = match existing {
                Some(mut record) => {
                    record.deleted_at = None;
                    record
                }
                None => MemberRecord::from_input(entity_key.clone(), MemberInput::default(), now),
            };
            set_columns(record, columns, now)
        })
        .await
    }

    /// Run one mutation with its detector and queue insert in a transaction.
    async fn write(
        &self,
        entity_key: &EntityKey,
        mutate: impl FnOnce(Option<MemberRecord>, i64) -> Result<MemberRecord>,
    ) -> Result<WriteOutcome> {
        let outcome = {
            let db = self.db.lock().await;
            db.begin().await?;
            match Self::write_in_transaction(&db, entity_key, mutate).await {
                Ok(outcome) => {
                    db.commit().await?;
                    outcome
                }
                Err(error) => {
                    db.rollback().await;
                    return Err(error);
                }
            }
        };

        if let Some(change) = &outcome.change {
            tracing::info!(
                entity = %entity_key.masked(),
                action = %change.action,
                "Queued relational change"
            );
            self.push_change(&outcome.record, change).await;
        }
        Ok(outcome)
    }

    async fn write_in_transaction(
        db: &Database,
        entity_key: &EntityKey,
        mutate: impl FnOnce(Option<MemberRecord>, i64) -> Result<MemberRecord>,
    ) -> Result<WriteOutcome> {
        let now = now_millis();
        let members = LibSqlMemberRepository::new(db.connection());
        let before = members.get_by_key(entity_key).await?;
        let after = mutate(before.clone(), now)?;

        let updated_fields = match &before {
            None => {
                let stored = members.insert(&after).await?;
                let fields = stored.to_columns().into_keys().collect();
                return Self::enqueue(db, None, stored, fields).await;
            }
            Some(before) => {
                let fields = changed_columns(before, &after);
                if before != &after {
                    members.update(&after).await?;
                }
                fields
            }
        };
        Self::enqueue(db, before.as_ref(), after, updated_fields).await
    }

    async fn enqueue(
        db: &Database,
        before: Option<&MemberRecord>,
        record: MemberRecord,
        updated_fields: Vec<String>,
    ) -> Result<WriteOutcome> {
        let change = detect_relational_change(before, &record);
        if let Some(change) = &change {
            let queue = LibSqlQueueRepository::new(db.connection());
            let entry = change
                .clone()
                .into_entry(StoreSide::Relational, record.entity_key.clone());
            queue.insert(&entry, now_millis()).await?;
        }
        Ok(WriteOutcome {
            record,
            change,
            updated_fields,
        })
    }

    async fn push_change(&self, record: &MemberRecord, change: &DetectedChange) {
        let Some(push) = &self.push else {
            tracing::debug!("Push channel not configured, skipping");
            return;
        };
        let mut data = change.field_changes.clone();
        data.insert("id".to_string(), Value::from(record.id));
        let message = SyncMessage::for_change(change.action, record.entity_key.clone(), data);
        push.push(&message).await;
    }
}

fn not_found(entity_key: &EntityKey) -> Error {
    Error::NotFound(format!("member {}", entity_key.masked()))
}

fn set_columns(mut record: MemberRecord, columns: &FieldChanges, now: i64) -> Result<MemberRecord> {
    let mut changed = false;
    for (column, value) in columns {
        changed |= record.apply_column(column, value)?;
    }
    if changed {
        record.updated_at = now;
    }
    Ok(record)
}

fn changed_columns(before: &MemberRecord, after: &MemberRecord) -> Vec<String> {
    let old = before.to_columns();
    after
        .to_columns()
        .into_iter()
        .filter(|(column, value)| old.get(column) != Some(value))
        .map(|(column, _)| column)
        .collect()
}
