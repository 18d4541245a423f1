//! Document replica service.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use super::open_store;
use crate::audit;
use crate::db::{
    AuditRepository, Database, DocumentRepository, LibSqlAuditRepository,
    LibSqlDocumentRepository, LibSqlQueueRepository, LibSqlRunRepository, QueueRepository,
    RunRepository, Store, StoredDocument,
};
use crate::detect::{detect_document_change, DetectedChange};
use crate::error::{Error, Result};
use crate::models::{
    get_path, remove_path, set_path, AuditEntry, Document, EntityKey, FieldChanges, MemberRecord,
    NewSyncRun, QueueEntry, QueueStatus, QueueSummary, StoreSide, SyncRun, WriteOrigin,
};
use crate::sync::SyncMessage;
use crate::transform::{build_document, columns_to_paths};
use crate::util::now_millis;

/// Thread-safe service over the replica store.
///
/// Local writes are detected and queued for the relational side; writes
/// applied by synchronization are not. Every write is audited.
#[derive(Clone)]
pub struct ReplicaService {
    db: Arc<Mutex<Database>>,
}

impl ReplicaService {
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db = open_store(&db_path.into(), Store::Replica).await?;
        Ok(Self::from_database(db))
    }

    /// Open an in-memory service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory(Store::Replica).await?;
        Ok(Self::from_database(db))
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub async fn get_document(&self, entity_key: &EntityKey) -> Result<Option<StoredDocument>> {
        let db = self.db.lock().await;
        let repo = LibSqlDocumentRepository::new(db.connection());
        repo.get(entity_key).await
    }

    pub async fn list_documents(&self, limit: usize) -> Result<Vec<StoredDocument>> {
        let db = self.db.lock().await;
        let repo = LibSqlDocumentRepository::new(db.connection());
        repo.list(limit).await
    }

    /// Replace a whole document.
    pub async fn save_document(
        &self,
        entity_key: &EntityKey,
        document: Document,
        origin: WriteOrigin,
    ) -> Result<Option<DetectedChange>> {
        self.write(entity_key, origin, |_, _| Ok(Some(document)))
            .await
            .map(|(_, change)| change)
    }

    /// Set dotted paths on an existing document.
    pub async fn update_fields(
        &self,
        entity_key: &EntityKey,
        paths: &FieldChanges,
        origin: WriteOrigin,
    ) -> Result<Document> {
        let (document, _) = self
            .write(entity_key, origin, |existing, _| {
                let mut document = existing.ok_or_else(|| not_found(entity_key))?;
                for (path, value) in paths {
                    set_path(&mut document, path, value.clone());
                }
                Ok(Some(document))
            })
            .await?;
        document.ok_or_else(|| not_found(entity_key))
    }

    /// Physically remove a document; returns whether one existed.
    pub async fn delete_document(&self, entity_key: &EntityKey, origin: WriteOrigin) -> Result<bool> {
        let mut existed = false;
        self.write(entity_key, origin, |existing, _| {
            existed = existing.is_some();
            Ok(None)
        })
        .await?;
        Ok(existed)
    }

    /// Apply a push channel message.
    pub async fn apply_sync_message(&self, message: &SyncMessage) -> Result<()> {
        message.validate()?;
        match message {
            SyncMessage::Create { entity_key, data } => {
                self.apply_relational_columns(entity_key, data, relational_id(data), true)
                    .await
            }
            SyncMessage::Update { entity_key, data } => {
                self.apply_relational_columns(entity_key, data, relational_id(data), false)
                    .await
            }
            SyncMessage::Delete { entity_key } => self.soft_delete(entity_key).await,
        }
    }

    /// Rebuild the mapped part of a document out of an authoritative record.
    ///
    /// Keys the record does not map (such as `profile.avatar_url`) survive.
    pub async fn apply_relational_create(&self, record: &MemberRecord) -> Result<()> {
        let built = build_document(record);
        self.write(&record.entity_key, WriteOrigin::Sync, |existing, _| {
            let mut document = existing.unwrap_or_default();
            overlay(&mut document, built);
            if !record.is_deleted() {
                remove_path(&mut document, "metadata.deleted_at");
            }
            Ok(Some(document))
        })
        .await?;
        Ok(())
    }

    /// Apply relational column values through the transformer.
    pub async fn apply_relational_update(
        &self,
        entity_key: &EntityKey,
        columns: &FieldChanges,
    ) -> Result<()> {
        self.apply_relational_columns(entity_key, columns, relational_id(columns), false)
            .await
    }

    async fn apply_relational_columns(
        &self,
        entity_key: &EntityKey,
        columns: &FieldChanges,
        relational_id: Option<i64>,
        activate: bool,
    ) -> Result<()> {
        self.write(entity_key, WriteOrigin::Sync, |existing, _| {
            let is_new = existing.is_none();
            let mut document = existing.unwrap_or_default();
            for (path, value) in columns_to_paths(columns) {
                set_path(&mut document, &path, value);
            }
            if activate || is_new {
                set_path(&mut document, "membership.status", Value::from("active"));
                remove_path(&mut document, "metadata.deleted_at");
            }
            if let Some(id) = relational_id {
                set_path(&mut document, "metadata.relational_id", Value::from(id));
            }
            mark_synced_from_relational(&mut document);
            Ok(Some(document))
        })
        .await?;
        Ok(())
    }

    /// Flip a document to inactive. Documents are never physically removed
    /// by synchronization; a missing document is left missing.
    pub async fn soft_delete(&self, entity_key: &EntityKey) -> Result<()> {
        self.write(entity_key, WriteOrigin::Sync, |existing, now| {
            let Some(mut document) = existing else {
                return Ok(None);
            };
            set_path(&mut document, "membership.status", Value::from("inactive"));
            set_path(&mut document, "metadata.deleted_at", Value::from(rfc3339(now)));
            mark_synced_from_relational(&mut document);
            Ok(Some(document))
        })
        .await?;
        Ok(())
    }

    /// Pending replica-origin changes created after `since` (Unix ms).
    pub async fn pending_changes(&self, since: Option<i64>) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.get_pending_changes(since).await
    }

    pub async fn retry_backlog(&self, before: i64) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.get_retry_backlog(before).await
    }

    pub async fn mark_synced(&self, ids: &[i64]) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.mark_synced(ids, now_millis()).await
    }

    pub async fn record_failure(&self, id: i64, error: &str, permanent: bool) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.record_failure(id, error, permanent).await
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

    pub async fn latest_successful_run(&self) -> Result<Option<SyncRun>> {
        let db = self.db.lock().await;
        let repo = LibSqlRunRepository::new(db.connection());
        repo.latest_success().await
    }

    pub async fn record_run(&self, run: &NewSyncRun) -> Result<SyncRun> {
        let db = self.db.lock().await;
        let repo = LibSqlRunRepository::new(db.connection());
        repo.insert(run).await
    }

    #[cfg(test)]
    pub(crate) async fn execute_sql(&self, sql: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(sql, ()).await?;
        Ok(())
    }

    pub async fn list_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let db = self.db.lock().await;
        let repo = LibSqlRunRepository::new(db.connection());
        repo.list_recent(limit).await
    }

    pub async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlAuditRepository::new(db.connection());
        repo.list_recent(limit).await
    }

    pub async fn audit_for(&self, entity_key: &EntityKey, limit: usize) -> Result<Vec<AuditEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlAuditRepository::new(db.connection());
        repo.list_for_entity(entity_key.as_str(), limit).await
    }

    /// Run one document write with detection in a transaction, then audit it.
    async fn write(
        &self,
        entity_key: &EntityKey,
        origin: WriteOrigin,
        mutate: impl FnOnce(Option<Document>, i64) -> Result<Option<Document>>,
    ) -> Result<(Option<Document>, Option<DetectedChange>)> {
        let now = now_millis();
        let db = self.db.lock().await;
        db.begin().await?;
        let (before, after, change) =
            match Self::write_in_transaction(&db, entity_key, origin, mutate, now).await {
                Ok(written) => {
                    db.commit().await?;
                    written
                }
                Err(error) => {
                    db.rollback().await;
                    return Err(error);
                }
            };

        if let Some(change) = &change {
            tracing::info!(
                entity = %entity_key.masked(),
                action = %change.action,
                "Queued replica change"
            );
        }
        if before.is_some() || after.is_some() {
            audit::record(db.connection(), entity_key, before.as_ref(), after.as_ref(), now).await;
        }
        Ok((after, change))
    }

    async fn write_in_transaction(
        db: &Database,
        entity_key: &EntityKey,
        origin: WriteOrigin,
        mutate: impl FnOnce(Option<Document>, i64) -> Result<Option<Document>>,
        now: i64,
    ) -> Result<(Option<Document>, Option<Document>, Option<DetectedChange>)> {
        let documents = LibSqlDocumentRepository::new(db.connection());
        let before = documents.get(entity_key).await?.map(|stored| stored.document);
        let after = mutate(before.clone(), now)?;

        if before == after {
            return Ok((before, after, None));
        }
        match &after {
            Some(document) => documents.put(entity_key, document, now).await?,
            None => {
                documents.delete(entity_key).await?;
            }
        }

        let change = detect_document_change(before.as_ref(), after.as_ref(), origin);
        if let Some(change) = &change {
            let queue = LibSqlQueueRepository::new(db.connection());
            let entry = change
                .clone()
                .into_entry(StoreSide::Replica, entity_key.clone());
            queue.insert(&entry, now).await?;
        }
        Ok((before, after, change))
    }
}

fn not_found(entity_key: &EntityKey) -> Error {
    Error::NotFound(format!("document {}", entity_key.masked()))
}

fn rfc3339(millis: i64) -> String {
    crate::util::datetime_from_millis(millis).to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn relational_id(data: &FieldChanges) -> Option<i64> {
    data.get("id").and_then(Value::as_i64)
}

fn mark_synced_from_relational(document: &mut Document) {
    set_path(document, "metadata.source", Value::from("relational"));
    set_path(
        document,
        "metadata.last_synced_at",
        Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
}

/// Merge `built` into `document` group by group.
fn overlay(document: &mut Document, built: Document) {
    for (group, value) in built {
        let merged = match (document.remove(&group), value) {
            (Some(Value::Object(mut existing)), Value::Object(fields)) => {
                existing.extend(fields);
                Value::Object(existing)
            }
            (_, value) => value,
        };
        document.insert(group, merged);
    }
}

/// Whether a document has been linked to a relational record
pub fn linked_relational_id(document: &Document) -> Option<i64> {
    get_path(document, "metadata.relational_id").and_then(Value::as_i64)
}
