//! Durable pending-change store

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{EntityKey, FieldChanges, NewQueueEntry, QueueEntry, QueueStatus, QueueSummary};
use libsql::{Connection, Row, Value};

/// Trait for queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Append an entry with status `pending`
    async fn insert(&self, entry: &NewQueueEntry, created_at: i64) -> Result<i64>;

    /// Get an entry by id
    async fn get(&self, id: i64) -> Result<Option<QueueEntry>>;

    /// Pending entries created strictly after `since`, oldest first
    async fn get_pending_changes(&self, since: Option<i64>) -> Result<Vec<QueueEntry>>;

    /// Pending entries created at or before `before` that already failed once
    async fn get_retry_backlog(&self, before: i64) -> Result<Vec<QueueEntry>>;

    /// Transition pending entries to synced; returns rows changed
    async fn mark_synced(&self, ids: &[i64], synced_at: i64) -> Result<usize>;

    /// Record a failed apply. Permanent failures leave `pending` for `failed`.
    async fn record_failure(&self, id: i64, error: &str, permanent: bool) -> Result<bool>;

    /// Counts per status and the oldest pending creation time
    async fn status_summary(&self) -> Result<QueueSummary>;

    /// Most recent entries, optionally filtered by status
    async fn list(&self, status: Option<QueueStatus>, limit: usize) -> Result<Vec<QueueEntry>>;

    /// Delete synced entries whose `synced_at` is older than the threshold
    async fn cleanup_synced(&self, older_than: i64) -> Result<usize>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_entries(&self, sql: &str, params: Vec<Value>) -> Result<Vec<QueueEntry>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }

    fn parse_entry(row: &Row) -> Result<QueueEntry> {
        let entity_key: String = row.get(3)?;
        let field_changes: String = row.get(5)?;
        Ok(QueueEntry {
            id: row.get(0)?,
            source: row.get::<String>(1)?.parse()?,
            target: row.get::<String>(2)?.parse()?,
            entity_key: EntityKey::parse(&entity_key)?,
            action: row.get::<String>(4)?.parse()?,
            field_changes: serde_json::from_str::<FieldChanges>(&field_changes)?,
            created_at: row.get(6)?,
            status: row.get::<String>(7)?.parse()?,
            synced_at: row.get(8)?,
            error: row.get(9)?,
            attempts: row.get(10)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, source, target, entity_key, action, field_changes, \
     created_at, status, synced_at, error, attempts FROM sync_queue";

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn insert(&self, entry: &NewQueueEntry, created_at: i64) -> Result<i64> {
        let field_changes = serde_json::to_string(&entry.field_changes)?;
        self.conn
            .execute(
                "INSERT INTO sync_queue (source, target, entity_key, action, field_changes, created_at, status)
                 VALUES (?, ?, ?, ?, ?, ?, 'pending')",
                libsql::params![
                    entry.source.as_str(),
                    entry.target.as_str(),
                    entry.entity_key.as_str(),
                    entry.action.as_str(),
                    field_changes,
                    created_at
                ],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    async fn get(&self, id: i64) -> Result<Option<QueueEntry>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        Ok(self
            .query_entries(&sql, vec![Value::Integer(id)])
            .await?
            .into_iter()
            .next())
    }

    async fn get_pending_changes(&self, since: Option<i64>) -> Result<Vec<QueueEntry>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE status = 'pending' AND created_at > ? ORDER BY created_at ASC, id ASC"
        );
        self.query_entries(&sql, vec![Value::Integer(since.unwrap_or(i64::MIN))])
            .await
    }

    async fn get_retry_backlog(&self, before: i64) -> Result<Vec<QueueEntry>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE status = 'pending' AND attempts > 0 AND created_at <= ?
             ORDER BY created_at ASC, id ASC"
        );
        self.query_entries(&sql, vec![Value::Integer(before)]).await
    }

    async fn mark_synced(&self, ids: &[i64], synced_at: i64) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE sync_queue SET status = 'synced', synced_at = ?, error = NULL
             WHERE status = 'pending' AND id IN ({placeholders})"
        );
        let mut params = Vec::with_capacity(ids.len() + 1);
        params.push(Value::Integer(synced_at));
        params.extend(ids.iter().map(|id| Value::Integer(*id)));
        let changed = self.conn.execute(&sql, params).await?;
        usize::try_from(changed).map_err(|error| Error::Database(error.to_string()))
    }

    async fn record_failure(&self, id: i64, error: &str, permanent: bool) -> Result<bool> {
        let status = if permanent { "failed" } else { "pending" };
        let changed = self
            .conn
            .execute(
                "UPDATE sync_queue SET status = ?, error = ?, attempts = attempts + 1
                 WHERE id = ? AND status = 'pending'",
                libsql::params![status, error, id],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn status_summary(&self) -> Result<QueueSummary> {
        let mut summary = QueueSummary::default();
        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*), MIN(created_at) FROM sync_queue GROUP BY status",
                (),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            let count: i64 = row.get(1)?;
            match row.get::<String>(0)?.parse()? {
                QueueStatus::Pending => {
                    summary.pending = count;
                    summary.oldest_pending = row.get(2)?;
                }
                QueueStatus::Synced => summary.synced = count,
                QueueStatus::Failed => summary.failed = count,
            }
        }
        Ok(summary)
    }

    async fn list(&self, status: Option<QueueStatus>, limit: usize) -> Result<Vec<QueueEntry>> {
        match status {
            Some(status) => {
                let sql =
                    format!("{SELECT_COLUMNS} WHERE status = ? ORDER BY created_at DESC, id DESC LIMIT ?");
                self.query_entries(
                    &sql,
                    vec![Value::Text(status.as_str().to_string()), Value::Integer(limit as i64)],
                )
                .await
            }
            None => {
                let sql = format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC LIMIT ?");
                self.query_entries(&sql, vec![Value::Integer(limit as i64)])
                    .await
            }
        }
    }

    async fn cleanup_synced(&self, older_than: i64) -> Result<usize> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM sync_queue WHERE status = 'synced' AND synced_at < ?",
                [older_than],
            )
            .await?;
        usize::try_from(deleted).map_err(|error| Error::Database(error.to_string()))
    }
}
