//! Audit log repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use libsql::{Connection, Row, Value};

use crate::error::Result;
use crate::models::AuditEntry;

/// Trait for audit log storage (append-only)
#[allow(async_fn_in_trait)]
pub trait AuditRepository {
    async fn insert(&self, entry: &AuditEntry) -> Result<()>;

    /// Newest entries first
    async fn list_recent(&self, limit: usize) -> Result<Vec<AuditEntry>>;

    /// Newest entries for one member first
    async fn list_for_entity(&self, entity_key: &str, limit: usize) -> Result<Vec<AuditEntry>>;
}

/// libSQL implementation of `AuditRepository`
pub struct LibSqlAuditRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlAuditRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_entries(&self, sql: &str, params: Vec<Value>) -> Result<Vec<AuditEntry>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }

    fn parse_entry(row: &Row) -> Result<AuditEntry> {
        let before: Option<String> = row.get(5)?;
        let after: Option<String> = row.get(6)?;
        let changed_keys: String = row.get(7)?;
        Ok(AuditEntry {
            id: row.get(0)?,
            entity_key: row.get(1)?,
            actor: row.get(2)?,
            action: row.get::<String>(3)?.parse()?,
            member_name: row.get(4)?,
            before: before.as_deref().map(serde_json::from_str).transpose()?,
            after: after.as_deref().map(serde_json::from_str).transpose()?,
            changed_keys: serde_json::from_str(&changed_keys)?,
            created_at: row.get(8)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, entity_key, actor, action, member_name, before_json, \
     after_json, changed_keys, created_at FROM member_audit_log";

fn json_text(value: Option<&serde_json::Value>) -> Result<Value> {
    Ok(match value {
        Some(value) => Value::Text(serde_json::to_string(value)?),
        None => Value::Null,
    })
}

impl AuditRepository for LibSqlAuditRepository<'_> {
    async fn insert(&self, entry: &AuditEntry) -> Result<()> {
        let params = vec![
            Value::Text(entry.id.clone()),
            Value::Text(entry.entity_key.clone()),
            Value::Text(entry.actor.clone()),
            Value::Text(entry.action.as_str().to_string()),
            entry
                .member_name
                .clone()
                .map_or(Value::Null, Value::Text),
            json_text(entry.before.as_ref())?,
            json_text(entry.after.as_ref())?,
            Value::Text(serde_json::to_string(&entry.changed_keys)?),
            Value::Integer(entry.created_at),
        ];
        self.conn
            .execute(
                "INSERT INTO member_audit_log (id, entity_key, actor, action, member_name,
                    before_json, after_json, changed_keys, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params,
            )
            .await?;
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?");
        self.query_entries(&sql, vec![Value::Integer(limit as i64)])
            .await
    }

    async fn list_for_entity(&self, entity_key: &str, limit: usize) -> Result<Vec<AuditEntry>> {
        let sql = format!("{SELECT_COLUMNS} WHERE entity_key = ? ORDER BY id DESC LIMIT ?");
        self.query_entries(
            &sql,
            vec![
                Value::Text(entity_key.to_string()),
                Value::Integer(limit as i64),
            ],
        )
        .await
    }
}
