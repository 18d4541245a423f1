//! Replica document repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use libsql::{Connection, Row};

use crate::error::{Error, Result};
use crate::models::{Document, EntityKey};

/// A document together with its storage timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub entity_key: EntityKey,
    pub document: Document,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Trait for document storage operations (async)
#[allow(async_fn_in_trait)]
pub trait DocumentRepository {
    async fn get(&self, entity_key: &EntityKey) -> Result<Option<StoredDocument>>;

    /// Insert or replace the whole document
    async fn put(&self, entity_key: &EntityKey, document: &Document, now: i64) -> Result<()>;

    /// Physically remove a document; returns whether it existed
    async fn delete(&self, entity_key: &EntityKey) -> Result<bool>;

    async fn list(&self, limit: usize) -> Result<Vec<StoredDocument>>;
}

/// libSQL implementation of `DocumentRepository`
pub struct LibSqlDocumentRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlDocumentRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_document(row: &Row) -> Result<StoredDocument> {
        let entity_key: String = row.get(0)?;
        let body: String = row.get(1)?;
        let value: serde_json::Value = serde_json::from_str(&body)?;
        let serde_json::Value::Object(document) = value else {
            return Err(Error::Database(format!(
                "stored document for {} is not an object",
                EntityKey::parse(&entity_key)?.masked()
            )));
        };
        Ok(StoredDocument {
            entity_key: EntityKey::parse(&entity_key)?,
            document,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }
}

impl DocumentRepository for LibSqlDocumentRepository<'_> {
    async fn get(&self, entity_key: &EntityKey) -> Result<Option<StoredDocument>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_key, document, created_at, updated_at
                 FROM member_documents WHERE entity_key = ?",
                [entity_key.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_document(&row)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, entity_key: &EntityKey, document: &Document, now: i64) -> Result<()> {
        let body = serde_json::to_string(document)?;
        self.conn
            .execute(
                "INSERT INTO member_documents (entity_key, document, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(entity_key) DO UPDATE SET document = excluded.document,
                    updated_at = excluded.updated_at",
                libsql::params![entity_key.as_str(), body, now],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, entity_key: &EntityKey) -> Result<bool> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM member_documents WHERE entity_key = ?",
                [entity_key.as_str()],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredDocument>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_key, document, created_at, updated_at
                 FROM member_documents ORDER BY updated_at DESC LIMIT ?",
                [limit as i64],
            )
            .await?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next().await? {
            documents.push(Self::parse_document(&row)?);
        }
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Store};
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_get_and_replace() {
        let db = Database::open_in_memory(Store::Replica).await.unwrap();
        let repo = LibSqlDocumentRepository::new(db.connection());
        let key = EntityKey::parse("0101302989").unwrap();

        let first = json!({"profile": {"name": "Anna"}}).as_object().cloned().unwrap();
        repo.put(&key, &first, 1_000).await.unwrap();
        let second = json!({"profile": {"name": "Anna B."}}).as_object().cloned().unwrap();
        repo.put(&key, &second, 2_000).await.unwrap();

        let stored = repo.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.document, second);
        assert_eq!(stored.created_at, 1_000);
        assert_eq!(stored.updated_at, 2_000);
        assert_eq!(repo.list(10).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_reports_existence() {
        let db = Database::open_in_memory(Store::Replica).await.unwrap();
        let repo = LibSqlDocumentRepository::new(db.connection());
        let key = EntityKey::parse("0101302989").unwrap();

        assert!(!repo.delete(&key).await.unwrap());
        repo.put(&key, &Document::new(), 1_000).await.unwrap();
        assert!(repo.delete(&key).await.unwrap());
        assert!(repo.get(&key).await.unwrap().is_none());
    }
}
