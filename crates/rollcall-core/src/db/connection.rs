//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

/// Which side's schema a database carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    /// System of record: `members` and its outbound queue
    Relational,
    /// Document replica: documents, outbound queue, run log and audit log
    Replica,
}

impl Store {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Replica => "replica",
        }
    }
}

/// Database wrapper for libSQL connections
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
    store: Store,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>, store: Store) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        Self::from_libsql(db, store).await
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory(store: Store) -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_libsql(db, store).await
    }

    async fn from_libsql(db: LibSqlDatabase, store: Store) -> Result<Self> {
        let conn = db.connect()?;
        let database = Self {
            _db: db,
            conn,
            store,
        };
        database.configure().await?;
        migrations::run(&database.conn, store).await?;
        Ok(database)
    }

    async fn configure(&self) -> Result<()> {
        // WAL is not available for in-memory databases
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        self.conn
            .execute("PRAGMA busy_timeout = 5000;", ())
            .await
            .ok();
        Ok(())
    }

    /// Start a write transaction
    pub async fn begin(&self) -> Result<()> {
        self.conn.execute("BEGIN IMMEDIATE", ()).await?;
        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        if let Err(error) = self.conn.execute("COMMIT", ()).await {
            self.rollback().await;
            return Err(error.into());
        }
        Ok(())
    }

    /// Roll back the open transaction; errors are ignored
    pub async fn rollback(&self) {
        self.conn.execute("ROLLBACK", ()).await.ok();
    }

    pub const fn store(&self) -> Store {
        self.store
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory(Store::Replica).await.unwrap();
        assert_eq!(db.store(), Store::Replica);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_file_backed_twice() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("relational.db");
        drop(Database::open(&path, Store::Relational).await.unwrap());
        let db = Database::open(&path, Store::Relational).await.unwrap();

        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM members", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rollback_discards_writes() {
        let db = Database::open_in_memory(Store::Replica).await.unwrap();
        db.begin().await.unwrap();
        db.connection()
            .execute(
                "INSERT INTO member_documents (entity_key, document, created_at, updated_at)
                 VALUES ('0101302989', '{}', 1, 1)",
                (),
            )
            .await
            .unwrap();
        db.rollback().await;

        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM member_documents", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 0);
    }
}
