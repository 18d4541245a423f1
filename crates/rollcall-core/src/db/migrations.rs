//! Database migrations

use crate::error::Result;
use libsql::Connection;

use super::Store;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations for the given store
pub async fn run(conn: &Connection, store: Store) -> Result<()> {
    let version = get_version(conn).await?;
    if version >= CURRENT_VERSION {
        return Ok(());
    }

    if version < 1 {
        match store {
            Store::Relational => apply(conn, 1, &relational_v1()).await?,
            Store::Replica => apply(conn, 1, &replica_v1()).await?,
        }
    }
    if version < 2 {
        apply(conn, 2, &queue_attempts_v2()).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

const SCHEMA_VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
)";

const SYNC_QUEUE_TABLE: &str = "CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    action TEXT NOT NULL,
    field_changes TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    synced_at INTEGER,
    error TEXT
)";

const SYNC_QUEUE_INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_status_created ON sync_queue(status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue(entity_key)",
];

/// Version 1 for the system of record
fn relational_v1() -> Vec<&'static str> {
    let mut statements = vec![
        SCHEMA_VERSION_TABLE,
        "CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_key TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            birthday TEXT,
            gender INTEGER NOT NULL DEFAULT 0,
            housing_situation INTEGER NOT NULL DEFAULT 0,
            email TEXT,
            phone TEXT,
            facebook TEXT,
            street TEXT,
            postal_code TEXT,
            city TEXT,
            country TEXT,
            reachable INTEGER NOT NULL DEFAULT 0,
            groupable INTEGER NOT NULL DEFAULT 0,
            date_joined TEXT,
            admin_notes TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS idx_members_deleted ON members(deleted_at)",
        SYNC_QUEUE_TABLE,
    ];
    statements.extend(SYNC_QUEUE_INDEXES);
    statements
}

/// Version 1 for the document replica
fn replica_v1() -> Vec<&'static str> {
    let mut statements = vec![
        SCHEMA_VERSION_TABLE,
        "CREATE TABLE IF NOT EXISTS member_documents (
            entity_key TEXT PRIMARY KEY,
            document TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        SYNC_QUEUE_TABLE,
        "CREATE TABLE IF NOT EXISTS sync_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_type TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER NOT NULL,
            window_start INTEGER NOT NULL,
            next_cursor INTEGER NOT NULL,
            stats TEXT NOT NULL,
            error TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_runs_status_started ON sync_runs(status, started_at DESC)",
        "CREATE TABLE IF NOT EXISTS member_audit_log (
            id TEXT PRIMARY KEY,
            entity_key TEXT NOT NULL,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            member_name TEXT,
            before_json TEXT,
            after_json TEXT,
            changed_keys TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_member_audit_entity ON member_audit_log(entity_key, created_at DESC)",
    ];
    statements.extend(SYNC_QUEUE_INDEXES);
    statements
}

/// Version 2: failed attempt counter on queue entries
fn queue_attempts_v2() -> Vec<&'static str> {
    vec!["ALTER TABLE sync_queue ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0"]
}

async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
                [name],
            )
            .await
            .unwrap();
        rows.next()
            .await
            .unwrap()
            .is_some_and(|row| row.get::<i32>(0).unwrap() != 0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn, Store::Relational).await.unwrap();
        run(&conn, Store::Relational).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_relational_schema_tables() {
        let conn = setup().await;
        run(&conn, Store::Relational).await.unwrap();
        assert!(table_exists(&conn, "members").await);
        assert!(table_exists(&conn, "sync_queue").await);
        assert!(!table_exists(&conn, "member_documents").await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replica_schema_tables() {
        let conn = setup().await;
        run(&conn, Store::Replica).await.unwrap();
        for table in ["member_documents", "sync_queue", "sync_runs", "member_audit_log"] {
            assert!(table_exists(&conn, table).await, "missing {table}");
        }
        assert!(!table_exists(&conn, "members").await);
    }
}
