//! Reconciler run log

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use libsql::{Connection, Row, Value};

use crate::error::Result;
use crate::models::{NewSyncRun, RunStats, SyncRun};

/// Trait for run-log storage (append-only)
#[allow(async_fn_in_trait)]
pub trait RunRepository {
    async fn insert(&self, run: &NewSyncRun) -> Result<SyncRun>;

    /// Latest run whose status is `success`
    async fn latest_success(&self) -> Result<Option<SyncRun>>;

    /// Newest runs first
    async fn list_recent(&self, limit: usize) -> Result<Vec<SyncRun>>;
}

/// libSQL implementation of `RunRepository`
pub struct LibSqlRunRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRunRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_run(row: &Row) -> Result<SyncRun> {
        let stats: String = row.get(7)?;
        Ok(SyncRun {
            id: row.get(0)?,
            run_type: row.get(1)?,
            status: row.get::<String>(2)?.parse()?,
            started_at: row.get(3)?,
            completed_at: row.get(4)?,
            window_start: row.get(5)?,
            next_cursor: row.get(6)?,
            stats: serde_json::from_str::<RunStats>(&stats)?,
            error: row.get(8)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, run_type, status, started_at, completed_at, \
     window_start, next_cursor, stats, error FROM sync_runs";

impl RunRepository for LibSqlRunRepository<'_> {
    async fn insert(&self, run: &NewSyncRun) -> Result<SyncRun> {
        let stats = serde_json::to_string(&run.stats)?;
        self.conn
            .execute(
                "INSERT INTO sync_runs (run_type, status, started_at, completed_at, window_start,
                    next_cursor, stats, error)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    Value::Text(run.run_type.clone()),
                    Value::Text(run.status.as_str().to_string()),
                    Value::Integer(run.started_at),
                    Value::Integer(run.completed_at),
                    Value::Integer(run.window_start),
                    Value::Integer(run.next_cursor),
                    Value::Text(stats),
                    run.error.clone().map_or(Value::Null, Value::Text),
                ],
            )
            .await?;

        Ok(SyncRun {
            id: self.conn.last_insert_rowid(),
            run_type: run.run_type.clone(),
            status: run.status,
            started_at: run.started_at,
            completed_at: run.completed_at,
            window_start: run.window_start,
            next_cursor: run.next_cursor,
            stats: run.stats.clone(),
            error: run.error.clone(),
        })
    }

    async fn latest_success(&self) -> Result<Option<SyncRun>> {
        let sql = format!("{SELECT_COLUMNS} WHERE status = 'success' ORDER BY started_at DESC, id DESC LIMIT 1");
        let mut rows = self.conn.query(&sql, ()).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_run(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY started_at DESC, id DESC LIMIT ?");
        let mut rows = self.conn.query(&sql, [limit as i64]).await?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next().await? {
            runs.push(Self::parse_run(&row)?);
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Store};
    use crate::models::RunStatus;

    fn run(status: RunStatus, started_at: i64) -> NewSyncRun {
        NewSyncRun {
            run_type: "scheduled".into(),
            status,
            started_at,
            completed_at: started_at + 10,
            window_start: started_at - 100,
            next_cursor: started_at - 1,
            stats: RunStats::default(),
            error: (status == RunStatus::Failed).then(|| "relational API unreachable".into()),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_latest_success_ignores_failed_runs() {
        let db = Database::open_in_memory(Store::Replica).await.unwrap();
        let repo = LibSqlRunRepository::new(db.connection());

        assert!(repo.latest_success().await.unwrap().is_none());
        repo.insert(&run(RunStatus::Success, 1_000)).await.unwrap();
        repo.insert(&run(RunStatus::Failed, 2_000)).await.unwrap();

        let latest = repo.latest_success().await.unwrap().unwrap();
        assert_eq!(latest.started_at, 1_000);
        assert_eq!(latest.next_cursor, 999);

        let recent = repo.list_recent(5).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status, RunStatus::Failed);
        assert_eq!(
            recent[0].error.as_deref(),
            Some("relational API unreachable")
        );
    }
}
