//! Reconciler run-log models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Overall outcome of a reconciler run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown run status `{other}`"))),
        }
    }
}

/// Per-direction counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionStats {
    /// Queue entries pulled for this direction
    pub pulled: usize,
    /// Distinct entities after merging
    pub entities: usize,
    pub applied: usize,
    /// Left pending for the next run
    pub failed: usize,
    /// Permanently failed
    pub rejected: usize,
}

/// Outcome of one orchestration step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepOutcome {
    pub fn ok(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            ok: true,
            detail: None,
        }
    }

    pub fn failed(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

/// Statistics stored as JSON on each run row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStats {
    pub replica_to_relational: DirectionStats,
    pub relational_to_replica: DirectionStats,
    pub steps: Vec<StepOutcome>,
    pub duration_ms: i64,
}

impl RunStats {
    /// Whether any item failed or was rejected in either direction
    pub const fn has_partial_failures(&self) -> bool {
        self.replica_to_relational.failed > 0
            || self.replica_to_relational.rejected > 0
            || self.relational_to_replica.failed > 0
            || self.relational_to_replica.rejected > 0
    }
}

/// Run-log row prior to insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncRun {
    pub run_type: String,
    pub status: RunStatus,
    pub started_at: i64,
    pub completed_at: i64,
    pub window_start: i64,
    pub next_cursor: i64,
    pub stats: RunStats,
    pub error: Option<String>,
}

/// Immutable record of one reconciler tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: i64,
    pub run_type: String,
    pub status: RunStatus,
    pub started_at: i64,
    pub completed_at: i64,
    /// Cursor the run pulled changes after (Unix ms)
    pub window_start: i64,
    /// Cursor later runs use if this run succeeded (Unix ms)
    pub next_cursor: i64,
    pub stats: RunStats,
    pub error: Option<String>,
}
