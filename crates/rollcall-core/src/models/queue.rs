//! Pending-change queue models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EntityKey;
use crate::error::Error;

/// Field changes keyed by column name (relational) or dotted path (replica).
pub type FieldChanges = BTreeMap<String, Value>;

/// One of the two synchronized stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreSide {
    Relational,
    Replica,
}

impl StoreSide {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Replica => "replica",
        }
    }

    /// The store on the other end of a sync direction
    pub const fn opposite(self) -> Self {
        match self {
            Self::Relational => Self::Replica,
            Self::Replica => Self::Relational,
        }
    }
}

impl fmt::Display for StoreSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreSide {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "relational" => Ok(Self::Relational),
            "replica" => Ok(Self::Replica),
            other => Err(Error::InvalidInput(format!("unknown store `{other}`"))),
        }
    }
}

/// Kind of mutation carried by a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown action `{other}`"))),
        }
    }
}

/// Queue entry lifecycle. `Pending` is only ever left once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Synced,
    Failed,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown queue status `{other}`"))),
        }
    }
}

/// A durable outbound change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub source: StoreSide,
    pub target: StoreSide,
    pub entity_key: EntityKey,
    pub action: SyncAction,
    pub field_changes: FieldChanges,
    /// Unix ms
    pub created_at: i64,
    pub status: QueueStatus,
    pub synced_at: Option<i64>,
    pub error: Option<String>,
    /// Failed apply attempts so far
    pub attempts: i64,
}

/// Queue entry prior to insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueEntry {
    pub source: StoreSide,
    pub target: StoreSide,
    pub entity_key: EntityKey,
    pub action: SyncAction,
    pub field_changes: FieldChanges,
}

impl NewQueueEntry {
    /// An entry flowing from `source` to the opposite store.
    pub const fn from_side(
        source: StoreSide,
        entity_key: EntityKey,
        action: SyncAction,
        field_changes: FieldChanges,
    ) -> Self {
        Self {
            source,
            target: source.opposite(),
            entity_key,
            action,
            field_changes,
        }
    }
}

/// Counts per status plus the oldest pending entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub pending: i64,
    pub synced: i64,
    pub failed: i64,
    /// Creation time (Unix ms) of the oldest pending entry
    pub oldest_pending: Option<i64>,
}
