//! Wire messages exchanged between the stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{EntityKey, FieldChanges, QueueEntry, QueueSummary, SyncAction};
use crate::util::datetime_from_millis;

/// Push channel payload, one variant per action.
///
/// `data` carries relational column values; create and update messages must
/// carry a non-empty set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SyncMessage {
    Create {
        entity_key: EntityKey,
        data: FieldChanges,
    },
    Update {
        entity_key: EntityKey,
        data: FieldChanges,
    },
    Delete {
        entity_key: EntityKey,
    },
}

impl SyncMessage {
    /// Build the message announcing a relational write.
    pub fn for_change(action: SyncAction, entity_key: EntityKey, data: FieldChanges) -> Self {
        match action {
            SyncAction::Create => Self::Create { entity_key, data },
            SyncAction::Update => Self::Update { entity_key, data },
            SyncAction::Delete => Self::Delete { entity_key },
        }
    }

    pub const fn entity_key(&self) -> &EntityKey {
        match self {
            Self::Create { entity_key, .. }
            | Self::Update { entity_key, .. }
            | Self::Delete { entity_key } => entity_key,
        }
    }

    pub const fn action(&self) -> SyncAction {
        match self {
            Self::Create { .. } => SyncAction::Create,
            Self::Update { .. } => SyncAction::Update,
            Self::Delete { .. } => SyncAction::Delete,
        }
    }

    /// Reject messages whose shape decodes but makes no sense.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Create { data, .. } | Self::Update { data, .. } if data.is_empty() => Err(
                Error::InvalidInput(format!("{} message carries no data", self.action())),
            ),
            _ => Ok(()),
        }
    }
}

/// One relational queue entry as exposed by `GET /changes`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: i64,
    pub entity_key: EntityKey,
    pub action: SyncAction,
    pub fields_changed: FieldChanges,
    pub created_at: DateTime<Utc>,
}

impl From<QueueEntry> for ChangeRecord {
    fn from(entry: QueueEntry) -> Self {
        Self {
            id: entry.id,
            entity_key: entry.entity_key,
            action: entry.action,
            fields_changed: entry.field_changes,
            created_at: datetime_from_millis(entry.created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesResponse {
    pub changes: Vec<ChangeRecord>,
    pub count: usize,
}

impl ChangesResponse {
    pub fn new(changes: Vec<ChangeRecord>) -> Self {
        let count = changes.len();
        Self { changes, count }
    }
}

/// One merged replica change submitted to `POST /apply`.
///
/// The entity key stays a plain string so a malformed key is rejected for
/// that item only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyChange {
    pub entity_key: String,
    pub action: SyncAction,
    /// Dotted document paths to values
    #[serde(default)]
    pub changes: FieldChanges,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub changes: Vec<ApplyChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyStatus {
    Success,
    /// Retryable; the entry stays pending
    Error,
    /// Permanent data error; the entry is failed
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub entity_key: String,
    pub status: ApplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub updated_fields: Vec<String>,
}

impl ApplyResult {
    pub fn success(entity_key: impl Into<String>, updated_fields: Vec<String>) -> Self {
        Self {
            entity_key: entity_key.into(),
            status: ApplyStatus::Success,
            message: None,
            updated_fields,
        }
    }

    /// Classify a failure as retryable or permanent.
    pub fn failure(entity_key: impl Into<String>, error: &Error) -> Self {
        let status = if error.is_transient() {
            ApplyStatus::Error
        } else {
            ApplyStatus::Rejected
        };
        Self {
            entity_key: entity_key.into(),
            status,
            message: Some(error.to_string()),
            updated_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub results: Vec<ApplyResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSyncedRequest {
    pub sync_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSyncedResponse {
    pub success: bool,
    pub marked_synced: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub id: i64,
    pub error: String,
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkFailedRequest {
    pub failures: Vec<FailureReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkFailedResponse {
    pub success: bool,
    pub marked: usize,
}

/// Body of `PUT /member/<key>/address`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressUpdate {
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl AddressUpdate {
    /// Column changes for the four address columns
    pub fn to_columns(&self) -> FieldChanges {
        [
            ("street", &self.street),
            ("postal_code", &self.postal_code),
            ("city", &self.city),
            ("country", &self.country),
        ]
        .into_iter()
        .map(|(column, value)| {
            (
                column.to_string(),
                value
                    .as_deref()
                    .map_or(serde_json::Value::Null, serde_json::Value::from),
            )
        })
        .collect()
    }
}

/// Body of `GET /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub pending: i64,
    pub synced: i64,
    pub failed: i64,
    pub oldest_pending: Option<DateTime<Utc>>,
}

impl From<QueueSummary> for StatusResponse {
    fn from(summary: QueueSummary) -> Self {
        Self {
            pending: summary.pending,
            synced: summary.synced,
            failed: summary.failed,
            oldest_pending: summary.oldest_pending.map(datetime_from_millis),
        }
    }
}
