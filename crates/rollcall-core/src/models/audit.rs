//! Audit log entry model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SyncAction;

/// Immutable before/after record of one replica mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// `{timestamp_ms}_{actor}_{action}_{entity_key}`
    pub id: String,
    pub entity_key: String,
    pub actor: String,
    pub action: SyncAction,
    pub member_name: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    /// Top-level keys whose values differ between snapshots
    pub changed_keys: Vec<String>,
    /// Unix ms
    pub created_at: i64,
}

impl AuditEntry {
    /// Build the chronologically sortable entry id.
    pub fn make_id(timestamp_ms: i64, actor: &str, action: SyncAction, entity_key: &str) -> String {
        format!("{timestamp_ms}_{actor}_{action}_{entity_key}")
    }
}
