//! Audit logger for replica mutations
//!
//! Every replica write is recorded with full before/after snapshots and a
//! generic top-level diff, whatever its origin. Recording never fails the
//! write it describes.

use serde_json::Value;

use crate::db::{AuditRepository, LibSqlAuditRepository};
use crate::models::{get_path, AuditEntry, Document, EntityKey, SyncAction};
use crate::util::sanitize;

/// Actor recorded when a document carries no `updated_by`
pub const SYSTEM_ACTOR: &str = "system";

/// Top-level keys present in either snapshot whose values differ.
pub fn changed_top_level_keys(before: Option<&Document>, after: Option<&Document>) -> Vec<String> {
    let empty = Document::new();
    let before = before.unwrap_or(&empty);
    let after = after.unwrap_or(&empty);

    let mut keys: Vec<String> = before
        .keys()
        .chain(after.keys())
        .filter(|key| before.get(*key) != after.get(*key))
        .cloned()
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Build the audit entry for a write, or `None` when neither snapshot exists.
pub fn build_entry(
    entity_key: &EntityKey,
    before: Option<&Document>,
    after: Option<&Document>,
    now: i64,
) -> Option<AuditEntry> {
    let action = match (before, after) {
        (None, None) => return None,
        (None, Some(_)) => SyncAction::Create,
        (Some(_), None) => SyncAction::Delete,
        (Some(_), Some(_)) => SyncAction::Update,
    };

    let latest = after.or(before)?;
    let actor = latest
        .get("updated_by")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|actor| !actor.is_empty())
        .unwrap_or(SYSTEM_ACTOR)
        .to_string();
    let member_name = get_path(latest, "profile.name")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(AuditEntry {
        id: AuditEntry::make_id(now, &actor, action, entity_key.as_str()),
        entity_key: entity_key.as_str().to_string(),
        actor,
        action,
        member_name,
        before: before.cloned().map(Value::Object),
        after: after.cloned().map(Value::Object),
        changed_keys: changed_top_level_keys(before, after),
        created_at: now,
    })
}

/// Record a replica mutation. Failures are logged and swallowed.
pub async fn record(
    conn: &libsql::Connection,
    entity_key: &EntityKey,
    before: Option<&Document>,
    after: Option<&Document>,
    now: i64,
) {
    let Some(entry) = build_entry(entity_key, before, after, now) else {
        return;
    };
    let repo = LibSqlAuditRepository::new(conn);
    if let Err(error) = repo.insert(&entry).await {
        tracing::warn!(
            entity = %entity_key.masked(),
            action = %entry.action,
            "Failed to write audit entry: {}",
            sanitize(&error)
        );
    }
}
