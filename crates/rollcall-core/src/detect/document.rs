use serde_json::Value;

use super::DetectedChange;
use crate::models::{get_path, Document, FieldChanges, SyncAction, WriteOrigin};

/// Document paths whose changes are propagated to the relational store.
pub const TRACKED_PATHS: &[&str] = &[
    "profile.name",
    "profile.email",
    "profile.phone",
    "profile.birthday",
    "profile.gender",
    "profile.facebook",
    "profile.housing_situation",
    "address.street",
    "address.postal_code",
    "address.city",
    "address.country",
    "membership.status",
    "membership.reachable",
    "membership.groupable",
];

/// Detect what a replica write changed.
///
/// Writes applied by the sync machinery are never reported, and updates that
/// touch no tracked path are dropped.
pub fn detect_document_change(
    before: Option<&Document>,
    after: Option<&Document>,
    origin: WriteOrigin,
) -> Option<DetectedChange> {
    if origin == WriteOrigin::Sync {
        return None;
    }

    let (action, field_changes) = match (before, after) {
        (None, None) => return None,
        (None, Some(after)) => (SyncAction::Create, present_paths(after)),
        (Some(before), None) => (SyncAction::Delete, present_paths(before)),
        (Some(before), Some(after)) => {
            let diff = diff_tracked(before, after);
            if diff.is_empty() {
                return None;
            }
            (SyncAction::Update, diff)
        }
    };

    Some(DetectedChange {
        action,
        field_changes,
    })
}

fn present_paths(document: &Document) -> FieldChanges {
    TRACKED_PATHS
        .iter()
        .filter_map(|path| get_path(document, path).map(|value| ((*path).to_string(), value.clone())))
        .collect()
}

fn diff_tracked(before: &Document, after: &Document) -> FieldChanges {
    TRACKED_PATHS
        .iter()
        .filter_map(|path| {
            let old = get_path(before, path);
            let new = get_path(after, path);
            (old != new).then(|| ((*path).to_string(), new.cloned().unwrap_or(Value::Null)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn no_prior_version_is_create() {
        let after = doc(json!({"profile": {"name": "Anna", "avatar_url": "x"}}));
        let change = detect_document_change(None, Some(&after), WriteOrigin::Local).unwrap();
        assert_eq!(change.action, SyncAction::Create);
        assert_eq!(change.field_changes.len(), 1);
        assert_eq!(change.field_changes["profile.name"], json!("Anna"));
    }

    #[test]
    fn no_new_version_is_delete() {
        let before = doc(json!({"profile": {"name": "Anna"}}));
        let change = detect_document_change(Some(&before), None, WriteOrigin::Local).unwrap();
        assert_eq!(change.action, SyncAction::Delete);
    }

    #[test]
    fn update_diffs_only_tracked_paths() {
        let before = doc(json!({
            "profile": {"name": "Anna", "phone": "111", "avatar_url": "a"},
            "address": {"city": "Reykjavík"}
        }));
        let after = doc(json!({
            "profile": {"name": "Anna", "phone": "222", "avatar_url": "b"},
            "address": {"city": "Reykjavík"}
        }));
        let change = detect_document_change(Some(&before), Some(&after), WriteOrigin::Local).unwrap();
        assert_eq!(change.action, SyncAction::Update);
        let mut expected = FieldChanges::new();
        expected.insert("profile.phone".into(), json!("222"));
        assert_eq!(change.field_changes, expected);
    }

    #[test]
    fn removed_path_is_reported_as_null() {
        let before = doc(json!({"address": {"street": "Laugavegur 1"}}));
        let after = doc(json!({"address": {}}));
        let change = detect_document_change(Some(&before), Some(&after), WriteOrigin::Local).unwrap();
        assert_eq!(change.field_changes["address.street"], Value::Null);
    }

    #[test]
    fn untracked_only_update_is_dropped() {
        let before = doc(json!({"profile": {"name": "Anna", "avatar_url": "a"}}));
        let after = doc(json!({"profile": {"name": "Anna", "avatar_url": "b"}}));
        assert_eq!(
            detect_document_change(Some(&before), Some(&after), WriteOrigin::Local),
            None
        );
    }

    #[test]
    fn sync_origin_writes_are_not_reported() {
        let before = doc(json!({"profile": {"name": "Anna"}}));
        let after = doc(json!({"profile": {"name": "Anna B."}}));
        assert_eq!(
            detect_document_change(Some(&before), Some(&after), WriteOrigin::Sync),
            None
        );
    }
}
