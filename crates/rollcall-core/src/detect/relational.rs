use super::DetectedChange;
use crate::models::{MemberRecord, SyncAction};
use crate::transform::record_columns;

/// Detect what a relational write changed.
///
/// The full mapped record is always carried so the replica can apply it as
/// a plain set. An update that changes no mapped column yields nothing.
pub fn detect_relational_change(
    before: Option<&MemberRecord>,
    after: &MemberRecord,
) -> Option<DetectedChange> {
    let full = record_columns(after);
    let action = match before {
        None => SyncAction::Create,
        Some(before) if !before.is_deleted() && after.is_deleted() => SyncAction::Delete,
        Some(before) if before.is_deleted() && !after.is_deleted() => SyncAction::Create,
        Some(before) => {
            if record_columns(before) == full {
                return None;
            }
            SyncAction::Update
        }
    };

    Some(DetectedChange {
        action,
        field_changes: full,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKey, MemberInput};
    use serde_json::json;

    fn member() -> MemberRecord {
        MemberRecord::from_input(
            EntityKey::parse("0101302989").unwrap(),
            MemberInput {
                name: "Anna".into(),
                ..MemberInput::default()
            },
            1_000,
        )
    }

    #[test]
    fn insert_is_create_with_full_record() {
        let change = detect_relational_change(None, &member()).unwrap();
        assert_eq!(change.action, SyncAction::Create);
        assert_eq!(change.field_changes.len(), 14);
        assert!(!change.field_changes.contains_key("admin_notes"));
    }

    #[test]
    fn update_serializes_full_record() {
        let before = member();
        let mut after = before.clone();
        after.apply_column("phone", &json!("5551234")).unwrap();
        let change = detect_relational_change(Some(&before), &after).unwrap();
        assert_eq!(change.action, SyncAction::Update);
        assert_eq!(change.field_changes.len(), 14);
        assert_eq!(change.field_changes["name"], json!("Anna"));
    }

    #[test]
    fn admin_notes_only_update_is_dropped() {
        let before = member();
        let mut after = before.clone();
        after.apply_column("admin_notes", &json!("late fee")).unwrap();
        assert_eq!(detect_relational_change(Some(&before), &after), None);
    }

    #[test]
    fn revival_is_create() {
        let mut before = member();
        before.deleted_at = Some(2_000);
        let mut after = before.clone();
        after.deleted_at = None;
        let change = detect_relational_change(Some(&before), &after).unwrap();
        assert_eq!(change.action, SyncAction::Create);
    }

    #[test]
    fn soft_delete_is_delete() {
        let before = member();
        let mut after = before.clone();
        after.deleted_at = Some(2_000);
        let change = detect_relational_change(Some(&before), &after).unwrap();
        assert_eq!(change.action, SyncAction::Delete);
    }
}
