//! Field transformer between the relational schema and the document schema.
//!
//! The mapping is a closed table. Columns or paths that are not listed here
//! are dropped in both directions.

mod enums;

pub use enums::{gender_from_label, gender_label, housing_from_label, housing_label};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::models::{set_path, Document, FieldChanges, MemberRecord};

/// How a column value is converted on its way to the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Same value, different (dotted) name
    Rename,
    /// Integer gender code to label
    Gender,
    /// Integer housing code to label
    Housing,
}

/// One row of the mapping table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub column: &'static str,
    pub path: &'static str,
    pub rule: FieldRule,
}

const fn mapping(column: &'static str, path: &'static str, rule: FieldRule) -> FieldMapping {
    FieldMapping { column, path, rule }
}

/// Every synchronized field.
pub const FIELD_MAP: &[FieldMapping] = &[
    mapping("name", "profile.name", FieldRule::Rename),
    mapping("birthday", "profile.birthday", FieldRule::Rename),
    mapping("gender", "profile.gender", FieldRule::Gender),
    mapping("housing_situation", "profile.housing_situation", FieldRule::Housing),
    mapping("email", "profile.email", FieldRule::Rename),
    mapping("phone", "profile.phone", FieldRule::Rename),
    mapping("facebook", "profile.facebook", FieldRule::Rename),
    mapping("street", "address.street", FieldRule::Rename),
    mapping("postal_code", "address.postal_code", FieldRule::Rename),
    mapping("city", "address.city", FieldRule::Rename),
    mapping("country", "address.country", FieldRule::Rename),
    mapping("reachable", "membership.reachable", FieldRule::Rename),
    mapping("groupable", "membership.groupable", FieldRule::Rename),
    mapping("date_joined", "membership.date_joined", FieldRule::Rename),
];

pub fn mapping_for_column(column: &str) -> Option<&'static FieldMapping> {
    FIELD_MAP.iter().find(|entry| entry.column == column)
}

pub fn mapping_for_path(path: &str) -> Option<&'static FieldMapping> {
    FIELD_MAP.iter().find(|entry| entry.path == path)
}

/// Whether a relational column takes part in synchronization
pub fn is_mapped_column(column: &str) -> bool {
    mapping_for_column(column).is_some()
}

/// Convert one column value to its document path and value.
pub fn column_to_path(column: &str, value: &Value) -> Option<(&'static str, Value)> {
    let entry = mapping_for_column(column)?;
    let converted = match entry.rule {
        FieldRule::Rename => value.clone(),
        FieldRule::Gender => Value::from(gender_label(value.as_i64().unwrap_or_default())),
        FieldRule::Housing => Value::from(housing_label(value.as_i64().unwrap_or_default())),
    };
    Some((entry.path, converted))
}

/// Convert one document path value to its relational column and value.
pub fn path_to_column(path: &str, value: &Value) -> Option<(&'static str, Value)> {
    let entry = mapping_for_path(path)?;
    let converted = match entry.rule {
        FieldRule::Rename => value.clone(),
        FieldRule::Gender => Value::from(gender_from_label(value.as_str().unwrap_or_default())),
        FieldRule::Housing => Value::from(housing_from_label(value.as_str().unwrap_or_default())),
    };
    Some((entry.column, converted))
}

/// Remap a set of relational column changes onto document paths.
pub fn columns_to_paths(changes: &FieldChanges) -> FieldChanges {
    changes
        .iter()
        .filter_map(|(column, value)| column_to_path(column, value))
        .map(|(path, value)| (path.to_string(), value))
        .collect()
}

/// Remap a set of document path changes onto relational columns.
pub fn paths_to_columns(changes: &FieldChanges) -> FieldChanges {
    changes
        .iter()
        .filter_map(|(path, value)| path_to_column(path, value))
        .map(|(column, value)| (column.to_string(), value))
        .collect()
}

/// Mapped columns of a full relational record.
pub fn record_columns(record: &MemberRecord) -> FieldChanges {
    record
        .to_columns()
        .into_iter()
        .filter(|(column, _)| is_mapped_column(column))
        .collect()
}

/// Mapped column values read out of a full document.
pub fn document_columns(document: &Document) -> FieldChanges {
    FIELD_MAP
        .iter()
        .filter_map(|entry| {
            let value = crate::models::get_path(document, entry.path)?;
            path_to_column(entry.path, value)
        })
        .map(|(column, value)| (column.to_string(), value))
        .collect()
}

/// Build a replica document from scratch out of an authoritative record.
pub fn build_document(record: &MemberRecord) -> Document {
    let mut document = Document::new();
    for (path, value) in columns_to_paths(&record.to_columns()) {
        set_path(&mut document, &path, value);
    }
    let status = if record.is_deleted() { "inactive" } else { "active" };
    set_path(&mut document, "membership.status", Value::from(status));
    document.insert(
        "metadata".to_string(),
        json!({
            "source": "relational",
            "relational_id": record.id,
            "last_synced_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }),
    );
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{get_path, EntityKey, MemberInput};
    use pretty_assertions::assert_eq;

    fn record() -> MemberRecord {
        let mut record = MemberRecord::from_input(
            EntityKey::parse("010130-2989").unwrap(),
            MemberInput {
                name: "Guðrún Helgadóttir".into(),
                gender: 2,
                housing_situation: 2,
                email: Some("gudrun@example.is".into()),
                city: Some("Reykjavík".into()),
                reachable: true,
                admin_notes: Some("paid in cash".into()),
                ..MemberInput::default()
            },
            1_000,
        );
        record.id = 42;
        record
    }

    #[test]
    fn gender_one_maps_to_male() {
        assert_eq!(
            column_to_path("gender", &json!(1)),
            Some(("profile.gender", json!("male")))
        );
    }

    #[test]
    fn unknown_gender_code_maps_to_unknown() {
        assert_eq!(
            column_to_path("gender", &json!(99)),
            Some(("profile.gender", json!("unknown")))
        );
    }

    #[test]
    fn unknown_label_maps_to_zero() {
        assert_eq!(
            path_to_column("profile.housing_situation", &json!("castle")),
            Some(("housing_situation", json!(0)))
        );
    }

    #[test]
    fn admin_notes_never_reach_the_document() {
        let document = build_document(&record());
        assert_eq!(get_path(&document, "profile.admin_notes"), None);
        assert!(!serde_json::to_string(&document).unwrap().contains("paid in cash"));
        assert_eq!(column_to_path("admin_notes", &json!("x")), None);
    }

    #[test]
    fn avatar_url_never_reaches_the_record() {
        let mut changes = FieldChanges::new();
        changes.insert("profile.avatar_url".into(), json!("https://cdn/x.png"));
        changes.insert("profile.phone".into(), json!("5551234"));
        let columns = paths_to_columns(&changes);
        assert_eq!(columns.len(), 1);
        assert_eq!(columns["phone"], json!("5551234"));
    }

    #[test]
    fn build_document_sets_groups_and_metadata() {
        let document = build_document(&record());
        assert_eq!(get_path(&document, "profile.gender"), Some(&json!("female")));
        assert_eq!(
            get_path(&document, "profile.housing_situation"),
            Some(&json!("rental"))
        );
        assert_eq!(get_path(&document, "address.city"), Some(&json!("Reykjavík")));
        assert_eq!(get_path(&document, "membership.status"), Some(&json!("active")));
        assert_eq!(get_path(&document, "metadata.source"), Some(&json!("relational")));
        assert_eq!(get_path(&document, "metadata.relational_id"), Some(&json!(42)));
    }

    #[test]
    fn mapped_fields_round_trip_through_document() {
        let record = record();
        let document = build_document(&record);
        assert_eq!(document_columns(&document), record_columns(&record));
    }
}
