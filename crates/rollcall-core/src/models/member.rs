//! Member record model (relational side)

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EntityKey, FieldChanges};
use crate::error::{Error, Result};

/// Canonical member row in the system of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Relational row id (linkage id stored in replica metadata)
    pub id: i64,
    pub entity_key: EntityKey,
    pub name: String,
    pub birthday: Option<NaiveDate>,
    /// 0 = unknown, 1 = male, 2 = female, 3 = other
    pub gender: i64,
    /// 0 = unknown, 1 = owner, 2 = rental, 3 = cooperative, 4 = family, 5 = other, 6 = homeless
    pub housing_situation: i64,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub facebook: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub reachable: bool,
    pub groupable: bool,
    pub date_joined: Option<NaiveDate>,
    /// Internal notes; never leaves the relational store
    pub admin_notes: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete timestamp (Unix ms)
    pub deleted_at: Option<i64>,
}

/// Attributes supplied when a member is created through the admin interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberInput {
    pub name: String,
    pub birthday: Option<NaiveDate>,
    pub gender: i64,
    pub housing_situation: i64,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub facebook: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub reachable: bool,
    pub groupable: bool,
    pub date_joined: Option<NaiveDate>,
    pub admin_notes: Option<String>,
}

impl MemberRecord {
    /// Build a fresh record from admin input. `id` is assigned by the database.
    #[must_use]
    pub fn from_input(entity_key: EntityKey, input: MemberInput, now: i64) -> Self {
        Self {
            id: 0,
            entity_key,
            name: input.name,
            birthday: input.birthday,
            gender: input.gender,
            housing_situation: input.housing_situation,
            email: input.email,
            phone: input.phone,
            facebook: input.facebook,
            street: input.street,
            postal_code: input.postal_code,
            city: input.city,
            country: input.country,
            reachable: input.reachable,
            groupable: input.groupable,
            date_joined: input.date_joined,
            admin_notes: input.admin_notes,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Serialize every attribute column, keyed by column name.
    #[must_use]
    pub fn to_columns(&self) -> FieldChanges {
        let mut columns = FieldChanges::new();
        columns.insert("name".into(), Value::from(self.name.clone()));
        columns.insert("birthday".into(), date_value(self.birthday));
        columns.insert("gender".into(), Value::from(self.gender));
        columns.insert(
            "housing_situation".into(),
            Value::from(self.housing_situation),
        );
        columns.insert("email".into(), text_value(self.email.as_deref()));
        columns.insert("phone".into(), text_value(self.phone.as_deref()));
        columns.insert("facebook".into(), text_value(self.facebook.as_deref()));
        columns.insert("street".into(), text_value(self.street.as_deref()));
        columns.insert("postal_code".into(), text_value(self.postal_code.as_deref()));
        columns.insert("city".into(), text_value(self.city.as_deref()));
        columns.insert("country".into(), text_value(self.country.as_deref()));
        columns.insert("reachable".into(), Value::from(self.reachable));
        columns.insert("groupable".into(), Value::from(self.groupable));
        columns.insert("date_joined".into(), date_value(self.date_joined));
        columns.insert("admin_notes".into(), text_value(self.admin_notes.as_deref()));
        columns
    }

    /// Set one attribute column from a JSON value.
    ///
    /// Returns whether the stored value changed. Type mismatches and unknown
    /// columns are data errors.
    pub fn apply_column(&mut self, column: &str, value: &Value) -> Result<bool> {
        let changed = match column {
            "name" => {
                let name = expect_text(column, value)?.unwrap_or_default();
                replace(&mut self.name, name)
            }
            "birthday" => replace(&mut self.birthday, expect_date(column, value)?),
            "gender" => replace(&mut self.gender, expect_int(column, value)?),
            "housing_situation" => replace(&mut self.housing_situation, expect_int(column, value)?),
            "email" => replace(&mut self.email, expect_text(column, value)?),
            "phone" => replace(&mut self.phone, expect_text(column, value)?),
            "facebook" => replace(&mut self.facebook, expect_text(column, value)?),
            "street" => replace(&mut self.street, expect_text(column, value)?),
            "postal_code" => replace(&mut self.postal_code, expect_text(column, value)?),
            "city" => replace(&mut self.city, expect_text(column, value)?),
            "country" => replace(&mut self.country, expect_text(column, value)?),
            "reachable" => replace(&mut self.reachable, expect_bool(column, value)?),
            "groupable" => replace(&mut self.groupable, expect_bool(column, value)?),
            "date_joined" => replace(&mut self.date_joined, expect_date(column, value)?),
            "admin_notes" => replace(&mut self.admin_notes, expect_text(column, value)?),
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown member column `{other}`"
                )))
            }
        };
        Ok(changed)
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn text_value(value: Option<&str>) -> Value {
    value.map_or(Value::Null, Value::from)
}

fn date_value(value: Option<NaiveDate>) -> Value {
    value.map_or(Value::Null, |date| Value::from(date.format("%Y-%m-%d").to_string()))
}

fn expect_text(column: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => {
            let trimmed = text.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        _ => Err(type_error(column, "a string")),
    }
}

fn expect_int(column: &str, value: &Value) -> Result<i64> {
    value.as_i64().ok_or_else(|| type_error(column, "an integer"))
}

fn expect_bool(column: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| type_error(column, "a boolean"))
}

fn expect_date(column: &str, value: &Value) -> Result<Option<NaiveDate>> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::String(text) => {
            // Accept full timestamps too; only the date part is kept.
            let date_part = text.trim().get(..10).unwrap_or(text);
            NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| type_error(column, "an ISO date (YYYY-MM-DD)"))
        }
        _ => Err(type_error(column, "an ISO date string")),
    }
}

fn type_error(column: &str, expected: &str) -> Error {
    Error::InvalidInput(format!("column `{column}` must be {expected}"))
}
