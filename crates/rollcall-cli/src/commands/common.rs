use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, SecondsFormat};
use rollcall_core::config::SyncSettings;
use rollcall_core::models::{EntityKey, FieldChanges};
use rollcall_core::secrets::SecretCache;
use rollcall_core::sync::{ClientTimeouts, HttpRelationalClient, ReplicaPushClient};
use rollcall_core::transform::{mapping_for_path, FieldRule};
use rollcall_core::util::datetime_from_millis;
use rollcall_core::{RelationalService, ReplicaService};
use serde_json::Value;

use crate::error::CliError;

/// Settings and secrets shared by every command
pub struct Context {
    pub settings: SyncSettings,
    pub secrets: Arc<SecretCache>,
}

/// Where reconciliation reaches the relational store
pub enum RelationalTarget {
    /// Over the relational sync API (`ROLLCALL_RELATIONAL_API_URL` set)
    Remote(HttpRelationalClient),
    /// Directly against the relational database file
    Local(RelationalService),
}

impl Context {
    pub fn new(settings: SyncSettings) -> Self {
        let secrets = settings.secret_cache().shared();
        Self { settings, secrets }
    }

    pub fn from_env(
        relational_db: Option<PathBuf>,
        replica_db: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let mut settings = SyncSettings::from_env()?;
        if let Some(path) = relational_db {
            settings.relational_db_path = path;
        }
        if let Some(path) = replica_db {
            settings.replica_db_path = path;
        }
        Ok(Self::new(settings))
    }

    /// Relational service for admin writes, pushing when a replica URL is set.
    pub async fn relational_service(&self) -> Result<RelationalService, CliError> {
        let service = RelationalService::open_path(&self.settings.relational_db_path).await?;
        if self.settings.replica_sync_url.is_none() {
            return Ok(service);
        }
        Ok(service.with_push(ReplicaPushClient::new(
            self.settings.replica_sync_url.clone(),
            self.secrets.clone(),
            self.settings.push_timeout,
        )))
    }

    pub async fn replica_service(&self) -> Result<ReplicaService, CliError> {
        Ok(ReplicaService::open_path(&self.settings.replica_db_path).await?)
    }

    pub async fn relational_target(&self) -> Result<RelationalTarget, CliError> {
        if self.settings.relational_api_url.is_some() {
            return Ok(RelationalTarget::Remote(HttpRelationalClient::new(
                self.settings.relational_api_url.clone(),
                self.secrets.clone(),
                ClientTimeouts {
                    apply: self.settings.apply_timeout,
                    fetch: self.settings.fetch_timeout,
                },
            )));
        }
        Ok(RelationalTarget::Local(self.relational_service().await?))
    }
}

pub fn parse_key(raw: &str) -> Result<EntityKey, CliError> {
    Ok(EntityKey::parse(raw)?)
}

/// Shape a `NAME=VALUE` value takes for its target field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Text,
    Integer,
    Flag,
}

fn column_kind(column: &str) -> ValueKind {
    match column {
        "gender" | "housing_situation" => ValueKind::Integer,
        "reachable" | "groupable" => ValueKind::Flag,
        _ => ValueKind::Text,
    }
}

/// Enum paths carry labels, so only renamed paths inherit their column's kind.
fn path_kind(path: &str) -> ValueKind {
    mapping_for_path(path).map_or(ValueKind::Text, |entry| match entry.rule {
        FieldRule::Rename => column_kind(entry.column),
        FieldRule::Gender | FieldRule::Housing => ValueKind::Text,
    })
}

fn typed_value(kind: ValueKind, raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed == "null" {
        return Value::Null;
    }
    let typed = match kind {
        ValueKind::Integer => trimmed.parse::<i64>().ok().map(Value::from),
        ValueKind::Flag => trimmed.parse::<bool>().ok().map(Value::from),
        ValueKind::Text => None,
    };
    typed.unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Parse `COLUMN=VALUE` pairs against the member columns.
///
/// Integer and boolean columns get typed values; every other column keeps
/// the text as given, so `phone=5551234` stays a string.
pub fn parse_column_assignments(assignments: &[String]) -> Result<FieldChanges, CliError> {
    parse_assignments(assignments, column_kind)
}

/// Parse `PATH=VALUE` pairs against the document paths.
pub fn parse_path_assignments(assignments: &[String]) -> Result<FieldChanges, CliError> {
    parse_assignments(assignments, path_kind)
}

fn parse_assignments(
    assignments: &[String],
    kind: fn(&str) -> ValueKind,
) -> Result<FieldChanges, CliError> {
    let mut changes = FieldChanges::new();
    for assignment in assignments {
        let (name, raw) = assignment
            .split_once('=')
            .ok_or_else(|| CliError::InvalidAssignment(assignment.clone()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CliError::InvalidAssignment(assignment.clone()));
        }
        changes.insert(name.to_string(), typed_value(kind(name), raw));
    }
    Ok(changes)
}

pub fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>, CliError> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map_err(|_| CliError::InvalidDate(value.to_string()))
        })
        .transpose()
}

pub fn format_millis(millis: i64) -> String {
    datetime_from_millis(millis).to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
