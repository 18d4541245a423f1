use std::collections::HashMap;

use clap::Parser;
use pretty_assertions::assert_eq;
use rollcall_core::config::SyncSettings;
use rollcall_core::models::{EntityKey, QueueStatus, RunStatus};
use serde_json::json;
use tempfile::{tempdir, TempDir};

use crate::cli::{Cli, Commands, MemberCommands, MemberFields, QueueCommands, QueueSide};
use crate::commands::common::{
    parse_column_assignments, parse_date, parse_path_assignments, Context,
};
use crate::commands::member::{format_member_line, member_input, run_member};
use crate::commands::profile::run_profile;
use crate::commands::queue::{cleanup_threshold, format_summary, run_queue};
use crate::commands::reconcile::{format_run_summary, run_reconcile};
use crate::error::CliError;

const KEY: &str = "010130-2989";

fn context(dir: &TempDir) -> Context {
    let values: HashMap<String, String> = [
        (
            "ROLLCALL_RELATIONAL_DB_PATH",
            dir.path().join("relational.db"),
        ),
        ("ROLLCALL_REPLICA_DB_PATH", dir.path().join("replica.db")),
    ]
    .into_iter()
    .map(|(name, path)| (name.to_string(), path.display().to_string()))
    .collect();
    Context::new(SyncSettings::from_lookup(|name| values.get(name).cloned()).unwrap())
}

fn key() -> EntityKey {
    EntityKey::parse(KEY).unwrap()
}

async fn add_member(context: &Context) {
    run_member(
        context,
        MemberCommands::Add {
            entity_key: KEY.to_string(),
            fields: MemberFields {
                name: "Anna".into(),
                gender: 2,
                city: Some("Lund".into()),
                ..MemberFields::default()
            },
        },
    )
    .await
    .unwrap();
}

#[test]
fn column_assignments_type_only_integer_and_flag_columns() {
    let parsed = parse_column_assignments(&[
        "gender=2".to_string(),
        "reachable=true".to_string(),
        "phone=5551234".to_string(),
        "postal_code=22100".to_string(),
        "city=Malmo".to_string(),
        "email=".to_string(),
        "facebook=null".to_string(),
    ])
    .unwrap();
    assert_eq!(parsed["gender"], json!(2));
    assert_eq!(parsed["reachable"], json!(true));
    assert_eq!(parsed["phone"], json!("5551234"));
    assert_eq!(parsed["postal_code"], json!("22100"));
    assert_eq!(parsed["city"], json!("Malmo"));
    assert_eq!(parsed["email"], json!(""));
    assert_eq!(parsed["facebook"], json!(null));
}

#[test]
fn mistyped_flag_is_left_as_text() {
    let parsed = parse_column_assignments(&["groupable=maybe".to_string()]).unwrap();
    assert_eq!(parsed["groupable"], json!("maybe"));
}

#[test]
fn path_assignments_keep_enum_labels_as_text() {
    let parsed = parse_path_assignments(&[
        "profile.gender=female".to_string(),
        "profile.phone=5551234".to_string(),
        "membership.reachable=false".to_string(),
    ])
    .unwrap();
    assert_eq!(parsed["profile.gender"], json!("female"));
    assert_eq!(parsed["profile.phone"], json!("5551234"));
    assert_eq!(parsed["membership.reachable"], json!(false));
}

#[test]
fn assignments_require_a_name() {
    assert!(matches!(
        parse_column_assignments(&["phone".to_string()]),
        Err(CliError::InvalidAssignment(_))
    ));
    assert!(matches!(
        parse_path_assignments(&["=1".to_string()]),
        Err(CliError::InvalidAssignment(_))
    ));
}

#[test]
fn dates_parse_as_iso_days() {
    assert_eq!(
        parse_date(Some("1930-01-01")).unwrap().map(|date| date.to_string()),
        Some("1930-01-01".to_string())
    );
    assert_eq!(parse_date(Some("  ")).unwrap(), None);
    assert!(parse_date(Some("01/01/1930")).is_err());
}

#[test]
fn member_fields_convert_to_input() {
    let input = member_input(MemberFields {
        name: "Anna".into(),
        birthday: Some("1930-01-01".into()),
        housing: 6,
        ..MemberFields::default()
    })
    .unwrap();
    assert_eq!(input.name, "Anna");
    assert_eq!(input.housing_situation, 6);
    assert!(input.birthday.is_some());
    assert_eq!(input.date_joined, None);
}

#[test]
fn cleanup_defaults_to_thirty_days_on_replica() {
    let cli = Cli::try_parse_from(["rollcall", "queue", "cleanup"]).unwrap();
    let Commands::Queue {
        command: QueueCommands::Cleanup {
            side,
            older_than_days,
        },
    } = cli.command
    else {
        panic!("expected queue cleanup");
    };
    assert_eq!(side, QueueSide::Replica);
    assert_eq!(older_than_days, 30);
    assert_eq!(cleanup_threshold(31 * 86_400_000, 30), 86_400_000);
}

#[test]
fn profile_requires_assignments() {
    assert!(Cli::try_parse_from(["rollcall", "profile", KEY]).is_err());
    assert!(Cli::try_parse_from(["rollcall", "profile", KEY, "profile.phone=1"]).is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn member_add_then_reconcile_creates_replica_document() {
    let dir = tempdir().unwrap();
    let context = context(&dir);
    add_member(&context).await;

    run_reconcile(&context, false).await.unwrap();

    let replica = context.replica_service().await.unwrap();
    let stored = replica.get_document(&key()).await.unwrap().unwrap();
    assert_eq!(stored.document["profile"]["gender"], "female");
    assert_eq!(stored.document["address"]["city"], "Lund");

    let runs = replica.list_runs(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Success);
    assert_eq!(runs[0].stats.relational_to_replica.applied, 1);
    assert!(format_run_summary(&runs[0])[0].contains("success"));

    let relational = context.relational_service().await.unwrap();
    let summary = relational.queue_summary().await.unwrap();
    assert_eq!(summary.pending, 0);
    assert_eq!(
        format_summary(QueueSide::Relational, &summary),
        "relational queue: 0 pending, 1 synced, 0 failed (oldest pending: -)"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn profile_update_reaches_the_relational_store() {
    let dir = tempdir().unwrap();
    let context = context(&dir);
    add_member(&context).await;
    run_reconcile(&context, false).await.unwrap();

    run_profile(&context, KEY, &["profile.phone=0701234567".to_string()])
        .await
        .unwrap();

    let relational = context.relational_service().await.unwrap();
    let member = relational.get_member(&key()).await.unwrap();
    assert_eq!(member.phone.as_deref(), Some("0701234567"));
    assert!(format_member_line(&member).contains("Anna"));

    let replica = context.replica_service().await.unwrap();
    let pending = replica.list_queue(Some(QueueStatus::Pending), 10).await.unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_keeps_recently_synced_entries() {
    let dir = tempdir().unwrap();
    let context = context(&dir);
    add_member(&context).await;
    run_reconcile(&context, false).await.unwrap();

    run_queue(
        &context,
        QueueCommands::Cleanup {
            side: QueueSide::Relational,
            older_than_days: 30,
        },
    )
    .await
    .unwrap();

    let relational = context.relational_service().await.unwrap();
    assert_eq!(relational.queue_summary().await.unwrap().synced, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn member_edit_rejects_unknown_columns() {
    let dir = tempdir().unwrap();
    let context = context(&dir);
    add_member(&context).await;

    let result = run_member(
        &context,
        MemberCommands::Edit {
            entity_key: KEY.to_string(),
            assignments: vec!["shoe_size=44".to_string()],
        },
    )
    .await;
    assert!(matches!(
        result,
        Err(CliError::Core(rollcall_core::Error::InvalidInput(_)))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn member_edit_keeps_numeric_phone_as_text() {
    let dir = tempdir().unwrap();
    let context = context(&dir);
    add_member(&context).await;

    run_member(
        &context,
        MemberCommands::Edit {
            entity_key: KEY.to_string(),
            assignments: vec!["phone=5551234".to_string(), "housing_situation=2".to_string()],
        },
    )
    .await
    .unwrap();

    let relational = context.relational_service().await.unwrap();
    let member = relational.get_member(&key()).await.unwrap();
    assert_eq!(member.phone.as_deref(), Some("5551234"));
    assert_eq!(member.housing_situation, 2);
}
