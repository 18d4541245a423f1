use rollcall_core::sync::{ProfileUpdateOutcome, ProfileUpdater};

use crate::commands::common::{parse_path_assignments, parse_key, Context, RelationalTarget};
use crate::error::CliError;

pub async fn run_profile(
    context: &Context,
    entity_key: &str,
    assignments: &[String],
) -> Result<(), CliError> {
    let key = parse_key(entity_key)?;
    let paths = parse_path_assignments(assignments)?;
    let replica = context.replica_service().await?;

    let outcome = match context.relational_target().await? {
        RelationalTarget::Remote(client) => {
            ProfileUpdater::new(&replica, &client).update(&key, &paths).await?
        }
        RelationalTarget::Local(service) => {
            ProfileUpdater::new(&replica, &service).update(&key, &paths).await?
        }
    };

    for line in format_outcome(&outcome) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_outcome(outcome: &ProfileUpdateOutcome) -> Vec<String> {
    let mut lines = vec!["Replica updated".to_string()];
    match &outcome.profile_error {
        Some(error) => lines.push(format!(
            "Relational profile update failed (queued for the reconciler): {error}"
        )),
        None => lines.push("Relational profile up to date".to_string()),
    }
    if let Some(error) = &outcome.address_error {
        lines.push(format!("Relational address update failed: {error}"));
    }
    lines
}
