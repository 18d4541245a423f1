//! Member self-service profile updates.
//!
//! The replica is written first so the member sees the change immediately.
//! When the document is linked to a relational record, the profile and
//! address calls then run concurrently under one shared deadline.

use std::time::Duration;

use super::{AddressUpdate, RelationalApi};
use crate::error::Result;
use crate::models::{get_path, Document, EntityKey, FieldChanges, WriteOrigin};
use crate::services::{linked_relational_id, ReplicaService};
use crate::transform::paths_to_columns;
use crate::util::sanitize;

/// Deadline for the combined relational calls
pub const PROFILE_UPDATE_TIMEOUT: Duration = Duration::from_secs(35);

const ADDRESS_PATHS: [&str; 4] = [
    "address.street",
    "address.postal_code",
    "address.city",
    "address.country",
];

/// What happened to one profile update
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdateOutcome {
    /// Replica document after the local write
    pub document: Document,
    /// Set when the relational profile call failed or timed out
    pub profile_error: Option<String>,
    /// Address failures never fail the update
    pub address_error: Option<String>,
}

impl ProfileUpdateOutcome {
    /// True when both relational calls went through (or were not needed)
    #[must_use]
    pub const fn fully_synced(&self) -> bool {
        self.profile_error.is_none() && self.address_error.is_none()
    }
}

pub struct ProfileUpdater<'a, R: RelationalApi> {
    replica: &'a ReplicaService,
    relational: &'a R,
    timeout: Duration,
}

impl<'a, R: RelationalApi> ProfileUpdater<'a, R> {
    pub const fn new(replica: &'a ReplicaService, relational: &'a R) -> Self {
        Self {
            replica,
            relational,
            timeout: PROFILE_UPDATE_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Apply `paths` to the member's document, then forward them.
    ///
    /// Only the replica write can fail the call. Relational failures are
    /// reported on the outcome; the queue entry from the local write lets
    /// the reconciler deliver the change later.
    pub async fn update(
        &self,
        entity_key: &EntityKey,
        paths: &FieldChanges,
    ) -> Result<ProfileUpdateOutcome> {
        let document = self
            .replica
            .update_fields(entity_key, paths, WriteOrigin::Local)
            .await?;

        let mut outcome = ProfileUpdateOutcome {
            document,
            profile_error: None,
            address_error: None,
        };
        if linked_relational_id(&outcome.document).is_none() {
            tracing::debug!(
                entity = %entity_key.masked(),
                "Document not linked to a relational record, skipping direct update"
            );
            return Ok(outcome);
        }

        let (profile_paths, address): (FieldChanges, Option<AddressUpdate>) =
            split_address(paths, &outcome.document);
        let profile_columns = paths_to_columns(&profile_paths);

        let profile_call = async {
            if profile_columns.is_empty() {
                return Ok(());
            }
            self.relational
                .update_profile(entity_key, profile_columns)
                .await
                .map(|_| ())
        };
        let address_call = async {
            match address {
                Some(address) => self
                    .relational
                    .update_address(entity_key, address)
                    .await
                    .map(|_| ()),
                None => Ok(()),
            }
        };

        match tokio::time::timeout(self.timeout, async { tokio::join!(profile_call, address_call) })
            .await
        {
            Ok((profile, address)) => {
                outcome.profile_error = profile.err().map(|error| sanitize(&error));
                outcome.address_error = address.err().map(|error| sanitize(&error));
            }
            Err(_) => {
                let message = format!(
                    "relational update timed out after {}s",
                    self.timeout.as_secs()
                );
                outcome.profile_error = Some(message.clone());
                outcome.address_error = Some(message);
            }
        }

        if let Some(error) = &outcome.profile_error {
            tracing::warn!(entity = %entity_key.masked(), "Relational profile update failed: {error}");
        }
        if let Some(error) = &outcome.address_error {
            tracing::warn!(entity = %entity_key.masked(), "Relational address update failed: {error}");
        }
        Ok(outcome)
    }
}

/// Separate address paths from the rest.
///
/// The address call replaces all four fields, so untouched ones are taken
/// from the updated document.
fn split_address(paths: &FieldChanges, document: &Document) -> (FieldChanges, Option<AddressUpdate>) {
    let (address_paths, profile_paths): (FieldChanges, FieldChanges) = paths
        .iter()
        .map(|(path, value)| (path.clone(), value.clone()))
        .partition(|(path, _)| ADDRESS_PATHS.contains(&path.as_str()));
    if address_paths.is_empty() {
        return (profile_paths, None);
    }

    let field = |path: &str| {
        get_path(document, path)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    };
    let address = AddressUpdate {
        street: field("address.street"),
        postal_code: field("address.postal_code"),
        city: field("address.city"),
        country: field("address.country"),
    };
    (profile_paths, Some(address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{MemberInput, MemberRecord};
    use crate::services::RelationalService;
    use crate::sync::{ApplyChange, ApplyResult, ChangeRecord, FailureReport, Reconciler};
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn key() -> EntityKey {
        EntityKey::parse("0101302989").unwrap()
    }

    fn paths(pairs: &[(&str, Value)]) -> FieldChanges {
        pairs
            .iter()
            .map(|(path, value)| ((*path).to_string(), value.clone()))
            .collect()
    }

    async fn linked() -> (ReplicaService, RelationalService) {
        let replica = ReplicaService::open_in_memory().await.unwrap();
        let relational = RelationalService::open_in_memory().await.unwrap();
        relational
            .create_member(
                key(),
                MemberInput {
                    name: "Anna".into(),
                    street: Some("Storgatan 1".into()),
                    city: Some("Lund".into()),
                    ..MemberInput::default()
                },
            )
            .await
            .unwrap();
        Reconciler::new(&replica, &relational).run_once().await.unwrap();
        (replica, relational)
    }

    /// Relational API whose address call always fails and whose profile
    /// call optionally hangs.
    struct Degraded {
        inner: RelationalService,
        hang_profile: bool,
    }

    impl RelationalApi for Degraded {
        async fn changes_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ChangeRecord>> {
            RelationalApi::changes_since(&self.inner, since).await
        }

        async fn retry_backlog(&self, before: DateTime<Utc>) -> Result<Vec<ChangeRecord>> {
            RelationalApi::retry_backlog(&self.inner, before).await
        }

        async fn apply(&self, changes: Vec<ApplyChange>) -> Result<Vec<ApplyResult>> {
            self.inner.apply(changes).await
        }

        async fn mark_synced(&self, ids: &[i64]) -> Result<usize> {
            RelationalApi::mark_synced(&self.inner, ids).await
        }

        async fn mark_failed(&self, failures: Vec<FailureReport>) -> Result<usize> {
            RelationalApi::mark_failed(&self.inner, failures).await
        }

        async fn fetch_member(&self, entity_key: &EntityKey) -> Result<MemberRecord> {
            self.inner.fetch_member(entity_key).await
        }

        async fn update_profile(
            &self,
            entity_key: &EntityKey,
            columns: FieldChanges,
        ) -> Result<MemberRecord> {
            if self.hang_profile {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.inner.update_profile(entity_key, columns).await
        }

        async fn update_address(
            &self,
            _entity_key: &EntityKey,
            _address: AddressUpdate,
        ) -> Result<MemberRecord> {
            Err(Error::Remote("address service down".into()))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn linked_update_reaches_both_stores() {
        let (replica, relational) = linked().await;
        let outcome = ProfileUpdater::new(&replica, &relational)
            .update(
                &key(),
                &paths(&[("profile.phone", json!("555")), ("address.city", json!("Malmo"))]),
            )
            .await
            .unwrap();

        assert!(outcome.fully_synced());
        assert_eq!(get_path(&outcome.document, "profile.phone"), Some(&json!("555")));
        let member = relational.get_member(&key()).await.unwrap();
        assert_eq!(member.phone.as_deref(), Some("555"));
        assert_eq!(member.city.as_deref(), Some("Malmo"));
        assert_eq!(member.street.as_deref(), Some("Storgatan 1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn address_failure_is_not_fatal() {
        let (replica, relational) = linked().await;
        let degraded = Degraded {
            inner: relational.clone(),
            hang_profile: false,
        };
        let outcome = ProfileUpdater::new(&replica, &degraded)
            .update(
                &key(),
                &paths(&[("profile.phone", json!("555")), ("address.city", json!("Malmo"))]),
            )
            .await
            .unwrap();

        assert_eq!(outcome.profile_error, None);
        assert!(outcome.address_error.unwrap().contains("address service down"));
        assert_eq!(relational.get_member(&key()).await.unwrap().phone.as_deref(), Some("555"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_keeps_local_write_and_queue_entry() {
        let (replica, relational) = linked().await;
        let degraded = Degraded {
            inner: relational.clone(),
            hang_profile: true,
        };
        let outcome = ProfileUpdater::new(&replica, &degraded)
            .with_timeout(Duration::from_millis(50))
            .update(&key(), &paths(&[("profile.phone", json!("555"))]))
            .await
            .unwrap();

        assert!(outcome.profile_error.unwrap().contains("timed out"));
        assert_eq!(get_path(&outcome.document, "profile.phone"), Some(&json!("555")));
        assert_eq!(replica.pending_changes(None).await.unwrap().len(), 1);
        assert_eq!(relational.get_member(&key()).await.unwrap().phone, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unlinked_document_skips_relational_calls() {
        let replica = ReplicaService::open_in_memory().await.unwrap();
        let relational = RelationalService::open_in_memory().await.unwrap();
        replica
            .save_document(
                &key(),
                json!({"profile": {"name": "Anna"}}).as_object().cloned().unwrap(),
                WriteOrigin::Local,
            )
            .await
            .unwrap();

        let outcome = ProfileUpdater::new(&replica, &relational)
            .update(&key(), &paths(&[("profile.phone", json!("555"))]))
            .await
            .unwrap();

        assert!(outcome.fully_synced());
        assert!(matches!(
            relational.get_member(&key()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn address_split_fills_untouched_fields_from_document() {
        let document = json!({"address": {"street": "Storgatan 1", "city": "Malmo"}})
            .as_object()
            .cloned()
            .unwrap();
        let (profile, address) = split_address(
            &paths(&[("address.city", json!("Malmo")), ("profile.phone", json!("1"))]),
            &document,
        );
        assert_eq!(profile, paths(&[("profile.phone", json!("1"))]));
        assert_eq!(
            address,
            Some(AddressUpdate {
                street: Some("Storgatan 1".into()),
                postal_code: None,
                city: Some("Malmo".into()),
                country: None,
            })
        );
    }
}
