//! In-process `RelationalApi` over a relational service

use chrono::{DateTime, Utc};

use super::{AddressUpdate, ApplyChange, ApplyResult, ChangeRecord, FailureReport, RelationalApi};
use crate::error::Result;
use crate::models::{EntityKey, FieldChanges, MemberRecord};
use crate::services::RelationalService;

impl RelationalApi for RelationalService {
    async fn changes_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ChangeRecord>> {
        let entries = Self::changes_since(self, since.map(|since| since.timestamp_millis())).await?;
        Ok(entries.into_iter().map(ChangeRecord::from).collect())
    }

    async fn retry_backlog(&self, before: DateTime<Utc>) -> Result<Vec<ChangeRecord>> {
        let entries = Self::retry_backlog(self, before.timestamp_millis()).await?;
        Ok(entries.into_iter().map(ChangeRecord::from).collect())
    }

    async fn apply(&self, changes: Vec<ApplyChange>) -> Result<Vec<ApplyResult>> {
        Ok(self.apply_changes(changes).await)
    }

    async fn mark_synced(&self, ids: &[i64]) -> Result<usize> {
        Self::mark_synced(self, ids).await
    }

    async fn mark_failed(&self, failures: Vec<FailureReport>) -> Result<usize> {
        Self::mark_failed(self, &failures).await
    }

    async fn fetch_member(&self, entity_key: &EntityKey) -> Result<MemberRecord> {
        self.get_member(entity_key).await
    }

    async fn update_profile(
        &self,
        entity_key: &EntityKey,
        columns: FieldChanges,
    ) -> Result<MemberRecord> {
        self.update_member(entity_key, &columns).await
    }

    async fn update_address(
        &self,
        entity_key: &EntityKey,
        address: AddressUpdate,
    ) -> Result<MemberRecord> {
        Self::update_address(self, entity_key, &address).await
    }
}
