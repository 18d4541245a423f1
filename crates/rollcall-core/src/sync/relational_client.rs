//! Access to the relational system's sync API

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::messages::{
    AddressUpdate, ApplyChange, ApplyRequest, ApplyResponse, ApplyResult, ChangeRecord,
    ChangesResponse, FailureReport, MarkFailedRequest, MarkFailedResponse, MarkSyncedRequest,
    MarkSyncedResponse,
};
use super::push::transport_error;
use crate::config::RELATIONAL_API_TOKEN;
use crate::error::{Error, Result};
use crate::models::{EntityKey, FieldChanges, MemberRecord};
use crate::secrets::SecretCache;
use crate::util::compact_text;

/// Operations the reconciler and profile updater need from the relational side
#[allow(async_fn_in_trait)]
pub trait RelationalApi {
    /// Pending relational-origin changes created after `since`
    async fn changes_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ChangeRecord>>;

    /// Pending entries at or before `before` that failed at least once
    async fn retry_backlog(&self, before: DateTime<Utc>) -> Result<Vec<ChangeRecord>>;

    /// Apply merged replica changes; one result per submitted entity
    async fn apply(&self, changes: Vec<ApplyChange>) -> Result<Vec<ApplyResult>>;

    async fn mark_synced(&self, ids: &[i64]) -> Result<usize>;

    async fn mark_failed(&self, failures: Vec<FailureReport>) -> Result<usize>;

    /// Full canonical record; `NotFound` when unknown or soft-deleted
    async fn fetch_member(&self, entity_key: &EntityKey) -> Result<MemberRecord>;

    async fn update_profile(
        &self,
        entity_key: &EntityKey,
        columns: FieldChanges,
    ) -> Result<MemberRecord>;

    async fn update_address(
        &self,
        entity_key: &EntityKey,
        address: AddressUpdate,
    ) -> Result<MemberRecord>;
}

/// Timeouts per call family
#[derive(Debug, Clone, Copy)]
pub struct ClientTimeouts {
    /// `/apply`
    pub apply: Duration,
    /// Everything else
    pub fetch: Duration,
}

/// HTTP implementation of `RelationalApi`
#[derive(Debug, Clone)]
pub struct HttpRelationalClient {
    client: reqwest::Client,
    base_url: Option<String>,
    secrets: Arc<SecretCache>,
    timeouts: ClientTimeouts,
}

impl HttpRelationalClient {
    pub fn new(base_url: Option<String>, secrets: Arc<SecretCache>, timeouts: ClientTimeouts) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            secrets,
            timeouts,
        }
    }

    fn url(&self, path: &str) -> Result<String> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Config("relational API URL is not configured".into()))?;
        Ok(format!("{}{path}", base.trim_end_matches('/')))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        call: &str,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<T> {
        let token = self.secrets.get(RELATIONAL_API_TOKEN).await?;
        let response = request
            .bearer_auth(token)
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|error| transport_error(call, &error))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("{call}: not found")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!(
                "{call} failed with HTTP {}: {}",
                status.as_u16(),
                compact_text(&body)
            );
            return Err(if matches!(status.as_u16(), 401 | 403) {
                Error::Config(message)
            } else if status.is_client_error() {
                Error::InvalidInput(message)
            } else {
                Error::Remote(message)
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|error| transport_error(call, &error))
    }

    async fn get<T: DeserializeOwned>(&self, call: &str, path: &str, query: &[(&str, String)]) -> Result<T> {
        let request = self.client.get(self.url(path)?).query(query);
        self.send(call, request, self.timeouts.fetch).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        call: &str,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T> {
        let request = self.client.post(self.url(path)?).json(body);
        self.send(call, request, timeout).await
    }
}

fn rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn member_path(entity_key: &EntityKey) -> String {
    format!("/member/{}", urlencoding::encode(entity_key.as_str()))
}

impl RelationalApi for HttpRelationalClient {
    async fn changes_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ChangeRecord>> {
        let query: Vec<(&str, String)> = since
            .map(|since| vec![("since", rfc3339(since))])
            .unwrap_or_default();
        let response: ChangesResponse = self.get("changes-since", "/changes", &query).await?;
        Ok(response.changes)
    }

    async fn retry_backlog(&self, before: DateTime<Utc>) -> Result<Vec<ChangeRecord>> {
        let response: ChangesResponse = self
            .get("retry-backlog", "/changes/retry", &[("before", rfc3339(before))])
            .await?;
        Ok(response.changes)
    }

    async fn apply(&self, changes: Vec<ApplyChange>) -> Result<Vec<ApplyResult>> {
        let body = ApplyRequest { changes };
        let response: ApplyResponse = self
            .post("batch-apply", "/apply", &body, self.timeouts.apply)
            .await?;
        Ok(response.results)
    }

    async fn mark_synced(&self, ids: &[i64]) -> Result<usize> {
        let body = MarkSyncedRequest {
            sync_ids: ids.to_vec(),
        };
        let response: MarkSyncedResponse = self
            .post("mark-synced", "/mark-synced", &body, self.timeouts.fetch)
            .await?;
        Ok(response.marked_synced)
    }

    async fn mark_failed(&self, failures: Vec<FailureReport>) -> Result<usize> {
        let body = MarkFailedRequest { failures };
        let response: MarkFailedResponse = self
            .post("mark-failed", "/mark-failed", &body, self.timeouts.fetch)
            .await?;
        Ok(response.marked)
    }

    async fn fetch_member(&self, entity_key: &EntityKey) -> Result<MemberRecord> {
        self.get("fetch-member", &member_path(entity_key), &[]).await
    }

    async fn update_profile(
        &self,
        entity_key: &EntityKey,
        columns: FieldChanges,
    ) -> Result<MemberRecord> {
        let request = self
            .client
            .patch(self.url(&member_path(entity_key))?)
            .json(&columns);
        self.send("profile-update", request, self.timeouts.fetch).await
    }

    async fn update_address(
        &self,
        entity_key: &EntityKey,
        address: AddressUpdate,
    ) -> Result<MemberRecord> {
        let path = format!("{}/address", member_path(entity_key));
        let request = self.client.put(self.url(&path)?).json(&address);
        self.send("address-update", request, self.timeouts.fetch).await
    }
}
