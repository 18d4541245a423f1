//! Immediate push channel from the relational store to the replica

use std::sync::Arc;
use std::time::Duration;

use super::SyncMessage;
use crate::config::REPLICA_SYNC_TOKEN;
use crate::error::{Error, Result};
use crate::secrets::SecretCache;
use crate::util::{compact_text, sanitize};

/// Best-effort HTTP client for the replica's `POST /sync`
#[derive(Debug, Clone)]
pub struct ReplicaPushClient {
    client: reqwest::Client,
    url: Option<String>,
    secrets: Arc<SecretCache>,
    timeout: Duration,
}

impl ReplicaPushClient {
    pub fn new(url: Option<String>, secrets: Arc<SecretCache>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            secrets,
            timeout,
        }
    }

    /// Push a change; returns whether the replica accepted it.
    ///
    /// Every failure is logged and swallowed. The durable queue entry
    /// written alongside the change covers recovery.
    pub async fn push(&self, message: &SyncMessage) -> bool {
        match self.try_push(message).await {
            Ok(()) => {
                tracing::debug!(
                    entity = %message.entity_key().masked(),
                    action = %message.action(),
                    "Pushed change to replica"
                );
                true
            }
            Err(error) => {
                tracing::warn!(
                    entity = %message.entity_key().masked(),
                    action = %message.action(),
                    "Push to replica failed, leaving it to the reconciler: {}",
                    sanitize(&error)
                );
                false
            }
        }
    }

    async fn try_push(&self, message: &SyncMessage) -> Result<()> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| Error::Config("replica sync URL is not configured".into()))?;
        let token = self.secrets.get(REPLICA_SYNC_TOKEN).await?;

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .json(message)
            .send()
            .await
            .map_err(|error| transport_error("replica push", &error))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote(format!(
                "replica push failed with HTTP {status}: {}",
                compact_text(&body)
            )));
        }
        Ok(())
    }
}

/// Map a reqwest failure, keeping timeouts distinguishable.
pub(crate) fn transport_error(call: &str, error: &reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout(format!("{call} timed out"))
    } else {
        Error::Remote(format!("{call} failed: {}", sanitize(error)))
    }
}
