//! Environment-driven synchronization settings.
//!
//! Shared by the API server and the operator CLI. Values are read through a
//! lookup function so tests can inject a map instead of the process
//! environment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::secrets::{SecretCache, SecretSource};
use crate::util::is_http_url;

/// Secret cache name of the relational API bearer token
pub const RELATIONAL_API_TOKEN: &str = "relational_api_token";
/// Secret cache name of the replica push bearer token
pub const REPLICA_SYNC_TOKEN: &str = "replica_sync_token";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct SyncSettings {
    pub relational_db_path: PathBuf,
    pub replica_db_path: PathBuf,
    /// Base URL of the relational sync API, used by the reconciler
    pub relational_api_url: Option<String>,
    pub relational_api_token: SecretSource,
    /// Replica `/sync` endpoint, used by the push channel
    pub replica_sync_url: Option<String>,
    pub replica_sync_token: SecretSource,
    pub push_timeout: Duration,
    pub apply_timeout: Duration,
    pub fetch_timeout: Duration,
    pub sync_interval: Duration,
    pub secret_ttl: Duration,
}

impl fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("relational_db_path", &self.relational_db_path)
            .field("replica_db_path", &self.replica_db_path)
            .field("relational_api_url", &self.relational_api_url)
            .field("relational_api_token", &self.relational_api_token)
            .field("replica_sync_url", &self.replica_sync_url)
            .field("replica_sync_token", &self.replica_sync_token)
            .field("push_timeout", &self.push_timeout)
            .field("apply_timeout", &self.apply_timeout)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("sync_interval", &self.sync_interval)
            .field("secret_ttl", &self.secret_ttl)
            .finish()
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let relational_db_path = PathBuf::from(value_or_default(
            &lookup,
            "ROLLCALL_RELATIONAL_DB_PATH",
            "rollcall-relational.db",
        ));
        let replica_db_path = PathBuf::from(value_or_default(
            &lookup,
            "ROLLCALL_REPLICA_DB_PATH",
            "rollcall-replica.db",
        ));

        let relational_api_url = optional_url(&lookup, "ROLLCALL_RELATIONAL_API_URL")?;
        let replica_sync_url = optional_url(&lookup, "ROLLCALL_REPLICA_SYNC_URL")?;

        let relational_api_token = SecretSource::from_parts(
            optional_trimmed(&lookup, "ROLLCALL_RELATIONAL_API_TOKEN"),
            optional_trimmed(&lookup, "ROLLCALL_RELATIONAL_API_TOKEN_FILE").map(PathBuf::from),
        );
        let replica_sync_token = SecretSource::from_parts(
            optional_trimmed(&lookup, "ROLLCALL_REPLICA_SYNC_TOKEN"),
            optional_trimmed(&lookup, "ROLLCALL_REPLICA_SYNC_TOKEN_FILE").map(PathBuf::from),
        );

        Ok(Self {
            relational_db_path,
            replica_db_path,
            relational_api_url,
            relational_api_token,
            replica_sync_url,
            replica_sync_token,
            push_timeout: seconds(&lookup, "ROLLCALL_PUSH_TIMEOUT_SECS", 10, 1..=300)?,
            apply_timeout: seconds(&lookup, "ROLLCALL_APPLY_TIMEOUT_SECS", 60, 1..=600)?,
            fetch_timeout: seconds(&lookup, "ROLLCALL_FETCH_TIMEOUT_SECS", 10, 1..=300)?,
            sync_interval: seconds(&lookup, "ROLLCALL_SYNC_INTERVAL_SECS", 86_400, 60..=604_800)?,
            secret_ttl: seconds(&lookup, "ROLLCALL_SECRET_TTL_SECS", 300, 0..=86_400)?,
        })
    }

    /// Build the process-wide secret cache for both bearer tokens.
    pub fn secret_cache(&self) -> SecretCache {
        SecretCache::new(self.secret_ttl)
            .with_source(RELATIONAL_API_TOKEN, self.relational_api_token.clone())
            .with_source(REPLICA_SYNC_TOKEN, self.replica_sync_token.clone())
    }
}

fn seconds(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<Duration, ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = optional_trimmed(lookup, name)
        .map_or(Ok(default), |raw| raw.parse::<u64>())
        .map_err(|_| invalid())?;
    if !range.contains(&value) {
        return Err(invalid());
    }
    Ok(Duration::from_secs(value))
}

fn optional_url(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<String>, ConfigError> {
    let Some(url) = optional_trimmed(lookup, name) else {
        return Ok(None);
    };
    if !is_http_url(&url) {
        return Err(ConfigError::Invalid(format!(
            "{name} must start with http:// or https://"
        )));
    }
    Ok(Some(url.trim_end_matches('/').to_string()))
}

pub fn value_or_default(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

pub fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Result<SyncSettings, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        SyncSettings::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.push_timeout, Duration::from_secs(10));
        assert_eq!(settings.apply_timeout, Duration::from_secs(60));
        assert_eq!(settings.fetch_timeout, Duration::from_secs(10));
        assert_eq!(settings.sync_interval, Duration::from_secs(86_400));
        assert_eq!(settings.secret_ttl, Duration::from_secs(300));
        assert_eq!(settings.relational_api_url, None);
        assert!(!settings.relational_api_token.is_configured());
    }

    #[test]
    fn urls_must_be_http() {
        let err = settings(&[("ROLLCALL_RELATIONAL_API_URL", "ftp://roll")]).unwrap_err();
        assert!(err.to_string().contains("ROLLCALL_RELATIONAL_API_URL"));

        let ok = settings(&[("ROLLCALL_REPLICA_SYNC_URL", "https://replica.example/sync/")]).unwrap();
        assert_eq!(
            ok.replica_sync_url.as_deref(),
            Some("https://replica.example/sync")
        );
    }

    #[test]
    fn timeouts_are_range_checked() {
        assert!(settings(&[("ROLLCALL_PUSH_TIMEOUT_SECS", "0")]).is_err());
        assert!(settings(&[("ROLLCALL_APPLY_TIMEOUT_SECS", "soon")]).is_err());
        let ok = settings(&[("ROLLCALL_APPLY_TIMEOUT_SECS", "30")]).unwrap();
        assert_eq!(ok.apply_timeout, Duration::from_secs(30));
    }

    #[test]
    fn token_file_used_when_literal_absent() {
        let settings = settings(&[("ROLLCALL_RELATIONAL_API_TOKEN_FILE", "/run/secrets/api")]).unwrap();
        assert_eq!(
            settings.relational_api_token,
            SecretSource::File(PathBuf::from("/run/secrets/api"))
        );
    }

    #[test]
    fn debug_redacts_tokens() {
        let settings = settings(&[
            ("ROLLCALL_RELATIONAL_API_TOKEN", "sensitive-api-token"),
            ("ROLLCALL_REPLICA_SYNC_TOKEN", "sensitive-push-token"),
        ])
        .unwrap();
        let debug_output = format!("{settings:?}");
        assert!(!debug_output.contains("sensitive-api-token"));
        assert!(!debug_output.contains("sensitive-push-token"));
    }
}
