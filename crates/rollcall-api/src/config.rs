use std::collections::HashMap;
use std::env;

use rollcall_core::config::{optional_trimmed, ConfigError, SyncSettings};

/// Which routers to serve, plus the shared sync settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub relational_bind_addr: Option<String>,
    pub replica_bind_addr: Option<String>,
    pub sync: SyncSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let relational_bind_addr = optional_trimmed(&lookup, "ROLLCALL_RELATIONAL_BIND_ADDR");
        let replica_bind_addr = optional_trimmed(&lookup, "ROLLCALL_REPLICA_BIND_ADDR");
        if relational_bind_addr.is_none() && replica_bind_addr.is_none() {
            return Err(ConfigError::MissingVar(
                "ROLLCALL_RELATIONAL_BIND_ADDR or ROLLCALL_REPLICA_BIND_ADDR",
            ));
        }
        if relational_bind_addr.is_some() && relational_bind_addr == replica_bind_addr {
            return Err(ConfigError::Invalid(
                "relational and replica routers need different bind addresses".to_string(),
            ));
        }

        let sync = SyncSettings::from_lookup(&lookup)?;
        if relational_bind_addr.is_some() && !sync.relational_api_token.is_configured() {
            return Err(ConfigError::MissingVar("ROLLCALL_RELATIONAL_API_TOKEN"));
        }
        if replica_bind_addr.is_some() && !sync.replica_sync_token.is_configured() {
            return Err(ConfigError::MissingVar("ROLLCALL_REPLICA_SYNC_TOKEN"));
        }

        Ok(Self {
            relational_bind_addr,
            replica_bind_addr,
            sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        AppConfig::from_lookup(|name| values.get(name).cloned())
    }

    #[test]
    fn requires_at_least_one_router() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("ROLLCALL_RELATIONAL_BIND_ADDR"));
    }

    #[test]
    fn relational_router_requires_its_token() {
        let err = config(&[("ROLLCALL_RELATIONAL_BIND_ADDR", "127.0.0.1:8080")]).unwrap_err();
        assert!(err.to_string().contains("ROLLCALL_RELATIONAL_API_TOKEN"));
    }

    #[test]
    fn token_file_satisfies_token_requirement() {
        let config = config(&[
            ("ROLLCALL_REPLICA_BIND_ADDR", "127.0.0.1:8081"),
            ("ROLLCALL_REPLICA_SYNC_TOKEN_FILE", "/run/secrets/replica"),
        ])
        .unwrap();
        assert_eq!(config.relational_bind_addr, None);
        assert_eq!(config.replica_bind_addr.as_deref(), Some("127.0.0.1:8081"));
    }

    #[test]
    fn rejects_shared_bind_address() {
        let err = config(&[
            ("ROLLCALL_RELATIONAL_BIND_ADDR", "127.0.0.1:8080"),
            ("ROLLCALL_REPLICA_BIND_ADDR", "127.0.0.1:8080"),
            ("ROLLCALL_RELATIONAL_API_TOKEN", "a"),
            ("ROLLCALL_REPLICA_SYNC_TOKEN", "b"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("different bind addresses"));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let config = config(&[
            ("ROLLCALL_RELATIONAL_BIND_ADDR", "127.0.0.1:8080"),
            ("ROLLCALL_RELATIONAL_API_TOKEN", "super-secret"),
        ])
        .unwrap();
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
