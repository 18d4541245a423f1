//! Cached credential resolution
//!
//! Tokens are resolved once from their configured source and reused until
//! the cache TTL elapses, after which the source is read again. Mounted
//! secret files can therefore be rotated without a restart.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::util::sanitize;

/// Where a secret comes from
#[derive(Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Literal value from the environment
    Value(String),
    /// File whose trimmed contents are the secret
    File(PathBuf),
    /// Not configured; resolving it is a configuration error
    Missing,
}

impl fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Value(<redacted>)"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Missing => f.write_str("Missing"),
        }
    }
}

impl SecretSource {
    /// Pick the source from a literal value or a `*_FILE` path, literal first.
    pub fn from_parts(value: Option<String>, file: Option<PathBuf>) -> Self {
        match (value, file) {
            (Some(value), _) => Self::Value(value),
            (None, Some(path)) => Self::File(path),
            (None, None) => Self::Missing,
        }
    }

    pub const fn is_configured(&self) -> bool {
        !matches!(self, Self::Missing)
    }

    fn load(&self, name: &str) -> Result<String> {
        let raw = match self {
            Self::Value(value) => value.clone(),
            Self::File(path) => std::fs::read_to_string(path).map_err(|error| {
                Error::Config(format!(
                    "failed to read secret `{name}` from {}: {}",
                    path.display(),
                    sanitize(&error)
                ))
            })?,
            Self::Missing => return Err(Error::Config(format!("secret `{name}` is not configured"))),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::Config(format!("secret `{name}` is empty")));
        }
        Ok(trimmed.to_string())
    }
}

struct CachedSecret {
    value: String,
    fetched_at: Instant,
}

/// Process-wide secret cache, shared through `Arc`
pub struct SecretCache {
    ttl: Duration,
    sources: HashMap<String, SecretSource>,
    entries: RwLock<HashMap<String, CachedSecret>>,
}

impl fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCache")
            .field("ttl", &self.ttl)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

impl SecretCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sources: HashMap::new(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a named secret source
    #[must_use]
    pub fn with_source(mut self, name: impl Into<String>, source: SecretSource) -> Self {
        self.sources.insert(name.into(), source);
        self
    }

    #[must_use]
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn is_configured(&self, name: &str) -> bool {
        self.sources
            .get(name)
            .is_some_and(SecretSource::is_configured)
    }

    /// Resolve a secret, reading its source when the cached value is stale.
    pub async fn get(&self, name: &str) -> Result<String> {
        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(name) {
                if cached.fetched_at.elapsed() <= self.ttl {
                    return Ok(cached.value.clone());
                }
            }
        }

        let mut entries = self.entries.write().await;
        if let Some(cached) = entries.get(name) {
            if cached.fetched_at.elapsed() <= self.ttl {
                return Ok(cached.value.clone());
            }
        }

        let value = self
            .sources
            .get(name)
            .unwrap_or(&SecretSource::Missing)
            .load(name)?;
        entries.insert(
            name.to_string(),
            CachedSecret {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        tracing::debug!(secret = name, "Resolved secret");
        Ok(value)
    }

    /// Drop every cached value
    pub async fn invalidate(&self) {
        self.entries.write().await.clear();
    }
}
