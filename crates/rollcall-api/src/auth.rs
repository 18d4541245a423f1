use std::sync::Arc;

use axum::http::HeaderMap;
use rollcall_core::secrets::SecretCache;

use crate::error::AppError;

/// Checks bearer tokens against one named secret in the cache.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    secrets: Arc<SecretCache>,
    secret_name: &'static str,
}

impl TokenVerifier {
    pub const fn new(secrets: Arc<SecretCache>, secret_name: &'static str) -> Self {
        Self {
            secrets,
            secret_name,
        }
    }

    /// An unconfigured secret is a server-side error, never an open door.
    pub async fn verify(&self, token: &str) -> Result<(), AppError> {
        let expected = self
            .secrets
            .get(self.secret_name)
            .await
            .map_err(|error| AppError::Config(rollcall_core::util::sanitize(&error)))?;
        if constant_time_eq(expected.as_bytes(), token.as_bytes()) {
            Ok(())
        } else {
            Err(AppError::unauthorized("Bearer token is not valid"))
        }
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
