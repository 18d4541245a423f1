//! Entity key model

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::Error;

/// Normalized national identifier joining a relational member to its replica document.
///
/// Always ten ASCII digits; the display form `DDMMYY-XXXX` is accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKey(String);

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]{6}-?[0-9]{4}$").expect("valid entity key regex"))
}

impl EntityKey {
    /// Parse and normalize a raw identifier (trims whitespace, drops the hyphen).
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let trimmed = raw.trim();
        if !key_pattern().is_match(trimmed) {
            return Err(Error::InvalidInput(format!(
                "entity key must be 10 digits (got {} chars)",
                trimmed.chars().count()
            )));
        }
        Ok(Self(trimmed.replace('-', "")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Masked form for logs: only the last four digits are kept.
    #[must_use]
    pub fn masked(&self) -> String {
        let tail: String = self.0.chars().skip(self.0.chars().count().saturating_sub(4)).collect();
        format!("******{tail}")
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EntityKey> for String {
    fn from(value: EntityKey) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_hyphen() {
        let key = EntityKey::parse(" 010388-2369 ").unwrap();
        assert_eq!(key.as_str(), "0103882369");
    }

    #[test]
    fn parse_rejects_malformed_values() {
        assert!(EntityKey::parse("").is_err());
        assert!(EntityKey::parse("12345").is_err());
        assert!(EntityKey::parse("01038823690").is_err());
        assert!(EntityKey::parse("0103-882369").is_err());
        assert!(EntityKey::parse("abcdefghij").is_err());
    }

    #[test]
    fn parse_rejects_non_ascii_digits() {
        assert!(EntityKey::parse("0101302\u{0969}89").is_err());
        assert!(EntityKey::parse("\u{0661}\u{0662}0130-2989").is_err());
        assert!(EntityKey::parse("０１０１３０２９８９").is_err());
    }

    #[test]
    fn masked_keeps_last_four_digits() {
        let key = EntityKey::parse("0103882369").unwrap();
        assert_eq!(key.masked(), "******2369");
    }

    #[test]
    fn deserialize_validates() {
        let ok: EntityKey = serde_json::from_str("\"010388-2369\"").unwrap();
        assert_eq!(ok.as_str(), "0103882369");
        assert!(serde_json::from_str::<EntityKey>("\"nope\"").is_err());
    }
}
