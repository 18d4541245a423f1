//! Small helpers shared by the services and clients

use chrono::{DateTime, TimeZone, Utc};

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// First 180 characters of a remote response body, for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Flatten an error into a single log-friendly line.
pub fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix milliseconds to a UTC datetime, clamping invalid values to the epoch.
pub fn datetime_from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

/// Parse an RFC 3339 timestamp (`Z` or numeric offsets) into UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_http_url_accepts_valid_schemes() {
        assert!(is_http_url("http://localhost"));
        assert!(is_http_url("https://example.com"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("example.com"));
    }

    #[test]
    fn parse_timestamp_accepts_offsets() {
        let utc = parse_timestamp("2025-11-05T03:30:00Z").unwrap();
        let offset = parse_timestamp("2025-11-05T04:30:00+01:00").unwrap();
        assert_eq!(utc, offset);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn millis_round_trip_through_datetime() {
        let dt = datetime_from_millis(1_700_000_000_123);
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_123);
    }
}
