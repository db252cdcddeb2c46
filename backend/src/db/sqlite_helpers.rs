//! SQLite helper utilities for type conversion
//!
//! SQLite has no native UUID, array or JSON document types. Ids are stored as
//! TEXT, arrays and asset descriptors as JSON TEXT, timestamps as fixed-width
//! RFC 3339 TEXT so that lexical order equals chronological order.

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

// ============================================================================
// Id Helpers
// ============================================================================

/// Generate a new time-ordered identifier.
#[inline]
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Check that an incoming id is well-formed.
#[inline]
pub fn is_valid_id(s: &str) -> bool {
    Uuid::parse_str(s).is_ok()
}

// ============================================================================
// Array Helpers (stored as JSON strings in SQLite)
// ============================================================================

/// Deserialize a JSON string from SQLite to a Vec
#[inline]
pub fn json_to_vec<T: DeserializeOwned>(s: &str) -> Vec<T> {
    serde_json::from_str(s).unwrap_or_default()
}

// ============================================================================
// JSON Helpers (stored as TEXT in SQLite)
// ============================================================================

/// Serialize any serializable value to a JSON string
#[inline]
pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Deserialize a JSON string to a value
#[inline]
pub fn from_json<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| anyhow!("JSON parse error: {}", e))
}

/// Deserialize an optional JSON string
#[inline]
pub fn from_json_opt<T: DeserializeOwned>(s: Option<&str>) -> Result<Option<T>> {
    match s {
        Some(s) if !s.is_empty() && s != "null" => Ok(Some(from_json(s)?)),
        _ => Ok(None),
    }
}

// ============================================================================
// Timestamp Helpers (stored as ISO8601 TEXT in SQLite)
// ============================================================================

/// Get current UTC timestamp as a fixed-width ISO8601 string for SQLite
#[inline]
pub fn now_iso8601() -> String {
    datetime_to_str(Utc::now())
}

/// Convert a chrono DateTime to a fixed-width ISO8601 string
#[inline]
pub fn datetime_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ============================================================================
// Error Helpers
// ============================================================================

/// True when the error chain carries a SQLite UNIQUE constraint violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_valid_and_ordered() {
        let a = new_id();
        let b = new_id();
        assert!(is_valid_id(&a));
        assert!(a < b);
        assert!(!is_valid_id("not-an-id"));
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let ts = now_iso8601();
        assert_eq!(ts.len(), "2024-01-01T00:00:00.000000Z".len());
        assert!(ts.ends_with('Z'));
        let parsed = DateTime::parse_from_rfc3339(&ts).unwrap().with_timezone(&Utc);
        assert_eq!(datetime_to_str(parsed), ts);
    }

    #[test]
    fn test_json_helpers_tolerate_garbage() {
        assert_eq!(json_to_vec::<String>(r#"["a","b"]"#), vec!["a".to_string(), "b".to_string()]);
        assert!(json_to_vec::<String>("not json").is_empty());
        assert_eq!(from_json_opt::<String>(Some("null")).unwrap(), None);
    }
}
