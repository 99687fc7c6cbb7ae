//! Timestamp handling for persisted records.
//!
//! Timestamps are written as RFC 3339 strings. Reading is lenient: older
//! documents and hand-edited files may carry epoch milliseconds or garbage,
//! and a single bad stamp must not invalidate the whole document. Anything
//! that cannot be interpreted reads as `None`, which the sweep treats as
//! expired. Fields that fall back to another stamp use [`lenient_or_stale`]
//! instead, so a corrupt value expires the record rather than deferring to
//! the fallback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub type Timestamp = DateTime<Utc>;

pub fn now() -> Timestamp {
    Utc::now()
}

/// Interpret a raw JSON value as a timestamp.
pub fn from_value(value: &Value) -> Option<Timestamp> {
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|parsed| parsed.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// `deserialize_with` adapter for `Option<Timestamp>` fields.
pub fn lenient<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(from_value))
}

/// Stand-in for a stamp that is present but unreadable. Always expired.
pub const UNREADABLE: Timestamp = DateTime::<Utc>::MIN_UTC;

/// Like [`lenient`], but a present value that cannot be parsed reads as
/// [`UNREADABLE`] instead of `None`. Missing and `null` still read as `None`.
pub fn lenient_or_stale<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.map(|value| from_value(&value).unwrap_or(UNREADABLE)))
}

/// True when `stamp` is missing, unreadable, or strictly older than `ttl` at `now`.
pub fn is_expired(
    stamp: Option<Timestamp>,
    now: Timestamp,
    ttl: chrono::Duration,
) -> bool {
    match stamp {
        Some(stamp) => stamp == UNREADABLE || now.signed_duration_since(stamp) > ttl,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_rfc3339_and_epoch_millis() {
        let parsed = from_value(&json!("2024-05-01T10:00:00Z")).unwrap();
        assert_eq!(parsed.timestamp(), 1_714_557_600);

        let millis = from_value(&json!(1_714_557_600_000_i64)).unwrap();
        assert_eq!(parsed, millis);
    }

    #[test]
    fn garbage_reads_as_missing() {
        assert!(from_value(&json!("yesterday-ish")).is_none());
        assert!(from_value(&json!(true)).is_none());
        assert!(from_value(&json!({"at": 1})).is_none());
    }

    #[derive(Debug, serde::Deserialize)]
    struct Stamped {
        #[serde(default, deserialize_with = "lenient_or_stale")]
        at: Option<Timestamp>,
    }

    #[test]
    fn unreadable_stamp_is_kept_apart_from_missing() {
        let parse = |raw: Value| serde_json::from_value::<Stamped>(raw).unwrap().at;

        assert_eq!(parse(json!({})), None);
        assert_eq!(parse(json!({ "at": null })), None);
        assert_eq!(parse(json!({ "at": "garbage" })), Some(UNREADABLE));
        assert_eq!(
            parse(json!({ "at": "2024-05-01T10:00:00Z" })).map(|t| t.timestamp()),
            Some(1_714_557_600)
        );
        assert!(is_expired(Some(UNREADABLE), now(), chrono::Duration::MAX));
    }

    #[test]
    fn missing_stamp_counts_as_expired() {
        let now = now();
        assert!(is_expired(None, now, chrono::Duration::days(365)));
        assert!(!is_expired(
            Some(now - chrono::Duration::minutes(29)),
            now,
            chrono::Duration::minutes(30)
        ));
        assert!(is_expired(
            Some(now - chrono::Duration::minutes(31)),
            now,
            chrono::Duration::minutes(30)
        ));
    }
}
