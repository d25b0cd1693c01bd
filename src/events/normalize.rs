//! Payload normalization
//!
//! Everything that leaves the server goes through [`normalize`] first, so the
//! transport only ever sees plain JSON: objects, arrays, strings, numbers,
//! booleans and null. Timestamps are rendered once, here, as RFC 3339 strings.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Render a timestamp the way every outbound message carries it
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Convert a payload into the `data` object of an envelope
///
/// Non-finite floats become `null`. A payload that is not an object is
/// wrapped as `{"value": ...}`; a unit payload becomes `{}`.
pub fn normalize<T: Serialize + ?Sized>(payload: &T) -> Result<Value, serde_json::Error> {
    let value = serde_json::to_value(payload)?;
    Ok(match value {
        Value::Object(_) => value,
        Value::Null => Value::Object(Map::new()),
        other => {
            let mut wrapped = Map::new();
            wrapped.insert("value".to_string(), other);
            Value::Object(wrapped)
        }
    })
}

/// Serde adapter for `DateTime<Utc>` fields
///
/// Use with `#[serde(with = "crate::events::iso8601")]`.
pub mod iso8601 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
