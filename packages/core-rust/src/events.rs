//! Invalidation event wire schema.
//!
//! Peers keep their near tiers approximately coherent by broadcasting these
//! events over a fan-out transport. The JSON field names are part of the wire
//! contract and must not change; consumers tolerate unknown fields so the
//! schema can grow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to the key at the emitting instance.
///
/// Receivers treat every kind the same way (drop the key from the local near
/// tier); the distinction exists for observability and future policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationKind {
    /// The key was written with a new value.
    Update,
    /// The key was explicitly removed.
    Remove,
    /// The key expired out of a tier.
    Expire,
}

/// A broadcast instruction to drop one key from peer near tiers.
///
/// Serialized as JSON with PascalCase field names:
/// `{"Key":…,"Type":…,"Timestamp":…,"Source":…}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvalidationEvent {
    /// The affected cache key.
    pub key: String,
    /// What happened to the key.
    #[serde(rename = "Type")]
    pub kind: InvalidationKind,
    /// Emission time at the source instance (UTC).
    pub timestamp: DateTime<Utc>,
    /// Identifier of the emitting instance, used to skip self-delivered
    /// events. `None` when the emitter has no identity configured.
    #[serde(default)]
    pub source: Option<String>,
}

impl InvalidationEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(key: impl Into<String>, kind: InvalidationKind, source: Option<String>) -> Self {
        Self {
            key: key.into(),
            kind,
            timestamp: Utc::now(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_wire_field_names() {
        let event = InvalidationEvent::new("user:7", InvalidationKind::Update, Some("web-1".into()));
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["Key"], "user:7");
        assert_eq!(json["Type"], "Update");
        assert_eq!(json["Source"], "web-1");
        assert!(json["Timestamp"].is_string());
    }

    #[test]
    fn missing_source_serializes_as_null() {
        let event = InvalidationEvent::new("k", InvalidationKind::Remove, None);
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert!(json["Source"].is_null());
    }

    #[test]
    fn decodes_all_kinds() {
        for (wire, kind) in [
            ("Update", InvalidationKind::Update),
            ("Remove", InvalidationKind::Remove),
            ("Expire", InvalidationKind::Expire),
        ] {
            let raw = format!(
                r#"{{"Key":"k","Type":"{wire}","Timestamp":"2026-01-01T00:00:00Z","Source":null}}"#
            );
            let event: InvalidationEvent = serde_json::from_str(&raw).unwrap();
            assert_eq!(event.kind, kind);
        }
    }

    #[test]
    fn tolerates_unknown_fields_and_absent_source() {
        let raw = r#"{"Key":"k","Type":"Remove","Timestamp":"2026-01-01T00:00:00Z","Shard":3,"TraceId":"abc"}"#;
        let event: InvalidationEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.key, "k");
        assert_eq!(event.source, None);
    }

    #[test]
    fn round_trips_through_json() {
        let event = InvalidationEvent::new("a:b:c", InvalidationKind::Expire, Some("host-2".into()));
        let bytes = serde_json::to_vec(&event).unwrap();
        let decoded: InvalidationEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
