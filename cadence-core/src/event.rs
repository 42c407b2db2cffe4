//! Telemetry event model
//!
//! A [`TelemetryEvent`] is one report document as it is stored in either
//! document store. The wire field names are fixed by the stores that already
//! hold the data (`fsCreateTimestamp`, `reportTimestamp`, `serial`,
//! `eventStart`); everything else rides along untouched in `payload`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Which physical unit produced an event
///
/// Older captures store the serial as a float, and some units carry
/// negative keys; any JSON number or string decodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    /// Numeric serial (the usual case)
    Numeric(u64),
    /// Negative serial
    Signed(i64),
    /// Serial written as a float
    Float(f64),
    /// Free-form key
    Text(String),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Numeric(n) => write!(f, "{}", n),
            Identity::Signed(n) => write!(f, "{}", n),
            Identity::Float(n) => write!(f, "{}", n),
            Identity::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for Identity {
    fn from(n: u64) -> Self {
        Identity::Numeric(n)
    }
}

/// One telemetry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// When the origin store persisted the event. Drives ordering and pacing.
    #[serde(rename = "fsCreateTimestamp", with = "timestamp")]
    pub recording_time: DateTime<Utc>,

    /// When the measurement happened on the device
    #[serde(rename = "reportTimestamp", with = "timestamp")]
    pub measurement_time: DateTime<Utc>,

    /// Unit the event is attributed to
    #[serde(rename = "serial", default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,

    /// Set only for synthesized events
    #[serde(
        rename = "eventStart",
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option"
    )]
    pub event_start: Option<DateTime<Utc>>,

    /// Remaining domain fields, copied through unchanged
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl TelemetryEvent {
    /// Create an event with the two timestamps and no other fields
    pub fn new(recording_time: DateTime<Utc>, measurement_time: DateTime<Utc>) -> Self {
        Self {
            recording_time,
            measurement_time,
            identity: None,
            event_start: None,
            payload: Map::new(),
        }
    }

    /// Set the unit identity
    pub fn with_identity(mut self, identity: impl Into<Identity>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Set the synthesized-origin marker
    pub fn with_event_start(mut self, event_start: DateTime<Utc>) -> Self {
        self.event_start = Some(event_start);
        self
    }

    /// Add a payload field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Reporting lag: how long after the measurement the event was recorded
    pub fn lag(&self) -> chrono::Duration {
        self.recording_time - self.measurement_time
    }

    /// Report type (`status`, `speeding`, ...) if present
    pub fn report_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }
}

/// Fixed-width RFC 3339 timestamps.
///
/// Nanosecond precision with a `Z` suffix keeps lexical order equal to
/// chronological order, which the stores rely on for `ORDER BY`.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Render a timestamp in the stored format
    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        DateTime::<Utc>::deserialize(deserializer)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => serializer.serialize_str(&super::format(dt)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<DateTime<Utc>>::deserialize(deserializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ms(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn test_wire_field_names() {
        let event = TelemetryEvent::new(ms(4_000), ms(3_500))
            .with_identity(83)
            .with_field("type", "status")
            .with_field("speed", 42.5);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["fsCreateTimestamp"], "1970-01-01T00:00:04.000000000Z");
        assert_eq!(value["reportTimestamp"], "1970-01-01T00:00:03.500000000Z");
        assert_eq!(value["serial"], 83);
        assert_eq!(value["type"], "status");
        assert_eq!(value["speed"], 42.5);
        assert!(value.get("eventStart").is_none());
    }

    #[test]
    fn test_decode_keeps_unknown_fields_in_payload() {
        let doc = json!({
            "fsCreateTimestamp": "2024-03-01T10:00:05Z",
            "reportTimestamp": "2024-03-01T10:00:00.250Z",
            "serial": "unit-7",
            "eventStart": "2024-03-01T09:59:00Z",
            "type": "hard_accel",
            "geoTags": ["depot"],
        });

        let event: TelemetryEvent = serde_json::from_value(doc).unwrap();
        assert_eq!(event.identity, Some(Identity::Text("unit-7".to_string())));
        assert!(event.event_start.is_some());
        assert_eq!(event.report_type(), Some("hard_accel"));
        assert_eq!(event.payload["geoTags"], json!(["depot"]));
        assert_eq!(event.lag(), chrono::Duration::milliseconds(4_750));
    }

    #[test]
    fn test_decode_accepts_any_numeric_serial() {
        let decode = |serial: serde_json::Value| -> TelemetryEvent {
            serde_json::from_value(json!({
                "fsCreateTimestamp": "2024-03-01T10:00:05Z",
                "reportTimestamp": "2024-03-01T10:00:04Z",
                "serial": serial,
            }))
            .unwrap()
        };

        assert_eq!(decode(json!(83)).identity, Some(Identity::Numeric(83)));
        assert_eq!(decode(json!(83.0)).identity, Some(Identity::Float(83.0)));
        assert_eq!(decode(json!(-1)).identity, Some(Identity::Signed(-1)));
        assert_eq!(Identity::Float(83.0).to_string(), "83");
    }

    #[test]
    fn test_timestamp_format_sorts_lexically() {
        let earlier = timestamp::format(&ms(1_000));
        let later = timestamp::format(&ms(1_500));
        assert!(earlier < later);
        assert_eq!(earlier.len(), later.len());
    }
}
