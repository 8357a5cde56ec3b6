//! Timestamp wire format
//!
//! Session timestamps cross the RPC boundary as `{seconds, nanos}` where
//! `seconds` is an integer rendered as a string (so 64-bit values survive
//! JSON parsers that truncate large integers) and `nanos` is the sub-second
//! remainder. Conversion preserves at least millisecond precision, and null
//! converts to null in both directions - never to a zero-date sentinel.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Wire representation of a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Whole seconds since the Unix epoch, as a decimal string.
    pub seconds: String,
    /// Sub-second nanoseconds (0..=999_999_999).
    pub nanos: i32,
}

impl Timestamp {
    /// Build a timestamp from epoch seconds and nanos.
    pub fn new(seconds: i64, nanos: i32) -> Self {
        Self {
            seconds: seconds.to_string(),
            nanos,
        }
    }
}

/// Convert a native date to the wire format. `None` stays `None`.
pub fn to_timestamp(value: Option<DateTime<Utc>>) -> Option<Timestamp> {
    value.map(|dt| Timestamp::new(dt.timestamp(), dt.timestamp_subsec_nanos() as i32))
}

/// Convert a wire timestamp back to a native date. `None` stays `None`,
/// and so does anything unparseable or out of range.
pub fn from_timestamp(value: Option<&Timestamp>) -> Option<DateTime<Utc>> {
    let ts = value?;
    let seconds: i64 = ts.seconds.parse().ok()?;
    let nanos = u32::try_from(ts.nanos).ok()?;
    Utc.timestamp_opt(seconds, nanos).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_round_trip_preserves_millis() {
        let original = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 45).unwrap()
            + Duration::milliseconds(123);

        let wire = to_timestamp(Some(original)).unwrap();
        let restored = from_timestamp(Some(&wire)).unwrap();

        let delta = (restored - original).num_milliseconds().abs();
        assert!(delta < 1, "lost precision: {} ms", delta);
    }

    #[test]
    fn test_null_converts_to_null() {
        assert_eq!(to_timestamp(None), None);
        assert_eq!(from_timestamp(None), None);
    }

    #[test]
    fn test_seconds_serialized_as_string() {
        let wire = to_timestamp(Some(Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()));
        let json = serde_json::to_string(&wire.unwrap()).unwrap();
        assert!(json.contains("\"seconds\":\"1700000000\""));
    }

    #[test]
    fn test_garbage_seconds_yields_none() {
        let ts = Timestamp {
            seconds: "not-a-number".to_string(),
            nanos: 0,
        };
        assert_eq!(from_timestamp(Some(&ts)), None);
    }

    #[test]
    fn test_negative_nanos_yields_none() {
        let ts = Timestamp {
            seconds: "0".to_string(),
            nanos: -1,
        };
        assert_eq!(from_timestamp(Some(&ts)), None);
    }
}
