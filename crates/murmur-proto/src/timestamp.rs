//! Millisecond-precision message timestamps.
//!
//! The push channel sends epoch milliseconds while the history endpoint
//! serializes server-side date-times as ISO-8601 strings, sometimes without an
//! offset. Both decode into the same [`Timestamp`]; offset-less strings are
//! taken as UTC.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::errors::{ProtocolError, Result};

/// Naive date-time layouts accepted in addition to RFC 3339.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Instant in milliseconds since the Unix epoch (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Timestamp from epoch milliseconds.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Epoch milliseconds.
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Parse an ISO-8601 string or a decimal epoch-millisecond string.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();

        if let Ok(millis) = text.parse::<i64>() {
            return Ok(Self(millis));
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(Self(dt.timestamp_millis()));
        }

        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
            .map(|naive| Self(naive.and_utc().timestamp_millis()))
            .ok_or_else(|| ProtocolError::InvalidTimestamp(text.to_string()))
    }

    /// `HH:MM` in UTC, for compact display.
    pub fn clock_time(self) -> String {
        DateTime::from_timestamp_millis(self.0)
            .map_or_else(|| "--:--".to_string(), |dt| dt.format("%H:%M").to_string())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::from_timestamp_millis(self.0) {
            Some(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawTimestamp {
            Millis(i64),
            Float(f64),
            Text(String),
        }

        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Millis(millis) => Ok(Self(millis)),
            RawTimestamp::Float(millis) if millis.is_finite() => Ok(Self(millis as i64)),
            RawTimestamp::Float(millis) => {
                Err(de::Error::custom(format!("non-finite timestamp {millis}")))
            },
            RawTimestamp::Text(text) => Self::parse(&text).map_err(de::Error::custom),
        }
    }
}
