use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::constants::MessageKind;

/// Errors from decoding an envelope timestamp.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimestampError {
    #[error("unrecognised timestamp format: {0}")]
    Format(String),

    #[error("epoch value out of range: {0}")]
    OutOfRange(f64),
}

/// Epoch values above this are taken as milliseconds, below as seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

/// Envelope of every inbound server event.
///
/// Identity is structural: there is no message id, and two identical
/// frames produce two equal messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Time the server stamped the event, or time of receipt when absent.
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Other top-level fields (`job_id`, `session_id`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl InboundMessage {
    /// Creates a message stamped with the current time.
    pub fn new(msg_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            timestamp: Utc::now(),
            extra: serde_json::Map::new(),
        }
    }

    /// Classifies the message by its `type` tag.
    pub fn kind(&self) -> MessageKind {
        MessageKind::parse(&self.msg_type)
    }

    /// Deserializes `data` into a typed payload.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    /// Looks up a string field, first at the top level, then inside `data`.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.extra
            .get(key)
            .and_then(|v| v.as_str())
            .or_else(|| self.data.get(key).and_then(|v| v.as_str()))
    }
}

/// Frames the client writes to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Handshake sent once right after the channel opens.
    Auth { token: String },
    /// Liveness probe.
    Ping,
    /// Liveness reply.
    Pong,
}

impl OutboundFrame {
    /// Serializes the frame to its JSON text form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Raw wire form of a timestamp before normalisation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Text(String),
    Epoch(f64),
}

/// Offset-less layouts read as UTC, tried after RFC 3339.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Normalises an ISO-8601 string or an epoch number to UTC.
///
/// Accepts RFC 3339, date-time without an offset (`T` or space separator,
/// read as UTC), a bare date (midnight UTC), and epoch numbers. Epoch
/// numbers above 10^12 are milliseconds, otherwise seconds.
pub fn parse_timestamp(raw: &RawTimestamp) -> Result<DateTime<Utc>, TimestampError> {
    match raw {
        RawTimestamp::Text(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
                return Ok(dt.with_timezone(&Utc));
            }
            for format in NAIVE_FORMATS {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Ok(naive.and_utc());
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                && let Some(midnight) = date.and_hms_opt(0, 0, 0)
            {
                return Ok(midnight.and_utc());
            }
            Err(TimestampError::Format(s.to_owned()))
        }
        RawTimestamp::Epoch(n) => {
            if !n.is_finite() {
                return Err(TimestampError::OutOfRange(*n));
            }
            let millis = if n.abs() >= EPOCH_MILLIS_THRESHOLD {
                *n
            } else {
                n * 1000.0
            };
            DateTime::from_timestamp_millis(millis as i64).ok_or(TimestampError::OutOfRange(*n))
        }
    }
}

/// Missing, null, or unreadable timestamps become the receipt time.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(Utc::now()),
        Some(Value::String(s)) => RawTimestamp::Text(s),
        Some(Value::Number(n)) => RawTimestamp::Epoch(n.as_f64().unwrap_or(f64::NAN)),
        Some(other) => {
            warn!(timestamp = %other, "timestamp is not a string or number, using receipt time");
            return Ok(Utc::now());
        }
    };
    Ok(parse_timestamp(&raw).unwrap_or_else(|e| {
        warn!(error = %e, "using receipt time");
        Utc::now()
    }))
}
