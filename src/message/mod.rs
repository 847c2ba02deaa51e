use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reading fields of an outgoing message.
///
/// Both fields carry the same generated scalar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub confiability: f64,
    pub flow: f64,
}

/// Envelope published to the telemetry queue, one per device per tick.
///
/// Wire format:
/// `{"deviceId": "...", "deviceType": "mock", "data": {"confiability": 0.5, "flow": 0.5}, "ts": "<RFC 3339 UTC>"}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(rename = "deviceId")]
    pub device_id: String,

    #[serde(rename = "deviceType")]
    pub device_type: String,

    pub data: Reading,

    /// Generation time
    pub ts: DateTime<Utc>,
}

impl OutgoingMessage {
    /// Build a message stamped with the current UTC time.
    pub fn new(device_id: &str, device_type: &str, value: f64) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            data: Reading {
                confiability: value,
                flow: value,
            },
            ts: Utc::now(),
        }
    }

    /// JSON payload for the queue.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
