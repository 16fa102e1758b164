use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::kind::RequestKind;

/// Opaque request payload. Field values are forwarded untouched.
pub type Payload = serde_json::Map<String, Value>;

/// One frame on the channel: an event name and its payload.
///
/// Serialized as `{"event": "...", "payload": ...}`; stream transports write
/// one frame per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Builds the outbound request for `kind`, keeping only the fields the
    /// kind forwards. Absent fields stay absent.
    pub fn request(kind: RequestKind, payload: &Payload) -> Self {
        let selected: Payload = kind
            .fields()
            .iter()
            .filter_map(|field| {
                payload
                    .get(*field)
                    .map(|value| (field.to_string(), value.clone()))
            })
            .collect();
        Self::new(kind.request_event(), Value::Object(selected))
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}
