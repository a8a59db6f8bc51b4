//! Envelope decoding: complete text message to `Event`
//!
//! Expects a JSON object with at least `{"event": <string>}`; `time` is an
//! optional integer (absent or null decodes as 0). Decoding failures are
//! returned as `DecodeError` and never terminate the connection.

use crate::types::Event;
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a message did not yield an event
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope is not a JSON object")]
    NotObject,

    #[error("missing or non-string 'event' field")]
    MissingEvent,

    #[error("'time' field is not an integer: {0}")]
    InvalidTime(Value),
}

/// Parses wire envelopes into events
#[derive(Debug, Clone, Default)]
pub struct EventDecoder {
    forward_status: bool,
}

impl EventDecoder {
    /// Create a decoder; with `forward_status` the remaining envelope
    /// fields are attached to each event as opaque status
    pub fn new(forward_status: bool) -> Self {
        Self { forward_status }
    }

    /// Decode one complete message
    pub fn decode(&self, text: &str) -> Result<Event, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut envelope) = value else {
            return Err(DecodeError::NotObject);
        };

        let name = match envelope.remove("event") {
            Some(Value::String(name)) => name,
            _ => return Err(DecodeError::MissingEvent),
        };

        let timestamp = match envelope.remove("time") {
            None | Some(Value::Null) => 0,
            Some(Value::Number(n)) if n.is_i64() => n.as_i64().unwrap_or_default(),
            Some(other) => return Err(DecodeError::InvalidTime(other)),
        };

        let event = Event::new(name, timestamp);
        if self.forward_status {
            Ok(event.with_status(Value::Object(strip_empty(envelope))))
        } else {
            Ok(event)
        }
    }

    /// Decode, logging the offending text on failure
    pub fn decode_or_log(&self, text: &str) -> Option<Event> {
        match self.decode(text) {
            Ok(event) => Some(event),
            Err(DecodeError::Json(e)) => {
                tracing::error!(text = %text, error = %e, "Error while parsing JSON");
                None
            }
            Err(e) => {
                tracing::warn!(text = %text, error = %e, "Received message is not a valid event envelope");
                None
            }
        }
    }
}

fn strip_empty(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter().filter(|(_, v)| !v.is_null()).collect()
}
