//! Frame type for the Taskwire protocol.
//!
//! Every message exchanged with the server is an event frame: a topic name
//! plus an arbitrary JSON payload. The topic set is open-ended, so the frame
//! itself stays untyped; [`crate::topics`] and [`crate::commands`] give the
//! known topics their shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Topic (event) name.
    pub event: String,
    /// Event payload. `null` for signal-only events.
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Create a new frame.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Create a frame that carries no payload.
    #[must_use]
    pub fn signal(event: impl Into<String>) -> Self {
        Self::new(event, Value::Null)
    }

    /// Get the topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.event
    }

    /// Check whether the frame carries a payload.
    #[must_use]
    pub fn has_payload(&self) -> bool {
        !self.data.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signal_frame_has_no_payload() {
        let frame = Frame::signal("dashboard_refresh_requested");
        assert_eq!(frame.topic(), "dashboard_refresh_requested");
        assert!(!frame.has_payload());
    }

    #[test]
    fn test_missing_data_defaults_to_null() {
        let frame: Frame = serde_json::from_str(r#"{"event":"join_dashboard"}"#).unwrap();
        assert_eq!(frame, Frame::signal("join_dashboard"));
    }

    #[test]
    fn test_frame_serializes_event_and_data() {
        let frame = Frame::new("typing", json!({"roomId": "d-1"}));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, json!({"event": "typing", "data": {"roomId": "d-1"}}));
    }
}
