//! Typed sensor events decoded from stream frames.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::domain::models::{Alert, Decoy, Device, SystemStatus};
use crate::protocol::frames::StreamFrame;

/// A frame or page whose content could not be understood.
///
/// The offending item is dropped and the session continues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(String),

    #[error("payload of {kind} is invalid: {reason}")]
    Payload { kind: String, reason: String },
}

/// What a stream frame means for the client's state.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    /// `device.new` / `device.updated`
    DeviceUpsert(Device),
    /// `device.online`
    DeviceOnline { id: String },
    /// `device.offline`
    DeviceOffline { id: String },
    /// `alert.new`
    AlertNew(Alert),
    /// `decoy.new` / `decoy.updated`
    DecoyUpsert(Decoy),
    /// `system.status`
    Status(SystemStatus),
    /// Any other type; kept only for logging.
    Ignored { kind: String },
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

impl SensorEvent {
    /// Classifies a frame by its `type` and decodes its payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Payload`] when a known type carries a payload
    /// that does not match its schema.
    pub fn from_frame(frame: &StreamFrame) -> Result<Self, DecodeError> {
        let kind = frame.kind.as_str();
        let event = match kind {
            "device.new" | "device.updated" => SensorEvent::DeviceUpsert(payload(kind, &frame.payload)?),
            "device.online" => SensorEvent::DeviceOnline {
                id: payload::<IdOnly>(kind, &frame.payload)?.id,
            },
            "device.offline" => SensorEvent::DeviceOffline {
                id: payload::<IdOnly>(kind, &frame.payload)?.id,
            },
            "alert.new" => SensorEvent::AlertNew(payload(kind, &frame.payload)?),
            "decoy.new" | "decoy.updated" => SensorEvent::DecoyUpsert(payload(kind, &frame.payload)?),
            "system.status" => SensorEvent::Status(payload(kind, &frame.payload)?),
            other => {
                trace!(kind = other, seq = frame.seq, "unknown event type ignored");
                SensorEvent::Ignored {
                    kind: other.to_string(),
                }
            }
        };
        Ok(event)
    }
}

fn payload<T: DeserializeOwned>(kind: &str, value: &Value) -> Result<T, DecodeError> {
    T::deserialize(value).map_err(|e| DecodeError::Payload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_new_and_updated_are_upserts() {
        for kind in ["device.new", "device.updated"] {
            let frame = StreamFrame::event(1, kind, json!({ "id": "a", "online": true }));
            let event = SensorEvent::from_frame(&frame).unwrap();
            assert!(matches!(event, SensorEvent::DeviceUpsert(ref d) if d.id == "a" && d.online));
        }
    }

    #[test]
    fn test_presence_events_carry_id() {
        let online = StreamFrame::event(2, "device.online", json!({ "id": "a" }));
        let offline = StreamFrame::event(3, "device.offline", json!({ "id": "b" }));
        assert_eq!(
            SensorEvent::from_frame(&online).unwrap(),
            SensorEvent::DeviceOnline { id: "a".to_string() }
        );
        assert_eq!(
            SensorEvent::from_frame(&offline).unwrap(),
            SensorEvent::DeviceOffline { id: "b".to_string() }
        );
    }

    #[test]
    fn test_alert_new_decodes_alert() {
        let frame = StreamFrame::event(
            4,
            "alert.new",
            json!({ "id": 5, "severity": "high", "title": "t", "createdAt": "2024-01-01T00:00:00Z" }),
        );
        let event = SensorEvent::from_frame(&frame).unwrap();
        assert!(matches!(event, SensorEvent::AlertNew(ref a) if a.id == 5));
    }

    #[test]
    fn test_status_and_decoy_events() {
        let status = StreamFrame::event(5, "system.status", json!({ "version": "2.1" }));
        assert!(matches!(
            SensorEvent::from_frame(&status).unwrap(),
            SensorEvent::Status(ref s) if s.version == "2.1"
        ));
        let decoy = StreamFrame::event(6, "decoy.updated", json!({ "id": "x", "name": "smb" }));
        assert!(matches!(
            SensorEvent::from_frame(&decoy).unwrap(),
            SensorEvent::DecoyUpsert(_)
        ));
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let frame = StreamFrame::event(7, "scan.progress", json!({}));
        assert_eq!(
            SensorEvent::from_frame(&frame).unwrap(),
            SensorEvent::Ignored { kind: "scan.progress".to_string() }
        );
    }

    #[test]
    fn test_bad_payload_is_decode_error() {
        let frame = StreamFrame::event(8, "device.online", json!({ "name": "no id" }));
        assert!(matches!(
            SensorEvent::from_frame(&frame),
            Err(DecodeError::Payload { ref kind, .. }) if kind == "device.online"
        ));
    }
}
