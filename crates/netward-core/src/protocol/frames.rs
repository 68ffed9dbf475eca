//! Live stream frames.
//!
//! The stream carries one JSON object per text message.
//!
//! Client to sensor:
//! ```json
//! {"type":"auth","fingerprint":"ab12..."}
//! {"type":"replay","sinceSeq":42}
//! ```
//!
//! Sensor to client:
//! ```json
//! {"type":"auth.ok"}
//! {"seq":43,"type":"device.online","payload":{"id":"d1"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::events::DecodeError;

/// `type` of the frame acknowledging stream authentication.
pub const AUTH_OK: &str = "auth.ok";
/// `type` of the frame rejecting stream authentication.
pub const AUTH_ERROR: &str = "auth.error";

/// A frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    Auth {
        fingerprint: String,
    },
    Replay {
        #[serde(rename = "sinceSeq")]
        since_seq: u64,
    },
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, DecodeError> {
        serde_json::to_string(self).map_err(|e| DecodeError::Json(e.to_string()))
    }
}

/// A frame pushed by the sensor.
///
/// Control frames (`auth.ok`, `auth.error`) carry no sequence number and
/// decode with `seq == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(default)]
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl StreamFrame {
    /// Parses one text message.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Json`] for malformed JSON or a missing `type`.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))
    }

    pub fn event(seq: u64, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            seq,
            kind: kind.into(),
            payload,
        }
    }

    pub fn is_auth_ok(&self) -> bool {
        self.kind == AUTH_OK
    }

    pub fn is_auth_error(&self) -> bool {
        self.kind == AUTH_ERROR
    }
}
