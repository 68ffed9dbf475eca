//! REST endpoint catalogue.
//!
//! Paths are relative to the API base (`https://{address}/api/v1/`).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// HTTP method of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        })
    }
}

/// Every call the client can make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Health,
    Status,
    Devices { limit: u32, offset: u64 },
    Alerts { limit: u32, offset: u64 },
    Decoys,
    Learning,
    PairingChallenge,
    PairingVerify { tag: String },
    PairingSubmit { client_nonce: String, sealed_request: String },
    Action(SensorAction),
}

impl Endpoint {
    pub fn method(&self) -> Method {
        match self {
            Endpoint::Health
            | Endpoint::Status
            | Endpoint::Devices { .. }
            | Endpoint::Alerts { .. }
            | Endpoint::Decoys
            | Endpoint::Learning => Method::Get,
            Endpoint::PairingChallenge
            | Endpoint::PairingVerify { .. }
            | Endpoint::PairingSubmit { .. } => Method::Post,
            Endpoint::Action(action) => action.method(),
        }
    }

    /// Path relative to the API base, including any query string.
    pub fn path(&self) -> String {
        match self {
            Endpoint::Health => "health".to_string(),
            Endpoint::Status => "status".to_string(),
            Endpoint::Devices { limit, offset } => format!("devices?limit={limit}&offset={offset}"),
            Endpoint::Alerts { limit, offset } => format!("alerts?limit={limit}&offset={offset}"),
            Endpoint::Decoys => "decoys".to_string(),
            Endpoint::Learning => "learning".to_string(),
            Endpoint::PairingChallenge => "pairing/challenge".to_string(),
            Endpoint::PairingVerify { .. } => "pairing/verify".to_string(),
            Endpoint::PairingSubmit { .. } => "pairing/csr".to_string(),
            Endpoint::Action(action) => action.path(),
        }
    }

    /// JSON body, if the endpoint sends one.
    pub fn body(&self) -> Option<Value> {
        match self {
            Endpoint::PairingChallenge => Some(json!({})),
            Endpoint::PairingVerify { tag } => Some(json!({ "tag": tag })),
            Endpoint::PairingSubmit {
                client_nonce,
                sealed_request,
            } => Some(json!({
                "clientNonce": client_nonce,
                "sealedRequest": sealed_request,
            })),
            Endpoint::Action(action) => action.body(),
            _ => None,
        }
    }
}

/// A state-changing request the user can issue.
///
/// These are the only requests that may wait in the action queue while the
/// session is down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SensorAction {
    AcknowledgeAlert { id: i64 },
    RenameDevice { id: String, name: String },
    SetDecoyEnabled { id: String, enabled: bool },
    RestartLearning,
}

impl SensorAction {
    pub fn method(&self) -> Method {
        match self {
            SensorAction::AcknowledgeAlert { .. } | SensorAction::RestartLearning => Method::Post,
            SensorAction::RenameDevice { .. } | SensorAction::SetDecoyEnabled { .. } => Method::Put,
        }
    }

    pub fn path(&self) -> String {
        match self {
            SensorAction::AcknowledgeAlert { id } => format!("alerts/{id}/ack"),
            SensorAction::RenameDevice { id, .. } => format!("devices/{id}/name"),
            SensorAction::SetDecoyEnabled { id, .. } => format!("decoys/{id}/enabled"),
            SensorAction::RestartLearning => "learning/restart".to_string(),
        }
    }

    pub fn body(&self) -> Option<Value> {
        match self {
            SensorAction::AcknowledgeAlert { .. } | SensorAction::RestartLearning => None,
            SensorAction::RenameDevice { name, .. } => Some(json!({ "name": name })),
            SensorAction::SetDecoyEnabled { enabled, .. } => Some(json!({ "enabled": enabled })),
        }
    }
}

impl From<SensorAction> for Endpoint {
    fn from(action: SensorAction) -> Self {
        Endpoint::Action(action)
    }
}
