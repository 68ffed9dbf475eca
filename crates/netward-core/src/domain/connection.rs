//! Connection state machine states and legal transitions.
//!
//! ```text
//!  disconnected ──connect──▶ connecting ──health ok──▶ connected ──sync ok──▶ syncing ──stream ok──▶ live
//!        ▲                        │                        │  │                  │  │                  │
//!        └────────────────────────┴──── failure ───────────┘  └──── 403 ────▶ authFailed ◀─── 403 ────┘
//! ```
//!
//! Every non-terminal state may fall back to `disconnected`.  `authFailed` is
//! terminal: the stored credentials were rejected and only re-pairing helps.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Syncing,
    Live,
    AuthFailed,
}

impl ConnectionState {
    /// `true` for states no transition may leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::AuthFailed)
    }

    /// `true` while a connect sequence or live session is in progress.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Syncing
                | ConnectionState::Live
        )
    }

    /// Whether moving from `self` to `next` is a legal edge.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (AuthFailed, _) => false,
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Syncing) | (Connected, AuthFailed) => true,
            (Syncing, Live) | (Syncing, AuthFailed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Syncing => "syncing",
            ConnectionState::Live => "live",
            ConnectionState::AuthFailed => "authFailed",
        };
        f.write_str(name)
    }
}
