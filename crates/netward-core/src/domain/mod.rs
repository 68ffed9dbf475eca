//! Domain entities mirrored from the sensor plus the client's own state types.
//!
//! - **`models`** – Devices, alerts, decoys, system and learning status as the
//!   sensor reports them.
//! - **`identity`** – The pairing code, discovered sensors, and the
//!   [`identity::PairedIdentity`] persisted after a successful handshake.
//! - **`connection`** – The session state machine's states and legal edges.
//! - **`sequence`** – Allocation of ids for client-generated alerts.

pub mod connection;
pub mod identity;
pub mod models;
pub mod sequence;
