//! # netward-core
//!
//! Shared library for the netward sensor client containing the certificate
//! request codec, the pairing cryptography, the sensor wire protocol, and the
//! domain entities the client mirrors from the sensor.
//!
//! It has no dependencies on sockets, files, or async runtimes, so every
//! function here can be unit-tested in isolation.
//!
//! # Architecture overview (for beginners)
//!
//! A *sensor* is a small appliance that watches a home or office network,
//! tracks devices, runs decoys, and raises alerts.  The *client* pairs with a
//! sensor once (using a 6-digit code shown on the sensor) and then keeps a
//! live session open to mirror the sensor's state.
//!
//! This crate (`netward-core`) is the shared foundation.  It defines:
//!
//! - **`codec`** – Deterministic DER encoding of the PKCS#10 certificate
//!   request the client submits during pairing, plus hex and PEM helpers.
//!
//! - **`crypto`** – The pairing primitives: HMAC challenge tags, HKDF key
//!   derivation, the AES-GCM sealed channel, and the client's P-256 key pair.
//!
//! - **`protocol`** – The REST endpoint catalogue, the live stream frames, and
//!   the decoder that turns stream frames into typed sensor events.
//!
//! - **`domain`** – Devices, alerts, decoys, sensor status, connection states,
//!   and the persisted paired identity.

pub mod codec;
pub mod crypto;
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `netward_core::PairedIdentity` instead of the full module path.
pub use codec::{CertificateRequest, CodecError};
pub use crypto::{
    compute_auth_tag, derive_shared_key, open, seal, verify_auth_tag, ClientKeyPair, CryptoError,
    SharedKey,
};
pub use domain::connection::ConnectionState;
pub use domain::identity::{DiscoveredSensor, PairedIdentity, PairingCode};
pub use domain::models::{Alert, Decoy, Device, LearningStatus, Page, Severity, SystemStatus};
pub use protocol::endpoint::Endpoint;
pub use protocol::events::{DecodeError, SensorEvent};
pub use protocol::frames::{ClientFrame, StreamFrame};
