//! Transport seams between the application and the sensor.
//!
//! The session and the pairing handshake never touch sockets directly.  They
//! talk to these traits, which lets tests substitute
//! [`crate::infrastructure::mock::MockSensor`] and drive every scenario with
//! simulated time.

use async_trait::async_trait;
use netward_core::{ClientFrame, DiscoveredSensor, Endpoint, PairedIdentity, StreamFrame};
use serde_json::Value;
use thiserror::Error;

/// Errors reported by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, reset, DNS or TLS failure.
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    /// HTTP 403: the sensor no longer accepts this client's certificate.
    #[error("sensor rejected the client credentials")]
    CredentialsRejected,

    /// Any other non-success HTTP status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The response or frame body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The stream was closed by the sensor.
    #[error("stream closed")]
    Closed,
}

impl TransportError {
    pub fn is_credentials_rejected(&self) -> bool {
        matches!(self, TransportError::CredentialsRejected)
    }
}

/// Authenticated REST calls and stream setup against a paired sensor.
#[async_trait]
pub trait SensorTransport: Send + Sync {
    /// Performs one request and returns the decoded JSON body
    /// (`Value::Null` for an empty body).
    async fn request(
        &self,
        identity: &PairedIdentity,
        endpoint: &Endpoint,
    ) -> Result<Value, TransportError>;

    /// Opens the live event stream.  The stream is not yet authenticated.
    async fn open_stream(
        &self,
        identity: &PairedIdentity,
    ) -> Result<Box<dyn EventStream>, TransportError>;
}

/// One open live stream.
#[async_trait]
pub trait EventStream: Send {
    async fn send(&mut self, frame: &ClientFrame) -> Result<(), TransportError>;

    /// The next frame; `None` once the stream has ended.
    ///
    /// A frame that is not valid JSON yields `Some(Err(TransportError::Decode))`
    /// and the stream stays usable.
    async fn next_frame(&mut self) -> Option<Result<StreamFrame, TransportError>>;
}

/// Unauthenticated calls used before any credentials exist.
#[async_trait]
pub trait PairingTransport: Send + Sync {
    async fn request(
        &self,
        sensor: &DiscoveredSensor,
        endpoint: &Endpoint,
    ) -> Result<Value, TransportError>;
}
