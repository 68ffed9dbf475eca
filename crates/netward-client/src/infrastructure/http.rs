//! HTTPS transport to the sensor's REST API.
//!
//! # Two clients (for beginners)
//!
//! Before pairing, the client has no certificate and does not know the
//! sensor's CA, so [`HttpPairingClient`] accepts any server certificate.  The
//! pairing code exchange, not TLS, authenticates that conversation.
//!
//! After pairing, [`HttpSensorTransport`] presents the issued client
//! certificate (mutual TLS) and trusts the CA the sensor handed over during
//! pairing.  A `403 Forbidden` from the sensor means the certificate was
//! revoked and maps to [`TransportError::CredentialsRejected`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use netward_core::protocol::endpoint::Method;
use netward_core::{DiscoveredSensor, Endpoint, PairedIdentity};
use reqwest::{Certificate, Client, Identity, StatusCode};
use serde_json::Value;
use tracing::{debug, trace};

use crate::application::transport::{
    EventStream, PairingTransport, SensorTransport, TransportError,
};
use crate::infrastructure::storage::config::TransportSettings;
use crate::infrastructure::stream::{client_tls_config, WsEventStream};

/// REST base for a sensor at `address` (`host:port`).
pub fn api_base(address: &str) -> String {
    format!("https://{address}/api/v1/")
}

/// Stream URL for a sensor at `address`.
pub fn stream_url(scheme: &str, address: &str) -> String {
    format!("{scheme}://{address}/api/v1/stream")
}

// ── Paired transport ──────────────────────────────────────────────────────────

/// Authenticated transport for a paired sensor.
pub struct HttpSensorTransport {
    request_timeout: Duration,
    stream_scheme: String,
    /// One TLS client per identity, keyed by certificate fingerprint.
    clients: Mutex<HashMap<String, Client>>,
}

impl HttpSensorTransport {
    pub fn new(settings: &TransportSettings) -> Self {
        Self {
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            stream_scheme: settings.stream_scheme.clone(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Client>> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn client_for(&self, identity: &PairedIdentity) -> Result<Client, TransportError> {
        let key = identity
            .certificate_fingerprint()
            .map_err(|e| TransportError::Decode(format!("stored certificate: {e}")))?;
        if let Some(client) = self.lock().get(&key) {
            return Ok(client.clone());
        }

        let tls_identity = Identity::from_pem(identity.identity_pem().as_bytes())
            .map_err(|e| TransportError::Network(format!("client identity rejected: {e}")))?;
        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(self.request_timeout)
            .connect_timeout(self.request_timeout)
            .user_agent(concat!("netward-client/", env!("CARGO_PKG_VERSION")))
            .identity(tls_identity);
        if let Some(ca) = &identity.ca_certificate_pem {
            let ca = Certificate::from_pem(ca.as_bytes())
                .map_err(|e| TransportError::Network(format!("sensor CA rejected: {e}")))?;
            builder = builder.add_root_certificate(ca);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        debug!(sensor_id = %identity.sensor_id, "built TLS client for paired identity");
        self.lock().insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl SensorTransport for HttpSensorTransport {
    async fn request(
        &self,
        identity: &PairedIdentity,
        endpoint: &Endpoint,
    ) -> Result<Value, TransportError> {
        let client = self.client_for(identity)?;
        execute(&client, &api_base(&identity.sensor_address), endpoint).await
    }

    async fn open_stream(
        &self,
        identity: &PairedIdentity,
    ) -> Result<Box<dyn EventStream>, TransportError> {
        let url = stream_url(&self.stream_scheme, &identity.sensor_address);
        let tls = if self.stream_scheme == "wss" {
            Some(client_tls_config(identity)?)
        } else {
            None
        };
        let stream = WsEventStream::connect(&url, self.request_timeout, tls).await?;
        Ok(Box::new(stream))
    }
}

// ── Pairing transport ─────────────────────────────────────────────────────────

/// Unauthenticated transport used only by the pairing handshake.
pub struct HttpPairingClient {
    client: Client,
}

impl HttpPairingClient {
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] if the TLS client cannot be built.
    pub fn new(settings: &TransportSettings) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(settings.request_timeout_secs);
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("netward-client/", env!("CARGO_PKG_VERSION")))
            // The sensor's certificate is not known before pairing.
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PairingTransport for HttpPairingClient {
    async fn request(
        &self,
        sensor: &DiscoveredSensor,
        endpoint: &Endpoint,
    ) -> Result<Value, TransportError> {
        execute(&self.client, &api_base(&sensor.address), endpoint).await
    }
}

// ── Shared request execution ──────────────────────────────────────────────────

async fn execute(client: &Client, base: &str, endpoint: &Endpoint) -> Result<Value, TransportError> {
    let url = format!("{base}{}", endpoint.path());
    let method = endpoint.method();
    trace!(%method, %url, "sensor request");

    let mut builder = match method {
        Method::Get => client.get(&url),
        Method::Post => client.post(&url),
        Method::Put => client.put(&url),
    };
    if let Some(body) = endpoint.body() {
        builder = builder.json(&body);
    }

    let response = builder.send().await.map_err(map_reqwest_error)?;
    let status = response.status();
    if status == StatusCode::FORBIDDEN {
        return Err(TransportError::CredentialsRejected);
    }
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }

    let body = response.bytes().await.map_err(map_reqwest_error)?;
    decode_body(&body)
}

/// An empty body reads as `null`.
fn decode_body(body: &[u8]) -> Result<Value, TransportError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| TransportError::Decode(e.to_string()))
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}
