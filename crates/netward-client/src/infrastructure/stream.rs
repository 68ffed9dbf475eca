//! Live event stream over WebSocket.
//!
//! One JSON object per text message in both directions.  Ping/pong and
//! binary messages are skipped; a close message ends the stream.
//!
//! Over `wss` the stream uses the same mutual TLS as the REST client: the
//! issued certificate is presented and only the CA pinned at pairing is
//! trusted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use netward_core::codec::pem;
use netward_core::domain::identity::CERTIFICATE_PEM_LABEL;
use netward_core::{ClientFrame, PairedIdentity, StreamFrame};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_tls_with_config,
    tungstenite::{Error as WsError, Message as WsMessage},
    Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace};

use crate::application::transport::{EventStream, TransportError};

/// An open stream connection to the sensor.
pub struct WsEventStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsEventStream {
    /// Connects to `url` (`ws://` or `wss://host:port/api/v1/stream`).
    ///
    /// `tls` is required for `wss` URLs; see [`client_tls_config`].
    ///
    /// # Errors
    ///
    /// [`TransportError::Timeout`] if the upgrade does not finish within
    /// `timeout`, [`TransportError::Network`] for any other failure.
    pub async fn connect(
        url: &str,
        timeout: Duration,
        tls: Option<Arc<ClientConfig>>,
    ) -> Result<Self, TransportError> {
        let connector = tls.map(Connector::Rustls);
        let upgrade = connect_async_tls_with_config(url, None, false, connector);
        let (socket, _response) = tokio::time::timeout(timeout, upgrade)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(map_ws_error)?;
        debug!(%url, "event stream connected");
        Ok(Self { socket })
    }
}

#[async_trait]
impl EventStream for WsEventStream {
    async fn send(&mut self, frame: &ClientFrame) -> Result<(), TransportError> {
        let text = frame
            .to_json()
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        self.socket
            .send(WsMessage::Text(text))
            .await
            .map_err(map_ws_error)
    }

    async fn next_frame(&mut self) -> Option<Result<StreamFrame, TransportError>> {
        loop {
            match self.socket.next().await? {
                Ok(WsMessage::Text(text)) => {
                    return Some(
                        StreamFrame::parse(&text).map_err(|e| TransportError::Decode(e.to_string())),
                    );
                }
                Ok(WsMessage::Close(reason)) => {
                    debug!(?reason, "sensor closed the event stream");
                    return None;
                }
                Ok(other) => trace!(len = other.len(), "skipping non-text stream message"),
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(map_ws_error(e))),
            }
        }
    }
}

/// Mutual-TLS settings for a `wss` stream to the sensor `identity` is
/// paired with.
///
/// # Errors
///
/// [`TransportError::Network`] when no sensor CA was pinned at pairing, or
/// when the stored certificate, CA or key cannot be loaded.
pub fn client_tls_config(identity: &PairedIdentity) -> Result<Arc<ClientConfig>, TransportError> {
    let ca_pem = identity
        .ca_certificate_pem
        .as_deref()
        .ok_or_else(|| TransportError::Network("no sensor CA pinned at pairing".to_string()))?;

    let mut roots = RootCertStore::empty();
    for der in pem::decode_all(CERTIFICATE_PEM_LABEL, ca_pem).map_err(tls_error)? {
        roots.add(CertificateDer::from(der)).map_err(tls_error)?;
    }
    if roots.is_empty() {
        return Err(TransportError::Network("sensor CA holds no certificate".to_string()));
    }

    let chain: Vec<CertificateDer<'static>> =
        pem::decode_all(CERTIFICATE_PEM_LABEL, &identity.certificate_pem)
            .map_err(tls_error)?
            .into_iter()
            .map(CertificateDer::from)
            .collect();
    if chain.is_empty() {
        return Err(TransportError::Network("client certificate missing".to_string()));
    }
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.private_key_pkcs8.clone()));

    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(tls_error)?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(tls_error)?;
    Ok(Arc::new(config))
}

fn tls_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Network(format!("TLS setup failed: {e}"))
}

fn map_ws_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::Network(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[tokio::test]
    async fn test_stream_exchanges_json_frames() {
        // Arrange – a one-shot sensor that acks auth, then sends junk, one
        // event and a close
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let auth = ws.next().await.unwrap().unwrap();
            ws.send(WsMessage::Text(r#"{"type":"auth.ok"}"#.to_string())).await.unwrap();
            ws.send(WsMessage::Text("not json".to_string())).await.unwrap();
            ws.send(WsMessage::Text(
                r#"{"seq":1,"type":"device.online","payload":{"id":"a"}}"#.to_string(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
            auth.into_text().unwrap()
        });

        // Act
        let url = format!("ws://{addr}/api/v1/stream");
        let mut stream = WsEventStream::connect(&url, Duration::from_secs(5), None).await.unwrap();
        stream
            .send(&ClientFrame::Auth { fingerprint: "ab".to_string() })
            .await
            .unwrap();
        let ack = stream.next_frame().await.unwrap().unwrap();
        let junk = stream.next_frame().await.unwrap();
        let event = stream.next_frame().await.unwrap().unwrap();
        let end = stream.next_frame().await;

        // Assert
        assert!(ack.is_auth_ok());
        assert!(matches!(junk, Err(TransportError::Decode(_))));
        assert_eq!(event.seq, 1);
        assert!(end.is_none());
        let auth_text = server.await.unwrap();
        assert!(auth_text.contains(r#""fingerprint":"ab""#));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_network_error() {
        // Arrange – bind then drop to obtain a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();

        // Act
        let result = WsEventStream::connect(&format!("ws://{addr}/"), Duration::from_secs(5), None).await;

        // Assert
        assert!(matches!(result, Err(TransportError::Network(_))));
    }

    #[test]
    fn test_tls_config_requires_pinned_ca() {
        // Arrange
        let identity = crate::infrastructure::mock::MockSensor::paired_identity();

        // Act
        let result = client_tls_config(&identity);

        // Assert
        assert!(matches!(result, Err(TransportError::Network(msg)) if msg.contains("CA")));
    }

    #[test]
    fn test_tls_config_rejects_unparseable_ca() {
        let mut identity = crate::infrastructure::mock::MockSensor::paired_identity();
        identity.ca_certificate_pem = Some(pem::encode(CERTIFICATE_PEM_LABEL, b"not a certificate"));

        let result = client_tls_config(&identity);

        assert!(matches!(result, Err(TransportError::Network(msg)) if msg.starts_with("TLS setup failed")));
    }

    #[test]
    fn test_tls_config_rejects_ca_without_certificate_block() {
        let mut identity = crate::infrastructure::mock::MockSensor::paired_identity();
        identity.ca_certificate_pem = Some(pem::encode("PRIVATE KEY", &[1, 2, 3]));

        let result = client_tls_config(&identity);

        assert!(matches!(result, Err(TransportError::Network(msg)) if msg.contains("no certificate")));
    }
}
