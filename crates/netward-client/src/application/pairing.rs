//! The pairing handshake and the credential store seam.
//!
//! # Handshake (for beginners)
//!
//! ```text
//! client                                   sensor
//!   │ POST pairing/challenge ───────────────▶ │
//!   │ ◀─────────────── {challenge, sensorId}  │   idle → challengeRequested
//!   │ POST pairing/verify {tag} ────────────▶ │
//!   │ ◀──────────────── {verified, sensorTag} │   → codeVerified
//!   │   new key pair, nonce, shared key, CSR  │
//!   │ POST pairing/csr {nonce, sealed CSR} ─▶ │   → csrSubmitted
//!   │ ◀────────────────────── {certificate}   │   → paired
//! ```
//!
//! Any failure or cancellation returns the handshake to `idle`.  Nothing is
//! written to the [`CredentialStore`] until the certificate has arrived, so a
//! failed attempt never disturbs an existing identity.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use netward_core::codec::{hex, pem};
use netward_core::crypto::{
    compute_auth_tag, derive_shared_key, generate_client_nonce, seal, verify_sensor_tag,
    ClientKeyPair, CryptoError,
};
use netward_core::domain::identity::CERTIFICATE_PEM_LABEL;
use netward_core::protocol::pairing::{CertificateResponse, ChallengeResponse, VerifyResponse};
use netward_core::{DiscoveredSensor, Endpoint, PairedIdentity, PairingCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::transport::{PairingTransport, TransportError};

// ── Stages ────────────────────────────────────────────────────────────────────

/// Progress of one handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStage {
    Idle,
    ChallengeRequested,
    CodeVerified,
    CsrSubmitted,
    Paired,
}

impl PairingStage {
    /// `true` while a handshake is in flight.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            PairingStage::ChallengeRequested | PairingStage::CodeVerified | PairingStage::CsrSubmitted
        )
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PairingError {
    /// The sensor refused the code, or its counter-tag did not match.
    #[error("pairing code rejected")]
    CodeRejected,

    /// A transport failure or an unusable response.
    #[error("pairing failed: {0}")]
    Failed(String),

    #[error("pairing crypto failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("pairing cancelled")]
    Cancelled,

    #[error("a pairing handshake is already in progress")]
    InProgress,

    #[error("could not store the paired identity: {0}")]
    Store(#[from] StoreError),
}

/// Errors from a [`CredentialStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored identity is corrupt: {0}")]
    Corrupt(String),

    #[error("could not encode identity: {0}")]
    Encode(String),
}

// ── Credential store ──────────────────────────────────────────────────────────

/// Persistence of the single paired identity.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    /// The stored identity, or `None` if the client has never paired.
    fn load(&self) -> Result<Option<PairedIdentity>, StoreError>;

    /// Replaces the stored identity.
    fn save(&self, identity: &PairedIdentity) -> Result<(), StoreError>;

    /// Removes the stored identity.  Returns `false` if there was none.
    fn delete(&self) -> Result<bool, StoreError>;
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Runs pairing handshakes against one transport.
pub struct PairingHandshake {
    transport: Arc<dyn PairingTransport>,
    /// Common name placed in the certificate request.
    client_name: String,
    stage: watch::Sender<PairingStage>,
}

impl PairingHandshake {
    pub fn new(transport: Arc<dyn PairingTransport>, client_name: impl Into<String>) -> Self {
        let (stage, _) = watch::channel(PairingStage::Idle);
        Self {
            transport,
            client_name: client_name.into(),
            stage,
        }
    }

    pub fn stage(&self) -> PairingStage {
        *self.stage.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PairingStage> {
        self.stage.subscribe()
    }

    /// Runs one handshake with `sensor` using `code`.
    ///
    /// No retries: on any error the stage returns to `Idle` and the caller
    /// decides whether to ask the user for a new code.
    ///
    /// # Errors
    ///
    /// - [`PairingError::CodeRejected`] if the code is wrong.
    /// - [`PairingError::Failed`] on transport failures or bad responses.
    /// - [`PairingError::Cancelled`] if `cancel` fires first.
    /// - [`PairingError::InProgress`] if another handshake is running.
    pub async fn run(
        &self,
        sensor: &DiscoveredSensor,
        code: &PairingCode,
        cancel: &CancellationToken,
    ) -> Result<PairedIdentity, PairingError> {
        let claimed = self.stage.send_if_modified(|stage| {
            if stage.is_in_progress() {
                return false;
            }
            *stage = PairingStage::ChallengeRequested;
            true
        });
        if !claimed {
            return Err(PairingError::InProgress);
        }
        let guard = AbortToIdle::arm(&self.stage);

        info!(sensor = %sensor.name, address = %sensor.address, "pairing started");
        match self.run_steps(sensor, code, cancel).await {
            Ok(identity) => {
                guard.disarm();
                self.stage.send_replace(PairingStage::Paired);
                info!(sensor_id = %identity.sensor_id, "pairing complete");
                Ok(identity)
            }
            Err(e) => {
                drop(guard);
                warn!(error = %e, "pairing aborted");
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        sensor: &DiscoveredSensor,
        code: &PairingCode,
        cancel: &CancellationToken,
    ) -> Result<PairedIdentity, PairingError> {
        // ── Challenge ────────────────────────────────────────────────────────
        let challenge: ChallengeResponse =
            decode(self.request(sensor, Endpoint::PairingChallenge, cancel).await?, "challenge")?;
        let challenge_bytes = hex::decode(&challenge.challenge)
            .map_err(|e| PairingError::Failed(format!("malformed challenge: {e}")))?;
        if let Some(advertised) = &sensor.sensor_id {
            if *advertised != challenge.sensor_id {
                return Err(PairingError::Failed(format!(
                    "sensor identifies as {} but advertised {advertised}",
                    challenge.sensor_id
                )));
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        let tag = compute_auth_tag(&challenge_bytes, code.as_str())?;
        let verify: VerifyResponse = decode(
            self.request(sensor, Endpoint::PairingVerify { tag: hex::encode(tag) }, cancel)
                .await?,
            "verify",
        )?;
        if !verify.verified {
            return Err(PairingError::CodeRejected);
        }
        if let Some(sensor_tag) = &verify.sensor_tag {
            let sensor_tag = hex::decode(sensor_tag).map_err(|_| PairingError::CodeRejected)?;
            verify_sensor_tag(&challenge_bytes, &tag, code.as_str(), &sensor_tag)
                .map_err(|_| PairingError::CodeRejected)?;
        }
        self.advance(PairingStage::CodeVerified);

        // ── Certificate request ──────────────────────────────────────────────
        let key_pair = ClientKeyPair::generate()?;
        let client_nonce = generate_client_nonce();
        let shared_key = derive_shared_key(
            code.as_str(),
            &challenge_bytes,
            &client_nonce,
            &challenge.sensor_id,
        )?;
        let csr = key_pair.certificate_request(&self.client_name)?;
        let sealed = seal(&csr.to_der().map_err(CryptoError::from)?, &shared_key)?;
        debug!(sealed_len = sealed.len(), "certificate request sealed");

        self.advance(PairingStage::CsrSubmitted);
        let submit = Endpoint::PairingSubmit {
            client_nonce: hex::encode(client_nonce),
            sealed_request: hex::encode(&sealed),
        };
        let issued: CertificateResponse = decode(self.request(sensor, submit, cancel).await?, "csr")?;
        pem::decode(CERTIFICATE_PEM_LABEL, &issued.certificate)
            .map_err(|e| PairingError::Failed(format!("issued certificate unusable: {e}")))?;

        Ok(PairedIdentity {
            sensor_id: challenge.sensor_id,
            sensor_name: sensor.name.clone(),
            sensor_address: sensor.address.clone(),
            certificate_pem: issued.certificate,
            private_key_pkcs8: key_pair.pkcs8_der().to_vec(),
            ca_certificate_pem: issued.ca_certificate,
            paired_at: Utc::now(),
        })
    }

    async fn request(
        &self,
        sensor: &DiscoveredSensor,
        endpoint: Endpoint,
        cancel: &CancellationToken,
    ) -> Result<Value, PairingError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PairingError::Cancelled),
            response = self.transport.request(sensor, &endpoint) => response,
        };
        response.map_err(|e| match (&endpoint, e) {
            (
                Endpoint::PairingVerify { .. },
                TransportError::CredentialsRejected | TransportError::Status(401),
            ) => PairingError::CodeRejected,
            (_, e) => PairingError::Failed(format!("{} failed: {e}", endpoint.path())),
        })
    }

    fn advance(&self, to: PairingStage) {
        debug!(stage = ?to, "pairing stage");
        self.stage.send_replace(to);
    }
}

/// Sends the stage back to `Idle` when dropped while armed.  Covers a
/// handshake future that is dropped mid-flight as well as the error path.
struct AbortToIdle<'a> {
    stage: &'a watch::Sender<PairingStage>,
    armed: bool,
}

impl<'a> AbortToIdle<'a> {
    fn arm(stage: &'a watch::Sender<PairingStage>) -> Self {
        Self { stage, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortToIdle<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.stage.send_replace(PairingStage::Idle);
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, PairingError> {
    serde_json::from_value(value)
        .map_err(|e| PairingError::Failed(format!("malformed {what} response: {e}")))
}

/// Runs the handshake and persists the identity only once it succeeded.
///
/// # Errors
///
/// Any [`PairingError`]; a store failure surfaces as [`PairingError::Store`].
pub async fn pair_and_store(
    handshake: &PairingHandshake,
    store: &dyn CredentialStore,
    sensor: &DiscoveredSensor,
    code: &PairingCode,
    cancel: &CancellationToken,
) -> Result<PairedIdentity, PairingError> {
    let identity = handshake.run(sensor, code, cancel).await?;
    store.save(&identity)?;
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockSensor;
    use async_trait::async_trait;
    use std::time::Duration;

    /// A sensor that accepts the connection and never answers.
    struct SilentSensor;

    #[async_trait]
    impl PairingTransport for SilentSensor {
        async fn request(
            &self,
            _sensor: &DiscoveredSensor,
            _endpoint: &Endpoint,
        ) -> Result<Value, TransportError> {
            std::future::pending().await
        }
    }

    fn sensor() -> DiscoveredSensor {
        DiscoveredSensor {
            name: "Hallway".to_string(),
            sensor_id: Some(MockSensor::SENSOR_ID.to_string()),
            address: "10.0.0.2:8443".to_string(),
        }
    }

    fn code(text: &str) -> PairingCode {
        PairingCode::parse(text).unwrap()
    }

    #[tokio::test]
    async fn test_successful_handshake_reaches_paired() {
        // Arrange
        let mock = Arc::new(MockSensor::new());
        let handshake = PairingHandshake::new(mock.clone(), "laptop");

        // Act
        let identity = handshake
            .run(&sensor(), &code(MockSensor::PAIRING_CODE), &CancellationToken::new())
            .await
            .unwrap();

        // Assert
        assert_eq!(handshake.stage(), PairingStage::Paired);
        assert_eq!(identity.sensor_id, MockSensor::SENSOR_ID);
        assert_eq!(identity.sensor_name, "Hallway");
        assert!(identity.key_pair().is_ok());
        assert_eq!(mock.received_csr_subjects(), vec!["laptop".to_string()]);
    }

    #[tokio::test]
    async fn test_wrong_code_is_rejected_and_returns_to_idle() {
        let mock = Arc::new(MockSensor::new());
        let handshake = PairingHandshake::new(mock.clone(), "laptop");

        let result = handshake
            .run(&sensor(), &code("000001"), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PairingError::CodeRejected)));
        assert_eq!(handshake.stage(), PairingStage::Idle);
        assert!(mock.received_csr_subjects().is_empty());
    }

    #[tokio::test]
    async fn test_forged_sensor_tag_is_rejected() {
        // Arrange – the sensor accepts the code but answers with a bad counter-tag
        let mock = Arc::new(MockSensor::new());
        mock.set_forge_sensor_tag(true);
        let handshake = PairingHandshake::new(mock.clone(), "laptop");

        // Act
        let result = handshake
            .run(&sensor(), &code(MockSensor::PAIRING_CODE), &CancellationToken::new())
            .await;

        // Assert
        assert!(matches!(result, Err(PairingError::CodeRejected)));
        assert!(mock.received_csr_subjects().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_as_failed() {
        let mock = Arc::new(MockSensor::new());
        mock.set_pairing_unreachable(true);
        let handshake = PairingHandshake::new(mock, "laptop");

        let result = handshake
            .run(&sensor(), &code(MockSensor::PAIRING_CODE), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PairingError::Failed(_))));
        assert_eq!(handshake.stage(), PairingStage::Idle);
    }

    #[tokio::test]
    async fn test_mismatched_sensor_identity_fails() {
        let mock = Arc::new(MockSensor::new());
        let handshake = PairingHandshake::new(mock, "laptop");
        let mut impostor = sensor();
        impostor.sensor_id = Some("someone-else".to_string());

        let result = handshake
            .run(&impostor, &code(MockSensor::PAIRING_CODE), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PairingError::Failed(_))));
    }

    #[tokio::test]
    async fn test_cancelled_handshake_returns_to_idle() {
        let mock = Arc::new(MockSensor::new());
        let handshake = PairingHandshake::new(mock, "laptop");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = handshake
            .run(&sensor(), &code(MockSensor::PAIRING_CODE), &cancel)
            .await;

        assert!(matches!(result, Err(PairingError::Cancelled)));
        assert_eq!(handshake.stage(), PairingStage::Idle);
    }

    #[tokio::test]
    async fn test_identity_is_saved_only_after_success() {
        // Arrange
        let mock = Arc::new(MockSensor::new());
        let handshake = PairingHandshake::new(mock, "laptop");
        let mut store = MockCredentialStore::new();
        store.expect_save().times(1).returning(|_| Ok(()));

        // Act
        let first = pair_and_store(
            &handshake,
            &store,
            &sensor(),
            &code("999999"),
            &CancellationToken::new(),
        )
        .await;
        let second = pair_and_store(
            &handshake,
            &store,
            &sensor(),
            &code(MockSensor::PAIRING_CODE),
            &CancellationToken::new(),
        )
        .await;

        // Assert – `times(1)` fails on drop if the rejected attempt saved
        assert!(matches!(first, Err(PairingError::CodeRejected)));
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let mock = Arc::new(MockSensor::new());
        let handshake = PairingHandshake::new(mock, "laptop");
        let mut store = MockCredentialStore::new();
        store
            .expect_save()
            .returning(|_| Err(StoreError::Encode("disk full".to_string())));

        let result = pair_and_store(
            &handshake,
            &store,
            &sensor(),
            &code(MockSensor::PAIRING_CODE),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(PairingError::Store(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handshake_returns_to_idle() {
        // Arrange
        let handshake = PairingHandshake::new(Arc::new(SilentSensor), "laptop");
        let mut stages = handshake.subscribe();

        // Act – the caller gives up and drops the in-flight future
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            handshake.run(&sensor(), &code(MockSensor::PAIRING_CODE), &CancellationToken::new()),
        )
        .await;

        // Assert
        assert!(outcome.is_err());
        assert_eq!(handshake.stage(), PairingStage::Idle);
        assert!(stages.has_changed().unwrap());
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let retry = handshake
            .run(&sensor(), &code(MockSensor::PAIRING_CODE), &cancelled)
            .await;
        assert!(matches!(retry, Err(PairingError::Cancelled)));
    }
}
