//! In-memory sensor for tests.
//!
//! [`MockSensor`] implements both [`SensorTransport`] and
//! [`PairingTransport`] without any sockets.  Tests script its behaviour
//! (fail the next health checks, answer 403 during sync, reject stream auth)
//! and push live events into the open stream.  All answers are immediate, so
//! under `#[tokio::test(start_paused = true)]` only the session's own timers
//! advance the clock.
//!
//! The pairing side is a real peer: it verifies the client's tag, derives the
//! same shared key and opens the sealed certificate request.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use netward_core::codec::{hex, pem};
use netward_core::crypto::{
    compute_sensor_tag, derive_shared_key, generate_client_nonce, open, verify_auth_tag,
};
use netward_core::domain::identity::CERTIFICATE_PEM_LABEL;
use netward_core::protocol::frames::{AUTH_ERROR, AUTH_OK};
use netward_core::protocol::SensorAction;
use netward_core::{
    Alert, ClientFrame, Decoy, Device, DiscoveredSensor, Endpoint, LearningStatus,
    PairedIdentity, StreamFrame, SystemStatus,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::application::transport::{
    EventStream, PairingTransport, SensorTransport, TransportError,
};

type FrameResult = Result<StreamFrame, TransportError>;

#[derive(Default)]
struct State {
    // Scripted behaviour
    health_failures_remaining: u32,
    forbid_sync: bool,
    reject_stream_auth: bool,
    fail_stream_open: bool,
    fail_actions: bool,
    corrupt_device_offsets: Vec<u64>,
    pairing_unreachable: bool,
    forge_sensor_tag: bool,

    // Fixture data
    devices: Vec<Device>,
    alerts: Vec<Alert>,
    decoys: Vec<Decoy>,
    learning: Option<LearningStatus>,
    event_log: Vec<StreamFrame>,

    // Observations
    requests: Vec<String>,
    sent_frames: Vec<ClientFrame>,
    stream_opens: u32,
    actions: Vec<SensorAction>,
    csr_subjects: Vec<String>,

    live: Option<mpsc::UnboundedSender<FrameResult>>,
    challenge: Option<Vec<u8>>,
}

/// A scriptable in-memory sensor.
#[derive(Clone, Default)]
pub struct MockSensor {
    state: Arc<Mutex<State>>,
}

impl MockSensor {
    pub const SENSOR_ID: &'static str = "mock-sensor-0001";
    pub const PAIRING_CODE: &'static str = "246810";

    pub fn new() -> Self {
        Self::default()
    }

    /// An identity as if pairing with this sensor had completed.
    pub fn paired_identity() -> PairedIdentity {
        PairedIdentity {
            sensor_id: Self::SENSOR_ID.to_string(),
            sensor_name: "Mock sensor".to_string(),
            sensor_address: "127.0.0.1:8443".to_string(),
            certificate_pem: pem::encode(CERTIFICATE_PEM_LABEL, b"mock client certificate"),
            private_key_pkcs8: vec![0x30, 0x00],
            ca_certificate_pem: None,
            paired_at: Utc::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Scripting ────────────────────────────────────────────────────────────

    /// Makes the next `count` health checks fail with a network error.
    pub fn fail_health(&self, count: u32) {
        self.lock().health_failures_remaining = count;
    }

    /// Answers every sync request with 403.
    pub fn set_forbid_sync(&self, forbid: bool) {
        self.lock().forbid_sync = forbid;
    }

    /// Answers the stream's auth frame with `auth.error`.
    pub fn set_reject_stream_auth(&self, reject: bool) {
        self.lock().reject_stream_auth = reject;
    }

    /// Refuses to open the event stream, as if the connection were reset.
    pub fn set_fail_stream_open(&self, fail: bool) {
        self.lock().fail_stream_open = fail;
    }

    /// Answers every action with HTTP 500.
    pub fn set_fail_actions(&self, fail: bool) {
        self.lock().fail_actions = fail;
    }

    /// Serves an undecodable body for the device page at `offset`.
    pub fn corrupt_device_page(&self, offset: u64) {
        self.lock().corrupt_device_offsets.push(offset);
    }

    pub fn set_pairing_unreachable(&self, unreachable: bool) {
        self.lock().pairing_unreachable = unreachable;
    }

    /// Accepts the code but answers with a wrong counter-tag.
    pub fn set_forge_sensor_tag(&self, forge: bool) {
        self.lock().forge_sensor_tag = forge;
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        self.lock().devices = devices;
    }

    pub fn set_alerts(&self, alerts: Vec<Alert>) {
        self.lock().alerts = alerts;
    }

    pub fn set_decoys(&self, decoys: Vec<Decoy>) {
        self.lock().decoys = decoys;
    }

    pub fn set_learning(&self, learning: LearningStatus) {
        self.lock().learning = Some(learning);
    }

    // ── Live stream ──────────────────────────────────────────────────────────

    /// Records an event and delivers it to the open stream, if any.
    /// Returns its sequence number.
    pub fn push_event(&self, kind: &str, payload: Value) -> u64 {
        let mut state = self.lock();
        let seq = state.event_log.len() as u64 + 1;
        let frame = StreamFrame::event(seq, kind, payload);
        state.event_log.push(frame.clone());
        if let Some(live) = &state.live {
            let _ = live.send(Ok(frame));
        }
        seq
    }

    /// Re-delivers an already logged frame, as a replaying sensor would.
    pub fn resend_event(&self, seq: u64) {
        let state = self.lock();
        let frame = state.event_log.iter().find(|f| f.seq == seq).cloned();
        if let (Some(frame), Some(live)) = (frame, &state.live) {
            let _ = live.send(Ok(frame));
        }
    }

    /// Delivers a frame that is not valid JSON.
    pub fn push_malformed(&self) {
        if let Some(live) = &self.lock().live {
            let _ = live.send(Err(TransportError::Decode("expected value at line 1".to_string())));
        }
    }

    /// Ends the open stream as if the sensor went away.
    pub fn close_stream(&self) {
        self.lock().live = None;
    }

    // ── Observations ─────────────────────────────────────────────────────────

    /// Every request as `"METHOD path"`, oldest first.
    pub fn request_log(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    /// Number of logged requests whose path starts with `prefix`.
    pub fn request_count(&self, prefix: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.split_once(' ').is_some_and(|(_, path)| path.starts_with(prefix)))
            .count()
    }

    pub fn sent_frames(&self) -> Vec<ClientFrame> {
        self.lock().sent_frames.clone()
    }

    pub fn stream_opens(&self) -> u32 {
        self.lock().stream_opens
    }

    /// Actions the sensor accepted, in arrival order.
    pub fn received_actions(&self) -> Vec<SensorAction> {
        self.lock().actions.clone()
    }

    /// Common names of every certificate request the sensor opened.
    pub fn received_csr_subjects(&self) -> Vec<String> {
        self.lock().csr_subjects.clone()
    }

    // ── Request handling ─────────────────────────────────────────────────────

    fn serve(&self, endpoint: &Endpoint) -> Result<Value, TransportError> {
        let mut state = self.lock();
        state
            .requests
            .push(format!("{} {}", endpoint.method(), endpoint.path()));

        let is_sync = matches!(
            endpoint,
            Endpoint::Status
                | Endpoint::Devices { .. }
                | Endpoint::Alerts { .. }
                | Endpoint::Decoys
                | Endpoint::Learning
        );
        if is_sync && state.forbid_sync {
            return Err(TransportError::CredentialsRejected);
        }

        match endpoint {
            Endpoint::Health => {
                if state.health_failures_remaining > 0 {
                    state.health_failures_remaining -= 1;
                    return Err(TransportError::Network("connection refused".to_string()));
                }
                Ok(json!({ "status": "ok" }))
            }
            Endpoint::Status => {
                let status = SystemStatus {
                    sensor_id: Self::SENSOR_ID.to_string(),
                    version: "1.0.0-mock".to_string(),
                    uptime_secs: 60,
                    device_count: state.devices.len() as u64,
                    alert_count: state.alerts.len() as u64,
                    last_event_seq: Some(state.event_log.len() as u64),
                };
                to_value(&status)
            }
            Endpoint::Devices { limit, offset } => {
                if state.corrupt_device_offsets.contains(offset) {
                    return Ok(json!({ "items": "not-a-list", "total": state.devices.len() }));
                }
                page(&state.devices, *limit, *offset)
            }
            Endpoint::Alerts { limit, offset } => page(&state.alerts, *limit, *offset),
            Endpoint::Decoys => to_value(&state.decoys),
            Endpoint::Learning => match &state.learning {
                Some(learning) => to_value(learning),
                None => Ok(json!({ "active": false, "progress": 1.0 })),
            },
            Endpoint::Action(action) => {
                if state.fail_actions {
                    return Err(TransportError::Status(500));
                }
                state.actions.push(action.clone());
                Ok(Value::Null)
            }
            Endpoint::PairingChallenge
            | Endpoint::PairingVerify { .. }
            | Endpoint::PairingSubmit { .. } => Err(TransportError::Status(404)),
        }
    }

    fn serve_pairing(&self, endpoint: &Endpoint) -> Result<Value, TransportError> {
        let mut state = self.lock();
        state
            .requests
            .push(format!("{} {}", endpoint.method(), endpoint.path()));
        if state.pairing_unreachable {
            return Err(TransportError::Network("no route to host".to_string()));
        }

        match endpoint {
            Endpoint::PairingChallenge => {
                let challenge = generate_client_nonce().to_vec();
                let body = json!({ "challenge": hex::encode(&challenge), "sensorId": Self::SENSOR_ID });
                state.challenge = Some(challenge);
                Ok(body)
            }
            Endpoint::PairingVerify { tag } => {
                let challenge = state.challenge.clone().ok_or(TransportError::Status(409))?;
                let tag = hex::decode(tag).map_err(|_| TransportError::Status(400))?;
                if verify_auth_tag(&challenge, Self::PAIRING_CODE, &tag).is_err() {
                    state.challenge = None;
                    return Ok(json!({ "verified": false }));
                }
                let mut sensor_tag = compute_sensor_tag(&challenge, &tag, Self::PAIRING_CODE)
                    .map_err(|_| TransportError::Status(500))?;
                if state.forge_sensor_tag {
                    sensor_tag[0] ^= 0xFF;
                }
                Ok(json!({ "verified": true, "sensorTag": hex::encode(sensor_tag) }))
            }
            Endpoint::PairingSubmit {
                client_nonce,
                sealed_request,
            } => {
                let challenge = state.challenge.take().ok_or(TransportError::Status(409))?;
                let nonce = hex::decode(client_nonce).map_err(|_| TransportError::Status(400))?;
                let sealed = hex::decode(sealed_request).map_err(|_| TransportError::Status(400))?;
                let key = derive_shared_key(Self::PAIRING_CODE, &challenge, &nonce, Self::SENSOR_ID)
                    .map_err(|_| TransportError::Status(500))?;
                let csr = open(&sealed, &key).map_err(|_| TransportError::Status(400))?;
                let subject = common_name(&csr).ok_or(TransportError::Status(400))?;
                let certificate =
                    pem::encode(CERTIFICATE_PEM_LABEL, format!("issued to {subject}").as_bytes());
                state.csr_subjects.push(subject);
                Ok(json!({ "certificate": certificate }))
            }
            _ => Err(TransportError::Status(404)),
        }
    }
}

fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> Result<Value, TransportError> {
    serde_json::to_value(value).map_err(|e| TransportError::Decode(e.to_string()))
}

fn page<T: serde::Serialize>(items: &[T], limit: u32, offset: u64) -> Result<Value, TransportError> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(items.len());
    let end = start.saturating_add(limit as usize).min(items.len());
    Ok(json!({ "items": to_value(&items[start..end])?, "total": items.len() }))
}

/// Finds the UTF8String following the commonName OID in a DER blob.
fn common_name(der: &[u8]) -> Option<String> {
    const CN_OID_THEN_UTF8: [u8; 6] = [0x06, 0x03, 0x55, 0x04, 0x03, 0x0C];
    let at = der
        .windows(CN_OID_THEN_UTF8.len())
        .position(|w| w == CN_OID_THEN_UTF8)?;
    let len_at = at + CN_OID_THEN_UTF8.len();
    let len = usize::from(*der.get(len_at)?);
    let bytes = der.get(len_at + 1..len_at + 1 + len)?;
    String::from_utf8(bytes.to_vec()).ok()
}

#[async_trait]
impl SensorTransport for MockSensor {
    async fn request(
        &self,
        _identity: &PairedIdentity,
        endpoint: &Endpoint,
    ) -> Result<Value, TransportError> {
        self.serve(endpoint)
    }

    async fn open_stream(
        &self,
        _identity: &PairedIdentity,
    ) -> Result<Box<dyn EventStream>, TransportError> {
        let mut state = self.lock();
        if state.fail_stream_open {
            return Err(TransportError::Network("stream refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.live = Some(tx);
        state.stream_opens += 1;
        Ok(Box::new(MockStream {
            sensor: self.clone(),
            rx,
            pending: VecDeque::new(),
        }))
    }
}

#[async_trait]
impl PairingTransport for MockSensor {
    async fn request(
        &self,
        _sensor: &DiscoveredSensor,
        endpoint: &Endpoint,
    ) -> Result<Value, TransportError> {
        self.serve_pairing(endpoint)
    }
}

/// The stream half handed to the session.
struct MockStream {
    sensor: MockSensor,
    rx: mpsc::UnboundedReceiver<FrameResult>,
    /// Control answers and replayed frames, served before live frames.
    pending: VecDeque<StreamFrame>,
}

#[async_trait]
impl EventStream for MockStream {
    async fn send(&mut self, frame: &ClientFrame) -> Result<(), TransportError> {
        let mut state = self.sensor.lock();
        state.sent_frames.push(frame.clone());
        match frame {
            ClientFrame::Auth { .. } => {
                let answer = if state.reject_stream_auth { AUTH_ERROR } else { AUTH_OK };
                self.pending.push_back(StreamFrame::event(0, answer, Value::Null));
            }
            ClientFrame::Replay { since_seq } => {
                let replay = state.event_log.iter().filter(|f| f.seq > *since_seq).cloned();
                self.pending.extend(replay);
            }
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<FrameResult> {
        if let Some(frame) = self.pending.pop_front() {
            return Some(Ok(frame));
        }
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_failures_are_consumed() {
        // Arrange
        let mock = MockSensor::new();
        let identity = MockSensor::paired_identity();
        mock.fail_health(1);

        // Act
        let first = SensorTransport::request(&mock, &identity, &Endpoint::Health).await;
        let second = SensorTransport::request(&mock, &identity, &Endpoint::Health).await;

        // Assert
        assert!(first.is_err());
        assert!(second.is_ok());
        assert_eq!(mock.request_count("health"), 2);
    }

    #[tokio::test]
    async fn test_pages_report_total() {
        let mock = MockSensor::new();
        mock.set_alerts(Vec::new());
        let identity = MockSensor::paired_identity();
        let page = SensorTransport::request(
            &mock,
            &identity,
            &Endpoint::Alerts { limit: 10, offset: 0 },
        )
        .await
        .unwrap();
        assert_eq!(page["total"], 0);
        assert_eq!(page["items"], json!([]));
    }

    #[tokio::test]
    async fn test_stream_answers_auth_then_replays_from_seq() {
        // Arrange
        let mock = MockSensor::new();
        mock.push_event("device.online", json!({ "id": "a" }));
        mock.push_event("device.offline", json!({ "id": "a" }));
        let identity = MockSensor::paired_identity();
        let mut stream = mock.open_stream(&identity).await.unwrap();

        // Act
        stream
            .send(&ClientFrame::Auth { fingerprint: "f".to_string() })
            .await
            .unwrap();
        let ack = stream.next_frame().await.unwrap().unwrap();
        stream.send(&ClientFrame::Replay { since_seq: 1 }).await.unwrap();
        let replayed = stream.next_frame().await.unwrap().unwrap();

        // Assert
        assert!(ack.is_auth_ok());
        assert_eq!(replayed.seq, 2);
    }

    #[tokio::test]
    async fn test_closed_stream_ends() {
        let mock = MockSensor::new();
        let mut stream = mock.open_stream(&MockSensor::paired_identity()).await.unwrap();
        mock.close_stream();
        assert!(stream.next_frame().await.is_none());
    }

    #[test]
    fn test_common_name_is_found_in_request() {
        let der = netward_core::CertificateRequest::info_der("desk", &[0x04; 65]).unwrap();
        assert_eq!(common_name(&der), Some("desk".to_string()));
    }
}
