//! Session supervision: connect, sync, stream, reconnect.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//! connect(identity)
//!   └─ attempt task
//!        ├─ GET health                      connecting → connected
//!        ├─ bulk sync (status, pages, ...)  apply snapshot, → syncing
//!        ├─ open stream, auth, replay       → live
//!        │    ├─ cancel the disconnect-alert timer, reset retry counter
//!        │    ├─ replay queued actions (best effort)
//!        │    └─ start learning poll if learning is running
//!        └─ receive loop → coalescer
//!
//! any failure ──▶ disconnected, reconnect in 30 s, 5-minute alert timer
//! 403 in sync ──▶ authFailed, everything stops
//! disconnect() ──▶ every task cancelled, disconnected
//! ```
//!
//! # Cancellation rule
//!
//! All background work runs in [`TaskSlot`]s whose tokens descend from one
//! session token.  A task only changes shared state inside
//! [`Shared::commit`], which takes the control lock and re-checks the task's
//! token first.  `disconnect()` cancels the tokens under that same lock, so
//! once it returns no earlier task can write anything.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use netward_core::domain::sequence::next_synthetic_alert_id;
use netward_core::protocol::SensorAction;
use netward_core::{
    Alert, ClientFrame, ConnectionState, Decoy, Device, Endpoint, LearningStatus, Page,
    PairedIdentity, SensorEvent, StreamFrame, SystemStatus,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::application::action_queue::{ActionQueue, DEFAULT_CAPACITY};
use crate::application::coalescer::{EventCoalescer, DEFAULT_FLUSH_DELAY};
use crate::application::state::{Snapshot, StateStore};
use crate::application::timers::TaskSlot;
use crate::application::transport::{EventStream, SensorTransport, TransportError};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Timings and sizes used by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Delay before the single reconnect attempt after a failure.
    pub reconnect_delay: Duration,
    /// How long the sensor may stay unreachable before an alert is raised.
    pub disconnect_alert_after: Duration,
    /// Interval of the learning-status poll while learning is active.
    pub learning_poll_interval: Duration,
    /// Items requested per page during bulk sync.
    pub page_size: u32,
    /// Delay between the first buffered stream event and its flush.
    pub flush_delay: Duration,
    /// Capacity of the offline action queue.
    pub queue_capacity: usize,
    /// Upper bound on waiting for the stream's `auth.ok`.
    pub stream_auth_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(30),
            disconnect_alert_after: Duration::from_secs(300),
            learning_poll_interval: Duration::from_secs(30),
            page_size: 100,
            flush_delay: DEFAULT_FLUSH_DELAY,
            queue_capacity: DEFAULT_CAPACITY,
            stream_auth_timeout: Duration::from_secs(10),
        }
    }
}

// ── Errors and outcomes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// `connect` was called while a session is already running.
    #[error("a session is already active; disconnect first")]
    AlreadyActive,

    /// The sensor rejected these credentials; only re-pairing helps.
    #[error("the sensor rejected the stored credentials; pair again")]
    ReauthRequired,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What happened to a submitted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Sent to the sensor and acknowledged.
    Sent,
    /// Parked until the session is live again.
    Queued { dropped_oldest: bool },
}

// ── Internals ─────────────────────────────────────────────────────────────────

struct Control {
    /// `Some` from `connect` until `disconnect` or an auth failure.
    identity: Option<Arc<PairedIdentity>>,
    /// Certificate the sensor refused; reconnecting with it is pointless.
    rejected_certificate: Option<String>,
    session: CancellationToken,
    connection: TaskSlot,
    reconnect: TaskSlot,
    learning_poll: TaskSlot,
    disconnect_alert: TaskSlot,
    /// The outage alert already fired; no new timer until `live` again.
    alert_raised: bool,
    reconnect_attempts: u32,
    /// Highest stream sequence number applied.
    last_seq: u64,
}

struct Shared {
    transport: Arc<dyn SensorTransport>,
    store: StateStore,
    queue: ActionQueue<SensorAction>,
    coalescer: EventCoalescer,
    config: SessionConfig,
    control: Mutex<Control>,
}

/// Owns one sensor session.  Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn SensorTransport>,
        store: StateStore,
        config: SessionConfig,
    ) -> Self {
        let coalescer = EventCoalescer::new(store.clone(), config.flush_delay);
        let queue = ActionQueue::new(config.queue_capacity);
        Self {
            shared: Arc::new(Shared {
                transport,
                store,
                queue,
                coalescer,
                config,
                control: Mutex::new(Control {
                    identity: None,
                    rejected_certificate: None,
                    session: CancellationToken::new(),
                    connection: TaskSlot::new(),
                    reconnect: TaskSlot::new(),
                    learning_poll: TaskSlot::new(),
                    disconnect_alert: TaskSlot::new(),
                    alert_raised: false,
                    reconnect_attempts: 0,
                    last_seq: 0,
                }),
            }),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.shared.store
    }

    pub fn coalescer(&self) -> &EventCoalescer {
        &self.shared.coalescer
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.store.connection()
    }

    pub fn queued_actions(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().reconnect_attempts
    }

    pub fn last_seq(&self) -> u64 {
        self.shared.lock().last_seq
    }

    /// Starts a session with `identity`.  Returns once the first attempt is
    /// under way (state `connecting`).
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyActive`] if a session is running; call
    ///   [`disconnect`](Self::disconnect) first.
    /// - [`SessionError::ReauthRequired`] if the sensor already rejected this
    ///   very certificate.
    pub fn connect(&self, identity: Arc<PairedIdentity>) -> Result<(), SessionError> {
        let shared = &self.shared;
        let mut control = shared.lock();
        if control.identity.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        if shared.store.connection() == ConnectionState::AuthFailed {
            if control.rejected_certificate.as_deref() == Some(identity.certificate_pem.as_str()) {
                return Err(SessionError::ReauthRequired);
            }
            shared.store.clear_auth_failure();
            control.rejected_certificate = None;
        }

        info!(sensor = %identity.sensor_name, address = %identity.sensor_address, "starting session");
        control.session = CancellationToken::new();
        control.identity = Some(Arc::clone(&identity));
        shared.start_attempt(&mut control, identity);
        Ok(())
    }

    /// Stops the session: cancels the attempt, the receive loop, the reconnect
    /// timer, the learning poll and the disconnect-alert timer, clears the
    /// last error, resets the retry counter and moves to `disconnected`.
    /// Events already received are flushed into the state first.
    ///
    /// `authFailed` is left in place; it only clears on a new identity.
    pub fn disconnect(&self) {
        let shared = &self.shared;
        let mut control = shared.lock();
        control.session.cancel();
        control.connection.cancel();
        control.reconnect.cancel();
        control.learning_poll.cancel();
        control.disconnect_alert.cancel();
        control.identity = None;
        control.reconnect_attempts = 0;
        control.alert_raised = false;
        shared.coalescer.flush_now();

        shared.store.set_last_error(None);
        if shared.store.connection() != ConnectionState::AuthFailed {
            shared.store.transition(ConnectionState::Disconnected);
        }
        info!("session disconnected");
    }

    /// Sends `action` now if the session is live, otherwise queues it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::ReauthRequired`] after an auth failure.
    /// - [`SessionError::Transport`] if a live send fails.
    pub async fn submit_action(&self, action: SensorAction) -> Result<ActionOutcome, SessionError> {
        let shared = &self.shared;
        let identity = {
            let control = shared.lock();
            let state = shared.store.connection();
            if state == ConnectionState::AuthFailed {
                return Err(SessionError::ReauthRequired);
            }
            match (&control.identity, state) {
                (Some(identity), ConnectionState::Live) => Arc::clone(identity),
                _ => {
                    let dropped = shared.queue.enqueue(action);
                    debug!(queued = shared.queue.len(), "action queued until live");
                    return Ok(ActionOutcome::Queued {
                        dropped_oldest: dropped.is_some(),
                    });
                }
            }
        };

        shared
            .transport
            .request(&identity, &Endpoint::from(action))
            .await?;
        Ok(ActionOutcome::Sent)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` under the control lock unless `token` was cancelled.
    fn commit<R>(
        &self,
        token: &CancellationToken,
        f: impl FnOnce(&mut Control, &StateStore) -> R,
    ) -> Option<R> {
        let mut control = self.lock();
        if token.is_cancelled() {
            trace!("dropping commit from cancelled task");
            return None;
        }
        Some(f(&mut control, &self.store))
    }

    fn start_attempt(self: &Arc<Self>, control: &mut Control, identity: Arc<PairedIdentity>) {
        self.store.transition(ConnectionState::Connecting);
        let shared = Arc::clone(self);
        control
            .connection
            .start(&control.session, move |token| async move {
                shared.run_attempt(identity, token).await;
            });
    }

    async fn run_attempt(self: Arc<Self>, identity: Arc<PairedIdentity>, token: CancellationToken) {
        // ── Health ───────────────────────────────────────────────────────────
        match cancellable(&token, self.transport.request(&identity, &Endpoint::Health)).await {
            None => return,
            Some(Err(e)) => {
                self.fail_and_retry(&token, format!("health check failed: {e}"));
                return;
            }
            Some(Ok(_)) => {}
        }
        if self
            .commit(&token, |_, store| store.transition(ConnectionState::Connected))
            .is_none()
        {
            return;
        }

        // ── Bulk sync ────────────────────────────────────────────────────────
        let snapshot = match cancellable(&token, self.bulk_sync(&identity)).await {
            None => return,
            Some(Err(e)) if e.is_credentials_rejected() => {
                self.auth_failed(&token);
                return;
            }
            Some(Err(e)) => {
                self.fail_and_retry(&token, format!("sync failed: {e}"));
                return;
            }
            Some(Ok(snapshot)) => snapshot,
        };
        let since = self.commit(&token, |control, store| {
            if let Some(seq) = snapshot.status.as_ref().and_then(|s| s.last_event_seq) {
                control.last_seq = control.last_seq.max(seq);
            }
            info!(
                devices = snapshot.devices.len(),
                alerts = snapshot.alerts.len(),
                decoys = snapshot.decoys.len(),
                "bulk sync complete"
            );
            store.apply_snapshot(snapshot);
            store.transition(ConnectionState::Syncing);
            control.last_seq
        });
        let Some(since) = since else { return };

        // ── Stream setup ─────────────────────────────────────────────────────
        let stream = match cancellable(&token, self.open_authenticated_stream(&identity, since)).await {
            None => return,
            // An auth.error on the stream is a setup failure, not a 403 in sync.
            Some(Err(e)) => {
                self.fail_and_retry(&token, format!("stream setup failed: {e}"));
                return;
            }
            Some(Ok(stream)) => stream,
        };

        // ── Live ─────────────────────────────────────────────────────────────
        let queued = self.commit(&token, |control, store| {
            store.transition(ConnectionState::Live);
            store.set_last_error(None);
            control.disconnect_alert.cancel();
            control.alert_raised = false;
            control.reconnect_attempts = 0;
            let learning_active = store
                .snapshot()
                .learning
                .as_ref()
                .is_some_and(LearningStatus::is_active);
            if learning_active {
                self.start_learning_poll(control, Arc::clone(&identity));
            }
            info!(sensor = %identity.sensor_name, since_seq = since, "session live");
            self.queue.dequeue_all()
        });
        let Some(queued) = queued else { return };

        if !self.replay_actions(&identity, queued, &token).await {
            return;
        }
        self.receive_loop(stream, &token).await;
    }

    /// Fetches everything the client mirrors.
    async fn bulk_sync(&self, identity: &PairedIdentity) -> Result<Snapshot, TransportError> {
        let status = self
            .fetch_optional::<SystemStatus>(identity, Endpoint::Status)
            .await?;
        let devices = self
            .fetch_paged::<Device>(identity, |limit, offset| Endpoint::Devices { limit, offset })
            .await?;
        let alerts = self
            .fetch_paged::<Alert>(identity, |limit, offset| Endpoint::Alerts { limit, offset })
            .await?;
        let decoys = self
            .fetch_optional::<Vec<Decoy>>(identity, Endpoint::Decoys)
            .await?
            .unwrap_or_default();
        let learning = self
            .fetch_optional::<LearningStatus>(identity, Endpoint::Learning)
            .await?;
        Ok(Snapshot {
            devices,
            alerts,
            decoys,
            status,
            learning,
        })
    }

    /// Requests `endpoint` and decodes it; an undecodable body is logged and
    /// read as `None`.
    async fn fetch_optional<T: DeserializeOwned>(
        &self,
        identity: &PairedIdentity,
        endpoint: Endpoint,
    ) -> Result<Option<T>, TransportError> {
        let value = self.transport.request(identity, &endpoint).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                warn!(path = %endpoint.path(), error = %e, "ignoring undecodable response");
                Ok(None)
            }
        }
    }

    /// Walks a paginated collection from offset 0 until the accumulated
    /// offset reaches the reported total.
    ///
    /// A page that fails to decode is skipped and the offset still advances by
    /// one page; if no total is known yet the walk stops there.
    async fn fetch_paged<T: DeserializeOwned>(
        &self,
        identity: &PairedIdentity,
        endpoint: impl Fn(u32, u64) -> Endpoint,
    ) -> Result<Vec<T>, TransportError> {
        let limit = self.config.page_size.max(1);
        let mut items = Vec::new();
        let mut offset: u64 = 0;
        let mut total: Option<u64> = None;

        loop {
            let request = endpoint(limit, offset);
            let value = self.transport.request(identity, &request).await?;
            match serde_json::from_value::<Page<T>>(value) {
                Ok(page) => {
                    total = Some(page.total);
                    let received = page.items.len() as u64;
                    items.extend(page.items);
                    offset += received;
                    if received == 0 || offset >= page.total {
                        break;
                    }
                }
                Err(e) => {
                    warn!(path = %request.path(), error = %e, "skipping undecodable page");
                    offset += u64::from(limit);
                    match total {
                        Some(total) if offset < total => continue,
                        _ => break,
                    }
                }
            }
        }
        Ok(items)
    }

    async fn open_authenticated_stream(
        &self,
        identity: &PairedIdentity,
        since_seq: u64,
    ) -> Result<Box<dyn EventStream>, TransportError> {
        let fingerprint = identity
            .certificate_fingerprint()
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        let mut stream = self.transport.open_stream(identity).await?;
        stream.send(&ClientFrame::Auth { fingerprint }).await?;

        let authenticated = tokio::time::timeout(self.config.stream_auth_timeout, async {
            loop {
                match stream.next_frame().await {
                    None => return Err(TransportError::Closed),
                    Some(Err(TransportError::Decode(reason))) => {
                        warn!(%reason, "malformed frame while authenticating stream");
                    }
                    Some(Err(e)) => return Err(e),
                    Some(Ok(frame)) if frame.is_auth_ok() => return Ok(()),
                    Some(Ok(frame)) if frame.is_auth_error() => {
                        return Err(TransportError::CredentialsRejected)
                    }
                    Some(Ok(frame)) => {
                        debug!(kind = %frame.kind, "ignoring frame before stream auth");
                    }
                }
            }
        })
        .await;
        match authenticated {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout),
        }

        stream.send(&ClientFrame::Replay { since_seq }).await?;
        Ok(stream)
    }

    /// Sends each queued action once.  Failures are logged and dropped.
    ///
    /// Returns `false` if the session was cancelled part-way.
    async fn replay_actions(
        &self,
        identity: &PairedIdentity,
        actions: Vec<SensorAction>,
        token: &CancellationToken,
    ) -> bool {
        if !actions.is_empty() {
            info!(count = actions.len(), "replaying queued actions");
        }
        for action in actions {
            let endpoint = Endpoint::from(action);
            match cancellable(token, self.transport.request(identity, &endpoint)).await {
                None => return false,
                Some(Ok(_)) => debug!(path = %endpoint.path(), "queued action delivered"),
                Some(Err(e)) => warn!(path = %endpoint.path(), error = %e, "queued action failed; dropped"),
            }
        }
        true
    }

    async fn receive_loop(self: &Arc<Self>, mut stream: Box<dyn EventStream>, token: &CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                next = stream.next_frame() => next,
            };
            match next {
                None => {
                    self.fail_and_retry(token, "live stream ended".to_string());
                    return;
                }
                Some(Err(TransportError::Decode(reason))) => {
                    warn!(%reason, "dropping malformed stream frame");
                }
                Some(Err(e)) => {
                    self.fail_and_retry(token, format!("live stream failed: {e}"));
                    return;
                }
                Some(Ok(frame)) => {
                    if !self.handle_frame(token, frame) {
                        return;
                    }
                }
            }
        }
    }

    /// Deduplicates by sequence number and hands the event to the coalescer.
    ///
    /// Returns `false` if the task was cancelled.
    fn handle_frame(&self, token: &CancellationToken, frame: StreamFrame) -> bool {
        if frame.is_auth_ok() || frame.is_auth_error() {
            return true;
        }
        let event = match SensorEvent::from_frame(&frame) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(seq = frame.seq, error = %e, "dropping undecodable event");
                None
            }
        };
        self.commit(token, |control, _| {
            if frame.seq != 0 {
                if frame.seq <= control.last_seq {
                    trace!(seq = frame.seq, "duplicate event from replay ignored");
                    return;
                }
                control.last_seq = frame.seq;
            }
            if let Some(event) = event {
                self.coalescer.push(event);
            }
        })
        .is_some()
    }

    /// Records the failure, drops to `disconnected`, schedules the reconnect
    /// and, once per outage, the disconnect-alert timer.
    fn fail_and_retry(self: &Arc<Self>, token: &CancellationToken, reason: String) {
        let _ = self.commit(token, |control, store| {
            warn!(%reason, "session failed");
            self.coalescer.flush_now();
            control.learning_poll.cancel();
            store.set_last_error(Some(reason));
            store.transition(ConnectionState::Disconnected);
            self.schedule_reconnect(control);
            if !control.alert_raised && !control.disconnect_alert.is_active() {
                self.start_disconnect_alert(control);
            }
        });
    }

    fn schedule_reconnect(self: &Arc<Self>, control: &mut Control) {
        control.reconnect_attempts += 1;
        let delay = self.config.reconnect_delay;
        info!(
            attempt = control.reconnect_attempts,
            delay_secs = delay.as_secs(),
            "reconnect scheduled"
        );
        let shared = Arc::clone(self);
        control
            .reconnect
            .start(&control.session, move |token| async move {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                shared.reconnect_fired(&token);
            });
    }

    fn reconnect_fired(self: &Arc<Self>, token: &CancellationToken) {
        let _ = self.commit(token, |control, _| {
            control.reconnect.release();
            if let Some(identity) = control.identity.clone() {
                debug!("reconnect timer fired");
                self.start_attempt(control, identity);
            }
        });
    }

    fn start_disconnect_alert(self: &Arc<Self>, control: &mut Control) {
        let after = self.config.disconnect_alert_after;
        let shared = Arc::clone(self);
        control
            .disconnect_alert
            .start(&control.session, move |token| async move {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(after) => {}
                }
                shared.raise_disconnect_alert(&token);
            });
    }

    fn raise_disconnect_alert(&self, token: &CancellationToken) {
        let minutes = self.config.disconnect_alert_after.as_secs() / 60;
        let _ = self.commit(token, |control, store| {
            control.disconnect_alert.release();
            if store.connection() == ConnectionState::Live {
                return;
            }
            control.alert_raised = true;
            let alert = Alert::sensor_unreachable(next_synthetic_alert_id(), minutes, Utc::now());
            warn!(alert_id = alert.id, minutes, "sensor unreachable; raising alert");
            store.push_alert(alert);
        });
    }

    fn start_learning_poll(self: &Arc<Self>, control: &mut Control, identity: Arc<PairedIdentity>) {
        let period = self.config.learning_poll_interval;
        let shared = Arc::clone(self);
        control
            .learning_poll
            .start(&control.session, move |token| async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(period) => {}
                    }
                    let response = match cancellable(
                        &token,
                        shared.transport.request(&identity, &Endpoint::Learning),
                    )
                    .await
                    {
                        None => return,
                        Some(response) => response,
                    };
                    let status = match response
                        .map_err(|e| e.to_string())
                        .and_then(|v| serde_json::from_value::<LearningStatus>(v).map_err(|e| e.to_string()))
                    {
                        Ok(status) => status,
                        Err(reason) => {
                            debug!(%reason, "learning poll failed");
                            continue;
                        }
                    };
                    let keep_polling = shared.commit(&token, |control, store| {
                        let active = status.is_active();
                        store.set_learning(status);
                        let keep = active && store.connection() == ConnectionState::Live;
                        if !keep {
                            info!("learning poll stopped");
                            control.learning_poll.release();
                        }
                        keep
                    });
                    if keep_polling != Some(true) {
                        return;
                    }
                }
            });
    }

    fn auth_failed(&self, token: &CancellationToken) {
        let _ = self.commit(token, |control, store| {
            error!("sensor rejected the client credentials; re-pairing required");
            store.set_last_error(Some(TransportError::CredentialsRejected.to_string()));
            store.transition(ConnectionState::AuthFailed);
            control.rejected_certificate = control
                .identity
                .take()
                .map(|identity| identity.certificate_pem.clone());
            control.reconnect.cancel();
            control.learning_poll.cancel();
            control.disconnect_alert.cancel();
            control.alert_raised = false;
            control.reconnect_attempts = 0;
            self.queue.clear();
            self.coalescer.discard();
            control.session.cancel();
        });
    }
}

/// Awaits `fut` unless `token` is cancelled first.
async fn cancellable<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = fut => Some(output),
    }
}
