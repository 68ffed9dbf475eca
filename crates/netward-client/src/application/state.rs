//! The shared, observable application state.
//!
//! # How state flows (for beginners)
//!
//! Several background tasks produce state: the session (connection state,
//! bulk sync), the event coalescer (stream updates), the learning poll.  Any
//! number of readers (CLI output, a UI) want to see it.  Instead of handing
//! out `Arc<Mutex<..>>` and letting everyone lock and poke fields, every
//! mutation goes through [`StateStore`]:
//!
//! - Writes are serialized inside a `tokio::sync::watch` channel, and each
//!   write is one atomic step: a reader sees the state before or after, never
//!   half of it.
//! - Readers call [`StateStore::subscribe`] and await `changed()`.
//! - Connection-state transitions are additionally published on a
//!   `broadcast` channel, so a reader can observe every hop even when several
//!   happen faster than it polls.

use std::sync::Arc;

use netward_core::{Alert, ConnectionState, Decoy, Device, LearningStatus, SystemStatus};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Capacity of the transition feed; slow readers lose the oldest hops.
const TRANSITION_FEED_CAPACITY: usize = 64;

/// Everything the application shows about the paired sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub connection: ConnectionState,
    /// Human-readable description of the most recent failure.
    pub last_error: Option<String>,
    pub devices: Vec<Device>,
    /// Newest first.
    pub alerts: Vec<Alert>,
    pub decoys: Vec<Decoy>,
    pub status: Option<SystemStatus>,
    pub learning: Option<LearningStatus>,
    /// Incremented on every committed change.
    pub revision: u64,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            last_error: None,
            devices: Vec::new(),
            alerts: Vec::new(),
            decoys: Vec::new(),
            status: None,
            learning: None,
            revision: 0,
        }
    }
}

impl AppState {
    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Inserts or replaces a device by id, keeping its position.
    pub fn upsert_device(&mut self, device: Device) {
        match self.devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = device,
            None => self.devices.push(device),
        }
    }

    pub fn upsert_decoy(&mut self, decoy: Decoy) {
        match self.decoys.iter_mut().find(|d| d.id == decoy.id) {
            Some(existing) => *existing = decoy,
            None => self.decoys.push(decoy),
        }
    }

    /// Puts `alert` at the front.  An alert whose id is already present is
    /// replaced where it stands, so replays never duplicate it.
    pub fn prepend_alert(&mut self, alert: Alert) {
        match self.alerts.iter_mut().find(|a| a.id == alert.id) {
            Some(existing) => *existing = alert,
            None => self.alerts.insert(0, alert),
        }
    }

    /// Sets the `online` flag of a known device.  Unknown ids are ignored.
    pub fn set_presence(&mut self, id: &str, online: bool) -> bool {
        match self.devices.iter_mut().find(|d| d.id == id) {
            Some(device) => {
                device.online = online;
                true
            }
            None => false,
        }
    }
}

/// The result of a bulk sync, applied in one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub devices: Vec<Device>,
    pub alerts: Vec<Alert>,
    pub decoys: Vec<Decoy>,
    pub status: Option<SystemStatus>,
    pub learning: Option<LearningStatus>,
}

/// One hop of the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub at: Instant,
}

/// Cloneable handle to the single application state container.
#[derive(Clone)]
pub struct StateStore {
    state: Arc<watch::Sender<AppState>>,
    transitions: broadcast::Sender<ConnectionTransition>,
}

impl StateStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AppState::default());
        let (transitions, _) = broadcast::channel(TRANSITION_FEED_CAPACITY);
        Self {
            state: Arc::new(state),
            transitions,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.state.subscribe()
    }

    pub fn transitions(&self) -> broadcast::Receiver<ConnectionTransition> {
        self.transitions.subscribe()
    }

    /// A clone of the current state.
    pub fn snapshot(&self) -> AppState {
        self.state.borrow().clone()
    }

    pub fn connection(&self) -> ConnectionState {
        self.state.borrow().connection
    }

    /// Applies `f` as one atomic change and bumps the revision.
    ///
    /// Not for connection-state changes; those go through `transition`.
    pub fn update<F: FnOnce(&mut AppState)>(&self, f: F) {
        self.state.send_modify(|state| {
            f(state);
            state.revision += 1;
        });
    }

    /// Moves the connection state along a legal edge.
    ///
    /// Returns `false` (and changes nothing) for a same-state hop or an edge
    /// the state machine does not allow.
    pub(crate) fn transition(&self, to: ConnectionState) -> bool {
        let mut hop = None;
        self.state.send_if_modified(|state| {
            let from = state.connection;
            if from == to {
                return false;
            }
            if !from.can_transition_to(to) {
                warn!(%from, %to, "rejected illegal connection transition");
                return false;
            }
            state.connection = to;
            state.revision += 1;
            hop = Some(ConnectionTransition {
                from,
                to,
                at: Instant::now(),
            });
            true
        });

        match hop {
            Some(transition) => {
                debug!(from = %transition.from, to = %transition.to, "connection state changed");
                // No subscribers is fine.
                let _ = self.transitions.send(transition);
                true
            }
            None => false,
        }
    }

    /// Leaves `authFailed` after the user has re-paired.
    pub(crate) fn clear_auth_failure(&self) {
        let mut hop = None;
        self.state.send_if_modified(|state| {
            if state.connection != ConnectionState::AuthFailed {
                return false;
            }
            state.connection = ConnectionState::Disconnected;
            state.last_error = None;
            state.revision += 1;
            hop = Some(ConnectionTransition {
                from: ConnectionState::AuthFailed,
                to: ConnectionState::Disconnected,
                at: Instant::now(),
            });
            true
        });
        if let Some(transition) = hop {
            let _ = self.transitions.send(transition);
        }
    }

    pub fn set_last_error(&self, error: Option<String>) {
        self.update(|state| state.last_error = error);
    }

    /// Replaces sensor-sourced collections with a fresh sync.
    ///
    /// Client-generated alerts (negative ids) survive the replacement and stay
    /// in front.
    pub fn apply_snapshot(&self, snapshot: Snapshot) {
        self.update(|state| {
            let mut alerts: Vec<Alert> = state
                .alerts
                .drain(..)
                .filter(Alert::is_synthetic)
                .collect();
            alerts.extend(snapshot.alerts);

            state.devices = snapshot.devices;
            state.alerts = alerts;
            state.decoys = snapshot.decoys;
            state.status = snapshot.status;
            state.learning = snapshot.learning;
        });
    }

    pub fn push_alert(&self, alert: Alert) {
        self.update(|state| state.prepend_alert(alert));
    }

    pub fn set_learning(&self, learning: LearningStatus) {
        self.update(|state| state.learning = Some(learning));
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use netward_core::Severity;

    fn device(id: &str, online: bool) -> Device {
        Device {
            id: id.to_string(),
            name: None,
            mac: None,
            ip: None,
            vendor: None,
            online,
            last_seen: None,
        }
    }

    fn alert(id: i64) -> Alert {
        Alert {
            id,
            severity: Severity::Low,
            title: format!("alert {id}"),
            message: String::new(),
            device_id: None,
            created_at: Utc::now(),
            acknowledged: false,
        }
    }

    #[test]
    fn test_new_store_starts_disconnected() {
        let store = StateStore::new();
        assert_eq!(store.connection(), ConnectionState::Disconnected);
        assert_eq!(store.snapshot().revision, 0);
    }

    #[tokio::test]
    async fn test_legal_transition_is_published() {
        // Arrange
        let store = StateStore::new();
        let mut feed = store.transitions();

        // Act
        let moved = store.transition(ConnectionState::Connecting);

        // Assert
        assert!(moved);
        let hop = feed.recv().await.unwrap();
        assert_eq!(hop.from, ConnectionState::Disconnected);
        assert_eq!(hop.to, ConnectionState::Connecting);
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let store = StateStore::new();
        assert!(!store.transition(ConnectionState::Live));
        assert_eq!(store.connection(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_same_state_transition_is_a_no_op() {
        let store = StateStore::new();
        let before = store.snapshot().revision;
        assert!(!store.transition(ConnectionState::Disconnected));
        assert_eq!(store.snapshot().revision, before);
    }

    #[test]
    fn test_auth_failed_is_sticky_until_cleared() {
        // Arrange
        let store = StateStore::new();
        store.transition(ConnectionState::Connecting);
        store.transition(ConnectionState::Connected);
        store.transition(ConnectionState::AuthFailed);

        // Act / Assert
        assert!(!store.transition(ConnectionState::Disconnected));
        assert!(!store.transition(ConnectionState::Connecting));
        store.clear_auth_failure();
        assert_eq!(store.connection(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_update_bumps_revision() {
        let store = StateStore::new();
        store.set_last_error(Some("boom".to_string()));
        let state = store.snapshot();
        assert_eq!(state.revision, 1);
        assert_eq!(state.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_snapshot_keeps_synthetic_alerts_in_front() {
        // Arrange
        let store = StateStore::new();
        store.push_alert(alert(-1));
        store.push_alert(alert(3));

        // Act
        store.apply_snapshot(Snapshot {
            devices: vec![device("a", true)],
            alerts: vec![alert(9), alert(8)],
            ..Snapshot::default()
        });

        // Assert
        let ids: Vec<i64> = store.snapshot().alerts.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![-1, 9, 8]);
        assert_eq!(store.snapshot().devices.len(), 1);
    }

    #[test]
    fn test_prepend_alert_replaces_existing_id() {
        let mut state = AppState::default();
        state.prepend_alert(alert(1));
        state.prepend_alert(alert(2));
        state.prepend_alert(alert(1));
        let ids: Vec<i64> = state.alerts.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_upsert_device_keeps_position() {
        let mut state = AppState::default();
        state.upsert_device(device("a", false));
        state.upsert_device(device("b", false));
        state.upsert_device(device("a", true));
        assert_eq!(state.devices[0].id, "a");
        assert!(state.devices[0].online);
        assert_eq!(state.devices.len(), 2);
    }

    #[test]
    fn test_presence_for_unknown_device_is_ignored() {
        let mut state = AppState::default();
        assert!(!state.set_presence("ghost", true));
    }
}
