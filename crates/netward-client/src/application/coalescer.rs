//! Batching of live stream events into atomic state updates.
//!
//! # Why coalesce? (for beginners)
//!
//! A sensor that comes back from a scan can push dozens of events in a few
//! milliseconds.  Applying each one separately would wake every state reader
//! dozens of times and let them observe intermediate states (a device marked
//! online before the upsert that created it).  Instead, events are sorted into
//! buckets and applied together 200 ms after the first one arrives:
//!
//! | Event            | Bucket         | Applied as                 |
//! |------------------|----------------|----------------------------|
//! | device new/upd.  | device upserts | upsert by id               |
//! | device on/offline| presence deltas| after all upserts          |
//! | alert new        | new alerts     | prepend, newest first      |
//! | decoy new/upd.   | decoy upserts  | upsert by id               |
//! | system status    | latest status  | replace                    |

use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use netward_core::{Alert, Decoy, Device, SensorEvent, SystemStatus};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::application::state::{AppState, StateStore};

/// Default delay between the first buffered event and the flush.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(200);

/// Events accumulated since the last flush.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PendingBatch {
    devices: Vec<Device>,
    presence: Vec<(String, bool)>,
    alerts: Vec<Alert>,
    decoys: Vec<Decoy>,
    status: Option<SystemStatus>,
}

impl PendingBatch {
    /// Sorts `event` into its bucket.  Returns `false` for ignored events.
    pub fn absorb(&mut self, event: SensorEvent) -> bool {
        match event {
            SensorEvent::DeviceUpsert(device) => {
                match self.devices.iter_mut().find(|d| d.id == device.id) {
                    Some(existing) => *existing = device,
                    None => self.devices.push(device),
                }
            }
            SensorEvent::DeviceOnline { id } => self.presence.push((id, true)),
            SensorEvent::DeviceOffline { id } => self.presence.push((id, false)),
            SensorEvent::AlertNew(alert) => self.alerts.push(alert),
            SensorEvent::DecoyUpsert(decoy) => {
                match self.decoys.iter_mut().find(|d| d.id == decoy.id) {
                    Some(existing) => *existing = decoy,
                    None => self.decoys.push(decoy),
                }
            }
            SensorEvent::Status(status) => self.status = Some(status),
            SensorEvent::Ignored { .. } => return false,
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
            && self.presence.is_empty()
            && self.alerts.is_empty()
            && self.decoys.is_empty()
            && self.status.is_none()
    }

    /// Applies every bucket to `state`: upserts, then presence deltas, then
    /// alerts (each prepended, so the last to arrive ends up first), decoys
    /// and status.
    pub fn apply_to(self, state: &mut AppState) {
        for device in self.devices {
            state.upsert_device(device);
        }
        for (id, online) in self.presence {
            if !state.set_presence(&id, online) {
                trace!(%id, "presence change for unknown device ignored");
            }
        }
        for alert in self.alerts {
            state.prepend_alert(alert);
        }
        for decoy in self.decoys {
            state.upsert_decoy(decoy);
        }
        if let Some(status) = self.status {
            state.status = Some(status);
        }
    }
}

struct Pending {
    batch: PendingBatch,
    scheduled: Option<JoinHandle<()>>,
    /// Bumped whenever a scheduled flush is started or superseded, so a
    /// stale timer that wakes after a manual flush does nothing.
    generation: u64,
}

struct Inner {
    store: StateStore,
    delay: Duration,
    pending: Mutex<Pending>,
    flushes: AtomicU64,
}

/// Cloneable handle to one coalescer.
#[derive(Clone)]
pub struct EventCoalescer {
    inner: Arc<Inner>,
}

impl EventCoalescer {
    pub fn new(store: StateStore, delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                delay,
                pending: Mutex::new(Pending {
                    batch: PendingBatch::default(),
                    scheduled: None,
                    generation: 0,
                }),
                flushes: AtomicU64::new(0),
            }),
        }
    }

    /// Buffers `event` and schedules a flush if none is pending.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn push(&self, event: SensorEvent) {
        let mut pending = self.inner.lock();
        if !pending.batch.absorb(event) {
            return;
        }
        if pending.scheduled.is_none() {
            pending.generation += 1;
            let generation = pending.generation;
            let inner = Arc::clone(&self.inner);
            pending.scheduled = Some(tokio::spawn(async move {
                tokio::time::sleep(inner.delay).await;
                inner.flush_scheduled(generation);
            }));
        }
    }

    /// Flushes immediately, cancelling any scheduled flush first.
    pub fn flush_now(&self) {
        let mut pending = self.inner.lock();
        if let Some(handle) = pending.scheduled.take() {
            handle.abort();
        }
        pending.generation += 1;
        self.inner.apply(&mut pending);
    }

    /// Drops buffered events and any scheduled flush.
    pub fn discard(&self) {
        let mut pending = self.inner.lock();
        if let Some(handle) = pending.scheduled.take() {
            handle.abort();
        }
        pending.generation += 1;
        pending.batch = PendingBatch::default();
    }

    /// Number of non-empty flushes applied so far.
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.load(Ordering::Relaxed)
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.lock().batch.is_empty()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush_scheduled(&self, generation: u64) {
        let mut pending = self.lock();
        if pending.generation != generation {
            return;
        }
        pending.scheduled = None;
        self.apply(&mut pending);
    }

    /// Takes the batch and applies it while the pending lock is held, so
    /// batches reach the store in the order they were closed.
    fn apply(&self, pending: &mut Pending) {
        let batch = std::mem::take(&mut pending.batch);
        if batch.is_empty() {
            return;
        }
        debug!("flushing coalesced sensor events");
        self.store.update(|state| batch.apply_to(state));
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use netward_core::Severity;

    fn device(id: &str) -> Device {
        Device {
            id: id.to_string(),
            name: None,
            mac: None,
            ip: None,
            vendor: None,
            online: false,
            last_seen: None,
        }
    }

    fn alert(id: i64) -> Alert {
        Alert {
            id,
            severity: Severity::Medium,
            title: "t".to_string(),
            message: String::new(),
            device_id: None,
            created_at: Utc::now(),
            acknowledged: false,
        }
    }

    #[test]
    fn test_presence_is_applied_after_upserts() {
        // Arrange – the delta arrives before the upsert that creates the device
        let mut batch = PendingBatch::default();
        batch.absorb(SensorEvent::DeviceOnline { id: "a".to_string() });
        batch.absorb(SensorEvent::DeviceUpsert(device("a")));
        let mut state = AppState::default();

        // Act
        batch.apply_to(&mut state);

        // Assert
        assert!(state.device("a").unwrap().online);
    }

    #[test]
    fn test_alerts_are_prepended_newest_first() {
        let mut state = AppState::default();
        state.prepend_alert(alert(1));
        let mut batch = PendingBatch::default();
        batch.absorb(SensorEvent::AlertNew(alert(2)));
        batch.absorb(SensorEvent::AlertNew(alert(3)));
        batch.apply_to(&mut state);
        let ids: Vec<i64> = state.alerts.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_status_is_replaced_by_latest() {
        let mut batch = PendingBatch::default();
        for version in ["1", "2"] {
            batch.absorb(SensorEvent::Status(SystemStatus {
                version: version.to_string(),
                ..SystemStatus::default()
            }));
        }
        let mut state = AppState::default();
        batch.apply_to(&mut state);
        assert_eq!(state.status.unwrap().version, "2");
    }

    #[test]
    fn test_ignored_events_do_not_fill_batch() {
        let mut batch = PendingBatch::default();
        assert!(!batch.absorb(SensorEvent::Ignored { kind: "x".to_string() }));
        assert!(batch.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_applied_in_one_flush() {
        // Arrange
        let store = StateStore::new();
        let coalescer = EventCoalescer::new(store.clone(), DEFAULT_FLUSH_DELAY);

        // Act
        coalescer.push(SensorEvent::DeviceUpsert(device("a")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        coalescer.push(SensorEvent::DeviceOnline { id: "a".to_string() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        coalescer.push(SensorEvent::AlertNew(alert(7)));
        let before_flush = store.snapshot();
        tokio::time::sleep(Duration::from_millis(250)).await;

        // Assert
        assert!(before_flush.devices.is_empty(), "nothing applied before the delay");
        assert_eq!(coalescer.flush_count(), 1);
        let state = store.snapshot();
        assert!(state.device("a").unwrap().online);
        assert_eq!(state.alerts[0].id, 7);
        assert_eq!(state.revision, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_now_cancels_scheduled_flush() {
        // Arrange
        let store = StateStore::new();
        let coalescer = EventCoalescer::new(store.clone(), DEFAULT_FLUSH_DELAY);
        coalescer.push(SensorEvent::DeviceUpsert(device("a")));

        // Act
        coalescer.flush_now();
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Assert
        assert_eq!(coalescer.flush_count(), 1);
        assert_eq!(store.snapshot().revision, 1);
        assert!(!coalescer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_after_flush_schedule_a_new_one() {
        let store = StateStore::new();
        let coalescer = EventCoalescer::new(store.clone(), DEFAULT_FLUSH_DELAY);
        coalescer.push(SensorEvent::DeviceUpsert(device("a")));
        tokio::time::sleep(Duration::from_millis(300)).await;
        coalescer.push(SensorEvent::DeviceUpsert(device("b")));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(coalescer.flush_count(), 2);
        assert_eq!(store.snapshot().devices.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_drops_buffered_events() {
        let store = StateStore::new();
        let coalescer = EventCoalescer::new(store.clone(), DEFAULT_FLUSH_DELAY);
        coalescer.push(SensorEvent::DeviceUpsert(device("a")));
        coalescer.discard();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coalescer.flush_count(), 0);
        assert!(store.snapshot().devices.is_empty());
    }
}
