//! Cancellable background task slots.
//!
//! The session runs several independent units of background work: the
//! connect/stream task, the reconnect timer, the learning-status poll and the
//! disconnect-alert timer.  Each lives in its own [`TaskSlot`] so any one can
//! be cancelled without touching the others.
//!
//! Every task started through a slot receives its own `CancellationToken`
//! (a child of the session token).  Cancelling a slot cancels that token
//! *and* aborts the task, and tasks re-check their token under the session
//! lock before every commit.  Together that guarantees a cancelled task never
//! mutates shared state afterwards.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Holds at most one running task.
#[derive(Debug, Default)]
pub struct TaskSlot {
    entry: Option<(CancellationToken, JoinHandle<()>)>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels whatever the slot holds and spawns `task` in its place.
    ///
    /// `task` is given a child token of `parent`; cancelling the parent
    /// cancels it too.
    pub fn start<F, Fut>(&mut self, parent: &CancellationToken, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let token = parent.child_token();
        let handle = tokio::spawn(task(token.clone()));
        self.entry = Some((token, handle));
    }

    /// Cancels the held task.  Returns `true` if one was still running.
    ///
    /// Idempotent: cancelling an empty slot does nothing.
    pub fn cancel(&mut self) -> bool {
        match self.entry.take() {
            Some((token, handle)) => {
                let was_running = !handle.is_finished();
                token.cancel();
                handle.abort();
                was_running
            }
            None => false,
        }
    }

    /// Forgets the held task without cancelling it.
    ///
    /// Called by a task on its own slot once it has reached its final step,
    /// so the slot reads as idle while the task finishes.
    pub fn release(&mut self) {
        self.entry = None;
    }

    /// `true` while a task is held and has neither finished nor been cancelled.
    pub fn is_active(&self) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire_has_no_effect() {
        // Arrange
        let fired = Arc::new(AtomicBool::new(false));
        let session = CancellationToken::new();
        let mut slot = TaskSlot::new();
        let flag = Arc::clone(&fired);
        slot.start(&session, move |_token| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            flag.store(true, Ordering::SeqCst);
        });

        // Act
        tokio::time::sleep(Duration::from_secs(10)).await;
        let was_running = slot.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;

        // Assert
        assert!(was_running);
        assert!(!fired.load(Ordering::SeqCst));
        assert!(!slot.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_replaces_previous_task() {
        // Arrange
        let session = CancellationToken::new();
        let mut slot = TaskSlot::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let first = tx.clone();
        slot.start(&session, move |_t| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = first.send("first");
        });

        // Act
        slot.start(&session, move |_t| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = tx.send("second");
        });
        tokio::time::sleep(Duration::from_secs(10)).await;

        // Assert
        assert_eq!(rx.recv().await, Some("second"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_task_token() {
        // Arrange
        let session = CancellationToken::new();
        let mut slot = TaskSlot::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        slot.start(&session, move |token| async move {
            token.cancelled().await;
            let _ = tx.send(());
        });

        // Act
        session.cancel();

        // Assert
        assert!(rx.await.is_ok());
    }

    #[test]
    fn test_cancel_empty_slot_is_idempotent() {
        let mut slot = TaskSlot::new();
        assert!(!slot.cancel());
        assert!(!slot.cancel());
        assert!(!slot.is_active());
    }

    #[tokio::test]
    async fn test_release_leaves_task_running() {
        // Arrange
        let session = CancellationToken::new();
        let mut slot = TaskSlot::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let (go_tx, go_rx) = tokio::sync::oneshot::channel::<()>();
        slot.start(&session, move |_t| async move {
            let _ = go_rx.await;
            let _ = tx.send(());
        });

        // Act
        slot.release();
        let _ = go_tx.send(());

        // Assert
        assert!(!slot.is_active());
        assert!(rx.await.is_ok());
    }
}
