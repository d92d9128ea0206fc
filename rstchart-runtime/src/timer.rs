//! Delayed send scheduler.
//!
//! All sessions of a runtime share one [`TimerQueue`] driven by a single
//! background task. Entries are keyed by `(deadline, seq)`, so sends that fall
//! due at the same instant are delivered in the order they were scheduled.

use crate::registry::SessionRegistry;
use parking_lot::Mutex;
use rstchart_core::{DispatchError, Event, EventDispatcher, PendingSend, TimerService};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type TimerKey = (Instant, u64);

#[derive(Default)]
struct TimerState {
    entries: BTreeMap<TimerKey, PendingSend>,
    next_seq: u64,
}

pub struct TimerQueue {
    state: Mutex<TimerState>,
    notify: Notify,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
}

impl TimerQueue {
    pub fn new(registry: Arc<SessionRegistry>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimerState::default()),
            notify: Notify::new(),
            registry,
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawns the driver task. Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let timers = Arc::clone(self);
        tokio::spawn(async move { timers.run().await })
    }

    async fn run(&self) {
        tracing::info!("Timer queue started");

        loop {
            let next = self.fire_due();
            let sleep = async {
                match next {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.notify.notified() => {}
                _ = sleep => {}
            }
        }

        tracing::info!("Timer queue stopped");
    }

    /// Stops the driver. Pending sends are dropped.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.state.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Delivers every due send and returns the next deadline.
    fn fire_due(&self) -> Option<Instant> {
        let now = Instant::now();
        let (due, next) = {
            let mut state = self.state.lock();
            let later = state.entries.split_off(&(now, u64::MAX));
            let due = std::mem::replace(&mut state.entries, later);
            let next = state.entries.keys().next().map(|(deadline, _)| *deadline);
            (due, next)
        };

        for (_, send) in due {
            self.deliver(send);
        }
        next
    }

    fn deliver(&self, send: PendingSend) {
        let PendingSend {
            session_id,
            send_id,
            target,
            send_type,
            event,
            ..
        } = send;

        tracing::debug!("[{}] Delayed send fired (send_id={})", session_id, send_id);

        let result = match &target {
            None => self.registry.deliver(&session_id, event),
            Some(target) => self
                .registry
                .dispatch(&session_id, target, &send_type, event),
        };

        if let Err(e) = result {
            tracing::warn!("[{}] Delayed send failed (send_id={}): {}", session_id, send_id, e);
            if target.is_some() {
                // the sender itself may be gone already
                let _ = self.registry.deliver(
                    &session_id,
                    Event::error_communication(e.to_string(), Some(&send_id)),
                );
            }
        }
    }
}

impl TimerService for TimerQueue {
    fn schedule(&self, send: PendingSend) -> Result<(), DispatchError> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::Timer {
                reason: "timer queue is shut down".to_string(),
            });
        }

        let deadline = Instant::now() + send.delay();
        {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.insert((deadline, seq), send);
        }
        self.notify.notify_one();
        Ok(())
    }

    fn cancel(&self, session_id: &str, send_id: &str) -> bool {
        let mut state = self.state.lock();
        let key = state
            .entries
            .iter()
            .find(|(_, s)| s.session_id == session_id && s.send_id == send_id)
            .map(|(key, _)| *key);
        match key {
            Some(key) => {
                state.entries.remove(&key);
                tracing::debug!("[{}] Cancelled delayed send (send_id={})", session_id, send_id);
                true
            }
            None => false,
        }
    }

    fn cancel_session(&self, session_id: &str) {
        self.state
            .lock()
            .entries
            .retain(|_, s| s.session_id != session_id);
    }

    fn pending(&self, session_id: &str) -> Vec<PendingSend> {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .iter()
            .filter(|(_, s)| s.session_id == session_id)
            .map(|((deadline, _), s)| {
                let remaining = deadline.saturating_duration_since(now);
                PendingSend {
                    delay_ms: remaining.as_millis() as u64,
                    ..s.clone()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::queue::{channel, QueueReceiver, QueueSender};
    use crate::registry::Registration;

    fn send(session: &str, id: &str, event: &str, delay_ms: u64) -> PendingSend {
        PendingSend {
            session_id: session.to_string(),
            send_id: id.to_string(),
            target: None,
            send_type: "scxml".to_string(),
            event: Event::new(event),
            delay_ms,
        }
    }

    fn session(
        registry: &Arc<SessionRegistry>,
        id: &str,
    ) -> (QueueSender, QueueReceiver, Registration) {
        let (tx, rx) = channel(16);
        let reg = registry
            .register(id, tx.downgrade(), CancellationToken::new(), None)
            .unwrap();
        (tx, rx, reg)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_in_deadline_then_fifo_order() {
        let registry = Arc::new(SessionRegistry::new());
        let (_tx, mut rx, _reg) = session(&registry, "s");
        let timers = TimerQueue::new(Arc::clone(&registry));
        let driver = timers.start();

        timers.schedule(send("s", "1", "late", 200)).unwrap();
        timers.schedule(send("s", "2", "first", 100)).unwrap();
        timers.schedule(send("s", "3", "second", 100)).unwrap();

        let mut names = Vec::new();
        for _ in 0..3 {
            names.push(rx.recv().await.unwrap().name);
        }
        assert_eq!(names, vec!["first", "second", "late"]);
        assert!(timers.is_empty());

        timers.shutdown();
        driver.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_firing() {
        let registry = Arc::new(SessionRegistry::new());
        let (_tx, mut rx, _reg) = session(&registry, "s");
        let timers = TimerQueue::new(Arc::clone(&registry));
        let _driver = timers.start();

        timers.schedule(send("s", "a", "cancelled", 50)).unwrap();
        timers.schedule(send("s", "b", "kept", 100)).unwrap();
        assert!(timers.cancel("s", "a"));
        assert!(!timers.cancel("s", "a"));
        assert!(!timers.cancel("other", "b"));

        assert_eq!(rx.recv().await.unwrap().name, "kept");
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_reports_remaining_delay() {
        let registry = Arc::new(SessionRegistry::new());
        let timers = TimerQueue::new(registry);

        timers.schedule(send("s", "a", "tick", 1_000)).unwrap();
        timers.schedule(send("t", "b", "tock", 500)).unwrap();
        tokio::time::advance(Duration::from_millis(400)).await;

        let pending = timers.pending("s");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].delay_ms, 600);
        assert_eq!(pending[0].delay(), Duration::from_millis(600));

        timers.cancel_session("s");
        assert!(timers.pending("s").is_empty());
        assert_eq!(timers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_reports_to_sender() {
        let registry = Arc::new(SessionRegistry::new());
        let (_tx, mut rx, _reg) = session(&registry, "s");
        let timers = TimerQueue::new(Arc::clone(&registry));
        let _driver = timers.start();

        let mut to_nowhere = send("s", "x", "lost", 10);
        to_nowhere.target = Some("#_scxml_nobody".to_string());
        timers.schedule(to_nowhere).unwrap();

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.name, "error.communication");
        assert_eq!(ev.send_id.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_schedule_after_shutdown_fails() {
        let timers = TimerQueue::new(Arc::new(SessionRegistry::new()));
        timers.shutdown();
        assert!(matches!(
            timers.schedule(send("s", "a", "x", 1)),
            Err(DispatchError::Timer { .. })
        ));
    }
}
