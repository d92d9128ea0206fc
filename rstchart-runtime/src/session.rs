//! Session task.
//!
//! A [`Session`] drives one [`Interpreter`] on a tokio task. It is the only
//! owner of the interpreter, so the step algorithm never runs concurrently for
//! the same session. The loop suspends only while waiting on the external
//! queue.

use crate::error::RuntimeError;
use crate::queue::{QueueError, QueueReceiver, QueueSender};
use crate::registry::Registration;
use rstchart_core::{Cursor, Event, Interpreter, StepOutcome, TimerService};
use rstchart_storage::{CheckpointPolicy, CheckpointStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// A top-level final state was reached; carries its done data.
    Completed(Value),
    /// The session was cancelled.
    Cancelled,
    /// Every external sender went away before the chart completed.
    QueueClosed,
    /// The session could not be started or restored.
    Failed(String),
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed(_))
    }
}

/// How the interpreter is brought up.
pub(crate) enum Start {
    Fresh,
    Restore(Box<Cursor>),
}

pub(crate) struct Checkpointing {
    pub store: Arc<dyn CheckpointStore>,
    pub policy: CheckpointPolicy,
}

pub(crate) struct Session {
    interp: Interpreter,
    rx: QueueReceiver,
    /// Events taken off the queue for a checkpoint but not yet processed.
    backlog: VecDeque<Event>,
    cancel: CancellationToken,
    registration: Registration,
    timers: Arc<dyn TimerService>,
    checkpointing: Option<Checkpointing>,
    last_checkpoint: Option<String>,
    checkpoint_failing: bool,
}

impl Session {
    pub(crate) fn new(
        interp: Interpreter,
        rx: QueueReceiver,
        cancel: CancellationToken,
        registration: Registration,
        timers: Arc<dyn TimerService>,
        checkpointing: Option<Checkpointing>,
    ) -> Self {
        Self {
            interp,
            rx,
            backlog: VecDeque::new(),
            cancel,
            registration,
            timers,
            checkpointing,
            last_checkpoint: None,
            checkpoint_failing: false,
        }
    }

    fn id(&self) -> &str {
        self.registration.session_id()
    }

    pub(crate) async fn run(mut self, start: Start) -> SessionOutcome {
        let outcome = self.drive(start).await;
        self.teardown(&outcome);
        outcome
    }

    async fn drive(&mut self, start: Start) -> SessionOutcome {
        let started = match start {
            Start::Fresh => self.interp.initialize(),
            Start::Restore(cursor) => {
                self.backlog.extend(cursor.external_queue.iter().cloned());
                self.interp.restore(&cursor)
            }
        };
        match started {
            Ok(StepOutcome::Completed(data)) => return SessionOutcome::Completed(data),
            Ok(StepOutcome::Stabilized(_)) => self.maybe_checkpoint(),
            Err(e) => {
                tracing::error!("[{}] Failed to start session: {}", self.id(), e);
                return SessionOutcome::Failed(e.to_string());
            }
        }

        loop {
            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            self.interp.terminate();
                            return SessionOutcome::Cancelled;
                        }
                        event = self.rx.recv() => match event {
                            Some(event) => event,
                            None => {
                                self.interp.terminate();
                                return SessionOutcome::QueueClosed;
                            }
                        },
                    }
                }
            };

            if self.cancel.is_cancelled() {
                self.interp.terminate();
                return SessionOutcome::Cancelled;
            }

            tracing::debug!("[{}] Processing event {}", self.id(), event.name);
            match self.interp.step(Some(event)) {
                Ok(StepOutcome::Completed(data)) => return SessionOutcome::Completed(data),
                Ok(StepOutcome::Stabilized(_)) => self.maybe_checkpoint(),
                Err(e) => {
                    tracing::error!("[{}] Session failed: {}", self.id(), e);
                    self.interp.terminate();
                    return SessionOutcome::Failed(e.to_string());
                }
            }
        }
    }

    /// Writes a checkpoint if the policy asks for one. Queued events are moved
    /// into the backlog first so the cursor carries them.
    fn maybe_checkpoint(&mut self) {
        let Some(checkpointing) = &self.checkpointing else {
            return;
        };
        if !checkpointing.policy.is_due(self.interp.macrostep()) {
            return;
        }

        while let Some(event) = self.rx.try_recv() {
            self.backlog.push_back(event);
        }

        let result = self.interp.checkpoint().map_err(RuntimeError::from).and_then(|mut cursor| {
            cursor.external_queue = self.backlog.iter().cloned().collect();
            checkpointing
                .store
                .save(self.registration.session_id(), &cursor)
                .map_err(RuntimeError::from)
        });

        match result {
            Ok(meta) => {
                tracing::debug!(
                    "[{}] Checkpoint written (checkpoint={}, macrostep={})",
                    meta.session_id,
                    meta.checkpoint_id,
                    meta.macrostep
                );
                self.last_checkpoint = Some(meta.checkpoint_id);
                self.checkpoint_failing = false;
            }
            Err(e) => {
                tracing::warn!("[{}] Checkpoint failed: {}", self.id(), e);
                // only report the first failure of a run of failures
                if !self.checkpoint_failing {
                    self.backlog
                        .push_back(Event::error_platform(format!("checkpoint failed: {}", e)));
                }
                self.checkpoint_failing = true;
            }
        }
    }

    fn teardown(&mut self, outcome: &SessionOutcome) {
        self.timers.cancel_session(self.registration.session_id());

        if let SessionOutcome::Completed(data) = outcome {
            if let (Some(checkpointing), Some(id)) = (&self.checkpointing, &self.last_checkpoint) {
                if let Err(e) = checkpointing.store.delete(id) {
                    tracing::warn!("[{}] Failed to delete checkpoint: {}", self.id(), e);
                }
            }

            if let Some(link) = self.registration.parent() {
                let done = Event::done_invoke(&link.invoke_id, data.clone()).with_origin(
                    format!("#_scxml_{}", self.id()),
                    rstchart_core::SCXML_PROCESSOR,
                );
                if let Err(e) = self.registration.registry().deliver(&link.session_id, done) {
                    tracing::debug!("[{}] Parent did not take done event: {}", self.id(), e);
                }
            }
        }

        if let (SessionOutcome::Failed(reason), Some(link)) = (outcome, self.registration.parent())
        {
            let failed = Event::error_platform(format!("invoked session failed: {}", reason))
                .with_invoke_id(link.invoke_id.clone());
            let _ = self.registration.registry().deliver(&link.session_id, failed);
        }

        tracing::info!("[{}] Session finished (outcome={:?})", self.id(), outcome);
    }
}

/// Handle on a running session.
///
/// Dropping the handle drops its queue sender; once no other sender is
/// left the session ends with [`SessionOutcome::QueueClosed`].
#[derive(Debug)]
pub struct SessionHandle {
    id: String,
    tx: QueueSender,
    cancel: CancellationToken,
    task: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: String,
        tx: QueueSender,
        cancel: CancellationToken,
        task: JoinHandle<SessionOutcome>,
    ) -> Self {
        Self {
            id,
            tx,
            cancel,
            task,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queues an external event, waiting for room on a bounded queue.
    pub async fn send(&self, event: Event) -> Result<(), RuntimeError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| RuntimeError::QueueClosed(self.id.clone()))
    }

    /// Queues an external event without waiting.
    pub fn try_send(&self, event: Event) -> Result<(), RuntimeError> {
        self.tx.try_send(event).map_err(|e| match e {
            QueueError::Full(_) => RuntimeError::QueueFull(self.id.clone()),
            QueueError::Closed(_) => RuntimeError::QueueClosed(self.id.clone()),
        })
    }

    /// Another sender for the session's external queue.
    pub fn sender(&self) -> QueueSender {
        self.tx.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    /// Requests cancellation. The in-flight step finishes first.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the session to end on its own.
    pub async fn wait(self) -> Result<SessionOutcome, RuntimeError> {
        Ok(self.task.await?)
    }

    /// Closes this handle's sender and waits for the session to end.
    pub async fn close(self) -> Result<SessionOutcome, RuntimeError> {
        self.close_after(Duration::ZERO).await
    }

    /// Lets the session run for up to `linger` (delayed sends may still
    /// fire), then closes this handle's sender and waits for it to end.
    pub async fn close_after(self, linger: Duration) -> Result<SessionOutcome, RuntimeError> {
        let SessionHandle {
            id, tx, mut task, ..
        } = self;

        if !linger.is_zero() {
            if let Ok(joined) = tokio::time::timeout(linger, &mut task).await {
                return Ok(joined?);
            }
        }

        drop(tx);
        tracing::debug!("[{}] Closed session queue", id);
        Ok(task.await?)
    }

    /// Cancels the session and waits up to `grace` for it to wind down,
    /// aborting the task after that. Returns `None` if it had to be aborted.
    pub async fn shutdown(self, grace: Duration) -> Option<SessionOutcome> {
        let SessionHandle {
            id,
            cancel,
            mut task,
            ..
        } = self;
        cancel.cancel();

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                tracing::warn!("[{}] Session task failed: {}", id, e);
                None
            }
            Err(_) => {
                tracing::warn!("[{}] Session did not stop in time, aborting", id);
                task.abort();
                None
            }
        }
    }
}
