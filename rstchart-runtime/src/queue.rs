//! External event queue.
//!
//! Each session owns one receiving end. The queue is bounded or unbounded
//! depending on `session.queue_capacity`; both flavours share one interface so
//! the session loop and the transport never care which one is in use.

use rstchart_core::Event;
use tokio::sync::mpsc;

/// Why an event could not be queued.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueError {
    Full(Event),
    Closed(Event),
}

impl QueueError {
    pub fn into_event(self) -> Event {
        match self {
            QueueError::Full(event) | QueueError::Closed(event) => event,
        }
    }
}

/// Creates a session queue. A capacity of 0 means unbounded.
pub fn channel(capacity: usize) -> (QueueSender, QueueReceiver) {
    if capacity == 0 {
        let (tx, rx) = mpsc::unbounded_channel();
        (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
    } else {
        let (tx, rx) = mpsc::channel(capacity);
        (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
    }
}

#[derive(Debug, Clone)]
pub enum QueueSender {
    Bounded(mpsc::Sender<Event>),
    Unbounded(mpsc::UnboundedSender<Event>),
}

impl QueueSender {
    /// Queues an event without waiting.
    pub fn try_send(&self, event: Event) -> Result<(), QueueError> {
        match self {
            QueueSender::Bounded(tx) => tx.try_send(event).map_err(|e| match e {
                mpsc::error::TrySendError::Full(ev) => QueueError::Full(ev),
                mpsc::error::TrySendError::Closed(ev) => QueueError::Closed(ev),
            }),
            QueueSender::Unbounded(tx) => tx.send(event).map_err(|e| QueueError::Closed(e.0)),
        }
    }

    /// Queues an event, waiting for room on a bounded queue.
    pub async fn send(&self, event: Event) -> Result<(), QueueError> {
        match self {
            QueueSender::Bounded(tx) => tx.send(event).await.map_err(|e| QueueError::Closed(e.0)),
            QueueSender::Unbounded(tx) => tx.send(event).map_err(|e| QueueError::Closed(e.0)),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            QueueSender::Bounded(tx) => tx.is_closed(),
            QueueSender::Unbounded(tx) => tx.is_closed(),
        }
    }

    /// A sender that does not keep the queue open.
    pub fn downgrade(&self) -> WeakQueueSender {
        match self {
            QueueSender::Bounded(tx) => WeakQueueSender::Bounded(tx.downgrade()),
            QueueSender::Unbounded(tx) => WeakQueueSender::Unbounded(tx.downgrade()),
        }
    }
}

/// Held by the registry so that dropping every [`QueueSender`] closes the
/// queue even while the session is still registered.
#[derive(Debug, Clone)]
pub enum WeakQueueSender {
    Bounded(mpsc::WeakSender<Event>),
    Unbounded(mpsc::WeakUnboundedSender<Event>),
}

impl WeakQueueSender {
    pub fn upgrade(&self) -> Option<QueueSender> {
        match self {
            WeakQueueSender::Bounded(tx) => tx.upgrade().map(QueueSender::Bounded),
            WeakQueueSender::Unbounded(tx) => tx.upgrade().map(QueueSender::Unbounded),
        }
    }
}

#[derive(Debug)]
pub enum QueueReceiver {
    Bounded(mpsc::Receiver<Event>),
    Unbounded(mpsc::UnboundedReceiver<Event>),
}

impl QueueReceiver {
    /// Waits for the next event. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        match self {
            QueueReceiver::Bounded(rx) => rx.recv().await,
            QueueReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        match self {
            QueueReceiver::Bounded(rx) => rx.try_recv().ok(),
            QueueReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}
