//! In-process transport between sessions.
//!
//! The registry maps session ids to the sending end of their external queue
//! and implements [`EventDispatcher`] for the `#_parent`, `#_scxml_<id>` and
//! `#_<invokeid>` targets.

use crate::error::RuntimeError;
use crate::queue::{QueueError, QueueSender, WeakQueueSender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rstchart_core::{is_scxml_processor, DispatchError, Event, EventDispatcher, SCXML_PROCESSOR};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The invoke that created a child session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub session_id: String,
    pub invoke_id: String,
}

struct SessionEntry {
    sender: WeakQueueSender,
    cancel: CancellationToken,
    parent: Option<ParentLink>,
}

/// Live sessions of one runtime.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    /// (parent session, invoke id) -> child session.
    children: DashMap<(String, String), String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session. The returned guard unregisters it on drop.
    pub fn register(
        self: &Arc<Self>,
        session_id: &str,
        sender: WeakQueueSender,
        cancel: CancellationToken,
        parent: Option<ParentLink>,
    ) -> Result<Registration, RuntimeError> {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => return Err(RuntimeError::SessionExists(session_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry {
                    sender,
                    cancel,
                    parent: parent.clone(),
                });
            }
        }

        if let Some(link) = &parent {
            self.children.insert(
                (link.session_id.clone(), link.invoke_id.clone()),
                session_id.to_string(),
            );
        }

        tracing::debug!("[{}] Registered session", session_id);

        Ok(Registration {
            registry: Arc::clone(self),
            session_id: session_id.to_string(),
            parent,
        })
    }

    fn unregister(&self, session_id: &str, parent: Option<&ParentLink>) {
        self.sessions.remove(session_id);
        if let Some(link) = parent {
            self.children.remove_if(
                &(link.session_id.clone(), link.invoke_id.clone()),
                |_, child| child == session_id,
            );
        }
        tracing::debug!("[{}] Unregistered session", session_id);
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of all live sessions, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn sender(&self, session_id: &str) -> Option<QueueSender> {
        self.sessions.get(session_id)?.sender.upgrade()
    }

    pub fn cancel_token(&self, session_id: &str) -> Option<CancellationToken> {
        self.sessions.get(session_id).map(|e| e.cancel.clone())
    }

    pub fn parent(&self, session_id: &str) -> Option<ParentLink> {
        self.sessions.get(session_id)?.parent.clone()
    }

    /// Child session started by `invoke_id` in `parent_session`.
    pub fn child(&self, parent_session: &str, invoke_id: &str) -> Option<String> {
        self.children
            .get(&(parent_session.to_string(), invoke_id.to_string()))
            .map(|e| e.value().clone())
    }

    /// Requests cancellation of a session. Returns false if it is not live.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.sessions.get(session_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Puts an event on a session's external queue without waiting.
    pub fn deliver(&self, session_id: &str, event: Event) -> Result<(), DispatchError> {
        let target = format!("#_scxml_{}", session_id);
        let sender = self
            .sessions
            .get(session_id)
            .ok_or_else(|| DispatchError::Unreachable {
                target: target.clone(),
            })?
            .sender
            .upgrade()
            .ok_or_else(|| DispatchError::Closed {
                target: target.clone(),
            })?;

        sender.try_send(event).map_err(|e| match e {
            QueueError::Full(_) => DispatchError::QueueFull { target },
            QueueError::Closed(_) => DispatchError::Closed { target },
        })
    }
}

impl EventDispatcher for SessionRegistry {
    fn dispatch(
        &self,
        from_session: &str,
        target: &str,
        send_type: &str,
        mut event: Event,
    ) -> Result<(), DispatchError> {
        if !is_scxml_processor(send_type) {
            return Err(DispatchError::UnsupportedType {
                send_type: send_type.to_string(),
            });
        }
        if event.origin.is_none() {
            event = event.with_origin(format!("#_scxml_{}", from_session), SCXML_PROCESSOR);
        }

        let unreachable = || DispatchError::Unreachable {
            target: target.to_string(),
        };

        if target == "#_parent" {
            let link = self.parent(from_session).ok_or_else(unreachable)?;
            return self.deliver(&link.session_id, event.with_invoke_id(link.invoke_id));
        }
        if let Some(session_id) = target.strip_prefix("#_scxml_") {
            return self.deliver(session_id, event);
        }
        if let Some(invoke_id) = target.strip_prefix("#_") {
            let child = self.child(from_session, invoke_id).ok_or_else(unreachable)?;
            return self.deliver(&child, event);
        }

        Err(unreachable())
    }
}

/// Keeps a session registered for as long as it is alive.
pub struct Registration {
    registry: Arc<SessionRegistry>,
    session_id: String,
    parent: Option<ParentLink>,
}

impl Registration {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry
            .unregister(&self.session_id, self.parent.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{channel, QueueReceiver};

    fn live(
        registry: &Arc<SessionRegistry>,
        id: &str,
        capacity: usize,
        parent: Option<ParentLink>,
    ) -> (QueueSender, QueueReceiver, Registration) {
        let (tx, rx) = channel(capacity);
        let reg = registry
            .register(id, tx.downgrade(), CancellationToken::new(), parent)
            .unwrap();
        (tx, rx, reg)
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let registry = Arc::new(SessionRegistry::new());
        let (_tx, _rx, _reg) = live(&registry, "a", 4, None);
        let (tx2, _rx2) = channel(4);
        let err = registry
            .register("a", tx2.downgrade(), CancellationToken::new(), None)
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "SESSION_EXISTS");
    }

    #[test]
    fn test_registration_guard_unregisters() {
        let registry = Arc::new(SessionRegistry::new());
        let link = ParentLink {
            session_id: "p".into(),
            invoke_id: "inv".into(),
        };
        let (_tx, _rx, reg) = live(&registry, "c", 4, Some(link));
        assert_eq!(registry.child("p", "inv").as_deref(), Some("c"));
        assert_eq!(registry.session_ids(), vec!["c"]);

        drop(reg);
        assert!(registry.is_empty());
        assert!(registry.child("p", "inv").is_none());
    }

    #[test]
    fn test_route_to_session_stamps_origin() {
        let registry = Arc::new(SessionRegistry::new());
        let (_tx, mut rx, _reg) = live(&registry, "b", 4, None);

        registry
            .dispatch("a", "#_scxml_b", "scxml", Event::new("ping"))
            .unwrap();

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.name, "ping");
        assert_eq!(ev.origin.as_deref(), Some("#_scxml_a"));
        assert_eq!(ev.origin_type.as_deref(), Some(SCXML_PROCESSOR));
    }

    #[test]
    fn test_parent_and_child_routing() {
        let registry = Arc::new(SessionRegistry::new());
        let (_ptx, mut parent_rx, _preg) = live(&registry, "p", 4, None);
        let link = ParentLink {
            session_id: "p".into(),
            invoke_id: "worker".into(),
        };
        let (_ctx, mut child_rx, _creg) = live(&registry, "c", 4, Some(link));

        registry
            .dispatch("c", "#_parent", SCXML_PROCESSOR, Event::new("progress"))
            .unwrap();
        let ev = parent_rx.try_recv().unwrap();
        assert_eq!(ev.name, "progress");
        assert_eq!(ev.invoke_id.as_deref(), Some("worker"));

        registry
            .dispatch("p", "#_worker", "scxml", Event::new("job"))
            .unwrap();
        assert_eq!(child_rx.try_recv().unwrap().name, "job");

        // a top-level session has no parent
        assert_eq!(
            registry.dispatch("p", "#_parent", "scxml", Event::new("x")),
            Err(DispatchError::Unreachable {
                target: "#_parent".into()
            })
        );
    }

    #[test]
    fn test_dispatch_failures() {
        let registry = Arc::new(SessionRegistry::new());
        let (tx, _rx, _reg) = live(&registry, "full", 1, None);
        tx.try_send(Event::new("filler")).unwrap();

        assert!(matches!(
            registry.dispatch("a", "#_scxml_full", "scxml", Event::new("x")),
            Err(DispatchError::QueueFull { .. })
        ));
        assert!(matches!(
            registry.dispatch("a", "#_scxml_gone", "scxml", Event::new("x")),
            Err(DispatchError::Unreachable { .. })
        ));
        assert!(matches!(
            registry.dispatch("a", "http://example.com", "scxml", Event::new("x")),
            Err(DispatchError::Unreachable { .. })
        ));
        assert!(matches!(
            registry.dispatch("a", "#_scxml_full", "http", Event::new("x")),
            Err(DispatchError::UnsupportedType { .. })
        ));

        drop(tx);
        assert!(matches!(
            registry.deliver("full", Event::new("x")),
            Err(DispatchError::Closed { .. })
        ));
    }

    #[test]
    fn test_cancel_session() {
        let registry = Arc::new(SessionRegistry::new());
        let (_tx, _rx, _reg) = live(&registry, "a", 4, None);
        let token = registry.cancel_token("a").unwrap();
        assert!(registry.cancel("a"));
        assert!(token.is_cancelled());
        assert!(!registry.cancel("missing"));
    }
}
