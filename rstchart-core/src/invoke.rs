//! Per-session invoke table.
//!
//! Each `<invoke>` of an entered state gets one entry that moves through
//! `Pending → Starting → Running → Cancelling → Done`. Entries are created
//! when the owning state is entered and removed when it is exited.

use crate::error::InvokeError;
use crate::event::Event;
use crate::platform::InvokedService;
use rstchart_model::{Chart, InvokeId, StateId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokeStatus {
    /// Owning state entered; waiting for the macro-step to stabilise.
    Pending,
    Starting,
    Running,
    Cancelling,
    /// Finished or cancelled. Events from it are ignored.
    Done,
}

pub struct ActiveInvoke {
    pub node: InvokeId,
    pub state: StateId,
    /// Assigned when the invoke starts (or carried over from a checkpoint).
    pub invoke_id: Option<String>,
    pub status: InvokeStatus,
    pub autoforward: bool,
    handle: Option<Box<dyn InvokedService>>,
}

impl std::fmt::Debug for ActiveInvoke {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveInvoke")
            .field("node", &self.node)
            .field("state", &self.state)
            .field("invoke_id", &self.invoke_id)
            .field("status", &self.status)
            .field("autoforward", &self.autoforward)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct InvokeTable {
    entries: Vec<ActiveInvoke>,
}

impl InvokeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveInvoke> {
        self.entries.iter()
    }

    /// Adds a pending entry for every invoke owned by `state`.
    pub(crate) fn schedule(&mut self, chart: &Chart, state: StateId) {
        for node in &chart.state(state).invokes {
            self.entries.push(ActiveInvoke {
                node: *node,
                state,
                invoke_id: None,
                status: InvokeStatus::Pending,
                autoforward: chart.invoke(*node).autoforward,
                handle: None,
            });
        }
    }

    /// Re-adds a pending entry with a known id (checkpoint restore).
    pub(crate) fn schedule_restored(&mut self, chart: &Chart, node: InvokeId, invoke_id: String) {
        let inv = chart.invoke(node);
        self.entries.push(ActiveInvoke {
            node,
            state: inv.state,
            invoke_id: Some(invoke_id),
            status: InvokeStatus::Pending,
            autoforward: inv.autoforward,
            handle: None,
        });
    }

    /// Nodes waiting to start, in document order.
    pub(crate) fn pending(&self) -> Vec<InvokeId> {
        let mut nodes: Vec<InvokeId> = self
            .entries
            .iter()
            .filter(|e| e.status == InvokeStatus::Pending)
            .map(|e| e.node)
            .collect();
        nodes.sort();
        nodes
    }

    fn entry_mut(&mut self, node: InvokeId) -> Option<&mut ActiveInvoke> {
        self.entries.iter_mut().find(|e| e.node == node)
    }

    pub(crate) fn restored_id(&self, node: InvokeId) -> Option<String> {
        self.entries
            .iter()
            .find(|e| e.node == node)
            .and_then(|e| e.invoke_id.clone())
    }

    pub(crate) fn mark_starting(&mut self, node: InvokeId, invoke_id: &str) {
        if let Some(entry) = self.entry_mut(node) {
            entry.status = InvokeStatus::Starting;
            entry.invoke_id = Some(invoke_id.to_string());
        }
    }

    pub(crate) fn mark_running(&mut self, node: InvokeId, handle: Box<dyn InvokedService>) {
        if let Some(entry) = self.entry_mut(node) {
            entry.status = InvokeStatus::Running;
            entry.handle = Some(handle);
        }
    }

    /// Drops an entry whose start failed.
    pub(crate) fn discard(&mut self, node: InvokeId) {
        self.entries.retain(|e| e.node != node);
    }

    /// Cancels and removes every entry owned by `state`. Returns the ids of
    /// services that were running.
    pub(crate) fn cancel_state(&mut self, state: StateId) -> Vec<String> {
        let mut cancelled = Vec::new();
        for entry in self.entries.iter_mut().filter(|e| e.state == state) {
            Self::cancel_entry(entry, &mut cancelled);
        }
        self.entries.retain(|e| e.state != state);
        cancelled
    }

    /// Cancels everything. Used on session teardown.
    pub(crate) fn cancel_all(&mut self) -> Vec<String> {
        let mut cancelled = Vec::new();
        for entry in self.entries.iter_mut() {
            Self::cancel_entry(entry, &mut cancelled);
        }
        self.entries.clear();
        cancelled
    }

    fn cancel_entry(entry: &mut ActiveInvoke, cancelled: &mut Vec<String>) {
        if entry.status == InvokeStatus::Running {
            entry.status = InvokeStatus::Cancelling;
            if let Some(handle) = entry.handle.take() {
                handle.cancel();
            }
            if let Some(id) = &entry.invoke_id {
                cancelled.push(id.clone());
            }
        }
        entry.status = InvokeStatus::Done;
    }

    pub fn find(&self, invoke_id: &str) -> Option<&ActiveInvoke> {
        self.entries
            .iter()
            .find(|e| e.invoke_id.as_deref() == Some(invoke_id))
    }

    pub fn status(&self, invoke_id: &str) -> Option<InvokeStatus> {
        self.find(invoke_id).map(|e| e.status)
    }

    /// True if events carrying this invoke id may still be processed.
    pub fn accepts(&self, invoke_id: &str) -> bool {
        self.status(invoke_id) == Some(InvokeStatus::Running)
    }

    /// The child finished on its own.
    pub(crate) fn mark_done(&mut self, invoke_id: &str) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.invoke_id.as_deref() == Some(invoke_id))
        {
            entry.status = InvokeStatus::Done;
            entry.handle = None;
        }
    }

    /// Sends an event to a running invoked service.
    pub(crate) fn send_to(&self, invoke_id: &str, event: Event) -> Result<(), InvokeError> {
        match self.find(invoke_id) {
            Some(ActiveInvoke {
                status: InvokeStatus::Running,
                handle: Some(handle),
                ..
            }) => handle.send(event),
            _ => Err(InvokeError::Gone {
                invoke_id: invoke_id.to_string(),
            }),
        }
    }

    /// Forwards an external event to every running autoforward invoke,
    /// except the one it came from.
    pub(crate) fn autoforward(&self, event: &Event) -> Vec<(String, InvokeError)> {
        let mut failures = Vec::new();
        for entry in &self.entries {
            if !entry.autoforward || entry.status != InvokeStatus::Running {
                continue;
            }
            let Some(id) = entry.invoke_id.as_deref() else {
                continue;
            };
            if event.invoke_id.as_deref() == Some(id) {
                continue;
            }
            if let Some(handle) = &entry.handle {
                if let Err(e) = handle.send(event.clone()) {
                    failures.push((id.to_string(), e));
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    struct Probe(Arc<Mutex<Vec<String>>>, &'static str);

    impl InvokedService for Probe {
        fn send(&self, event: Event) -> Result<(), InvokeError> {
            self.0.lock().push(format!("{}:send:{}", self.1, event.name));
            Ok(())
        }

        fn cancel(&self) {
            self.0.lock().push(format!("{}:cancel", self.1));
        }
    }

    fn chart() -> Chart {
        Chart::from_json(&json!({
            "states": [
                {"id": "s", "invoke": [
                    {"type": "scxml", "id": "one", "autoforward": true},
                    {"type": "scxml", "id": "two"}
                ]},
                {"id": "t"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let chart = chart();
        let s = chart.state_id("s").unwrap();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut table = InvokeTable::new();

        table.schedule(&chart, s);
        let pending = table.pending();
        assert_eq!(pending.len(), 2);

        table.mark_starting(pending[0], "one");
        assert_eq!(table.status("one"), Some(InvokeStatus::Starting));
        table.mark_running(pending[0], Box::new(Probe(journal.clone(), "one")));
        assert!(table.accepts("one"));

        let cancelled = table.cancel_state(s);
        assert_eq!(cancelled, vec!["one".to_string()]);
        assert!(table.is_empty());
        assert_eq!(*journal.lock(), vec!["one:cancel".to_string()]);
    }

    #[test]
    fn test_autoforward_skips_origin() {
        let chart = chart();
        let s = chart.state_id("s").unwrap();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut table = InvokeTable::new();
        table.schedule(&chart, s);
        for (node, name) in table.pending().into_iter().zip(["one", "two"]) {
            table.mark_starting(node, name);
            table.mark_running(node, Box::new(Probe(journal.clone(), name)));
        }

        table.autoforward(&Event::new("ping"));
        table.autoforward(&Event::new("echo").with_invoke_id("one"));
        assert_eq!(*journal.lock(), vec!["one:send:ping".to_string()]);
    }

    #[test]
    fn test_done_invoke_stops_accepting() {
        let chart = chart();
        let s = chart.state_id("s").unwrap();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut table = InvokeTable::new();
        table.schedule(&chart, s);
        let node = table.pending()[0];
        table.mark_starting(node, "one");
        table.mark_running(node, Box::new(Probe(journal.clone(), "one")));

        table.mark_done("one");
        assert!(!table.accepts("one"));
        assert!(table.send_to("one", Event::new("x")).is_err());

        // a finished child is not cancelled again on exit
        assert!(table.cancel_state(s).is_empty());
        assert!(journal.lock().is_empty());
    }
}
