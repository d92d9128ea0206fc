//! Collaborators the interpreter talks to.
//!
//! An [`Interpreter`](crate::Interpreter) is built from an explicit
//! [`Collaborators`] bundle. Nothing inside the step algorithm looks services
//! up by name or type.

use crate::error::{DispatchError, InvokeError};
use crate::event::Event;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Type URI of SCXML invoked sessions.
pub const SCXML_INVOKE_TYPE: &str = "http://www.w3.org/TR/scxml/";

/// Returns true for the SCXML invoke type URI or its short alias.
pub fn is_scxml_invoke(invoke_type: &str) -> bool {
    invoke_type == "scxml"
        || invoke_type.trim_end_matches('/') == SCXML_INVOKE_TYPE.trim_end_matches('/')
}

/// Delivers events to targets outside the sending session.
pub trait EventDispatcher: Send + Sync {
    /// `target` is a URI such as `#_parent` or `#_scxml_<session>`.
    fn dispatch(
        &self,
        from_session: &str,
        target: &str,
        send_type: &str,
        event: Event,
    ) -> Result<(), DispatchError>;
}

/// A delayed send waiting for its timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSend {
    pub session_id: String,
    pub send_id: String,
    /// `None` addresses the sending session itself.
    pub target: Option<String>,
    pub send_type: String,
    pub event: Event,
    /// Remaining delay in milliseconds.
    pub delay_ms: u64,
}

impl PendingSend {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Schedules delayed sends.
pub trait TimerService: Send + Sync {
    fn schedule(&self, send: PendingSend) -> Result<(), DispatchError>;

    /// Removes a pending send. Returns false if nothing was pending.
    fn cancel(&self, session_id: &str, send_id: &str) -> bool;

    /// Drops every pending send of a session.
    fn cancel_session(&self, session_id: &str);

    /// Pending sends of a session, in firing order, with remaining delay.
    fn pending(&self, session_id: &str) -> Vec<PendingSend>;
}

/// Everything needed to start an invoked service.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    pub parent_session: String,
    pub invoke_id: String,
    pub invoke_type: String,
    pub src: Option<String>,
    pub content: Option<Value>,
    /// Values from `namelist` and `<param>`.
    pub params: Map<String, Value>,
    pub autoforward: bool,
}

/// Handle on a running invoked service.
pub trait InvokedService: Send {
    /// Forwards an event to the service.
    fn send(&self, event: Event) -> Result<(), InvokeError>;

    /// Requests cancellation. Must return without waiting for the service.
    fn cancel(&self);
}

/// Starts invoked services.
pub trait InvokeActivator: Send + Sync {
    fn supports(&self, invoke_type: &str) -> bool;

    fn start(&self, request: InvokeRequest) -> Result<Box<dyn InvokedService>, InvokeError>;
}

/// Receives `<log>` output.
pub trait LogSink: Send + Sync {
    fn log(&self, session_id: &str, label: Option<&str>, value: &Value);
}

/// Writes `<log>` output through `tracing`.
#[derive(Debug, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, session_id: &str, label: Option<&str>, value: &Value) {
        tracing::info!(
            "[{}] Log {}: {}",
            session_id,
            label.unwrap_or(""),
            value
        );
    }
}

/// Stand-in for a session that is not attached to any runtime: every
/// dispatch fails, delayed sends are refused and nothing can be invoked.
#[derive(Debug, Default)]
pub struct Detached;

impl EventDispatcher for Detached {
    fn dispatch(
        &self,
        _from_session: &str,
        target: &str,
        _send_type: &str,
        _event: Event,
    ) -> Result<(), DispatchError> {
        Err(DispatchError::Unreachable {
            target: target.to_string(),
        })
    }
}

impl TimerService for Detached {
    fn schedule(&self, _send: PendingSend) -> Result<(), DispatchError> {
        Err(DispatchError::Timer {
            reason: "session is not attached to a runtime".to_string(),
        })
    }

    fn cancel(&self, _session_id: &str, _send_id: &str) -> bool {
        false
    }

    fn cancel_session(&self, _session_id: &str) {}

    fn pending(&self, _session_id: &str) -> Vec<PendingSend> {
        Vec::new()
    }
}

impl InvokeActivator for Detached {
    fn supports(&self, _invoke_type: &str) -> bool {
        false
    }

    fn start(&self, request: InvokeRequest) -> Result<Box<dyn InvokedService>, InvokeError> {
        Err(InvokeError::UnsupportedType {
            invoke_type: request.invoke_type,
        })
    }
}

/// The collaborator bundle an interpreter is built with.
#[derive(Clone)]
pub struct Collaborators {
    pub dispatcher: Arc<dyn EventDispatcher>,
    pub timers: Arc<dyn TimerService>,
    pub invoker: Arc<dyn InvokeActivator>,
    pub log: Arc<dyn LogSink>,
}

impl Collaborators {
    pub fn new(
        dispatcher: Arc<dyn EventDispatcher>,
        timers: Arc<dyn TimerService>,
        invoker: Arc<dyn InvokeActivator>,
    ) -> Self {
        Self {
            dispatcher,
            timers,
            invoker,
            log: Arc::new(TracingLogSink),
        }
    }

    pub fn with_log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn InvokeActivator>) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn with_timers(mut self, timers: Arc<dyn TimerService>) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        let detached = Arc::new(Detached);
        Self::new(detached.clone(), detached.clone(), detached)
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_refuses_everything() {
        let detached = Detached;
        assert!(detached
            .dispatch("s", "#_parent", "scxml", Event::new("x"))
            .is_err());
        assert!(!TimerService::cancel(&detached, "s", "id"));
        assert!(!detached.supports("scxml"));
    }

    #[test]
    fn test_scxml_invoke_aliases() {
        assert!(is_scxml_invoke("scxml"));
        assert!(is_scxml_invoke("http://www.w3.org/TR/scxml"));
        assert!(is_scxml_invoke(SCXML_INVOKE_TYPE));
        assert!(!is_scxml_invoke("http"));
    }

    #[test]
    fn test_pending_send_delay() {
        let send = PendingSend {
            session_id: "s".into(),
            send_id: "id".into(),
            target: None,
            send_type: "scxml".into(),
            event: Event::new("t"),
            delay_ms: 250,
        };
        assert_eq!(send.delay(), Duration::from_millis(250));
    }
}
