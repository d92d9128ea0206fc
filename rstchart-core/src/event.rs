//! Events.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Type URI of the SCXML event I/O processor.
pub const SCXML_PROCESSOR: &str = "http://www.w3.org/TR/scxml/#SCXMLEventProcessor";

/// Returns true for the SCXML processor URI or its short alias.
pub fn is_scxml_processor(send_type: &str) -> bool {
    send_type == SCXML_PROCESSOR || send_type == "scxml"
}

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Raised by the interpreter itself (`error.*`).
    Platform,
    /// Raised by the chart (`raise`, `done.state.*`, zero-delay self send).
    Internal,
    #[default]
    External,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Platform => "platform",
            EventKind::Internal => "internal",
            EventKind::External => "external",
        }
    }
}

/// An immutable event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Creates an external event without data.
    pub fn new(name: impl Into<String>) -> Self {
        Self::external(name, Value::Null)
    }

    pub fn external(name: impl Into<String>, data: Value) -> Self {
        Self::with_kind(name, EventKind::External, data)
    }

    pub fn internal(name: impl Into<String>, data: Value) -> Self {
        Self::with_kind(name, EventKind::Internal, data)
    }

    pub fn platform(name: impl Into<String>, data: Value) -> Self {
        Self::with_kind(name, EventKind::Platform, data)
    }

    fn with_kind(name: impl Into<String>, kind: EventKind, data: Value) -> Self {
        Self {
            name: name.into(),
            kind,
            send_id: None,
            origin: None,
            origin_type: None,
            invoke_id: None,
            data,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_send_id(mut self, send_id: impl Into<String>) -> Self {
        self.send_id = Some(send_id.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>, origin_type: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self.origin_type = Some(origin_type.into());
        self
    }

    pub fn with_invoke_id(mut self, invoke_id: impl Into<String>) -> Self {
        self.invoke_id = Some(invoke_id.into());
        self
    }

    /// `done.state.<state>`
    pub fn done_state(state: &str, data: Value) -> Self {
        Self::internal(format!("done.state.{}", state), data)
    }

    /// `done.invoke.<id>`, as delivered to the parent session.
    pub fn done_invoke(invoke_id: &str, data: Value) -> Self {
        Self::external(format!("done.invoke.{}", invoke_id), data).with_invoke_id(invoke_id)
    }

    pub fn error_execution(message: impl Into<String>, kind: &str) -> Self {
        Self::platform(
            "error.execution",
            json!({"message": message.into(), "kind": kind}),
        )
    }

    pub fn error_communication(message: impl Into<String>, send_id: Option<&str>) -> Self {
        let event = Self::platform("error.communication", json!({"message": message.into()}));
        match send_id {
            Some(id) => event.with_send_id(id),
            None => event,
        }
    }

    pub fn error_platform(message: impl Into<String>) -> Self {
        Self::platform("error.platform", json!({"message": message.into()}))
    }

    pub fn is_error(&self) -> bool {
        self.name == "error" || self.name.starts_with("error.")
    }

    /// Returns the invoke id if this is a `done.invoke.*` event.
    pub fn done_invoke_id(&self) -> Option<&str> {
        self.name.strip_prefix("done.invoke.")
    }

    /// The `_event` system variable.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "type": self.kind.as_str(),
            "sendid": self.send_id,
            "origin": self.origin,
            "origintype": self.origin_type,
            "invokeid": self.invoke_id,
            "data": self.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_events() {
        let done = Event::done_state("p", Value::Null);
        assert_eq!(done.name, "done.state.p");
        assert_eq!(done.kind, EventKind::Internal);

        let inv = Event::done_invoke("s.1", json!(3));
        assert_eq!(inv.done_invoke_id(), Some("s.1"));
        assert_eq!(inv.invoke_id.as_deref(), Some("s.1"));
    }

    #[test]
    fn test_error_events() {
        let err = Event::error_execution("boom", "type");
        assert!(err.is_error());
        assert_eq!(err.kind, EventKind::Platform);
        assert_eq!(err.data["kind"], "type");

        let comm = Event::error_communication("down", Some("s1"));
        assert_eq!(comm.send_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_event_value() {
        let ev = Event::new("go").with_send_id("x").with_data(json!({"n": 1}));
        let v = ev.to_value();
        assert_eq!(v["name"], "go");
        assert_eq!(v["type"], "external");
        assert_eq!(v["sendid"], "x");
        assert_eq!(v["data"]["n"], 1);
    }

    #[test]
    fn test_event_json_defaults() {
        let ev: Event = serde_json::from_str(r#"{"name": "ping"}"#).unwrap();
        assert_eq!(ev.kind, EventKind::External);
        assert_eq!(ev.data, Value::Null);
    }
}
