//! Executable content.
//!
//! Actions are written in the definition DSL as objects tagged by `action`:
//!
//! ```json
//! [
//!   {"action": "assign", "location": "count", "expr": "count + 1"},
//!   {"action": "raise", "event": "tick"},
//!   {"action": "send", "event": "timeout", "delay": "500ms", "id": "t1"},
//!   {"action": "log", "label": "entered", "expr": "count"}
//! ]
//! ```
//!
//! The same types are used by the compiled chart; executable content needs no
//! id resolution.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// An opaque expression handed to the data model back-end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expr(String);

impl Expr {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Data binding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Binding {
    /// All data is initialised when the session starts.
    #[default]
    Early,
    /// A state's data is initialised the first time it is entered.
    Late,
}

/// A `<data>` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDecl {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// A `<param>` element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Expr>,
}

/// A `<content>` element: either an expression or an inline value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// `<donedata>` of a final state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoneData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

/// Body of a `<send>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_expr: Option<Expr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_expr: Option<Expr>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub send_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_expr: Option<Expr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_location: Option<Expr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_expr: Option<Expr>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub namelist: Vec<Expr>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
}

/// A vendor-specific action executed by the data model back-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAction {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// An `<elseif>` branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElseIf {
    pub cond: Expr,
    #[serde(default)]
    pub then: Vec<Action>,
}

/// One piece of executable content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Raise {
        event: String,
    },
    Send(Box<SendAction>),
    Cancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        send_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        send_id_expr: Option<Expr>,
    },
    Assign {
        location: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expr: Option<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
    },
    Script {
        src: Expr,
    },
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expr: Option<Expr>,
    },
    If {
        cond: Expr,
        #[serde(default)]
        then: Vec<Action>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        else_if: Vec<ElseIf>,
        #[serde(default, rename = "else", skip_serializing_if = "Vec::is_empty")]
        otherwise: Vec<Action>,
    },
    Foreach {
        array: Expr,
        item: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<Expr>,
        #[serde(default)]
        actions: Vec<Action>,
    },
    Custom(CustomAction),
}

impl Action {
    /// Returns the element name used in logs and error messages.
    pub fn tag(&self) -> &'static str {
        match self {
            Action::Raise { .. } => "raise",
            Action::Send(_) => "send",
            Action::Cancel { .. } => "cancel",
            Action::Assign { .. } => "assign",
            Action::Script { .. } => "script",
            Action::Log { .. } => "log",
            Action::If { .. } => "if",
            Action::Foreach { .. } => "foreach",
            Action::Custom(_) => "custom",
        }
    }

    /// Visits this action and every nested action, depth first.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Action)) {
        f(self);
        match self {
            Action::If {
                then,
                else_if,
                otherwise,
                ..
            } => {
                then.iter().for_each(|a| a.walk(f));
                for branch in else_if {
                    branch.then.iter().for_each(|a| a.walk(f));
                }
                otherwise.iter().for_each(|a| a.walk(f));
            }
            Action::Foreach { actions, .. } => actions.iter().for_each(|a| a.walk(f)),
            _ => {}
        }
    }

    /// Checks attribute combinations that can be rejected before any step runs.
    pub(crate) fn validate(&self) -> Result<(), ModelError> {
        let invalid = |reason: &str| {
            Err(ModelError::InvalidAction {
                reason: reason.to_string(),
            })
        };
        match self {
            Action::Raise { event } if event.trim().is_empty() => {
                invalid("<raise> requires a non-empty event")
            }
            Action::Send(send) => {
                if send.event.is_some() && send.event_expr.is_some() {
                    return invalid("<send> cannot have both event and eventexpr");
                }
                if send.target.is_some() && send.target_expr.is_some() {
                    return invalid("<send> cannot have both target and targetexpr");
                }
                if send.id.is_some() && send.id_location.is_some() {
                    return invalid("<send> cannot have both id and idlocation");
                }
                if send.delay.is_some() && send.delay_expr.is_some() {
                    return invalid("<send> cannot have both delay and delayexpr");
                }
                if send.content.is_some() && (!send.namelist.is_empty() || !send.params.is_empty())
                {
                    return invalid("<send> cannot combine content with namelist or param");
                }
                if let Some(delay) = &send.delay {
                    crate::descriptor::parse_delay(delay)?;
                }
                Ok(())
            }
            Action::Cancel {
                send_id: None,
                send_id_expr: None,
            } => invalid("<cancel> requires sendid or sendidexpr"),
            Action::Assign {
                expr: Some(_),
                content: Some(_),
                ..
            } => invalid("<assign> cannot have both expr and content"),
            _ => Ok(()),
        }
    }
}

/// Validates a block and all nested content.
pub(crate) fn validate_block(actions: &[Action]) -> Result<(), ModelError> {
    let mut result = Ok(());
    for action in actions {
        action.walk(&mut |a| {
            if result.is_ok() {
                result = a.validate();
            }
        });
    }
    result
}

/// Executable content of an `<invoke>`'s `<finalize>`.
///
/// A finalize block may not raise or send events; the only way to build one is
/// through [`Finalize::new`] (or deserialisation, which calls it), so every
/// `Finalize` value is known to be free of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Action>", into = "Vec<Action>")]
pub struct Finalize(Vec<Action>);

impl Finalize {
    pub fn new(actions: Vec<Action>) -> Result<Self, ModelError> {
        let mut offending = None;
        for action in &actions {
            action.walk(&mut |a| {
                if offending.is_none() && matches!(a, Action::Raise { .. } | Action::Send(_)) {
                    offending = Some(a.tag());
                }
            });
        }
        if let Some(tag) = offending {
            return Err(ModelError::InvalidAction {
                reason: format!("<{}> is not allowed inside <finalize>", tag),
            });
        }
        validate_block(&actions)?;
        Ok(Self(actions))
    }

    pub fn actions(&self) -> &[Action] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<Action>> for Finalize {
    type Error = ModelError;

    fn try_from(actions: Vec<Action>) -> Result<Self, Self::Error> {
        Self::new(actions)
    }
}

impl From<Finalize> for Vec<Action> {
    fn from(finalize: Finalize) -> Self {
        finalize.0
    }
}
