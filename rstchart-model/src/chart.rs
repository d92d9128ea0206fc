//! Compiled chart arena.
//!
//! A [`Chart`] is the immutable, indexable form of a chart definition. States,
//! transitions and invokes live in flat vectors and refer to each other by
//! typed index, so walking up the hierarchy is an index lookup and there are
//! no reference cycles. Every node also carries a [`DocumentOrder`] assigned in
//! a single pre-order pass; it is the tie-break for every ordering decision the
//! interpreter makes.
//!
//! States are stored in pre-order, so comparing two [`StateId`]s compares their
//! document order.

use crate::action::{Action, Binding, Content, DataDecl, DoneData, Expr, Finalize, Param};
use crate::definition::ChartDefinition;
use crate::descriptor::EventDescriptor;
use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Position of the node in its arena.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Index of a state in [`Chart::states`]. Ordering follows document order.
    StateId
);
arena_id!(
    /// Index of a transition in the chart arena.
    TransitionId
);
arena_id!(
    /// Index of an invoke in the chart arena.
    InvokeId
);

/// Dense pre-order position shared by every node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentOrder(pub u32);

/// Shallow or deep history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    #[default]
    Shallow,
    Deep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// The chart itself.
    Root,
    Compound,
    Atomic,
    Parallel,
    Final,
    History(HistoryKind),
}

/// Transition type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Internal,
    #[default]
    External,
}

/// A state node.
#[derive(Debug, Clone)]
pub struct StateNode {
    pub id: StateId,
    pub order: DocumentOrder,
    pub name: String,
    pub kind: StateKind,
    pub parent: Option<StateId>,
    /// Child states in document order, history pseudo-states included.
    pub children: Vec<StateId>,
    /// Default entry for compound states; the default transition for history states.
    pub initial: Option<TransitionId>,
    pub transitions: Vec<TransitionId>,
    pub on_entry: Vec<Action>,
    pub on_exit: Vec<Action>,
    pub invokes: Vec<InvokeId>,
    pub data: Vec<DataDecl>,
    pub done_data: Option<DoneData>,
}

impl StateNode {
    /// Atomic and final states have no child states.
    pub fn is_atomic(&self) -> bool {
        matches!(self.kind, StateKind::Atomic | StateKind::Final)
    }

    /// The root behaves as a compound state.
    pub fn is_compound(&self) -> bool {
        matches!(self.kind, StateKind::Compound | StateKind::Root)
    }

    pub fn is_parallel(&self) -> bool {
        self.kind == StateKind::Parallel
    }

    pub fn is_final(&self) -> bool {
        self.kind == StateKind::Final
    }

    pub fn is_history(&self) -> bool {
        matches!(self.kind, StateKind::History(_))
    }

    pub fn history_kind(&self) -> Option<HistoryKind> {
        match self.kind {
            StateKind::History(kind) => Some(kind),
            _ => None,
        }
    }
}

impl fmt::Display for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct TransitionNode {
    pub id: TransitionId,
    pub order: DocumentOrder,
    pub source: StateId,
    /// Empty for eventless transitions.
    pub events: Vec<EventDescriptor>,
    pub cond: Option<Expr>,
    pub targets: Vec<StateId>,
    pub kind: TransitionKind,
    pub actions: Vec<Action>,
}

impl TransitionNode {
    pub fn is_eventless(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns true if any descriptor matches the event name.
    pub fn matches(&self, event: &str) -> bool {
        self.events.iter().any(|d| d.matches(event))
    }
}

/// An `<invoke>` owned by a state.
#[derive(Debug, Clone)]
pub struct InvokeNode {
    pub id: InvokeId,
    pub order: DocumentOrder,
    pub state: StateId,
    pub invoke_type: Option<String>,
    pub type_expr: Option<Expr>,
    pub src: Option<String>,
    pub src_expr: Option<Expr>,
    pub explicit_id: Option<String>,
    pub id_location: Option<Expr>,
    pub autoforward: bool,
    pub namelist: Vec<Expr>,
    pub params: Vec<Param>,
    pub content: Option<Content>,
    pub finalize: Finalize,
}

/// Immutable, validated chart.
///
/// A chart may be shared read-only between any number of sessions.
#[derive(Debug, Clone)]
pub struct Chart {
    pub(crate) name: String,
    pub(crate) datamodel: String,
    pub(crate) binding: Binding,
    pub(crate) checksum: String,
    pub(crate) states: Vec<StateNode>,
    pub(crate) transitions: Vec<TransitionNode>,
    pub(crate) invokes: Vec<InvokeNode>,
    pub(crate) by_name: HashMap<String, StateId>,
    pub(crate) scripts: Vec<Expr>,
    pub(crate) definition: ChartDefinition,
}

impl Chart {
    /// The root state id.
    pub const ROOT: StateId = StateId(0);

    /// Parses and compiles a chart from a JSON value.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, ModelError> {
        let definition: ChartDefinition = serde_json::from_value(json.clone())?;
        Self::from_definition(definition)
    }

    /// Parses and compiles a chart from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ModelError> {
        let definition: ChartDefinition = serde_json::from_str(text)?;
        Self::from_definition(definition)
    }

    /// Parses and compiles a chart from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ModelError> {
        let definition: ChartDefinition = serde_yaml::from_str(text)?;
        Self::from_definition(definition)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Data model kind requested by the chart.
    pub fn datamodel(&self) -> &str {
        &self.datamodel
    }

    pub fn binding(&self) -> Binding {
        self.binding
    }

    /// Hex crc32c of the canonical definition.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Top-level `<script>` blocks, run once after data initialisation.
    pub fn scripts(&self) -> &[Expr] {
        &self.scripts
    }

    /// The definition this chart was compiled from.
    pub fn definition(&self) -> &ChartDefinition {
        &self.definition
    }

    pub fn state(&self, id: StateId) -> &StateNode {
        &self.states[id.index()]
    }

    pub fn transition(&self, id: TransitionId) -> &TransitionNode {
        &self.transitions[id.index()]
    }

    pub fn invoke(&self, id: InvokeId) -> &InvokeNode {
        &self.invokes[id.index()]
    }

    pub fn states(&self) -> &[StateNode] {
        &self.states
    }

    pub fn transitions(&self) -> &[TransitionNode] {
        &self.transitions
    }

    pub fn invokes(&self) -> &[InvokeNode] {
        &self.invokes
    }

    /// Looks up a state by its id attribute.
    pub fn state_id(&self, name: &str) -> Option<StateId> {
        self.by_name.get(name).copied()
    }

    /// Number of states, root included.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Number of ordered nodes (states, transitions, invokes).
    pub fn node_count(&self) -> usize {
        self.states.len() + self.transitions.len() + self.invokes.len()
    }

    /// Returns true if `state` is a proper descendant of `ancestor`.
    pub fn is_descendant(&self, state: StateId, ancestor: StateId) -> bool {
        let mut current = self.state(state).parent;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.state(p).parent;
        }
        false
    }

    /// Proper ancestors of `state`, innermost first, stopping before `stop`
    /// (or at the root, which is included when `stop` is `None`).
    pub fn proper_ancestors(&self, state: StateId, stop: Option<StateId>) -> Vec<StateId> {
        let mut ancestors = Vec::new();
        let mut current = self.state(state).parent;
        while let Some(p) = current {
            if Some(p) == stop {
                break;
            }
            ancestors.push(p);
            current = self.state(p).parent;
        }
        ancestors
    }

    /// Child states excluding history pseudo-states.
    pub fn child_states(&self, state: StateId) -> impl Iterator<Item = StateId> + '_ {
        self.state(state)
            .children
            .iter()
            .copied()
            .filter(move |c| !self.state(*c).is_history())
    }

    /// History pseudo-states directly inside `state`.
    pub fn history_children(&self, state: StateId) -> impl Iterator<Item = StateId> + '_ {
        self.state(state)
            .children
            .iter()
            .copied()
            .filter(move |c| self.state(*c).is_history())
    }

    /// Data declarations of every state in document order (root first).
    pub fn all_data(&self) -> impl Iterator<Item = (StateId, &DataDecl)> + '_ {
        self.states
            .iter()
            .flat_map(|s| s.data.iter().map(move |d| (s.id, d)))
    }
}
