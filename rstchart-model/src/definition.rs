//! Chart definition DSL and compiler.
//!
//! Charts are written as nested JSON (or YAML):
//!
//! ```json
//! {
//!   "name": "door",
//!   "initial": "closed",
//!   "data": [{"id": "opens", "expr": "0"}],
//!   "states": [
//!     {"id": "closed", "transitions": [{"event": "open", "target": "opened"}]},
//!     {"id": "opened",
//!      "on_entry": [{"action": "assign", "location": "opens", "expr": "opens + 1"}],
//!      "transitions": [{"event": "close", "target": "closed"}]}
//!   ]
//! }
//! ```
//!
//! [`Chart::from_definition`] compiles a [`ChartDefinition`] into the arena,
//! resolving state names to ids and rejecting malformed documents.

use crate::action::{validate_block, Action, Binding, Content, DataDecl, DoneData, Expr, Finalize, Param};
use crate::chart::{
    Chart, DocumentOrder, HistoryKind, InvokeId, InvokeNode, StateId, StateKind, StateNode,
    TransitionId, TransitionKind, TransitionNode,
};
use crate::descriptor::EventDescriptor;
use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name given to the root state.
pub const ROOT_NAME: &str = "__root";

fn default_datamodel() -> String {
    "json".to_string()
}

/// Top-level chart definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Data model kind (`json` or `null`).
    #[serde(default = "default_datamodel")]
    pub datamodel: String,

    #[serde(default)]
    pub binding: Binding,

    /// Initial target(s); defaults to the first child state.
    #[serde(
        default,
        deserialize_with = "deserialize_targets",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub initial: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataDecl>,

    /// Scripts run once after the data model is initialised.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<Expr>,

    pub states: Vec<StateDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    /// Atomic or compound, depending on whether it has children.
    #[default]
    State,
    Parallel,
    Final,
    History,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub state_type: StateType,

    /// Only meaningful for history states.
    pub history: HistoryKind,

    #[serde(deserialize_with = "deserialize_targets", skip_serializing_if = "Vec::is_empty")]
    pub initial: Vec<String>,

    /// Executable content of the `<initial>` element's transition.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub initial_actions: Vec<Action>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<StateDefinition>,

    /// For a history state, its single default transition.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionDefinition>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub on_entry: Vec<Action>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub on_exit: Vec<Action>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invoke: Vec<InvokeDefinition>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataDecl>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_data: Option<DoneData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionDefinition {
    /// Space-separated event descriptors. Absent for eventless transitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cond: Option<Expr>,

    /// Target state(s). A string may hold several space-separated ids.
    #[serde(deserialize_with = "deserialize_targets", skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<String>,

    #[serde(rename = "type")]
    pub kind: TransitionKind,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokeDefinition {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub invoke_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_expr: Option<Expr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_expr: Option<Expr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_location: Option<Expr>,
    pub autoforward: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub namelist: Vec<Expr>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(skip_serializing_if = "Finalize::is_empty")]
    pub finalize: Finalize,
}

fn deserialize_targets<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct TargetsVisitor;

    impl<'de> Visitor<'de> for TargetsVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or array of strings")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.split_whitespace().map(str::to_string).collect())
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Vec::new())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut targets = Vec::new();
            while let Some(s) = seq.next_element::<String>()? {
                targets.push(s);
            }
            Ok(targets)
        }
    }

    deserializer.deserialize_any(TargetsVisitor)
}

impl Chart {
    /// Compiles and validates a definition.
    pub fn from_definition(definition: ChartDefinition) -> Result<Self, ModelError> {
        if definition.states.is_empty() {
            return Err(ModelError::EmptyChart);
        }

        let mut names = Vec::new();
        let mut by_name = HashMap::new();
        names.push(ROOT_NAME.to_string());
        collect_names(&definition.states, &mut names, &mut by_name)?;

        let mut compiler = Compiler {
            names,
            by_name,
            states: Vec::new(),
            transitions: Vec::new(),
            invokes: Vec::new(),
            next_order: 0,
        };
        compiler.build_root(&definition)?;
        compiler.validate()?;

        validate_block(
            &compiler
                .states
                .iter()
                .flat_map(|s| s.on_entry.iter().chain(s.on_exit.iter()).cloned())
                .chain(compiler.transitions.iter().flat_map(|t| t.actions.iter().cloned()))
                .collect::<Vec<_>>(),
        )?;

        let canonical = serde_json::to_vec(&definition)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&canonical));
        let name = definition
            .name
            .clone()
            .unwrap_or_else(|| "chart".to_string());

        tracing::debug!(
            "Compiled chart (chart={}, states={}, transitions={})",
            name,
            compiler.states.len(),
            compiler.transitions.len()
        );

        Ok(Chart {
            name,
            datamodel: definition.datamodel.clone(),
            binding: definition.binding,
            checksum,
            states: compiler.states,
            transitions: compiler.transitions,
            invokes: compiler.invokes,
            by_name: compiler.by_name,
            scripts: definition.script.clone(),
            definition,
        })
    }
}

/// Assigns a name to every state in pre-order, generating one when absent.
fn collect_names(
    defs: &[StateDefinition],
    names: &mut Vec<String>,
    by_name: &mut HashMap<String, StateId>,
) -> Result<(), ModelError> {
    for def in defs {
        let id = StateId::new(names.len());
        let name = match &def.id {
            Some(name) => name.clone(),
            None => format!("__state{}", id.index()),
        };
        if name == ROOT_NAME || by_name.insert(name.clone(), id).is_some() {
            return Err(ModelError::DuplicateStateId { id: name });
        }
        names.push(name);
        collect_names(&def.states, names, by_name)?;
    }
    Ok(())
}

struct Compiler {
    names: Vec<String>,
    by_name: HashMap<String, StateId>,
    states: Vec<StateNode>,
    transitions: Vec<TransitionNode>,
    invokes: Vec<InvokeNode>,
    next_order: u32,
}

impl Compiler {
    fn order(&mut self) -> DocumentOrder {
        let order = DocumentOrder(self.next_order);
        self.next_order += 1;
        order
    }

    fn resolve(&self, state: StateId, targets: &[String]) -> Result<Vec<StateId>, ModelError> {
        targets
            .iter()
            .map(|t| {
                self.by_name
                    .get(t)
                    .copied()
                    .ok_or_else(|| ModelError::UnresolvedTarget {
                        state: self.names[state.index()].clone(),
                        target: t.clone(),
                    })
            })
            .collect()
    }

    /// Id the first non-history child will receive, given the parent's id.
    fn first_child(&self, parent: StateId, defs: &[StateDefinition]) -> Option<StateId> {
        let mut next = parent.index() + 1;
        for def in defs {
            if def.state_type != StateType::History {
                return Some(StateId::new(next));
            }
            next += subtree_size(def);
        }
        None
    }

    fn push_transition(
        &mut self,
        source: StateId,
        events: Vec<EventDescriptor>,
        cond: Option<Expr>,
        targets: Vec<StateId>,
        kind: TransitionKind,
        actions: Vec<Action>,
    ) -> TransitionId {
        let id = TransitionId::new(self.transitions.len());
        let order = self.order();
        self.transitions.push(TransitionNode {
            id,
            order,
            source,
            events,
            cond,
            targets,
            kind,
            actions,
        });
        id
    }

    fn build_root(&mut self, def: &ChartDefinition) -> Result<(), ModelError> {
        let id = Chart::ROOT;
        let order = self.order();
        self.states.push(StateNode {
            id,
            order,
            name: ROOT_NAME.to_string(),
            kind: StateKind::Root,
            parent: None,
            children: Vec::new(),
            initial: None,
            transitions: Vec::new(),
            on_entry: Vec::new(),
            on_exit: Vec::new(),
            invokes: Vec::new(),
            data: def.data.clone(),
            done_data: None,
        });

        let targets = if def.initial.is_empty() {
            self.first_child(id, &def.states).into_iter().collect()
        } else {
            self.resolve(id, &def.initial)?
        };
        if targets.is_empty() {
            return Err(ModelError::InvalidInitial {
                state: ROOT_NAME.to_string(),
                reason: "chart has no child state to enter".to_string(),
            });
        }
        let initial = self.push_transition(
            id,
            Vec::new(),
            None,
            targets,
            TransitionKind::Internal,
            Vec::new(),
        );
        self.states[id.index()].initial = Some(initial);

        for child in &def.states {
            let child_id = self.build_state(child, id)?;
            self.states[id.index()].children.push(child_id);
        }
        Ok(())
    }

    fn build_state(&mut self, def: &StateDefinition, parent: StateId) -> Result<StateId, ModelError> {
        let id = StateId::new(self.states.len());
        let name = self.names[id.index()].clone();
        let invalid = |reason: &str| ModelError::InvalidState {
            state: name.clone(),
            reason: reason.to_string(),
        };

        let kind = match def.state_type {
            StateType::History => StateKind::History(def.history),
            StateType::Final => StateKind::Final,
            StateType::Parallel => StateKind::Parallel,
            StateType::State if def.states.is_empty() => StateKind::Atomic,
            StateType::State => StateKind::Compound,
        };

        match kind {
            StateKind::Final | StateKind::History(_) if !def.states.is_empty() => {
                return Err(invalid("final and history states cannot have child states"));
            }
            StateKind::Final if !def.transitions.is_empty() || !def.invoke.is_empty() => {
                return Err(invalid("final states cannot have transitions or invokes"));
            }
            StateKind::Compound | StateKind::Parallel
                if def.states.iter().all(|c| c.state_type == StateType::History)
                    && !def.states.is_empty() =>
            {
                return Err(invalid("state has only history children"));
            }
            _ => {}
        }
        if !matches!(kind, StateKind::Compound) && !def.initial.is_empty() {
            return Err(ModelError::InvalidInitial {
                state: name.clone(),
                reason: "only compound states may declare an initial".to_string(),
            });
        }

        let order = self.order();
        self.states.push(StateNode {
            id,
            order,
            name: name.clone(),
            kind,
            parent: Some(parent),
            children: Vec::new(),
            initial: None,
            transitions: Vec::new(),
            on_entry: def.on_entry.clone(),
            on_exit: def.on_exit.clone(),
            invokes: Vec::new(),
            data: def.data.clone(),
            done_data: def.done_data.clone(),
        });

        if let StateKind::History(_) = kind {
            if def.transitions.len() != 1 {
                return Err(ModelError::InvalidHistory {
                    state: name.clone(),
                    reason: "requires exactly one default transition".to_string(),
                });
            }
            let t = &def.transitions[0];
            if t.event.is_some() || t.cond.is_some() {
                return Err(ModelError::InvalidHistory {
                    state: name.clone(),
                    reason: "default transition cannot have an event or condition".to_string(),
                });
            }
            let targets = self.resolve(id, &t.target)?;
            let default = self.push_transition(
                id,
                Vec::new(),
                None,
                targets,
                TransitionKind::External,
                t.actions.clone(),
            );
            self.states[id.index()].initial = Some(default);
            return Ok(id);
        }

        if kind == StateKind::Compound {
            let targets = if def.initial.is_empty() {
                self.first_child(id, &def.states).into_iter().collect()
            } else {
                self.resolve(id, &def.initial)?
            };
            let initial = self.push_transition(
                id,
                Vec::new(),
                None,
                targets,
                TransitionKind::External,
                def.initial_actions.clone(),
            );
            self.states[id.index()].initial = Some(initial);
        } else if !def.initial_actions.is_empty() {
            return Err(ModelError::InvalidInitial {
                state: name.clone(),
                reason: "initial actions require a compound state".to_string(),
            });
        }

        for t in &def.transitions {
            let targets = self.resolve(id, &t.target)?;
            let events = t
                .event
                .as_deref()
                .map(EventDescriptor::parse_list)
                .unwrap_or_default();
            let tid = self.push_transition(id, events, t.cond.clone(), targets, t.kind, t.actions.clone());
            self.states[id.index()].transitions.push(tid);
        }

        for inv in &def.invoke {
            if inv.invoke_type.is_some() && inv.type_expr.is_some() {
                return Err(invalid("<invoke> cannot have both type and typeexpr"));
            }
            if inv.src.is_some() && inv.src_expr.is_some() {
                return Err(invalid("<invoke> cannot have both src and srcexpr"));
            }
            if inv.id.is_some() && inv.id_location.is_some() {
                return Err(invalid("<invoke> cannot have both id and idlocation"));
            }
            let iid = InvokeId::new(self.invokes.len());
            let order = self.order();
            self.invokes.push(InvokeNode {
                id: iid,
                order,
                state: id,
                invoke_type: inv.invoke_type.clone(),
                type_expr: inv.type_expr.clone(),
                src: inv.src.clone(),
                src_expr: inv.src_expr.clone(),
                explicit_id: inv.id.clone(),
                id_location: inv.id_location.clone(),
                autoforward: inv.autoforward,
                namelist: inv.namelist.clone(),
                params: inv.params.clone(),
                content: inv.content.clone(),
                finalize: inv.finalize.clone(),
            });
            self.states[id.index()].invokes.push(iid);
        }

        for child in &def.states {
            let child_id = self.build_state(child, id)?;
            self.states[id.index()].children.push(child_id);
        }

        Ok(id)
    }

    /// Checks that need the finished hierarchy.
    fn validate(&self) -> Result<(), ModelError> {
        let is_descendant = |s: StateId, ancestor: StateId| {
            let mut current = self.states[s.index()].parent;
            while let Some(p) = current {
                if p == ancestor {
                    return true;
                }
                current = self.states[p.index()].parent;
            }
            false
        };

        for state in &self.states {
            match state.kind {
                StateKind::History(_) => {
                    let parent = state.parent.unwrap_or(Chart::ROOT);
                    if !matches!(
                        self.states[parent.index()].kind,
                        StateKind::Compound | StateKind::Parallel
                    ) {
                        return Err(ModelError::InvalidHistory {
                            state: state.name.clone(),
                            reason: "history must be a child of a compound or parallel state"
                                .to_string(),
                        });
                    }
                    if let Some(default) = state.initial {
                        let targets = &self.transitions[default.index()].targets;
                        if targets.is_empty() {
                            return Err(ModelError::InvalidHistory {
                                state: state.name.clone(),
                                reason: "default transition has no target".to_string(),
                            });
                        }
                        if let Some(bad) = targets.iter().find(|t| {
                            !is_descendant(**t, parent) || self.states[t.index()].is_history()
                        }) {
                            return Err(ModelError::InvalidHistory {
                                state: state.name.clone(),
                                reason: format!(
                                    "default target '{}' is not inside '{}'",
                                    self.names[bad.index()],
                                    self.names[parent.index()]
                                ),
                            });
                        }
                    }
                }
                StateKind::Root | StateKind::Compound => {
                    if let Some(initial) = state.initial {
                        for t in &self.transitions[initial.index()].targets {
                            if !is_descendant(*t, state.id) {
                                return Err(ModelError::InvalidInitial {
                                    state: state.name.clone(),
                                    reason: format!(
                                        "initial target '{}' is not a descendant",
                                        self.names[t.index()]
                                    ),
                                });
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn subtree_size(def: &StateDefinition) -> usize {
    1 + def.states.iter().map(subtree_size).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_basic_chart() {
        let chart = Chart::from_json(&json!({
            "name": "door",
            "initial": "closed",
            "states": [
                {"id": "closed", "transitions": [{"event": "open", "target": "opened"}]},
                {"id": "opened", "transitions": [{"event": "close", "target": "closed"}]}
            ]
        }))
        .unwrap();

        assert_eq!(chart.name(), "door");
        assert_eq!(chart.datamodel(), "json");
        assert_eq!(chart.state_count(), 3);
        assert_eq!(chart.checksum().len(), 8);

        let closed = chart.state_id("closed").unwrap();
        let t = chart.transition(chart.state(closed).transitions[0]);
        assert!(t.matches("open"));
        assert_eq!(t.targets, vec![chart.state_id("opened").unwrap()]);
    }

    #[test]
    fn test_default_initial_skips_history() {
        let chart = Chart::from_json(&json!({
            "states": [
                {"id": "p", "states": [
                    {"id": "h", "type": "history", "transitions": [{"target": "b"}]},
                    {"id": "a"},
                    {"id": "b"}
                ]}
            ]
        }))
        .unwrap();

        let p = chart.state_id("p").unwrap();
        let initial = chart.transition(chart.state(p).initial.unwrap());
        assert_eq!(initial.targets, vec![chart.state_id("a").unwrap()]);
    }

    #[test]
    fn test_multiple_targets_from_string() {
        let chart = Chart::from_json(&json!({
            "states": [
                {"id": "s", "transitions": [{"event": "go", "target": "a b"}]},
                {"id": "p", "type": "parallel", "states": [{"id": "a"}, {"id": "b"}]}
            ]
        }))
        .unwrap();
        let s = chart.state_id("s").unwrap();
        assert_eq!(chart.transition(chart.state(s).transitions[0]).targets.len(), 2);
    }

    #[test]
    fn test_yaml_definition() {
        let chart = Chart::from_yaml(
            r#"
name: light
states:
  - id: off
    transitions:
      - event: flip
        target: on
  - id: on
    type: final
"#,
        )
        .unwrap();
        assert_eq!(chart.name(), "light");
        assert!(chart.state(chart.state_id("on").unwrap()).is_final());
    }

    #[test]
    fn test_generated_names() {
        let chart = Chart::from_json(&json!({"states": [{}, {"id": "x"}]})).unwrap();
        assert!(chart.state_id("__state1").is_some());
        assert_eq!(chart.state_id("x").unwrap().index(), 2);
    }

    #[test]
    fn test_reject_empty_chart() {
        let err = Chart::from_json(&json!({"states": []})).unwrap_err();
        assert!(matches!(err, ModelError::EmptyChart));
    }

    #[test]
    fn test_reject_duplicate_id() {
        let err = Chart::from_json(&json!({
            "states": [{"id": "a", "states": [{"id": "b"}]}, {"id": "b"}]
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateStateId { ref id } if id == "b"));
    }

    #[test]
    fn test_reject_unresolved_target() {
        let err = Chart::from_json(&json!({
            "states": [{"id": "a", "transitions": [{"event": "e", "target": "nowhere"}]}]
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::UnresolvedTarget { .. }));
        assert_eq!(err.error_code(), "UNRESOLVED_TARGET");
    }

    #[test]
    fn test_reject_initial_outside_state() {
        let err = Chart::from_json(&json!({
            "states": [
                {"id": "a", "initial": "b", "states": [{"id": "a1"}]},
                {"id": "b"}
            ]
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidInitial { .. }));
    }

    #[test]
    fn test_reject_parallel_initial() {
        let err = Chart::from_json(&json!({
            "states": [{"id": "p", "type": "parallel", "initial": "a",
                        "states": [{"id": "a"}, {"id": "b"}]}]
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidInitial { .. }));
    }

    #[test]
    fn test_reject_final_with_children() {
        let err = Chart::from_json(&json!({
            "states": [{"id": "f", "type": "final", "states": [{"id": "x"}]}]
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidState { .. }));
    }

    #[test]
    fn test_reject_history_without_default() {
        let err = Chart::from_json(&json!({
            "states": [{"id": "p", "states": [{"id": "h", "type": "history"}, {"id": "a"}]}]
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidHistory { .. }));
    }

    #[test]
    fn test_reject_history_default_outside_parent() {
        let err = Chart::from_json(&json!({
            "states": [
                {"id": "p", "states": [
                    {"id": "h", "type": "history", "transitions": [{"target": "q"}]},
                    {"id": "a"}
                ]},
                {"id": "q"}
            ]
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidHistory { .. }));
    }

    #[test]
    fn test_reject_history_at_top_level() {
        let err = Chart::from_json(&json!({
            "states": [
                {"id": "a"},
                {"id": "h", "type": "history", "transitions": [{"target": "a"}]}
            ]
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidHistory { .. }));
    }

    #[test]
    fn test_reject_send_in_finalize() {
        let err = Chart::from_json(&json!({
            "states": [{"id": "a", "invoke": [{
                "type": "scxml",
                "finalize": [{"action": "send", "event": "x"}]
            }]}]
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::Json(_)));
    }

    #[test]
    fn test_reject_invalid_action() {
        let err = Chart::from_json(&json!({
            "states": [{"id": "a", "on_entry": [{"action": "raise", "event": " "}]}]
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidAction { .. }));
    }

    #[test]
    fn test_checksum_stable() {
        let def = json!({"states": [{"id": "a"}, {"id": "b"}]});
        let a = Chart::from_json(&def).unwrap();
        let b = Chart::from_json(&def).unwrap();
        assert_eq!(a.checksum(), b.checksum());

        let c = Chart::from_json(&json!({"states": [{"id": "a"}, {"id": "c"}]})).unwrap();
        assert_ne!(a.checksum(), c.checksum());
    }
}
