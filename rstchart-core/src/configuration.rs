//! Active configuration.

use rstchart_model::{Chart, StateId, StateKind};
use std::collections::BTreeSet;

/// The set of active states, iterated in document order.
///
/// Every active state's ancestors (except the root) are active too, so the
/// set holds compound and parallel states as well as leaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    states: BTreeSet<StateId>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, state: StateId) -> bool {
        self.states.contains(&state)
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Active states in document order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = StateId> + '_ {
        self.states.iter().copied()
    }

    pub(crate) fn insert(&mut self, state: StateId) -> bool {
        self.states.insert(state)
    }

    pub(crate) fn remove(&mut self, state: StateId) -> bool {
        self.states.remove(&state)
    }

    pub(crate) fn clear(&mut self) {
        self.states.clear();
    }

    /// Active atomic and final states in document order.
    pub fn atomic<'a>(&'a self, chart: &'a Chart) -> impl Iterator<Item = StateId> + 'a {
        self.iter().filter(move |s| chart.state(*s).is_atomic())
    }

    /// Names of the active states in document order.
    pub fn names(&self, chart: &Chart) -> Vec<String> {
        self.iter().map(|s| chart.state(s).name.clone()).collect()
    }

    /// Names of the active leaves in document order.
    pub fn leaf_names(&self, chart: &Chart) -> Vec<String> {
        self.atomic(chart)
            .map(|s| chart.state(s).name.clone())
            .collect()
    }

    /// Checks the structural invariants: every active state's parent is
    /// active, an active compound state has exactly one active child, and an
    /// active parallel state has all of its children active.
    pub fn check(&self, chart: &Chart) -> Result<(), String> {
        if self.states.is_empty() {
            return Ok(());
        }

        let root_children = chart
            .child_states(Chart::ROOT)
            .filter(|c| self.contains(*c))
            .count();
        if root_children != 1 {
            return Err(format!(
                "root has {} active children, expected 1",
                root_children
            ));
        }

        for state in self.iter() {
            let node = chart.state(state);
            if node.is_history() || node.kind == StateKind::Root {
                return Err(format!("pseudo-state '{}' is active", node.name));
            }
            if let Some(parent) = node.parent {
                if parent != Chart::ROOT && !self.contains(parent) {
                    return Err(format!(
                        "'{}' is active but its parent '{}' is not",
                        node.name,
                        chart.state(parent).name
                    ));
                }
            }

            let active_children = chart
                .child_states(state)
                .filter(|c| self.contains(*c))
                .count();
            match node.kind {
                StateKind::Compound if active_children != 1 => {
                    return Err(format!(
                        "compound '{}' has {} active children",
                        node.name, active_children
                    ));
                }
                StateKind::Parallel => {
                    let total = chart.child_states(state).count();
                    if active_children != total {
                        return Err(format!(
                            "parallel '{}' has {} of {} children active",
                            node.name, active_children, total
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
