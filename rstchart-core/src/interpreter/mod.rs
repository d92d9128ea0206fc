//! The step algorithm.
//!
//! An [`Interpreter`] owns one session's configuration, internal queue, history
//! records and invoke table. It is driven by the host: [`Interpreter::initialize`]
//! enters the initial configuration, and each [`Interpreter::step`] processes
//! at most one external event to a stable configuration. Internal events are
//! always drained before `step` returns, so the host only ever sees stable
//! configurations.
//!
//! Every ordering decision uses document order: transitions are selected from
//! active leaves in document order, exits run in reverse document order and
//! entries in document order.

use crate::checkpoint::{now_millis, Cursor, InvokeRecord};
use crate::configuration::Configuration;
use crate::datamodel::{DataModel, StateQuery, SystemVars};
use crate::error::{CoreError, EvalError};
use crate::event::{is_scxml_processor, Event, EventKind, SCXML_PROCESSOR};
use crate::invoke::{InvokeStatus, InvokeTable};
use crate::platform::{Collaborators, InvokeRequest, PendingSend, SCXML_INVOKE_TYPE};
use rstchart_model::{
    parse_delay, Action, Binding, Chart, Content, DataDecl, Expr, HistoryKind, InvokeNode, Param,
    SendAction, StateId, TransitionId, TransitionKind,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;


/// Lifecycle of an interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Built but not yet initialized or restored.
    Created,
    /// Stable and waiting for the next external event.
    AwaitingEvent,
    /// A top-level final state was reached.
    Completed,
    /// Torn down by [`Interpreter::terminate`].
    Cancelled,
}

/// Result of `initialize`, `restore` and `step`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Stabilized(Configuration),
    /// The chart finished; carries the top-level final state's done data.
    Completed(Value),
}

/// Observable entry, exit and transition sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    Entered {
        state: String,
    },
    Exited {
        state: String,
    },
    Transition {
        source: String,
        targets: Vec<String>,
        event: Option<String>,
    },
}

struct ActiveStates<'a> {
    chart: &'a Chart,
    configuration: &'a Configuration,
}

impl StateQuery for ActiveStates<'_> {
    fn in_state(&self, name: &str) -> bool {
        self.chart
            .state_id(name)
            .map(|id| self.configuration.contains(id))
            .unwrap_or(false)
    }
}

#[derive(Default)]
struct EntrySet {
    states: BTreeSet<StateId>,
    for_default: BTreeSet<StateId>,
    /// Parent state to the history default transition whose content runs on entry.
    history_content: BTreeMap<StateId, TransitionId>,
}

pub struct Interpreter {
    chart: Arc<Chart>,
    session_id: String,
    datamodel: Box<dyn DataModel>,
    collab: Collaborators,
    configuration: Configuration,
    history: BTreeMap<StateId, Vec<StateId>>,
    internal: VecDeque<Event>,
    invokes: InvokeTable,
    late_bound: BTreeSet<StateId>,
    data_overrides: Map<String, Value>,
    status: Status,
    running: bool,
    done_data: Value,
    current_event: Option<String>,
    trace: Vec<TraceEvent>,
    invoke_seq: u64,
    macrostep: u64,
    check_consistency: bool,
    violation: Option<String>,
}

impl Interpreter {
    pub fn new(
        chart: Arc<Chart>,
        session_id: impl Into<String>,
        datamodel: Box<dyn DataModel>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            chart,
            session_id: session_id.into(),
            datamodel,
            collab: collaborators,
            configuration: Configuration::new(),
            history: BTreeMap::new(),
            internal: VecDeque::new(),
            invokes: InvokeTable::new(),
            late_bound: BTreeSet::new(),
            data_overrides: Map::new(),
            status: Status::Created,
            running: false,
            done_data: Value::Null,
            current_event: None,
            trace: Vec::new(),
            invoke_seq: 0,
            macrostep: 0,
            check_consistency: false,
            violation: None,
        }
    }

    /// Values that replace the initial value of same-named data declarations.
    pub fn with_initial_data(mut self, overrides: Map<String, Value>) -> Self {
        self.data_overrides = overrides;
        self
    }

    /// Verifies the configuration invariants after every micro-step. The first
    /// violation is kept and reported by [`Interpreter::consistency_violation`].
    pub fn with_consistency_checks(mut self, enabled: bool) -> Self {
        self.check_consistency = enabled;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn chart(&self) -> &Arc<Chart> {
        &self.chart
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Names of all active states in document order.
    pub fn active_states(&self) -> Vec<String> {
        self.configuration.names(&self.chart)
    }

    pub fn is_in_state(&self, name: &str) -> bool {
        self.view().in_state(name)
    }

    pub fn invokes(&self) -> &InvokeTable {
        &self.invokes
    }

    pub fn datamodel(&self) -> &dyn DataModel {
        self.datamodel.as_ref()
    }

    /// Number of external events processed.
    pub fn macrostep(&self) -> u64 {
        self.macrostep
    }

    pub fn consistency_violation(&self) -> Option<&str> {
        self.violation.as_deref()
    }

    /// Takes the trace recorded since the last call.
    pub fn drain_trace(&mut self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.trace)
    }

    fn view(&self) -> ActiveStates<'_> {
        ActiveStates {
            chart: &self.chart,
            configuration: &self.configuration,
        }
    }

    // ------------------------------------------------------------------
    // Public entry points
    // ------------------------------------------------------------------

    /// Initialises the data model and enters the initial configuration.
    pub fn initialize(&mut self) -> Result<StepOutcome, CoreError> {
        if self.status != Status::Created {
            return Err(CoreError::AlreadyStarted);
        }

        tracing::info!(
            "[{}] Starting session (chart={}, datamodel={})",
            self.session_id,
            self.chart.name(),
            self.datamodel.kind()
        );

        self.bind_system()?;

        let chart = Arc::clone(&self.chart);
        match chart.binding() {
            Binding::Early => {
                for (_, decl) in chart.all_data() {
                    self.declare_data(decl);
                }
            }
            Binding::Late => {
                for decl in &chart.state(Chart::ROOT).data {
                    self.declare_data(decl);
                }
                self.late_bound.insert(Chart::ROOT);
            }
        }

        for script in chart.scripts() {
            let view = ActiveStates {
                chart: &self.chart,
                configuration: &self.configuration,
            };
            if let Err(e) = self.datamodel.execute(script, &view) {
                self.raise_error(e);
            }
        }

        self.status = Status::AwaitingEvent;
        self.running = true;

        if let Some(initial) = chart.state(Chart::ROOT).initial {
            self.enter_states(&[initial]);
            self.after_microstep();
        }

        self.stabilize()
    }

    /// Processes one external event (or none) to a stable configuration.
    pub fn step(&mut self, event: Option<Event>) -> Result<StepOutcome, CoreError> {
        match self.status {
            Status::Created => return Err(CoreError::NotInitialized),
            Status::Cancelled => return Err(CoreError::Terminated),
            Status::Completed => return Ok(StepOutcome::Completed(self.done_data.clone())),
            Status::AwaitingEvent => {}
        }

        if let Some(event) = event {
            self.macrostep += 1;
            self.process_external(event);
        }

        self.stabilize()
    }

    /// Cancels the session: running invokes and pending timers are torn down
    /// and no exit actions run.
    pub fn terminate(&mut self) {
        if matches!(self.status, Status::Completed | Status::Cancelled) {
            return;
        }
        for id in self.invokes.cancel_all() {
            tracing::debug!("[{}] Cancelled invoke {}", self.session_id, id);
        }
        self.collab.timers.cancel_session(&self.session_id);
        self.internal.clear();
        self.running = false;
        self.status = Status::Cancelled;
        tracing::info!("[{}] Session cancelled", self.session_id);
    }

    /// Captures the session at the current macro-step boundary.
    pub fn checkpoint(&self) -> Result<Cursor, CoreError> {
        if self.status == Status::Created {
            return Err(CoreError::NotInitialized);
        }
        let chart = &self.chart;
        let name = |s: &StateId| chart.state(*s).name.clone();

        let invokes = self
            .invokes
            .iter()
            .filter(|e| matches!(e.status, InvokeStatus::Running | InvokeStatus::Starting))
            .filter_map(|e| {
                let index = chart.state(e.state).invokes.iter().position(|n| *n == e.node)?;
                Some(InvokeRecord {
                    invoke_id: e.invoke_id.clone()?,
                    state: name(&e.state),
                    index,
                })
            })
            .collect();

        Ok(Cursor {
            session_id: self.session_id.clone(),
            chart: chart.name().to_string(),
            checksum: chart.checksum().to_string(),
            configuration: self.configuration.names(chart),
            history: self
                .history
                .iter()
                .map(|(h, rec)| (name(h), rec.iter().map(name).collect()))
                .collect(),
            internal_queue: self.internal.iter().cloned().collect(),
            external_queue: Vec::new(),
            pending_timers: self.collab.timers.pending(&self.session_id),
            datamodel: self.datamodel.snapshot(),
            invokes,
            late_bound: self.late_bound.iter().map(name).collect(),
            invoke_seq: self.invoke_seq,
            macrostep: self.macrostep,
            created_at: now_millis(),
        })
    }

    /// Resumes a session from a cursor instead of initializing it.
    ///
    /// Pending timers are rescheduled and invokes that were running are
    /// started again under their previous ids. The cursor's external queue is
    /// left to the host.
    pub fn restore(&mut self, cursor: &Cursor) -> Result<StepOutcome, CoreError> {
        if self.status != Status::Created {
            return Err(CoreError::AlreadyStarted);
        }
        let chart = Arc::clone(&self.chart);
        if cursor.checksum != chart.checksum() {
            return Err(CoreError::ChecksumMismatch {
                chart: cursor.chart.clone(),
                expected: chart.checksum().to_string(),
                actual: cursor.checksum.clone(),
            });
        }
        if cursor.configuration.is_empty() {
            return Err(CoreError::InvalidCursor {
                reason: "checkpoint has an empty configuration".to_string(),
            });
        }

        let resolve = |name: &str| {
            chart
                .state_id(name)
                .ok_or_else(|| CoreError::InvalidCursor {
                    reason: format!("unknown state '{}'", name),
                })
        };

        let mut configuration = Configuration::new();
        for name in &cursor.configuration {
            configuration.insert(resolve(name)?);
        }
        configuration
            .check(&chart)
            .map_err(|reason| CoreError::InvalidCursor { reason })?;

        let mut history = BTreeMap::new();
        for (h, record) in &cursor.history {
            let states = record
                .iter()
                .map(|s| resolve(s))
                .collect::<Result<Vec<_>, _>>()?;
            history.insert(resolve(h)?, states);
        }

        let mut late_bound = BTreeSet::new();
        for name in &cursor.late_bound {
            late_bound.insert(if name == rstchart_model::ROOT_NAME {
                Chart::ROOT
            } else {
                resolve(name)?
            });
        }

        self.session_id = cursor.session_id.clone();
        self.datamodel.restore(cursor.datamodel.clone())?;
        self.bind_system()?;

        for record in &cursor.invokes {
            let state = resolve(&record.state)?;
            let node = chart
                .state(state)
                .invokes
                .get(record.index)
                .copied()
                .ok_or_else(|| CoreError::InvalidCursor {
                    reason: format!("state '{}' has no invoke #{}", record.state, record.index),
                })?;
            self.invokes
                .schedule_restored(&chart, node, record.invoke_id.clone());
        }

        self.configuration = configuration;
        self.history = history;
        self.late_bound = late_bound;
        self.internal = cursor.internal_queue.iter().cloned().collect();
        self.invoke_seq = cursor.invoke_seq;
        self.macrostep = cursor.macrostep;
        self.status = Status::AwaitingEvent;
        self.running = true;

        for pending in &cursor.pending_timers {
            let mut pending = pending.clone();
            pending.session_id = self.session_id.clone();
            let send_id = pending.send_id.clone();
            if let Err(e) = self.collab.timers.schedule(pending) {
                self.internal
                    .push_back(Event::error_communication(e.to_string(), Some(&send_id)));
            }
        }

        tracing::info!(
            "[{}] Restored session (chart={}, macrostep={})",
            self.session_id,
            chart.name(),
            self.macrostep
        );

        self.stabilize()
    }

    // ------------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------------

    fn process_external(&mut self, event: Event) {
        tracing::debug!("[{}] Processing external event {}", self.session_id, event.name);

        if let Some(invoke_id) = event.invoke_id.clone() {
            if !self.invokes.accepts(&invoke_id) {
                tracing::warn!(
                    "[{}] Dropping event from inactive invoke (invoke={}, event={})",
                    self.session_id,
                    invoke_id,
                    event.name
                );
                return;
            }
            self.datamodel.set_event(&event);
            self.run_finalize(&invoke_id);
            if event.done_invoke_id() == Some(invoke_id.as_str()) {
                self.invokes.mark_done(&invoke_id);
            }
        }

        self.datamodel.set_event(&event);
        for (id, err) in self.invokes.autoforward(&event) {
            tracing::warn!("[{}] Autoforward failed (invoke={}): {}", self.session_id, id, err);
        }

        self.current_event = Some(event.name.clone());
        let enabled = self.select_transitions(Some(&event));
        if !enabled.is_empty() {
            self.microstep(&enabled);
        }
    }

    fn run_finalize(&mut self, invoke_id: &str) {
        let Some(node) = self.invokes.find(invoke_id).map(|e| e.node) else {
            return;
        };
        let chart = Arc::clone(&self.chart);
        let finalize = &chart.invoke(node).finalize;
        if !finalize.is_empty() {
            self.execute_block(finalize.actions());
        }
    }

    /// Runs macro-steps and starts invokes until nothing is left to do.
    fn stabilize(&mut self) -> Result<StepOutcome, CoreError> {
        loop {
            self.run_macrostep();
            if !self.running {
                return Ok(self.finish());
            }
            self.start_pending_invokes();
            if self.internal.is_empty() {
                break;
            }
        }
        Ok(StepOutcome::Stabilized(self.configuration.clone()))
    }

    fn run_macrostep(&mut self) {
        while self.running {
            let mut enabled = self.select_transitions(None);
            if enabled.is_empty() {
                let Some(event) = self.internal.pop_front() else {
                    break;
                };
                tracing::debug!(
                    "[{}] Processing internal event {}",
                    self.session_id,
                    event.name
                );
                self.datamodel.set_event(&event);
                self.current_event = Some(event.name.clone());
                enabled = self.select_transitions(Some(&event));
            } else {
                self.current_event = None;
            }
            if !enabled.is_empty() {
                self.microstep(&enabled);
            }
        }
    }

    /// Exits every active state after a top-level final state was entered.
    fn finish(&mut self) -> StepOutcome {
        if self.status != Status::Completed {
            let chart = Arc::clone(&self.chart);
            let active: Vec<StateId> = self.configuration.iter().rev().collect();
            for state in active {
                self.invokes.cancel_state(state);
                self.execute_block(&chart.state(state).on_exit);
                self.configuration.remove(state);
                self.trace.push(TraceEvent::Exited {
                    state: chart.state(state).name.clone(),
                });
            }
            self.invokes.cancel_all();
            self.collab.timers.cancel_session(&self.session_id);
            self.internal.clear();
            self.configuration.clear();
            self.status = Status::Completed;
            tracing::info!(
                "[{}] Session completed (done_data={})",
                self.session_id,
                self.done_data
            );
        }
        StepOutcome::Completed(self.done_data.clone())
    }

    // ------------------------------------------------------------------
    // Transition selection
    // ------------------------------------------------------------------

    fn select_transitions(&mut self, event: Option<&Event>) -> Vec<TransitionId> {
        let chart = Arc::clone(&self.chart);
        let atomic: Vec<StateId> = self.configuration.atomic(&chart).collect();
        let mut enabled = Vec::new();

        for state in atomic {
            'ancestors: for s in std::iter::once(state).chain(chart.proper_ancestors(state, None)) {
                for &t in &chart.state(s).transitions {
                    let tr = chart.transition(t);
                    let matches = match event {
                        None => tr.is_eventless(),
                        Some(e) => !tr.is_eventless() && tr.matches(&e.name),
                    };
                    if matches && self.condition_holds(tr.cond.as_ref()) {
                        if !enabled.contains(&t) {
                            enabled.push(t);
                        }
                        break 'ancestors;
                    }
                }
            }
        }

        self.remove_conflicting(enabled)
    }

    /// A guard that fails to evaluate counts as false.
    fn condition_holds(&mut self, cond: Option<&Expr>) -> bool {
        let Some(cond) = cond else {
            return true;
        };
        let view = ActiveStates {
            chart: &self.chart,
            configuration: &self.configuration,
        };
        match self.datamodel.eval_bool(cond, &view) {
            Ok(value) => value,
            Err(e) => {
                self.raise_error(e);
                false
            }
        }
    }

    /// Of two transitions whose exit sets intersect, keeps the one whose
    /// source comes first in document order. This holds for an ancestor
    /// racing a descendant too: the ancestor's transition wins.
    fn remove_conflicting(&self, mut enabled: Vec<TransitionId>) -> Vec<TransitionId> {
        enabled.sort_by_key(|&t| (self.chart.transition(t).source, t));

        let mut filtered: Vec<TransitionId> = Vec::new();
        let mut exits: Vec<BTreeSet<StateId>> = Vec::new();
        for t in enabled {
            let exit = self.compute_exit_set(&[t]);
            if exits.iter().all(|kept| kept.is_disjoint(&exit)) {
                filtered.push(t);
                exits.push(exit);
            }
        }
        filtered
    }

    fn compute_exit_set(&self, transitions: &[TransitionId]) -> BTreeSet<StateId> {
        let mut exit = BTreeSet::new();
        for &t in transitions {
            if self.chart.transition(t).targets.is_empty() {
                continue;
            }
            if let Some(domain) = self.transition_domain(t) {
                exit.extend(
                    self.configuration
                        .iter()
                        .filter(|s| self.chart.is_descendant(*s, domain)),
                );
            }
        }
        exit
    }

    fn transition_domain(&self, t: TransitionId) -> Option<StateId> {
        let chart = &self.chart;
        let tr = chart.transition(t);
        let targets = self.effective_targets(t);
        if targets.is_empty() {
            return None;
        }
        if tr.kind == TransitionKind::Internal
            && chart.state(tr.source).is_compound()
            && targets.iter().all(|s| chart.is_descendant(*s, tr.source))
        {
            return Some(tr.source);
        }
        let mut states = vec![tr.source];
        states.extend(targets);
        Some(self.find_lcca(&states))
    }

    /// Least common compound ancestor.
    fn find_lcca(&self, states: &[StateId]) -> StateId {
        let chart = &self.chart;
        let Some((head, rest)) = states.split_first() else {
            return Chart::ROOT;
        };
        chart
            .proper_ancestors(*head, None)
            .into_iter()
            .find(|anc| {
                chart.state(*anc).is_compound()
                    && rest.iter().all(|s| chart.is_descendant(*s, *anc))
            })
            .unwrap_or(Chart::ROOT)
    }

    fn effective_targets(&self, t: TransitionId) -> BTreeSet<StateId> {
        let mut targets = BTreeSet::new();
        for &s in &self.chart.transition(t).targets {
            self.collect_effective(s, &mut targets);
        }
        targets
    }

    fn collect_effective(&self, state: StateId, out: &mut BTreeSet<StateId>) {
        let node = self.chart.state(state);
        if !node.is_history() {
            out.insert(state);
            return;
        }
        if let Some(record) = self.history.get(&state) {
            out.extend(record.iter().copied());
        } else if let Some(default) = node.initial {
            for &s in &self.chart.transition(default).targets {
                self.collect_effective(s, out);
            }
        }
    }

    // ------------------------------------------------------------------
    // Micro-step
    // ------------------------------------------------------------------

    fn microstep(&mut self, enabled: &[TransitionId]) {
        self.exit_states(enabled);
        self.execute_transition_content(enabled);
        self.enter_states(enabled);
        self.after_microstep();
    }

    fn after_microstep(&mut self) {
        if self.check_consistency && self.violation.is_none() {
            if let Err(reason) = self.configuration.check(&self.chart) {
                tracing::warn!(
                    "[{}] Inconsistent configuration: {}",
                    self.session_id,
                    reason
                );
                self.violation = Some(reason);
            }
        }
    }

    fn exit_states(&mut self, enabled: &[TransitionId]) {
        let chart = Arc::clone(&self.chart);
        let exit_set = self.compute_exit_set(enabled);
        // history is computed against the configuration as it was before any exit
        let before = self.configuration.clone();

        for state in exit_set.into_iter().rev() {
            let node = chart.state(state);

            for h in chart.history_children(state) {
                let deep = chart.state(h).history_kind() == Some(HistoryKind::Deep);
                let record: Vec<StateId> = before
                    .iter()
                    .filter(|s| {
                        if deep {
                            chart.state(*s).is_atomic() && chart.is_descendant(*s, state)
                        } else {
                            chart.state(*s).parent == Some(state)
                        }
                    })
                    .collect();
                self.history.insert(h, record);
            }

            for id in self.invokes.cancel_state(state) {
                tracing::debug!("[{}] Cancelled invoke {}", self.session_id, id);
            }

            self.execute_block(&node.on_exit);
            self.configuration.remove(state);
            tracing::debug!("[{}] Exited state {}", self.session_id, node.name);
            self.trace.push(TraceEvent::Exited {
                state: node.name.clone(),
            });
        }
    }

    fn execute_transition_content(&mut self, enabled: &[TransitionId]) {
        let chart = Arc::clone(&self.chart);
        let mut ordered = enabled.to_vec();
        ordered.sort_by_key(|t| {
            let tr = chart.transition(*t);
            (chart.state(tr.source).order, tr.order)
        });

        for t in ordered {
            let tr = chart.transition(t);
            self.trace.push(TraceEvent::Transition {
                source: chart.state(tr.source).name.clone(),
                targets: tr
                    .targets
                    .iter()
                    .map(|s| chart.state(*s).name.clone())
                    .collect(),
                event: self.current_event.clone(),
            });
            self.execute_block(&tr.actions);
        }
    }

    fn enter_states(&mut self, enabled: &[TransitionId]) {
        let chart = Arc::clone(&self.chart);
        let mut entry = EntrySet::default();
        self.compute_entry_set(enabled, &mut entry);

        for state in entry.states.iter().copied() {
            let node = chart.state(state);
            self.configuration.insert(state);
            tracing::debug!("[{}] Entered state {}", self.session_id, node.name);
            self.trace.push(TraceEvent::Entered {
                state: node.name.clone(),
            });
            self.invokes.schedule(&chart, state);

            if chart.binding() == Binding::Late && self.late_bound.insert(state) {
                for decl in &node.data {
                    self.declare_data(decl);
                }
            }

            self.execute_block(&node.on_entry);

            if entry.for_default.contains(&state) {
                if let Some(initial) = node.initial {
                    self.execute_block(&chart.transition(initial).actions);
                }
            }
            if let Some(default) = entry.history_content.get(&state) {
                self.execute_block(&chart.transition(*default).actions);
            }

            if node.is_final() {
                let parent = node.parent.unwrap_or(Chart::ROOT);
                if parent == Chart::ROOT {
                    self.done_data = self.done_data_of(state);
                    self.running = false;
                } else {
                    let data = self.done_data_of(state);
                    self.internal
                        .push_back(Event::done_state(&chart.state(parent).name, data));
                    if let Some(grandparent) = chart.state(parent).parent {
                        if chart.state(grandparent).is_parallel()
                            && chart
                                .child_states(grandparent)
                                .all(|c| self.is_in_final_state(c))
                        {
                            self.internal.push_back(Event::done_state(
                                &chart.state(grandparent).name,
                                Value::Null,
                            ));
                        }
                    }
                }
            }
        }
    }

    fn compute_entry_set(&self, transitions: &[TransitionId], entry: &mut EntrySet) {
        for &t in transitions {
            for &s in &self.chart.transition(t).targets {
                self.add_descendants(s, entry);
            }
            let domain = self.transition_domain(t);
            for s in self.effective_targets(t) {
                self.add_ancestors(s, domain, entry);
            }
        }
    }

    fn add_descendants(&self, state: StateId, entry: &mut EntrySet) {
        let chart = &self.chart;
        let node = chart.state(state);

        if node.is_history() {
            let parent = node.parent.unwrap_or(Chart::ROOT);
            let targets = match self.history.get(&state) {
                Some(record) => record.clone(),
                None => match node.initial {
                    Some(default) => {
                        entry.history_content.insert(parent, default);
                        chart.transition(default).targets.clone()
                    }
                    None => Vec::new(),
                },
            };
            for &s in &targets {
                self.add_descendants(s, entry);
            }
            for &s in &targets {
                self.add_ancestors(s, Some(parent), entry);
            }
            return;
        }

        entry.states.insert(state);
        if node.is_compound() {
            entry.for_default.insert(state);
            if let Some(initial) = node.initial {
                let targets = &chart.transition(initial).targets;
                for &s in targets {
                    self.add_descendants(s, entry);
                }
                for &s in targets {
                    self.add_ancestors(s, Some(state), entry);
                }
            }
        } else if node.is_parallel() {
            self.add_missing_regions(state, entry);
        }
    }

    fn add_ancestors(&self, state: StateId, stop: Option<StateId>, entry: &mut EntrySet) {
        for anc in self.chart.proper_ancestors(state, stop) {
            if anc == Chart::ROOT {
                continue;
            }
            entry.states.insert(anc);
            if self.chart.state(anc).is_parallel() {
                self.add_missing_regions(anc, entry);
            }
        }
    }

    fn add_missing_regions(&self, parallel: StateId, entry: &mut EntrySet) {
        for child in self.chart.child_states(parallel) {
            let covered = entry
                .states
                .iter()
                .any(|s| self.chart.is_descendant(*s, child));
            if !covered {
                self.add_descendants(child, entry);
            }
        }
    }

    fn is_in_final_state(&self, state: StateId) -> bool {
        let node = self.chart.state(state);
        if node.is_compound() {
            self.chart
                .child_states(state)
                .any(|c| self.chart.state(c).is_final() && self.configuration.contains(c))
        } else if node.is_parallel() {
            self.chart
                .child_states(state)
                .all(|c| self.is_in_final_state(c))
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Executable content
    // ------------------------------------------------------------------

    /// Runs a block; the first failing action stops the rest of the block.
    fn execute_block(&mut self, actions: &[Action]) {
        for action in actions {
            if let Err(e) = self.execute_action(action) {
                tracing::debug!("[{}] Action '{}' failed", self.session_id, action.tag());
                self.raise_error(e);
                break;
            }
        }
    }

    fn raise_error(&mut self, err: EvalError) {
        tracing::warn!("[{}] Execution error: {}", self.session_id, err);
        self.internal
            .push_back(Event::error_execution(err.to_string(), err.kind()));
    }

    fn execute_action(&mut self, action: &Action) -> Result<(), EvalError> {
        match action {
            Action::Raise { event } => {
                self.internal
                    .push_back(Event::internal(event.clone(), Value::Null));
                Ok(())
            }
            Action::Send(send) => self.send(send),
            Action::Cancel {
                send_id,
                send_id_expr,
            } => {
                let id = match (send_id, send_id_expr) {
                    (Some(id), _) => id.clone(),
                    (None, Some(expr)) => self.eval_string(expr)?,
                    (None, None) => return Err(EvalError::invalid("<cancel> requires a send id")),
                };
                if !self.collab.timers.cancel(&self.session_id, &id) {
                    tracing::debug!("[{}] Nothing to cancel for send {}", self.session_id, id);
                }
                Ok(())
            }
            Action::Assign {
                location,
                expr,
                content,
            } => {
                let value = match (expr, content) {
                    (Some(expr), _) => self.eval_value(expr)?,
                    (None, Some(content)) => content.clone(),
                    (None, None) => Value::Null,
                };
                let view = ActiveStates {
                    chart: &self.chart,
                    configuration: &self.configuration,
                };
                self.datamodel.assign(location, value, &view)
            }
            Action::Script { src } => {
                let view = ActiveStates {
                    chart: &self.chart,
                    configuration: &self.configuration,
                };
                self.datamodel.execute(src, &view)
            }
            Action::Log { label, expr } => {
                let value = match expr {
                    Some(expr) => self.eval_value(expr)?,
                    None => Value::Null,
                };
                self.collab
                    .log
                    .log(&self.session_id, label.as_deref(), &value);
                Ok(())
            }
            Action::If {
                cond,
                then,
                else_if,
                otherwise,
            } => {
                let mut branch = otherwise;
                if self.eval_bool(cond)? {
                    branch = then;
                } else {
                    for candidate in else_if {
                        if self.eval_bool(&candidate.cond)? {
                            branch = &candidate.then;
                            break;
                        }
                    }
                }
                for action in branch {
                    self.execute_action(action)?;
                }
                Ok(())
            }
            Action::Foreach {
                array,
                item,
                index,
                actions,
            } => {
                let items = {
                    let view = ActiveStates {
                        chart: &self.chart,
                        configuration: &self.configuration,
                    };
                    self.datamodel.eval_array(array, &view)?
                };
                for (i, value) in items.into_iter().enumerate() {
                    self.datamodel.declare(item.as_str(), value)?;
                    if let Some(index) = index {
                        self.datamodel.declare(index.as_str(), Value::from(i))?;
                    }
                    for action in actions {
                        self.execute_action(action)?;
                    }
                }
                Ok(())
            }
            Action::Custom(custom) => {
                let view = ActiveStates {
                    chart: &self.chart,
                    configuration: &self.configuration,
                };
                self.datamodel.execute_custom(custom, &view)
            }
        }
    }

    fn send(&mut self, send: &SendAction) -> Result<(), EvalError> {
        let name = match (&send.event, &send.event_expr) {
            (Some(name), _) => name.clone(),
            (None, Some(expr)) => self.eval_string(expr)?,
            (None, None) => return Err(EvalError::invalid("<send> requires an event")),
        };
        let target = match (&send.target, &send.target_expr) {
            (Some(target), _) => Some(target.clone()),
            (None, Some(expr)) => Some(self.eval_string(expr)?),
            (None, None) => None,
        };
        let send_type = match (&send.send_type, &send.type_expr) {
            (Some(t), _) => t.clone(),
            (None, Some(expr)) => self.eval_string(expr)?,
            (None, None) => SCXML_PROCESSOR.to_string(),
        };
        if !is_scxml_processor(&send_type) {
            return Err(EvalError::invalid(format!(
                "unsupported event processor type '{}'",
                send_type
            )));
        }
        let delay = match (&send.delay, &send.delay_expr) {
            (Some(delay), _) => parse_delay(delay),
            (None, Some(expr)) => parse_delay(&self.eval_string(expr)?),
            (None, None) => Ok(Duration::ZERO),
        }
        .map_err(|e| EvalError::invalid(e.to_string()))?;

        let send_id = match &send.id {
            Some(id) => id.clone(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        if let Some(location) = &send.id_location {
            let view = ActiveStates {
                chart: &self.chart,
                configuration: &self.configuration,
            };
            self.datamodel
                .assign(location, Value::String(send_id.clone()), &view)?;
        }

        let data = match &send.content {
            Some(content) => self.content_value(content)?,
            None if send.namelist.is_empty() && send.params.is_empty() => Value::Null,
            None => Value::Object(self.params_value(&send.namelist, &send.params)?),
        };

        let mut event = Event::external(name, data)
            .with_send_id(send_id.clone())
            .with_origin(format!("#_scxml_{}", self.session_id), SCXML_PROCESSOR);

        let to_self = matches!(target.as_deref(), None | Some("#_internal"));
        if to_self && delay.is_zero() {
            event.kind = EventKind::Internal;
            self.internal.push_back(event);
            return Ok(());
        }

        if !delay.is_zero() {
            let pending = PendingSend {
                session_id: self.session_id.clone(),
                send_id: send_id.clone(),
                target: target.filter(|t| t != "#_internal"),
                send_type,
                event,
                delay_ms: delay.as_millis() as u64,
            };
            tracing::debug!(
                "[{}] Scheduled send (send_id={}, delay_ms={})",
                self.session_id,
                send_id,
                pending.delay_ms
            );
            if let Err(e) = self.collab.timers.schedule(pending) {
                self.communication_error(e.to_string(), &send_id);
            }
            return Ok(());
        }

        let Some(target) = target else {
            return Ok(());
        };
        if let Some(invoke_id) = child_target(&target) {
            if self.invokes.find(invoke_id).is_some() {
                if let Err(e) = self.invokes.send_to(invoke_id, event) {
                    self.communication_error(e.to_string(), &send_id);
                }
                return Ok(());
            }
        }
        if let Err(e) =
            self.collab
                .dispatcher
                .dispatch(&self.session_id, &target, &send_type, event)
        {
            self.communication_error(e.to_string(), &send_id);
        }
        Ok(())
    }

    fn communication_error(&mut self, message: String, send_id: &str) {
        tracing::warn!("[{}] Send failed (send_id={}): {}", self.session_id, send_id, message);
        self.internal
            .push_back(Event::error_communication(message, Some(send_id)));
    }

    // ------------------------------------------------------------------
    // Invokes
    // ------------------------------------------------------------------

    fn start_pending_invokes(&mut self) {
        let chart = Arc::clone(&self.chart);
        for node_id in self.invokes.pending() {
            let node = chart.invoke(node_id);
            let invoke_id = match (self.invokes.restored_id(node_id), &node.explicit_id) {
                (Some(id), _) => id,
                (None, Some(id)) => id.clone(),
                (None, None) => {
                    self.invoke_seq += 1;
                    format!("{}.{}", chart.state(node.state).name, self.invoke_seq)
                }
            };
            self.invokes.mark_starting(node_id, &invoke_id);

            let request = match self.invoke_request(node, &invoke_id) {
                Ok(request) => request,
                Err(e) => {
                    self.invokes.discard(node_id);
                    self.raise_error(e);
                    continue;
                }
            };
            if !self.collab.invoker.supports(&request.invoke_type) {
                self.invokes.discard(node_id);
                self.raise_error(EvalError::invalid(format!(
                    "unsupported invoke type '{}'",
                    request.invoke_type
                )));
                continue;
            }

            match self.collab.invoker.start(request) {
                Ok(handle) => {
                    self.invokes.mark_running(node_id, handle);
                    tracing::info!("[{}] Started invoke {}", self.session_id, invoke_id);
                    if let Some(location) = &node.id_location {
                        let view = ActiveStates {
                            chart: &self.chart,
                            configuration: &self.configuration,
                        };
                        if let Err(e) = self.datamodel.assign(
                            location,
                            Value::String(invoke_id.clone()),
                            &view,
                        ) {
                            self.raise_error(e);
                        }
                    }
                }
                Err(e) => {
                    self.invokes.discard(node_id);
                    tracing::warn!(
                        "[{}] Invoke failed to start (invoke={}): {}",
                        self.session_id,
                        invoke_id,
                        e
                    );
                    self.internal.push_back(
                        Event::error_platform(e.to_string()).with_invoke_id(invoke_id),
                    );
                }
            }
        }
    }

    fn invoke_request(&mut self, node: &InvokeNode, invoke_id: &str) -> Result<InvokeRequest, EvalError> {
        let invoke_type = match (&node.invoke_type, &node.type_expr) {
            (Some(t), _) => t.clone(),
            (None, Some(expr)) => self.eval_string(expr)?,
            (None, None) => SCXML_INVOKE_TYPE.to_string(),
        };
        let src = match (&node.src, &node.src_expr) {
            (Some(src), _) => Some(src.clone()),
            (None, Some(expr)) => Some(self.eval_string(expr)?),
            (None, None) => None,
        };
        let content = match &node.content {
            Some(content) => Some(self.content_value(content)?),
            None => None,
        };
        let params = self.params_value(&node.namelist, &node.params)?;

        Ok(InvokeRequest {
            parent_session: self.session_id.clone(),
            invoke_id: invoke_id.to_string(),
            invoke_type,
            src,
            content,
            params,
            autoforward: node.autoforward,
        })
    }

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------

    fn bind_system(&mut self) -> Result<(), CoreError> {
        let location = format!("#_scxml_{}", self.session_id);
        let vars = SystemVars {
            session_id: self.session_id.clone(),
            name: self.chart.name().to_string(),
            io_processors: vec![
                (SCXML_PROCESSOR.to_string(), location.clone()),
                ("scxml".to_string(), location),
            ],
        };
        self.datamodel.bind_system(&vars)?;
        Ok(())
    }

    fn declare_data(&mut self, decl: &DataDecl) {
        let value = if let Some(value) = self.data_overrides.get(&decl.id) {
            value.clone()
        } else if let Some(expr) = &decl.expr {
            match self.eval_value(expr) {
                Ok(value) => value,
                Err(e) => {
                    self.raise_error(e);
                    Value::Null
                }
            }
        } else {
            decl.content.clone().unwrap_or(Value::Null)
        };
        if let Err(e) = self.datamodel.declare(&decl.id, value) {
            self.raise_error(e);
        }
    }

    fn done_data_of(&mut self, state: StateId) -> Value {
        let chart = Arc::clone(&self.chart);
        let Some(done) = &chart.state(state).done_data else {
            return Value::Null;
        };
        let result = match &done.content {
            Some(content) => self.content_value(content),
            None if done.params.is_empty() => Ok(Value::Null),
            None => self.params_value(&[], &done.params).map(Value::Object),
        };
        result.unwrap_or_else(|e| {
            self.raise_error(e);
            Value::Null
        })
    }

    fn content_value(&mut self, content: &Content) -> Result<Value, EvalError> {
        match (&content.expr, &content.body) {
            (Some(expr), _) => self.eval_value(expr),
            (None, Some(body)) => Ok(body.clone()),
            (None, None) => Ok(Value::Null),
        }
    }

    fn params_value(&mut self, namelist: &[Expr], params: &[Param]) -> Result<Map<String, Value>, EvalError> {
        let mut values = Map::new();
        for location in namelist {
            let value = self.eval_value(location)?;
            values.insert(location.as_str().to_string(), value);
        }
        for param in params {
            let value = match (&param.expr, &param.location) {
                (Some(expr), _) => self.eval_value(expr)?,
                (None, Some(location)) => self.eval_value(location)?,
                (None, None) => {
                    return Err(EvalError::invalid(format!(
                        "<param name=\"{}\"> needs expr or location",
                        param.name
                    )))
                }
            };
            values.insert(param.name.clone(), value);
        }
        Ok(values)
    }

    fn eval_value(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        let view = ActiveStates {
            chart: &self.chart,
            configuration: &self.configuration,
        };
        self.datamodel.eval_value(expr, &view)
    }

    fn eval_string(&mut self, expr: &Expr) -> Result<String, EvalError> {
        let view = ActiveStates {
            chart: &self.chart,
            configuration: &self.configuration,
        };
        self.datamodel.eval_string(expr, &view)
    }

    fn eval_bool(&mut self, expr: &Expr) -> Result<bool, EvalError> {
        let view = ActiveStates {
            chart: &self.chart,
            configuration: &self.configuration,
        };
        self.datamodel.eval_bool(expr, &view)
    }
}

/// Extracts `<id>` from a `#_<id>` target naming an invoked child.
fn child_target(target: &str) -> Option<&str> {
    let id = target.strip_prefix("#_")?;
    if id == "parent" || id == "internal" || id.starts_with("scxml_") || id.is_empty() {
        return None;
    }
    Some(id)
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("session_id", &self.session_id)
            .field("chart", &self.chart.name())
            .field("status", &self.status)
            .field("configuration", &self.active_states())
            .finish()
    }
}
