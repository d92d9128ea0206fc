//! # rstchart-core
//!
//! Statechart interpreter for rstchart.
//!
//! This crate provides:
//! - The step algorithm (macro-steps and micro-steps over a compiled chart)
//! - The data model contract and the built-in `null` and `json` back-ends
//! - Collaborator traits for transport, timers, invokes and logging
//! - The per-session invoke table
//! - Checkpoint cursors for suspending and resuming sessions
//!
//! Nothing here is async. A host (see `rstchart-runtime`) owns the external
//! queue and feeds events to [`Interpreter::step`] one at a time.

pub mod checkpoint;
pub mod configuration;
pub mod datamodel;
pub mod error;
pub mod event;
pub mod interpreter;
pub mod invoke;
pub mod platform;

pub use checkpoint::{Cursor, InvokeRecord};
pub use configuration::Configuration;
pub use datamodel::{
    DataModel, DataModelFactory, DataModelRegistry, JsonDataModel, NullDataModel, StateQuery,
    SystemVars,
};
pub use error::{CoreError, DispatchError, EvalError, InvokeError};
pub use event::{is_scxml_processor, Event, EventKind, SCXML_PROCESSOR};
pub use interpreter::{Interpreter, Status, StepOutcome, TraceEvent};
pub use invoke::{ActiveInvoke, InvokeStatus, InvokeTable};
pub use platform::{
    is_scxml_invoke, Collaborators, Detached, EventDispatcher, InvokeActivator, InvokeRequest,
    InvokedService, LogSink, PendingSend, TimerService, TracingLogSink, SCXML_INVOKE_TYPE,
};

pub use rstchart_model as model;
