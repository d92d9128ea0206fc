//! # rstchart-model
//!
//! Document model for rstchart.
//!
//! This crate provides:
//! - The compiled, immutable chart arena (states, transitions, invokes)
//! - Executable content types
//! - The JSON/YAML chart definition DSL and its compiler
//! - Construction-time validation

pub mod action;
pub mod chart;
pub mod definition;
pub mod descriptor;
pub mod error;

pub use action::{
    Action, Binding, Content, CustomAction, DataDecl, DoneData, ElseIf, Expr, Finalize, Param,
    SendAction,
};
pub use chart::{
    Chart, DocumentOrder, HistoryKind, InvokeId, InvokeNode, StateId, StateKind, StateNode,
    TransitionId, TransitionKind, TransitionNode,
};
pub use definition::{
    ChartDefinition, InvokeDefinition, StateDefinition, StateType, TransitionDefinition, ROOT_NAME,
};
pub use descriptor::{parse_delay, EventDescriptor};
pub use error::ModelError;
