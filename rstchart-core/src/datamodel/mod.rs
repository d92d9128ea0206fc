//! Data model contract and registry.
//!
//! The interpreter never looks at expression syntax. It hands expressions to a
//! [`DataModel`] and turns any failure into an `error.execution` event.

mod expr;
mod json;
mod null;

pub use expr::{Expression, Statement};
pub use json::JsonDataModel;
pub use null::NullDataModel;

use crate::error::{CoreError, EvalError};
use crate::event::Event;
use parking_lot::RwLock;
use rstchart_model::{CustomAction, Expr};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Read access to the active configuration, used by `In()`.
pub trait StateQuery {
    fn in_state(&self, name: &str) -> bool;
}

/// Session-level system variables.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemVars {
    pub session_id: String,
    pub name: String,
    /// Event processor types with their `location` addresses.
    pub io_processors: Vec<(String, String)>,
}

/// Evaluator contract.
pub trait DataModel: Send {
    /// The kind this back-end was registered under.
    fn kind(&self) -> &'static str;

    /// Binds `_sessionid`, `_name` and `_ioprocessors`.
    fn bind_system(&mut self, vars: &SystemVars) -> Result<(), EvalError>;

    /// Binds `_event` before an event is processed.
    fn set_event(&mut self, event: &Event);

    /// Creates (or overwrites) a top-level variable.
    fn declare(&mut self, name: &str, value: Value) -> Result<(), EvalError>;

    fn eval_bool(&mut self, expr: &Expr, states: &dyn StateQuery) -> Result<bool, EvalError>;

    fn eval_value(&mut self, expr: &Expr, states: &dyn StateQuery) -> Result<Value, EvalError>;

    fn eval_string(&mut self, expr: &Expr, states: &dyn StateQuery) -> Result<String, EvalError> {
        Ok(match self.eval_value(expr, states)? {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    fn eval_array(
        &mut self,
        expr: &Expr,
        states: &dyn StateQuery,
    ) -> Result<Vec<Value>, EvalError> {
        match self.eval_value(expr, states)? {
            Value::Array(items) => Ok(items),
            other => Err(EvalError::type_error(format!(
                "'{}' is not an array: {}",
                expr, other
            ))),
        }
    }

    /// Writes `value` to an existing location.
    fn assign(
        &mut self,
        location: &Expr,
        value: Value,
        states: &dyn StateQuery,
    ) -> Result<(), EvalError>;

    /// Runs a `<script>` body.
    fn execute(&mut self, script: &Expr, states: &dyn StateQuery) -> Result<(), EvalError>;

    /// Runs a vendor-specific action.
    fn execute_custom(
        &mut self,
        action: &CustomAction,
        _states: &dyn StateQuery,
    ) -> Result<(), EvalError> {
        Err(EvalError::Unsupported {
            datamodel: self.kind().to_string(),
            what: format!("custom action '{}'", action.name),
        })
    }

    /// Serialisable copy of all user data.
    fn snapshot(&self) -> Value;

    /// Replaces all user data with a snapshot.
    fn restore(&mut self, snapshot: Value) -> Result<(), EvalError>;
}

/// Creates data model instances of one kind.
pub trait DataModelFactory: Send + Sync {
    fn create(&self) -> Box<dyn DataModel>;
}

impl<F> DataModelFactory for F
where
    F: Fn() -> Box<dyn DataModel> + Send + Sync,
{
    fn create(&self) -> Box<dyn DataModel> {
        self()
    }
}

/// Maps data model kinds to factories.
pub struct DataModelRegistry {
    factories: RwLock<HashMap<String, Arc<dyn DataModelFactory>>>,
}

impl DataModelRegistry {
    /// Creates a registry with no back-ends.
    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, kind: impl Into<String>, factory: Arc<dyn DataModelFactory>) {
        self.factories.write().insert(kind.into(), factory);
    }

    pub fn create(&self, kind: &str) -> Result<Box<dyn DataModel>, CoreError> {
        self.factories
            .read()
            .get(kind)
            .map(|f| f.create())
            .ok_or_else(|| CoreError::UnknownDataModel {
                kind: kind.to_string(),
            })
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl Default for DataModelRegistry {
    /// Registers the built-in `null` and `json` back-ends.
    fn default() -> Self {
        let registry = Self::empty();
        registry.register(
            "null",
            Arc::new(|| Box::new(NullDataModel::new()) as Box<dyn DataModel>),
        );
        registry.register(
            "json",
            Arc::new(|| Box::new(JsonDataModel::new()) as Box<dyn DataModel>),
        );
        registry
    }
}

impl std::fmt::Debug for DataModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataModelRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Parses `In('id')` / `In("id")`, returning the state name.
pub(crate) fn parse_in_predicate(src: &str) -> Option<&str> {
    let inner = src.trim().strip_prefix("In(")?.strip_suffix(')')?.trim();
    inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}
