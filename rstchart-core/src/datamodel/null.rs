//! The `null` data model: no data, only `In()` conditions.

use super::{parse_in_predicate, DataModel, StateQuery, SystemVars};
use crate::error::EvalError;
use crate::event::Event;
use rstchart_model::Expr;
use serde_json::Value;

#[derive(Debug, Default)]
pub struct NullDataModel;

impl NullDataModel {
    pub fn new() -> Self {
        Self
    }

    fn unsupported(what: impl Into<String>) -> EvalError {
        EvalError::Unsupported {
            datamodel: "null".to_string(),
            what: what.into(),
        }
    }
}

impl DataModel for NullDataModel {
    fn kind(&self) -> &'static str {
        "null"
    }

    fn bind_system(&mut self, _vars: &SystemVars) -> Result<(), EvalError> {
        Ok(())
    }

    fn set_event(&mut self, _event: &Event) {}

    fn declare(&mut self, name: &str, _value: Value) -> Result<(), EvalError> {
        Err(Self::unsupported(format!("data '{}'", name)))
    }

    fn eval_bool(&mut self, expr: &Expr, states: &dyn StateQuery) -> Result<bool, EvalError> {
        match parse_in_predicate(expr.as_str()) {
            Some(state) => Ok(states.in_state(state)),
            None => Err(EvalError::Syntax {
                expr: expr.to_string(),
                reason: "only In('state') is supported".to_string(),
            }),
        }
    }

    fn eval_value(&mut self, expr: &Expr, _states: &dyn StateQuery) -> Result<Value, EvalError> {
        Err(Self::unsupported(format!("expression '{}'", expr)))
    }

    fn assign(
        &mut self,
        location: &Expr,
        _value: Value,
        _states: &dyn StateQuery,
    ) -> Result<(), EvalError> {
        Err(Self::unsupported(format!("assignment to '{}'", location)))
    }

    fn execute(&mut self, _script: &Expr, _states: &dyn StateQuery) -> Result<(), EvalError> {
        Err(Self::unsupported("script"))
    }

    fn snapshot(&self) -> Value {
        Value::Null
    }

    fn restore(&mut self, _snapshot: Value) -> Result<(), EvalError> {
        Ok(())
    }
}
