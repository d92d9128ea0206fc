//! The `json` data model: variables are JSON values, expressions use the
//! language in [`super::expr`].

use super::expr::{PathSegment, Scope};
use super::{DataModel, Expression, Statement, StateQuery, SystemVars};
use crate::error::EvalError;
use crate::event::Event;
use rstchart_model::Expr;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct JsonDataModel {
    data: Map<String, Value>,
    system: Map<String, Value>,
    expressions: HashMap<String, Arc<Expression>>,
    scripts: HashMap<String, Arc<Vec<Statement>>>,
}

struct View<'a> {
    data: &'a Map<String, Value>,
    system: &'a Map<String, Value>,
    states: &'a dyn StateQuery,
}

impl Scope for View<'_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.system.get(name).or_else(|| self.data.get(name))
    }

    fn in_state(&self, name: &str) -> bool {
        self.states.in_state(name)
    }
}

impl JsonDataModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a variable.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    fn expression(&mut self, src: &str) -> Result<Arc<Expression>, EvalError> {
        if let Some(parsed) = self.expressions.get(src) {
            return Ok(Arc::clone(parsed));
        }
        let parsed = Arc::new(Expression::parse(src)?);
        self.expressions.insert(src.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    fn script(&mut self, src: &str) -> Result<Arc<Vec<Statement>>, EvalError> {
        if let Some(parsed) = self.scripts.get(src) {
            return Ok(Arc::clone(parsed));
        }
        let parsed = Arc::new(Statement::parse_script(src)?);
        self.scripts.insert(src.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    fn evaluate(&self, expr: &Expression, states: &dyn StateQuery) -> Result<Value, EvalError> {
        expr.evaluate(&View {
            data: &self.data,
            system: &self.system,
            states,
        })
    }

    fn store(
        &mut self,
        location: &Expression,
        value: Value,
        states: &dyn StateQuery,
    ) -> Result<(), EvalError> {
        let (root, path) = location.location(&View {
            data: &self.data,
            system: &self.system,
            states,
        })?;
        if self.system.contains_key(&root) {
            return Err(EvalError::ReadOnly { name: root });
        }
        let slot = self
            .data
            .get_mut(&root)
            .ok_or_else(|| EvalError::Undefined { name: root.clone() })?;
        set_path(slot, &path, value)
    }
}

fn set_path(slot: &mut Value, path: &[PathSegment], value: Value) -> Result<(), EvalError> {
    let Some((last, parents)) = path.split_last() else {
        *slot = value;
        return Ok(());
    };

    let mut current = slot;
    for segment in parents {
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map
                .get_mut(key)
                .ok_or_else(|| EvalError::type_error(format!("no property '{}'", key)))?,
            (Value::Array(items), PathSegment::Index(i)) => {
                let len = items.len();
                items.get_mut(*i).ok_or_else(|| {
                    EvalError::type_error(format!("index {} out of bounds ({})", i, len))
                })?
            }
            (other, _) => {
                return Err(EvalError::type_error(format!(
                    "cannot navigate into {}",
                    other
                )))
            }
        };
    }

    match (current, last) {
        (Value::Object(map), PathSegment::Key(key)) => {
            map.insert(key.clone(), value);
            Ok(())
        }
        (Value::Array(items), PathSegment::Index(i)) if *i < items.len() => {
            items[*i] = value;
            Ok(())
        }
        (Value::Array(items), PathSegment::Index(i)) if *i == items.len() => {
            items.push(value);
            Ok(())
        }
        (other, segment) => Err(EvalError::type_error(format!(
            "cannot assign {:?} on {}",
            segment, other
        ))),
    }
}

impl DataModel for JsonDataModel {
    fn kind(&self) -> &'static str {
        "json"
    }

    fn bind_system(&mut self, vars: &SystemVars) -> Result<(), EvalError> {
        let processors: Map<String, Value> = vars
            .io_processors
            .iter()
            .map(|(kind, location)| {
                (
                    kind.clone(),
                    serde_json::json!({ "location": location }),
                )
            })
            .collect();
        self.system
            .insert("_sessionid".into(), Value::String(vars.session_id.clone()));
        self.system
            .insert("_name".into(), Value::String(vars.name.clone()));
        self.system
            .insert("_ioprocessors".into(), Value::Object(processors));
        Ok(())
    }

    fn set_event(&mut self, event: &Event) {
        self.system.insert("_event".into(), event.to_value());
    }

    fn declare(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        if name.starts_with('_') && self.system.contains_key(name) {
            return Err(EvalError::ReadOnly {
                name: name.to_string(),
            });
        }
        self.data.insert(name.to_string(), value);
        Ok(())
    }

    fn eval_bool(&mut self, expr: &Expr, states: &dyn StateQuery) -> Result<bool, EvalError> {
        let parsed = self.expression(expr.as_str())?;
        Ok(super::expr::is_truthy(&self.evaluate(&parsed, states)?))
    }

    fn eval_value(&mut self, expr: &Expr, states: &dyn StateQuery) -> Result<Value, EvalError> {
        let parsed = self.expression(expr.as_str())?;
        self.evaluate(&parsed, states)
    }

    fn assign(
        &mut self,
        location: &Expr,
        value: Value,
        states: &dyn StateQuery,
    ) -> Result<(), EvalError> {
        let parsed = self.expression(location.as_str())?;
        self.store(&parsed, value, states)
    }

    fn execute(&mut self, script: &Expr, states: &dyn StateQuery) -> Result<(), EvalError> {
        let statements = self.script(script.as_str())?;
        for statement in statements.iter() {
            match statement {
                Statement::Assign(location, expr) => {
                    let value = self.evaluate(expr, states)?;
                    self.store(location, value, states)?;
                }
                Statement::Eval(expr) => {
                    self.evaluate(expr, states)?;
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Value {
        Value::Object(self.data.clone())
    }

    fn restore(&mut self, snapshot: Value) -> Result<(), EvalError> {
        self.data = match snapshot {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(EvalError::type_error(format!(
                    "data model snapshot must be an object, got {}",
                    other
                )))
            }
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoStates;

    impl StateQuery for NoStates {
        fn in_state(&self, _name: &str) -> bool {
            false
        }
    }

    fn model() -> JsonDataModel {
        let mut dm = JsonDataModel::new();
        dm.bind_system(&SystemVars {
            session_id: "s-1".into(),
            name: "test".into(),
            io_processors: vec![("scxml".into(), "#_scxml_s-1".into())],
        })
        .unwrap();
        dm
    }

    #[test]
    fn test_declare_and_eval() {
        let mut dm = model();
        dm.declare("count", json!(2)).unwrap();
        assert_eq!(dm.eval_value(&"count * 10".into(), &NoStates).unwrap(), json!(20));
        assert!(dm.eval_bool(&"count > 1".into(), &NoStates).unwrap());
        assert_eq!(
            dm.eval_string(&"_sessionid".into(), &NoStates).unwrap(),
            "s-1"
        );
    }

    #[test]
    fn test_assign_nested() {
        let mut dm = model();
        dm.declare("order", json!({"items": [1, 2]})).unwrap();
        dm.assign(&"order.items[2]".into(), json!(3), &NoStates).unwrap();
        dm.assign(&"order.paid".into(), json!(true), &NoStates).unwrap();
        assert_eq!(dm.get("order").unwrap(), &json!({"items": [1, 2, 3], "paid": true}));

        assert!(dm.assign(&"order.items[9]".into(), json!(0), &NoStates).is_err());
    }

    #[test]
    fn test_assign_requires_declaration() {
        let mut dm = model();
        let err = dm.assign(&"ghost".into(), json!(1), &NoStates).unwrap_err();
        assert!(matches!(err, EvalError::Undefined { .. }));
    }

    #[test]
    fn test_system_variables_read_only() {
        let mut dm = model();
        assert!(matches!(
            dm.assign(&"_sessionid".into(), json!("x"), &NoStates),
            Err(EvalError::ReadOnly { .. })
        ));
        assert!(dm.declare("_name", json!("x")).is_err());
    }

    #[test]
    fn test_event_binding() {
        let mut dm = model();
        dm.set_event(&Event::new("go").with_data(json!({"n": 4})));
        assert_eq!(
            dm.eval_value(&"_event.data.n + 1".into(), &NoStates).unwrap(),
            json!(5)
        );
        assert_eq!(
            dm.eval_string(&"_event.name".into(), &NoStates).unwrap(),
            "go"
        );
    }

    #[test]
    fn test_script() {
        let mut dm = model();
        dm.declare("x", json!(0)).unwrap();
        dm.declare("log", json!([])).unwrap();
        dm.execute(&"x = x + 1; log[0] = 'a'; x = x * 10".into(), &NoStates)
            .unwrap();
        assert_eq!(dm.get("x").unwrap(), &json!(10));
        assert_eq!(dm.get("log").unwrap(), &json!(["a"]));
    }

    #[test]
    fn test_eval_array() {
        let mut dm = model();
        dm.declare("items", json!([1, 2, 3])).unwrap();
        assert_eq!(dm.eval_array(&"items".into(), &NoStates).unwrap().len(), 3);
        assert!(dm.eval_array(&"1".into(), &NoStates).is_err());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut dm = model();
        dm.declare("a", json!({"b": 1})).unwrap();
        let snap = dm.snapshot();

        let mut other = model();
        other.restore(snap).unwrap();
        assert_eq!(other.get("a").unwrap(), &json!({"b": 1}));
        assert!(other.restore(json!(3)).is_err());
    }
}
