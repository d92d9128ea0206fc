//! Expression language of the `json` data model.
//!
//! The language is a small, JSON-valued subset of ECMAScript expressions:
//!
//! - literals: `42`, `1.5`, `"text"`, `'text'`, `true`, `false`, `null`,
//!   `[1, 2]`, `{"a": 1}`
//! - variables and paths: `count`, `order.items[0].price`, `_event.data`
//! - arithmetic: `+ - * / %` (`+` concatenates when either side is a string)
//! - comparison: `== != < <= > >=`
//! - logic: `!`, `&&` (binds tighter than `||`), `||`
//! - grouping: `(a || b) && c`
//! - functions: `In('state')`, `len(x)`
//!
//! Scripts are `;`-separated statements, each either an expression or an
//! assignment `location = expr`.

use crate::error::EvalError;
use serde_json::{Map, Value};

/// Variable lookup and `In()` support during evaluation.
pub(crate) trait Scope {
    fn lookup(&self, name: &str) -> Option<&Value>;
    fn in_state(&self, name: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Ident(String),
    Member(Box<Expression>, String),
    Index(Box<Expression>, Box<Expression>),
    Array(Vec<Expression>),
    Object(Vec<(String, Expression)>),
    Not(Box<Expression>),
    Neg(Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Call(String, Vec<Expression>),
}

/// One statement of a script.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign(Expression, Expression),
    Eval(Expression),
}

/// A step in a location path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PathSegment {
    Key(String),
    Index(usize),
}

impl Expression {
    /// Parses a complete expression.
    pub fn parse(s: &str) -> Result<Self, EvalError> {
        let mut parser = Parser::new(s);
        let expr = parser.parse_expr()?;
        parser.expect_end()?;
        Ok(expr)
    }

    /// Evaluates against a scope.
    pub(crate) fn evaluate(&self, scope: &dyn Scope) -> Result<Value, EvalError> {
        match self {
            Expression::Literal(v) => Ok(v.clone()),
            Expression::Ident(name) => scope
                .lookup(name)
                .cloned()
                .ok_or_else(|| EvalError::Undefined { name: name.clone() }),
            Expression::Member(target, field) => match target.evaluate(scope)? {
                Value::Object(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
                Value::Null => Err(EvalError::type_error(format!(
                    "cannot read '{}' of null",
                    field
                ))),
                Value::String(s) if field == "length" => Ok(Value::from(s.chars().count())),
                Value::Array(a) if field == "length" => Ok(Value::from(a.len())),
                _ => Ok(Value::Null),
            },
            Expression::Index(target, index) => {
                let target = target.evaluate(scope)?;
                let index = index.evaluate(scope)?;
                match (&target, &index) {
                    (Value::Array(items), Value::Number(n)) => Ok(n
                        .as_u64()
                        .and_then(|i| items.get(i as usize))
                        .cloned()
                        .unwrap_or(Value::Null)),
                    (Value::Object(map), Value::String(key)) => {
                        Ok(map.get(key).cloned().unwrap_or(Value::Null))
                    }
                    (Value::Null, _) => Err(EvalError::type_error("cannot index null")),
                    _ => Ok(Value::Null),
                }
            }
            Expression::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|e| e.evaluate(scope))
                    .collect::<Result<_, _>>()?,
            )),
            Expression::Object(entries) => {
                let mut map = Map::new();
                for (key, e) in entries {
                    map.insert(key.clone(), e.evaluate(scope)?);
                }
                Ok(Value::Object(map))
            }
            Expression::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.evaluate(scope)?))),
            Expression::Neg(inner) => match inner.evaluate(scope)? {
                Value::Number(n) => number(-n.as_f64().unwrap_or(0.0)),
                other => Err(EvalError::type_error(format!("cannot negate {}", other))),
            },
            Expression::And(left, right) => {
                if !is_truthy(&left.evaluate(scope)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(is_truthy(&right.evaluate(scope)?)))
            }
            Expression::Or(left, right) => {
                if is_truthy(&left.evaluate(scope)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(is_truthy(&right.evaluate(scope)?)))
            }
            Expression::Binary(op, left, right) => {
                binary(*op, left.evaluate(scope)?, right.evaluate(scope)?)
            }
            Expression::Call(name, args) => call(name, args, scope),
        }
    }

    /// Resolves an assignable location to its root variable and path.
    pub(crate) fn location(
        &self,
        scope: &dyn Scope,
    ) -> Result<(String, Vec<PathSegment>), EvalError> {
        match self {
            Expression::Ident(name) => Ok((name.clone(), Vec::new())),
            Expression::Member(target, field) => {
                let (root, mut path) = target.location(scope)?;
                path.push(PathSegment::Key(field.clone()));
                Ok((root, path))
            }
            Expression::Index(target, index) => {
                let (root, mut path) = target.location(scope)?;
                match index.evaluate(scope)? {
                    Value::String(key) => path.push(PathSegment::Key(key)),
                    Value::Number(n) => match n.as_u64() {
                        Some(i) => path.push(PathSegment::Index(i as usize)),
                        None => {
                            return Err(EvalError::type_error(format!("invalid index {}", n)))
                        }
                    },
                    other => {
                        return Err(EvalError::type_error(format!("invalid index {}", other)))
                    }
                }
                Ok((root, path))
            }
            _ => Err(EvalError::invalid("expression is not an assignable location")),
        }
    }
}

impl Statement {
    /// Parses a `;`-separated script.
    pub fn parse_script(s: &str) -> Result<Vec<Statement>, EvalError> {
        let mut parser = Parser::new(s);
        let mut statements = Vec::new();
        loop {
            parser.skip_whitespace();
            while parser.peek_char() == Some(';') {
                parser.pos += 1;
                parser.skip_whitespace();
            }
            if parser.at_end() {
                break;
            }
            statements.push(parser.parse_statement()?);
            parser.skip_whitespace();
            match parser.peek_char() {
                Some(';') => parser.pos += 1,
                None => break,
                Some(c) => return Err(parser.error(format!("unexpected '{}'", c))),
            }
        }
        Ok(statements)
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        _ => a == b,
    }
}

/// Converts an arithmetic result, keeping integral values as integers.
fn number(f: f64) -> Result<Value, EvalError> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        return Ok(Value::from(f as i64));
    }
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| EvalError::type_error("arithmetic produced a non-finite number"))
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    use BinaryOp::*;
    match op {
        Eq => return Ok(Value::Bool(values_equal(&left, &right))),
        Ne => return Ok(Value::Bool(!values_equal(&left, &right))),
        Add if left.is_string() || right.is_string() => {
            return Ok(Value::String(display(&left) + &display(&right)))
        }
        Lt | Le | Gt | Ge => {
            if let (Value::String(a), Value::String(b)) = (&left, &right) {
                let result = match op {
                    Lt => a < b,
                    Le => a <= b,
                    Gt => a > b,
                    _ => a >= b,
                };
                return Ok(Value::Bool(result));
            }
        }
        _ => {}
    }

    let (a, b) = match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EvalError::type_error(format!(
                "operator {:?} needs numbers, got {} and {}",
                op, left, right
            )))
        }
    };

    match op {
        Add => number(a + b),
        Sub => number(a - b),
        Mul => number(a * b),
        Div if b == 0.0 => Err(EvalError::type_error("division by zero")),
        Div => number(a / b),
        Rem if b == 0.0 => Err(EvalError::type_error("division by zero")),
        Rem => number(a % b),
        Lt => Ok(Value::Bool(a < b)),
        Le => Ok(Value::Bool(a <= b)),
        Gt => Ok(Value::Bool(a > b)),
        Ge => Ok(Value::Bool(a >= b)),
        Eq => Ok(Value::Bool((a - b).abs() < f64::EPSILON)),
        Ne => Ok(Value::Bool((a - b).abs() >= f64::EPSILON)),
    }
}

fn call(name: &str, args: &[Expression], scope: &dyn Scope) -> Result<Value, EvalError> {
    match (name, args) {
        ("In", [arg]) => match arg.evaluate(scope)? {
            Value::String(state) => Ok(Value::Bool(scope.in_state(&state))),
            other => Err(EvalError::type_error(format!(
                "In() expects a state id, got {}",
                other
            ))),
        },
        ("len", [arg]) => match arg.evaluate(scope)? {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(a) => Ok(Value::from(a.len())),
            Value::Object(o) => Ok(Value::from(o.len())),
            other => Err(EvalError::type_error(format!("len() of {}", other))),
        },
        _ => Err(EvalError::Undefined {
            name: format!("{}/{}", name, args.len()),
        }),
    }
}

/// Recursive descent parser.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, reason: impl Into<String>) -> EvalError {
        EvalError::Syntax {
            expr: self.input.to_string(),
            reason: reason.into(),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn expect_end(&mut self) -> Result<(), EvalError> {
        self.skip_whitespace();
        match self.peek_char() {
            None => Ok(()),
            Some(c) => Err(self.error(format!("unexpected '{}' at {}", c, self.pos))),
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, EvalError> {
        let expr = self.parse_expr()?;
        self.skip_whitespace();
        if self.peek_char() == Some('=') && !self.peek_str("==") {
            self.pos += 1;
            if !matches!(
                expr,
                Expression::Ident(_) | Expression::Member(..) | Expression::Index(..)
            ) {
                return Err(self.error("left side of '=' is not a location"));
            }
            let value = self.parse_expr()?;
            return Ok(Statement::Assign(expr, value));
        }
        Ok(Statement::Eval(expr))
    }

    fn parse_expr(&mut self) -> Result<Expression, EvalError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.peek_str("||") {
            self.pos += 2;
            let right = self.parse_and()?;
            left = Expression::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.parse_equality()?;
        self.skip_whitespace();

        while self.peek_str("&&") {
            self.pos += 2;
            let right = self.parse_equality()?;
            left = Expression::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.parse_comparison()?;
        loop {
            self.skip_whitespace();
            let op = if self.peek_str("==") {
                BinaryOp::Eq
            } else if self.peek_str("!=") {
                BinaryOp::Ne
            } else {
                return Ok(left);
            };
            self.pos += 2;
            if self.peek_char() == Some('=') {
                // === and !== behave like == and !=
                self.pos += 1;
            }
            let right = self.parse_comparison()?;
            left = Expression::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_comparison(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.parse_additive()?;
        loop {
            self.skip_whitespace();
            let (op, width) = if self.peek_str("<=") {
                (BinaryOp::Le, 2)
            } else if self.peek_str(">=") {
                (BinaryOp::Ge, 2)
            } else if self.peek_char() == Some('<') {
                (BinaryOp::Lt, 1)
            } else if self.peek_char() == Some('>') {
                (BinaryOp::Gt, 1)
            } else {
                return Ok(left);
            };
            self.pos += width;
            let right = self.parse_additive()?;
            left = Expression::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek_char() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expression::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek_char() {
                Some('*') => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                Some('%') => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expression::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expression, EvalError> {
        self.skip_whitespace();

        match self.peek_char() {
            Some('!') if !self.peek_str("!=") => {
                self.pos += 1;
                let inner = self.parse_unary()?;
                Ok(Expression::Not(Box::new(inner)))
            }
            Some('-') => {
                self.pos += 1;
                let inner = self.parse_unary()?;
                Ok(match inner {
                    Expression::Literal(Value::Number(n)) => {
                        Expression::Literal(number(-n.as_f64().unwrap_or(0.0))?)
                    }
                    other => Expression::Neg(Box::new(other)),
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expression, EvalError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_char() {
                Some('.') => {
                    self.pos += 1;
                    let field = self.parse_ident()?;
                    expr = Expression::Member(Box::new(expr), field);
                }
                Some('[') => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    self.expect(']')?;
                    expr = Expression::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, EvalError> {
        self.skip_whitespace();

        match self.peek_char() {
            None => Err(self.error("unexpected end of expression")),
            Some('(') => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(')')?;
                Ok(expr)
            }
            Some('[') => {
                self.pos += 1;
                let items = self.parse_list(']')?;
                Ok(Expression::Array(items))
            }
            Some('{') => {
                self.pos += 1;
                self.parse_object()
            }
            Some('"') | Some('\'') => Ok(Expression::Literal(Value::String(
                self.parse_string_value()?,
            ))),
            Some(c) if c.is_ascii_digit() => Ok(Expression::Literal(self.parse_number()?)),
            Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {
                let ident = self.parse_ident()?;
                match ident.as_str() {
                    "true" => return Ok(Expression::Literal(Value::Bool(true))),
                    "false" => return Ok(Expression::Literal(Value::Bool(false))),
                    "null" | "undefined" => return Ok(Expression::Literal(Value::Null)),
                    _ => {}
                }
                self.skip_whitespace();
                if self.peek_char() == Some('(') {
                    self.pos += 1;
                    let args = self.parse_list(')')?;
                    return Ok(Expression::Call(ident, args));
                }
                Ok(Expression::Ident(ident))
            }
            Some(c) => Err(self.error(format!("unexpected '{}' at {}", c, self.pos))),
        }
    }

    fn parse_list(&mut self, close: char) -> Result<Vec<Expression>, EvalError> {
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek_char() == Some(close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            self.skip_whitespace();
            match self.peek_char() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.error(format!("expected ',' or '{}'", close))),
            }
        }
    }

    fn parse_object(&mut self) -> Result<Expression, EvalError> {
        let mut entries = Vec::new();
        self.skip_whitespace();
        if self.peek_char() == Some('}') {
            self.pos += 1;
            return Ok(Expression::Object(entries));
        }
        loop {
            self.skip_whitespace();
            let key = match self.peek_char() {
                Some('"') | Some('\'') => self.parse_string_value()?,
                _ => self.parse_ident()?,
            };
            self.expect(':')?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            self.skip_whitespace();
            match self.peek_char() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(Expression::Object(entries));
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn parse_ident(&mut self) -> Result<String, EvalError> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error(format!("expected identifier at {}", start)));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_string_value(&mut self) -> Result<String, EvalError> {
        let quote = match self.peek_char() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("expected string")),
        };
        self.pos += 1;

        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
            if c == quote {
                return Ok(out);
            }
            if c == '\\' {
                let escaped = self
                    .peek_char()
                    .ok_or_else(|| self.error("unterminated string"))?;
                self.pos += escaped.len_utf8();
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            } else {
                out.push(c);
            }
        }

        Err(self.error("unterminated string"))
    }

    fn parse_number(&mut self) -> Result<Value, EvalError> {
        let start = self.pos;
        let mut fractional = false;

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' && !fractional && self.next_is_digit() {
                fractional = true;
                self.pos += 1;
            } else {
                break;
            }
        }

        let num_str = &self.input[start..self.pos];
        let parsed = if fractional {
            num_str.parse::<f64>().ok().and_then(|f| number(f).ok())
        } else {
            num_str.parse::<i64>().ok().map(Value::from)
        };
        parsed.ok_or_else(|| self.error(format!("invalid number: '{}'", num_str)))
    }

    fn next_is_digit(&self) -> bool {
        self.input[self.pos..]
            .chars()
            .nth(1)
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false)
    }

    fn expect(&mut self, c: char) -> Result<(), EvalError> {
        self.skip_whitespace();
        if self.peek_char() != Some(c) {
            return Err(self.error(format!("expected '{}'", c)));
        }
        self.pos += 1;
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TestScope(Value);

    impl Scope for TestScope {
        fn lookup(&self, name: &str) -> Option<&Value> {
            self.0.get(name)
        }

        fn in_state(&self, name: &str) -> bool {
            name == "active"
        }
    }

    fn eval(src: &str, vars: Value) -> Result<Value, EvalError> {
        Expression::parse(src)?.evaluate(&TestScope(vars))
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("22", json!({})).unwrap(), json!(22));
        assert_eq!(eval("1.5", json!({})).unwrap(), json!(1.5));
        assert_eq!(eval("'hi'", json!({})).unwrap(), json!("hi"));
        assert_eq!(eval("[1, 'a', null]", json!({})).unwrap(), json!([1, "a", null]));
        assert_eq!(eval("{a: 1, 'b': true}", json!({})).unwrap(), json!({"a": 1, "b": true}));
        assert_eq!(eval("-3", json!({})).unwrap(), json!(-3));
    }

    #[test]
    fn test_paths() {
        let vars = json!({"order": {"items": [{"price": 5}]}});
        assert_eq!(eval("order.items[0].price", vars.clone()).unwrap(), json!(5));
        assert_eq!(eval("order.missing", vars.clone()).unwrap(), Value::Null);
        assert_eq!(eval("order.items.length", vars).unwrap(), json!(1));
    }

    #[test]
    fn test_undefined_variable() {
        assert!(matches!(
            eval("nope + 1", json!({})),
            Err(EvalError::Undefined { .. })
        ));
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3", json!({})).unwrap(), json!(7));
        assert_eq!(eval("(1 + 2) * 3", json!({})).unwrap(), json!(9));
        assert_eq!(eval("7 % 4", json!({})).unwrap(), json!(3));
        assert_eq!(eval("1 / 4", json!({})).unwrap(), json!(0.25));
        assert_eq!(eval("'n=' + 3", json!({})).unwrap(), json!("n=3"));
        assert!(eval("1 / 0", json!({})).is_err());
        assert!(eval("true - 1", json!({})).is_err());
    }

    #[test]
    fn test_comparisons() {
        let vars = json!({"amount": 150, "status": "active"});
        assert_eq!(eval("amount > 100", vars.clone()).unwrap(), json!(true));
        assert_eq!(eval("amount <= 100", vars.clone()).unwrap(), json!(false));
        assert_eq!(eval("status == 'active'", vars.clone()).unwrap(), json!(true));
        assert_eq!(eval("status !== 'active'", vars.clone()).unwrap(), json!(false));
        assert_eq!(eval("'a' < 'b'", vars).unwrap(), json!(true));
    }

    #[test]
    fn test_logic() {
        let vars = json!({"a": true, "b": false, "c": 0});
        assert_eq!(eval("a && !b", vars.clone()).unwrap(), json!(true));
        assert_eq!(eval("b || c", vars.clone()).unwrap(), json!(false));
        assert_eq!(eval("b && nope", vars.clone()).unwrap(), json!(false));
        assert_eq!(eval("a || nope", vars).unwrap(), json!(true));
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval("In('active')", json!({})).unwrap(), json!(true));
        assert_eq!(eval("In(\"idle\")", json!({})).unwrap(), json!(false));
        assert_eq!(eval("len([1, 2, 3])", json!({})).unwrap(), json!(3));
        assert!(eval("nope(1)", json!({})).is_err());
    }

    #[test]
    fn test_syntax_errors() {
        assert!(Expression::parse("1 +").is_err());
        assert!(Expression::parse("(1").is_err());
        assert!(Expression::parse("'open").is_err());
        assert!(Expression::parse("a b").is_err());
    }

    #[test]
    fn test_script_statements() {
        let stmts = Statement::parse_script("x = 1; y = x + 1;; z['k'] = 'a;b'").unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[0], Statement::Assign(Expression::Ident(_), _)));
        assert!(matches!(stmts[2], Statement::Assign(Expression::Index(..), _)));

        assert!(Statement::parse_script("1 = 2").is_err());
        assert!(Statement::parse_script("a == 1").is_ok());
    }

    #[test]
    fn test_location_path() {
        let scope = TestScope(json!({"i": 2}));
        let expr = Expression::parse("a.b[i]['c']").unwrap();
        let (root, path) = expr.location(&scope).unwrap();
        assert_eq!(root, "a");
        assert_eq!(
            path,
            vec![
                PathSegment::Key("b".into()),
                PathSegment::Index(2),
                PathSegment::Key("c".into())
            ]
        );
    }
}
