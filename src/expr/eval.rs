//! Evaluation of a compiled `Expr` against a live state chart (§4.1
//! "Evaluation takes a compiled expression and a StateChart").

use crate::value::{OrderedMap, Value};

use super::ast::{BinOp, CompiledLocation, Expr, UnaryOp};

/// Everything the evaluator needs from a state chart, kept as a trait so
/// `expr::eval` does not depend on `interpreter` (the interpreter instead
/// implements this for `StateChart`).
pub trait EvalContext {
    /// Resolves a top-level identifier: a data model variable or `_event`.
    fn get_variable(&self, name: &str) -> Value;
    /// `In(id)`: true iff `id` is an active leaf or an ancestor of one.
    fn is_in_configuration(&self, state_id: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub reason: String,
}

impl EvalError {
    fn new(reason: impl Into<String>) -> Self {
        EvalError {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Evaluates an expression. Errors (division by zero, unknown function,
/// type mismatch) are returned rather than panicking; they never mutate
/// anything (§4.1).
pub fn evaluate(expr: &Expr, ctx: &dyn EvalContext) -> Result<Value, EvalError> {
    match expr {
        Expr::IntLiteral(i) => Ok(Value::Number(*i as f64)),
        Expr::FloatLiteral(f) => Ok(Value::Number(*f)),
        Expr::StringLiteral(s) => Ok(Value::String(s.clone())),
        Expr::BoolLiteral(b) => Ok(Value::Boolean(*b)),
        Expr::Identifier(name) => Ok(ctx.get_variable(name)),
        Expr::Member(base, key) => {
            let base_val = evaluate(base, ctx)?;
            Ok(base_val.get_member(key))
        }
        Expr::Index(base, index) => {
            let base_val = evaluate(base, ctx)?;
            let index_val = evaluate(index, ctx)?;
            Ok(index_by_value(&base_val, &index_val))
        }
        Expr::Unary(op, inner) => evaluate_unary(*op, inner, ctx),
        Expr::Binary(op, lhs, rhs) => evaluate_binary(*op, lhs, rhs, ctx),
        Expr::In(inner) => {
            let v = evaluate(inner, ctx)?;
            let id = match v {
                Value::String(s) => s,
                other => return Err(EvalError::new(format!("In() expects a string, got {}", other))),
            };
            Ok(Value::Boolean(ctx.is_in_configuration(&id)))
        }
        Expr::ArrayLiteral(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(item, ctx)?);
            }
            Ok(Value::Array(values))
        }
    }
}

fn index_by_value(base: &Value, index: &Value) -> Value {
    match (base, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = *n as i64;
            if i >= 0 && (i as usize) < items.len() {
                items[i as usize].clone()
            } else {
                Value::Undefined
            }
        }
        (Value::Object(_), Value::String(key)) => base.get_member(key),
        _ => Value::Undefined,
    }
}

fn evaluate_unary(op: UnaryOp, inner: &Expr, ctx: &dyn EvalContext) -> Result<Value, EvalError> {
    let v = evaluate(inner, ctx)?;
    match op {
        UnaryOp::Not => Ok(Value::Boolean(!v.to_bool())),
        UnaryOp::Negate => match v.as_number() {
            Some(n) => Ok(Value::Number(-n)),
            None => Err(EvalError::new(format!("cannot negate {}", v))),
        },
    }
}

fn evaluate_binary(
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &dyn EvalContext,
) -> Result<Value, EvalError> {
    // Logical operators short-circuit and coerce to boolean per §4.1.
    match op {
        BinOp::And => {
            let l = evaluate(lhs, ctx)?;
            if !l.to_bool() {
                return Ok(Value::Boolean(false));
            }
            let r = evaluate(rhs, ctx)?;
            return Ok(Value::Boolean(r.to_bool()));
        }
        BinOp::Or => {
            let l = evaluate(lhs, ctx)?;
            if l.to_bool() {
                return Ok(Value::Boolean(true));
            }
            let r = evaluate(rhs, ctx)?;
            return Ok(Value::Boolean(r.to_bool()));
        }
        _ => {}
    }

    let l = evaluate(lhs, ctx)?;
    let r = evaluate(rhs, ctx)?;

    match op {
        BinOp::Add => add(&l, &r),
        BinOp::Sub => numeric_op(&l, &r, "-", |a, b| Ok(a - b)),
        BinOp::Mul => numeric_op(&l, &r, "*", |a, b| Ok(a * b)),
        BinOp::Div => numeric_op(&l, &r, "/", |a, b| {
            if b == 0.0 {
                Err(EvalError::new("division by zero"))
            } else {
                Ok(a / b)
            }
        }),
        BinOp::Mod => numeric_op(&l, &r, "%", |a, b| {
            if b == 0.0 {
                Err(EvalError::new("division by zero"))
            } else {
                Ok(a % b)
            }
        }),
        BinOp::Eq => Ok(Value::Boolean(values_equal(&l, &r))),
        BinOp::NotEq => Ok(Value::Boolean(!values_equal(&l, &r))),
        BinOp::Lt => compare(&l, &r).map(|o| Value::Boolean(o == std::cmp::Ordering::Less)),
        BinOp::LtEq => compare(&l, &r).map(|o| Value::Boolean(o != std::cmp::Ordering::Greater)),
        BinOp::Gt => compare(&l, &r).map(|o| Value::Boolean(o == std::cmp::Ordering::Greater)),
        BinOp::GtEq => compare(&l, &r).map(|o| Value::Boolean(o != std::cmp::Ordering::Less)),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

/// `+` concatenates strings, otherwise coerces to numeric addition (§4.1).
fn add(l: &Value, r: &Value) -> Result<Value, EvalError> {
    if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
        return Ok(Value::String(format!("{}{}", l, r)));
    }
    numeric_op(l, r, "+", |a, b| Ok(a + b))
}

fn numeric_op(
    l: &Value,
    r: &Value,
    op: &str,
    f: impl Fn(f64, f64) -> Result<f64, EvalError>,
) -> Result<Value, EvalError> {
    match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => f(a, b).map(Value::Number),
        _ => Err(EvalError::new(format!(
            "operator '{}' requires numeric operands, got {} and {}",
            op, l, r
        ))),
    }
}

/// Undefined is always unequal to anything, including itself (§4.1 "undefined
/// always unequal").
fn values_equal(l: &Value, r: &Value) -> bool {
    if l.is_undefined() || r.is_undefined() {
        return false;
    }
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Null, Value::Null) => true,
        (Value::Array(a), Value::Array(b)) => a == b,
        (Value::Object(a), Value::Object(b)) => a == b,
        // Mixed-type numeric/string comparisons follow lexicographic/numeric
        // rules (§4.1); a number compares equal to a numeric string.
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (l.as_number().or_else(|| parse_numeric(l)), r.as_number().or_else(|| parse_numeric(r))) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => false,
    }
}

fn parse_numeric(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn compare(l: &Value, r: &Value) -> Result<std::cmp::Ordering, EvalError> {
    if l.is_undefined() || r.is_undefined() {
        return Err(EvalError::new("cannot order undefined"));
    }
    match (l, r) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (l.as_number().or_else(|| parse_numeric(l)), r.as_number().or_else(|| parse_numeric(r))) {
            (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| EvalError::new("NaN comparison")),
            _ => Err(EvalError::new(format!("cannot compare {} and {}", l, r))),
        },
    }
}

/// Forces a condition to boolean: conditions never throw (§4.1).
pub fn evaluate_condition(expr: &Expr, ctx: &dyn EvalContext) -> bool {
    match evaluate(expr, ctx) {
        Ok(v) => v.to_bool(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignError {
    pub reason: String,
}

/// Assigns `value` into `data` at `location`. The top-level variable may be
/// freshly created; every intermediate container in the path must already
/// exist as an object, or the assignment fails with `assign.execution`
/// (§4.1, and the Open Question resolved in DESIGN.md: no implicit
/// intermediate creation).
pub fn assign(location: &CompiledLocation, value: Value, data: &mut OrderedMap) -> Result<(), AssignError> {
    let (root, rest) = location.path.split_first().expect("location path is non-empty");
    if rest.is_empty() {
        data.insert(root.clone(), value);
        return Ok(());
    }

    // Unlike the bare top-level variable, a nested location's parent
    // container must already exist as an object (§4.1); it is not implicitly
    // created just because the overall location is new.
    let mut root_obj = match data.get(root) {
        Some(Value::Object(m)) => m.clone(),
        Some(_) => {
            return Err(AssignError {
                reason: format!("'{}' is not an object, cannot assign into it", root),
            })
        }
        None => {
            return Err(AssignError {
                reason: format!("'{}' does not exist; its parent must already be a bound object", root),
            })
        }
    };
    assign_into(&mut root_obj, rest, value)?;
    data.insert(root.clone(), Value::Object(root_obj));
    Ok(())
}

fn assign_into(container: &mut OrderedMap, path: &[String], value: Value) -> Result<(), AssignError> {
    let (key, rest) = path.split_first().expect("non-empty path");
    if rest.is_empty() {
        // The immediate parent container already exists (checked by the
        // caller); a new key within it may be created freely.
        container.insert(key.clone(), value);
        return Ok(());
    }
    match container.get(key) {
        Some(Value::Object(_)) => {}
        _ => {
            return Err(AssignError {
                reason: format!(
                    "'{}' does not already exist as an object; intermediate creation is not implicit",
                    key
                ),
            })
        }
    }
    let mut nested = match container.get(key).cloned() {
        Some(Value::Object(m)) => m,
        _ => unreachable!(),
    };
    assign_into(&mut nested, rest, value)?;
    container.insert(key.clone(), Value::Object(nested));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::{compile, compile_location};

    struct TestCtx {
        data: OrderedMap,
        config: Vec<String>,
    }

    impl EvalContext for TestCtx {
        fn get_variable(&self, name: &str) -> Value {
            self.data.get(name).cloned().unwrap_or(Value::Undefined)
        }
        fn is_in_configuration(&self, state_id: &str) -> bool {
            self.config.iter().any(|s| s == state_id)
        }
    }

    fn ctx(pairs: &[(&str, Value)], config: &[&str]) -> TestCtx {
        let mut data = OrderedMap::new();
        for (k, v) in pairs {
            data.insert(*k, v.clone());
        }
        TestCtx {
            data,
            config: config.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn undefined_identifier_yields_undefined_sentinel() {
        let c = ctx(&[], &[]);
        let e = compile("missing").unwrap();
        assert_eq!(evaluate(&e, &c).unwrap(), Value::Undefined);
    }

    #[test]
    fn member_access_on_undefined_yields_undefined() {
        let c = ctx(&[], &[]);
        let e = compile("missing.inner").unwrap();
        assert_eq!(evaluate(&e, &c).unwrap(), Value::Undefined);
    }

    #[test]
    fn undefined_is_always_unequal() {
        let c = ctx(&[], &[]);
        let e = compile("missing == missing").unwrap();
        assert_eq!(evaluate(&e, &c).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn array_literal_evaluates_each_element() {
        let c = ctx(&[("x", Value::Number(2.0))], &[]);
        let e = compile("[1, x, 1+2]").unwrap();
        assert_eq!(
            evaluate(&e, &c).unwrap(),
            Value::Array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)])
        );
    }

    #[test]
    fn in_predicate_checks_configuration() {
        let c = ctx(&[], &["stateA", "stateB"]);
        assert!(evaluate_condition(&compile("In('stateA')").unwrap(), &c));
        assert!(!evaluate_condition(&compile("In('stateZ')").unwrap(), &c));
    }

    #[test]
    fn division_by_zero_is_an_error_but_condition_is_false() {
        let c = ctx(&[], &[]);
        let e = compile("1/0").unwrap();
        assert!(evaluate(&e, &c).is_err());
        assert!(!evaluate_condition(&e, &c));
    }

    #[test]
    fn assignment_creates_top_level_but_not_nested_intermediates() {
        let mut data = OrderedMap::new();
        let loc = compile_location("fresh").unwrap();
        assign(&loc, Value::Number(1.0), &mut data).unwrap();
        assert_eq!(data.get("fresh"), Some(&Value::Number(1.0)));

        let loc2 = compile_location("nested.deep").unwrap();
        let err = assign(&loc2, Value::Number(2.0), &mut data).unwrap_err();
        assert!(err.reason.contains("does not exist"));
    }

    #[test]
    fn assignment_into_existing_object_succeeds() {
        let mut data = OrderedMap::new();
        let mut inner = OrderedMap::new();
        inner.insert("deep", Value::Number(0.0));
        data.insert("nested", Value::Object(inner));

        let loc = compile_location("nested.deep").unwrap();
        assign(&loc, Value::Number(5.0), &mut data).unwrap();
        assert_eq!(
            data.get("nested").unwrap().get_member("deep"),
            Value::Number(5.0)
        );
    }
}
