//! Evaluator for parsed expressions against a variable map.

use std::collections::HashMap;

use serde_json::Value;

use crate::expr::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::expr::error::ExprError;

/// Runtime value during evaluation.
#[derive(Debug, Clone, PartialEq)]
enum EvalValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<EvalValue>),
}

impl EvalValue {
    fn truthy(&self) -> bool {
        match self {
            EvalValue::Null => false,
            EvalValue::Bool(b) => *b,
            EvalValue::Num(n) => *n != 0.0,
            EvalValue::Str(s) => !s.is_empty(),
            EvalValue::List(items) => !items.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            EvalValue::Null => "null",
            EvalValue::Bool(_) => "bool",
            EvalValue::Num(_) => "number",
            EvalValue::Str(_) => "string",
            EvalValue::List(_) => "list",
        }
    }

    fn from_json(name: &str, value: &Value) -> Result<Self, ExprError> {
        match value {
            Value::Null => Ok(EvalValue::Null),
            Value::Bool(b) => Ok(EvalValue::Bool(*b)),
            Value::Number(n) => n
                .as_f64()
                .map(EvalValue::Num)
                .ok_or_else(|| ExprError::UnsupportedValue {
                    name: name.to_string(),
                    detail: "non-finite number".to_string(),
                }),
            Value::String(s) => Ok(EvalValue::Str(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| EvalValue::from_json(name, item))
                .collect::<Result<Vec<_>, _>>()
                .map(EvalValue::List),
            Value::Object(_) => Err(ExprError::UnsupportedValue {
                name: name.to_string(),
                detail: "nested object (flatten the payload first)".to_string(),
            }),
        }
    }
}

/// Evaluate an expression against a variable map, coercing the final value
/// to a boolean by truthiness.
pub fn evaluate(expr: &Expr, vars: &HashMap<String, Value>) -> Result<bool, ExprError> {
    Ok(eval(expr, vars)?.truthy())
}

fn eval(expr: &Expr, vars: &HashMap<String, Value>) -> Result<EvalValue, ExprError> {
    match expr {
        Expr::Literal(Literal::Number(n)) => Ok(EvalValue::Num(*n)),
        Expr::Literal(Literal::Str(s)) => Ok(EvalValue::Str(s.clone())),
        Expr::Literal(Literal::Bool(b)) => Ok(EvalValue::Bool(*b)),
        Expr::Ident(name) => {
            let value = vars
                .get(name)
                .ok_or_else(|| ExprError::UnknownName(name.clone()))?;
            EvalValue::from_json(name, value)
        }
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, vars))
            .collect::<Result<Vec<_>, _>>()
            .map(EvalValue::List),
        Expr::Unary { op, expr } => {
            let value = eval(expr, vars)?;
            match op {
                UnaryOp::Not => Ok(EvalValue::Bool(!value.truthy())),
                UnaryOp::Neg => match value {
                    EvalValue::Num(n) => Ok(EvalValue::Num(-n)),
                    other => Err(ExprError::type_mismatch(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                },
            }
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, vars),
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    vars: &HashMap<String, Value>,
) -> Result<EvalValue, ExprError> {
    // Short-circuit before evaluating the right side.
    if op == BinaryOp::And {
        let left = eval(lhs, vars)?;
        if !left.truthy() {
            return Ok(EvalValue::Bool(false));
        }
        return Ok(EvalValue::Bool(eval(rhs, vars)?.truthy()));
    }
    if op == BinaryOp::Or {
        let left = eval(lhs, vars)?;
        if left.truthy() {
            return Ok(EvalValue::Bool(true));
        }
        return Ok(EvalValue::Bool(eval(rhs, vars)?.truthy()));
    }

    let left = eval(lhs, vars)?;
    let right = eval(rhs, vars)?;

    match op {
        BinaryOp::Add => match (&left, &right) {
            (EvalValue::Num(a), EvalValue::Num(b)) => Ok(EvalValue::Num(a + b)),
            (EvalValue::Str(a), EvalValue::Str(b)) => Ok(EvalValue::Str(format!("{a}{b}"))),
            _ => Err(numeric_mismatch("+", &left, &right)),
        },
        BinaryOp::Sub => arith(&left, &right, "-", |a, b| Ok(a - b)),
        BinaryOp::Mul => arith(&left, &right, "*", |a, b| Ok(a * b)),
        BinaryOp::Div => arith(&left, &right, "/", |a, b| {
            if b == 0.0 {
                Err(ExprError::DivisionByZero)
            } else {
                Ok(a / b)
            }
        }),
        BinaryOp::Rem => arith(&left, &right, "%", |a, b| {
            if b == 0.0 {
                Err(ExprError::DivisionByZero)
            } else {
                Ok(a % b)
            }
        }),
        BinaryOp::Gt => ordering(&left, &right, ">", |o| o == std::cmp::Ordering::Greater),
        BinaryOp::Lt => ordering(&left, &right, "<", |o| o == std::cmp::Ordering::Less),
        BinaryOp::Ge => ordering(&left, &right, ">=", |o| o != std::cmp::Ordering::Less),
        BinaryOp::Le => ordering(&left, &right, "<=", |o| o != std::cmp::Ordering::Greater),
        BinaryOp::Eq => Ok(EvalValue::Bool(values_equal(&left, &right))),
        BinaryOp::Ne => Ok(EvalValue::Bool(!values_equal(&left, &right))),
        BinaryOp::In => membership(&left, &right),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn arith(
    left: &EvalValue,
    right: &EvalValue,
    op: &str,
    f: impl Fn(f64, f64) -> Result<f64, ExprError>,
) -> Result<EvalValue, ExprError> {
    match (left, right) {
        (EvalValue::Num(a), EvalValue::Num(b)) => f(*a, *b).map(EvalValue::Num),
        _ => Err(numeric_mismatch(op, left, right)),
    }
}

fn ordering(
    left: &EvalValue,
    right: &EvalValue,
    op: &str,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<EvalValue, ExprError> {
    let ord = match (left, right) {
        (EvalValue::Num(a), EvalValue::Num(b)) => {
            a.partial_cmp(b).ok_or_else(|| {
                ExprError::type_mismatch(format!("cannot order NaN with '{op}'"))
            })?
        }
        (EvalValue::Str(a), EvalValue::Str(b)) => a.cmp(b),
        _ => {
            return Err(ExprError::type_mismatch(format!(
                "'{op}' needs two numbers or two strings, got {} and {}",
                left.type_name(),
                right.type_name()
            )))
        }
    };
    Ok(EvalValue::Bool(accept(ord)))
}

fn values_equal(left: &EvalValue, right: &EvalValue) -> bool {
    match (left, right) {
        (EvalValue::Num(a), EvalValue::Num(b)) => a == b,
        (EvalValue::Str(a), EvalValue::Str(b)) => a == b,
        (EvalValue::Bool(a), EvalValue::Bool(b)) => a == b,
        (EvalValue::Null, EvalValue::Null) => true,
        (EvalValue::List(a), EvalValue::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        _ => false,
    }
}

fn membership(left: &EvalValue, right: &EvalValue) -> Result<EvalValue, ExprError> {
    match right {
        EvalValue::List(items) => Ok(EvalValue::Bool(
            items.iter().any(|item| values_equal(left, item)),
        )),
        EvalValue::Str(haystack) => match left {
            EvalValue::Str(needle) => Ok(EvalValue::Bool(haystack.contains(needle.as_str()))),
            other => Err(ExprError::type_mismatch(format!(
                "'in' over a string needs a string needle, got {}",
                other.type_name()
            ))),
        },
        other => Err(ExprError::type_mismatch(format!(
            "'in' needs a list or string on the right, got {}",
            other.type_name()
        ))),
    }
}

fn numeric_mismatch(op: &str, left: &EvalValue, right: &EvalValue) -> ExprError {
    ExprError::type_mismatch(format!(
        "'{op}' needs numeric operands, got {} and {}",
        left.type_name(),
        right.type_name()
    ))
}
