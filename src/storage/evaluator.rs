//! Predicate evaluator for the in-memory executor
//!
//! Evaluates bound expressions against one record at a time. Fields behind
//! to-one joins are looked up in the related table. A missing field, a
//! dangling foreign key and a null operand all evaluate to null, and null
//! is false wherever a boolean is required.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::Utc;

use crate::core::errors::{ODataError, Result};
use crate::core::value::{Record, Value};
use crate::engine::plan::{BoundExpr, BoundField, Join};
use crate::ql::ast::{ArithOp, CompareOp, Function};

/// Context for expression evaluation
pub struct Evaluator<'a> {
    tables: &'a BTreeMap<String, Vec<Record>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(tables: &'a BTreeMap<String, Vec<Record>>) -> Self {
        Evaluator { tables }
    }

    /// True when `expr` holds for `row`
    pub fn matches(&self, expr: &BoundExpr, row: &Record) -> Result<bool> {
        Ok(truthy(&self.evaluate(expr, row)?))
    }

    /// Evaluate an expression in the context of `row`
    pub fn evaluate(&self, expr: &BoundExpr, row: &Record) -> Result<Value> {
        match expr {
            BoundExpr::Literal(value) => Ok(value.clone()),
            BoundExpr::Field(field) => Ok(self.field(field, row)),
            BoundExpr::And(l, r) => Ok(Value::Boolean(self.matches(l, row)? && self.matches(r, row)?)),
            BoundExpr::Or(l, r) => Ok(Value::Boolean(self.matches(l, row)? || self.matches(r, row)?)),
            BoundExpr::Not(e) => Ok(Value::Boolean(!self.matches(e, row)?)),
            BoundExpr::Compare { op, left, right } => {
                let left = self.evaluate(left, row)?;
                let right = self.evaluate(right, row)?;
                Ok(Value::Boolean(compare(*op, &left, &right)))
            },
            BoundExpr::Arith { op, left, right } => {
                let left = self.evaluate(left, row)?;
                let right = self.evaluate(right, row)?;
                arithmetic(*op, &left, &right)
            },
            BoundExpr::Call { function, args } => {
                let args = args.iter()
                    .map(|arg| self.evaluate(arg, row))
                    .collect::<Result<Vec<_>>>()?;
                call(*function, &args)
            },
        }
    }

    /// Value of a bound field, following its joins
    pub fn field(&self, field: &BoundField, row: &Record) -> Value {
        let mut hops = field.hops.iter();
        let mut current = match hops.next() {
            None => return lookup(row, &field.field),
            Some(first) => match self.follow(first, row) {
                Some(next) => next,
                None => return Value::Null,
            },
        };
        for hop in hops {
            match self.follow(hop, current) {
                Some(next) => current = next,
                None => return Value::Null,
            }
        }
        lookup(current, &field.field)
    }

    fn follow(&self, join: &Join, row: &Record) -> Option<&'a Record> {
        let value = row.get(&join.source_field).filter(|v| !v.is_null())?;
        self.tables.get(&join.target)?
            .iter()
            .find(|candidate| candidate.get(&join.target_field).map_or(false, |v| same(v, value)))
    }
}

/// Null-safe equality used for joins and key matching
pub fn same(left: &Value, right: &Value) -> bool {
    !left.is_null() && !right.is_null() && left.compare(right) == Some(Ordering::Equal)
}

fn lookup(row: &Record, field: &str) -> Value {
    row.get(field).cloned().unwrap_or(Value::Null)
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Boolean(true))
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        let both = left.is_null() && right.is_null();
        return match op {
            CompareOp::Eq => both,
            CompareOp::Ne => !both,
            _ => false,
        };
    }

    match (op, left.compare(right)) {
        (CompareOp::Eq, ordering) => ordering == Some(Ordering::Equal),
        (CompareOp::Ne, ordering) => ordering != Some(Ordering::Equal),
        (_, None) => false,
        (CompareOp::Gt, Some(ordering)) => ordering == Ordering::Greater,
        (CompareOp::Ge, Some(ordering)) => ordering != Ordering::Less,
        (CompareOp::Lt, Some(ordering)) => ordering == Ordering::Less,
        (CompareOp::Le, Some(ordering)) => ordering != Ordering::Greater,
    }
}

fn arithmetic(op: ArithOp, left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        let result = match op {
            ArithOp::Add => a.checked_add(*b),
            ArithOp::Sub => a.checked_sub(*b),
            ArithOp::Mul => a.checked_mul(*b),
            ArithOp::Div => a.checked_div(*b),
            ArithOp::Mod => a.checked_rem(*b),
        };
        return result.map(Value::Integer).ok_or_else(|| ODataError::InvalidOperation(format!(
            "integer overflow or division by zero in {} {} {}", a, op.as_str(), b
        )));
    }

    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::Float(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Mod => a % b,
        })),
        _ => Err(ODataError::InvalidOperation(format!(
            "cannot apply {} to {} and {}", op.as_str(), left.type_name(), right.type_name()
        ))),
    }
}

fn call(function: Function, args: &[Value]) -> Result<Value> {
    if args.len() != function.arity() {
        return Err(ODataError::FunctionArity {
            name: function.name().to_string(),
            expected: function.arity(),
            found: args.len(),
        });
    }
    if function == Function::Now {
        return Ok(Value::DateTime(Utc::now().into()));
    }
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }

    match function {
        Function::Contains => Ok(Value::Boolean(text(function, &args[0])?.contains(text(function, &args[1])?))),
        Function::StartsWith => Ok(Value::Boolean(text(function, &args[0])?.starts_with(text(function, &args[1])?))),
        Function::EndsWith => Ok(Value::Boolean(text(function, &args[0])?.ends_with(text(function, &args[1])?))),
        Function::ToLower => Ok(Value::String(text(function, &args[0])?.to_lowercase())),
        Function::ToUpper => Ok(Value::String(text(function, &args[0])?.to_uppercase())),
        Function::Trim => Ok(Value::String(text(function, &args[0])?.trim().to_string())),
        Function::Length => Ok(Value::Integer(text(function, &args[0])?.chars().count() as i64)),
        Function::Concat => Ok(Value::String(format!("{}{}", text(function, &args[0])?, text(function, &args[1])?))),
        Function::Year => date_part(function, &args[0], args[0].year()),
        Function::Month => date_part(function, &args[0], args[0].month()),
        Function::Day => date_part(function, &args[0], args[0].day()),
        Function::Now => Ok(Value::DateTime(Utc::now().into())),
    }
}

fn text(function: Function, value: &Value) -> Result<&str> {
    value.as_str().ok_or_else(|| ODataError::InvalidOperation(format!(
        "{}() expects text, got {}", function.name(), value.type_name()
    )))
}

fn date_part(function: Function, value: &Value, component: Option<i64>) -> Result<Value> {
    component.map(Value::Integer).ok_or_else(|| ODataError::InvalidOperation(format!(
        "{}() expects a date, got {}", function.name(), value.type_name()
    )))
}
