//! Abstract Syntax Tree for `$filter` expressions
//!
//! The tree is built once by the parser and never mutated afterwards.
//! Literals are already coerced to typed values.

use std::fmt;

use serde::Serialize;

use crate::core::value::Value;

/// Logical connectives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Built-in functions callable from `$filter`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Function {
    Contains,
    StartsWith,
    EndsWith,
    Now,
    ToLower,
    ToUpper,
    Trim,
    Length,
    Concat,
    Year,
    Month,
    Day,
}

impl LogicalOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
            LogicalOp::Not => "not",
        }
    }
}

impl CompareOp {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "eq" => Some(CompareOp::Eq),
            "ne" => Some(CompareOp::Ne),
            "gt" => Some(CompareOp::Gt),
            "lt" => Some(CompareOp::Lt),
            "ge" => Some(CompareOp::Ge),
            "le" => Some(CompareOp::Le),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => "gt",
            CompareOp::Lt => "lt",
            CompareOp::Ge => "ge",
            CompareOp::Le => "le",
        }
    }
}

impl ArithOp {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "add" => Some(ArithOp::Add),
            "sub" => Some(ArithOp::Sub),
            "mul" => Some(ArithOp::Mul),
            "div" => Some(ArithOp::Div),
            "mod" => Some(ArithOp::Mod),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Mod => "mod",
        }
    }
}

impl Function {
    /// Resolve a function name as written in a filter
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "contains" => Some(Function::Contains),
            "startswith" => Some(Function::StartsWith),
            "endswith" => Some(Function::EndsWith),
            "now" => Some(Function::Now),
            "tolower" => Some(Function::ToLower),
            "toupper" => Some(Function::ToUpper),
            "trim" => Some(Function::Trim),
            "length" => Some(Function::Length),
            "concat" => Some(Function::Concat),
            "year" => Some(Function::Year),
            "month" => Some(Function::Month),
            "day" => Some(Function::Day),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Contains => "contains",
            Function::StartsWith => "startswith",
            Function::EndsWith => "endswith",
            Function::Now => "now",
            Function::ToLower => "tolower",
            Function::ToUpper => "toupper",
            Function::Trim => "trim",
            Function::Length => "length",
            Function::Concat => "concat",
            Function::Year => "year",
            Function::Month => "month",
            Function::Day => "day",
        }
    }

    /// Number of arguments the function takes
    pub fn arity(&self) -> usize {
        match self {
            Function::Now => 0,
            Function::ToLower | Function::ToUpper | Function::Trim | Function::Length
            | Function::Year | Function::Month | Function::Day => 1,
            Function::Contains | Function::StartsWith | Function::EndsWith
            | Function::Concat => 2,
        }
    }

    /// Whether the call yields a boolean (usable directly as a predicate)
    pub fn is_predicate(&self) -> bool {
        matches!(self, Function::Contains | Function::StartsWith | Function::EndsWith)
    }
}

/// A reference to a field, possibly through relationships (`order/customer/name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldRef {
    pub path: Vec<String>,
}

impl FieldRef {
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldRef { path: path.into_iter().map(Into::into).collect() }
    }

    /// Last segment: the field itself
    pub fn field(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or("")
    }

    /// Leading segments: the relationships crossed to reach the field
    pub fn relationships(&self) -> &[String] {
        match self.path.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.join("/"))
    }
}

/// A node of the `$filter` tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "node", rename_all = "snake_case")]
pub enum FilterExpression {
    /// `and`/`or` with both operands, or `not` with its operand in `left`
    Logical {
        op: LogicalOp,
        left: Box<FilterExpression>,
        right: Option<Box<FilterExpression>>,
    },
    Compare {
        op: CompareOp,
        left: Box<FilterExpression>,
        right: Box<FilterExpression>,
    },
    Arith {
        op: ArithOp,
        left: Box<FilterExpression>,
        right: Box<FilterExpression>,
    },
    Call {
        function: Function,
        args: Vec<FilterExpression>,
    },
    Field(FieldRef),
    Literal(Value),
}

impl FilterExpression {
    pub fn and(left: FilterExpression, right: FilterExpression) -> Self {
        FilterExpression::Logical {
            op: LogicalOp::And,
            left: Box::new(left),
            right: Some(Box::new(right)),
        }
    }

    pub fn or(left: FilterExpression, right: FilterExpression) -> Self {
        FilterExpression::Logical {
            op: LogicalOp::Or,
            left: Box::new(left),
            right: Some(Box::new(right)),
        }
    }

    pub fn not(operand: FilterExpression) -> Self {
        FilterExpression::Logical {
            op: LogicalOp::Not,
            left: Box::new(operand),
            right: None,
        }
    }

    pub fn compare(op: CompareOp, left: FilterExpression, right: FilterExpression) -> Self {
        FilterExpression::Compare { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn arith(op: ArithOp, left: FilterExpression, right: FilterExpression) -> Self {
        FilterExpression::Arith { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn call(function: Function, args: Vec<FilterExpression>) -> Self {
        FilterExpression::Call { function, args }
    }

    pub fn field<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterExpression::Field(FieldRef::new(path))
    }

    pub fn literal<V: Into<Value>>(value: V) -> Self {
        FilterExpression::Literal(value.into())
    }

    /// Collect every field reference in the tree, left to right
    pub fn field_refs(&self) -> Vec<&FieldRef> {
        let mut refs = Vec::new();
        self.collect_field_refs(&mut refs);
        refs
    }

    fn collect_field_refs<'a>(&'a self, refs: &mut Vec<&'a FieldRef>) {
        match self {
            FilterExpression::Logical { left, right, .. } => {
                left.collect_field_refs(refs);
                if let Some(right) = right {
                    right.collect_field_refs(refs);
                }
            },
            FilterExpression::Compare { left, right, .. }
            | FilterExpression::Arith { left, right, .. } => {
                left.collect_field_refs(refs);
                right.collect_field_refs(refs);
            },
            FilterExpression::Call { args, .. } => {
                for arg in args {
                    arg.collect_field_refs(refs);
                }
            },
            FilterExpression::Field(field) => refs.push(field),
            FilterExpression::Literal(_) => {},
        }
    }

    /// Binding strength, matching the grammar levels
    fn precedence(&self) -> u8 {
        match self {
            FilterExpression::Logical { op: LogicalOp::Or, .. } => 1,
            FilterExpression::Logical { op: LogicalOp::And, .. } => 2,
            FilterExpression::Logical { op: LogicalOp::Not, .. } => 3,
            FilterExpression::Compare { .. } => 4,
            FilterExpression::Arith { op: ArithOp::Add | ArithOp::Sub, .. } => 5,
            FilterExpression::Arith { .. } => 6,
            FilterExpression::Call { .. }
            | FilterExpression::Field(_)
            | FilterExpression::Literal(_) => 7,
        }
    }

    fn write_operand(&self, f: &mut fmt::Formatter<'_>, min_precedence: u8) -> fmt::Result {
        if self.precedence() < min_precedence {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

/// Render the tree back to `$filter` syntax with the minimal parentheses
/// needed to reparse into the same shape
impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precedence = self.precedence();
        match self {
            FilterExpression::Logical { op: LogicalOp::Not, left, .. } => {
                write!(f, "not ")?;
                left.write_operand(f, precedence)
            },
            FilterExpression::Logical { op, left, right } => {
                left.write_operand(f, precedence)?;
                write!(f, " {} ", op.as_str())?;
                match right {
                    Some(right) => right.write_operand(f, precedence + 1),
                    None => Ok(()),
                }
            },
            FilterExpression::Compare { op, left, right } => {
                left.write_operand(f, precedence + 1)?;
                write!(f, " {} ", op.as_str())?;
                right.write_operand(f, precedence + 1)
            },
            FilterExpression::Arith { op, left, right } => {
                left.write_operand(f, precedence)?;
                write!(f, " {} ", op.as_str())?;
                right.write_operand(f, precedence + 1)
            },
            FilterExpression::Call { function, args } => {
                write!(f, "{}(", function.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            },
            FilterExpression::Field(field) => write!(f, "{}", field),
            FilterExpression::Literal(value) => write!(f, "{}", value),
        }
    }
}
