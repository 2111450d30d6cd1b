//! Query plan model
//!
//! A `QueryPlan` is the schema-bound form of a request: every field is
//! resolved to a concrete entity field, every relationship to a join, and
//! policy (hidden fields, restrictions, paging) is already applied. Plans
//! are built once and handed to an executor read-only.

use std::fmt;

use serde::Serialize;

use crate::config::PaginationMode;
use crate::core::schema::{FieldType, Relationship};
use crate::core::value::Value;
use crate::ql::ast::{ArithOp, CompareOp, Function};
use crate::ql::options::SortDirection;

/// A resolved relationship: rows match when
/// `source.source_field == target.target_field`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Join {
    pub relationship: String,
    pub source: String,
    pub source_field: String,
    pub target: String,
    pub target_field: String,
    /// True for to-many relationships
    pub many: bool,
}

impl Join {
    pub fn new(source: &str, relationship: &Relationship) -> Self {
        Join {
            relationship: relationship.name.clone(),
            source: source.to_string(),
            source_field: relationship.source_field.clone(),
            target: relationship.target.clone(),
            target_field: relationship.target_field.clone(),
            many: relationship.is_collection(),
        }
    }
}

/// A field reached from the plan's entity through zero or more to-one joins
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundField {
    pub hops: Vec<Join>,
    pub field: String,
    pub kind: FieldType,
}

impl BoundField {
    /// A field of the entity itself
    pub fn local<S: Into<String>>(field: S, kind: FieldType) -> Self {
        BoundField { hops: Vec::new(), field: field.into(), kind }
    }

    pub fn is_local(&self) -> bool {
        self.hops.is_empty()
    }
}

impl fmt::Display for BoundField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hop in &self.hops {
            write!(f, "{}/", hop.relationship)?;
        }
        write!(f, "{}", self.field)
    }
}

/// Predicate tree with every field bound
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "node", rename_all = "snake_case")]
pub enum BoundExpr {
    And(Box<BoundExpr>, Box<BoundExpr>),
    Or(Box<BoundExpr>, Box<BoundExpr>),
    Not(Box<BoundExpr>),
    Compare {
        op: CompareOp,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
    },
    Arith {
        op: ArithOp,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
    },
    Call {
        function: Function,
        args: Vec<BoundExpr>,
    },
    Field(BoundField),
    Literal(Value),
}

impl BoundExpr {
    pub fn and(left: BoundExpr, right: BoundExpr) -> Self {
        BoundExpr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: BoundExpr, right: BoundExpr) -> Self {
        BoundExpr::Or(Box::new(left), Box::new(right))
    }

    pub fn compare(op: CompareOp, left: BoundExpr, right: BoundExpr) -> Self {
        BoundExpr::Compare { op, left: Box::new(left), right: Box::new(right) }
    }

    /// `field eq value` on a local field
    pub fn field_eq(field: BoundField, value: Value) -> Self {
        BoundExpr::compare(CompareOp::Eq, BoundExpr::Field(field), BoundExpr::Literal(value))
    }

    /// AND together every present predicate, left to right
    pub fn all<I>(parts: I) -> Option<BoundExpr>
    where
        I: IntoIterator<Item = Option<BoundExpr>>,
    {
        parts.into_iter()
            .flatten()
            .reduce(BoundExpr::and)
    }

    /// OR together the given predicates, left to right
    pub fn any<I>(parts: I) -> Option<BoundExpr>
    where
        I: IntoIterator<Item = BoundExpr>,
    {
        parts.into_iter().reduce(BoundExpr::or)
    }
}

impl fmt::Display for BoundExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundExpr::And(l, r) => write!(f, "({} and {})", l, r),
            BoundExpr::Or(l, r) => write!(f, "({} or {})", l, r),
            BoundExpr::Not(e) => write!(f, "not {}", e),
            BoundExpr::Compare { op, left, right } => write!(f, "{} {} {}", left, op.as_str(), right),
            BoundExpr::Arith { op, left, right } => write!(f, "({} {} {})", left, op.as_str(), right),
            BoundExpr::Call { function, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", function.name(), args.join(","))
            },
            BoundExpr::Field(field) => write!(f, "{}", field),
            BoundExpr::Literal(value) => write!(f, "{}", value),
        }
    }
}

/// One element of the effective sort
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortKey {
    pub field: BoundField,
    pub direction: SortDirection,
}

/// Fields the executor must load. `implicit` fields are needed for joins
/// or paging only and are stripped from the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Projection {
    pub fields: Vec<String>,
    pub implicit: Vec<String>,
}

impl Projection {
    /// Load `field` without exposing it, unless it is already projected
    pub fn require(&mut self, field: &str) {
        if !self.fields.iter().any(|f| f == field) && !self.implicit.iter().any(|f| f == field) {
            self.implicit.push(field.to_string());
        }
    }

    /// Every field the executor has to read
    pub fn loaded(&self) -> impl Iterator<Item = &String> {
        self.fields.iter().chain(self.implicit.iter())
    }
}

/// A path segment above the plan's entity, narrowing which rows are reachable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathStep {
    pub entity: String,
    /// Join from the previous step; `None` for the root entity set
    pub via: Option<Join>,
    /// Bound key values of this segment
    pub key: Vec<(String, Value)>,
    /// Key and restriction predicate over this step's rows
    pub predicate: Option<BoundExpr>,
}

/// Server-driven paging in effect for a root plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSpec {
    pub mode: PaginationMode,
    pub page_size: u64,
    /// Rows delivered by earlier pages
    pub served: u64,
    /// Rows `$top` still allows, counting from this page
    pub remaining: Option<u64>,
    /// Sort signature the cursor is bound to
    pub signature: String,
}

/// An expanded relationship and the plan for its rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildPlan {
    pub join: Join,
    pub plan: QueryPlan,
}

/// Executable plan for one node of the request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    pub entity: String,
    /// Path segments leading to this entity, root first
    pub scope: Vec<PathStep>,
    /// Join from the last scope step to this entity
    pub via: Option<Join>,
    /// True when the path addresses exactly one entity
    pub single: bool,
    pub projection: Projection,
    pub predicate: Option<BoundExpr>,
    pub order: Vec<SortKey>,
    /// For child plans these apply per parent row
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub pagination: Option<PageSpec>,
    pub want_count: bool,
    pub children: Vec<ChildPlan>,
}

impl QueryPlan {
    /// An unrestricted plan over every row of an entity
    pub fn new<S: Into<String>>(entity: S) -> Self {
        QueryPlan {
            entity: entity.into(),
            scope: Vec::new(),
            via: None,
            single: false,
            projection: Projection::default(),
            predicate: None,
            order: Vec::new(),
            limit: None,
            offset: None,
            pagination: None,
            want_count: false,
            children: Vec::new(),
        }
    }

    pub fn child(&self, relationship: &str) -> Option<&QueryPlan> {
        self.children.iter()
            .find(|c| c.join.relationship == relationship)
            .map(|c| &c.plan)
    }

    /// Number of plan nodes, this one included
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.plan.node_count()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_skips_missing_parts() {
        let a = BoundExpr::field_eq(BoundField::local("a", FieldType::Int64), Value::Integer(1));
        let b = BoundExpr::field_eq(BoundField::local("b", FieldType::Int64), Value::Integer(2));

        assert_eq!(BoundExpr::all(vec![None, None]), None);
        assert_eq!(BoundExpr::all(vec![Some(a.clone()), None]), Some(a.clone()));
        assert_eq!(
            BoundExpr::all(vec![Some(a.clone()), None, Some(b.clone())]).unwrap().to_string(),
            "(a eq 1 and b eq 2)"
        );
        assert_eq!(BoundExpr::any(vec![a, b]).unwrap().to_string(), "(a eq 1 or b eq 2)");
    }

    #[test]
    fn test_projection_require() {
        let mut projection = Projection { fields: vec!["id".into(), "name".into()], implicit: Vec::new() };
        projection.require("name");
        projection.require("user_id");
        projection.require("user_id");
        assert_eq!(projection.implicit, vec!["user_id"]);
        assert_eq!(projection.loaded().count(), 3);
    }

    #[test]
    fn test_bound_field_display() {
        let join = Join {
            relationship: "customer".into(),
            source: "Order".into(),
            source_field: "customer_id".into(),
            target: "Customer".into(),
            target_field: "id".into(),
            many: false,
        };
        let field = BoundField { hops: vec![join], field: "name".into(), kind: FieldType::String };
        assert_eq!(field.to_string(), "customer/name");
        assert!(!field.is_local());
    }
}
