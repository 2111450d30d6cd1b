//! Field binding
//!
//! Resolves `FieldRef`s against the registry, following to-one
//! relationships, and rewrites `$filter` trees into `BoundExpr`s.

use log::trace;

use crate::core::errors::{ODataError, Result};
use crate::core::schema::{EntityType, SchemaRegistry};
use crate::core::value::Value;
use crate::engine::plan::{BoundExpr, BoundField, Join};
use crate::ql::ast::{FieldRef, FilterExpression, Function, LogicalOp};

/// Whether hidden fields may be referenced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Caller-written expressions: hidden fields do not exist
    Public,
    /// Model-level restrictions see every field
    Internal,
}

/// Binds field references of one request against the registry
pub struct Binder<'a> {
    registry: &'a SchemaRegistry,
    max_hops: usize,
}

impl<'a> Binder<'a> {
    pub fn new(registry: &'a SchemaRegistry, max_hops: usize) -> Self {
        Binder { registry, max_hops }
    }

    /// Look up an entity type named by a relationship
    pub fn target_of(&self, entity: &str) -> Result<&'a EntityType> {
        self.registry.entity(entity)
            .ok_or_else(|| ODataError::UnknownEntity(entity.to_string()))
    }

    /// Resolve `order/customer/name` starting at `entity`
    pub fn bind_field(&self, entity: &EntityType, field: &FieldRef, visibility: Visibility) -> Result<BoundField> {
        let mut current: &EntityType = entity;
        let mut visited = vec![entity.name.as_str()];
        let mut hops = Vec::new();

        for name in field.relationships() {
            let rel = current.get_relationship(name).ok_or_else(|| ODataError::UnknownNavigation {
                entity: current.name.clone(),
                name: name.clone(),
            })?;
            if rel.is_collection() {
                return Err(ODataError::InvalidOperation(format!(
                    "{} crosses the collection {}.{}; use $expand instead", field, current.name, name
                )));
            }
            if hops.len() == self.max_hops {
                return Err(ODataError::CircularReference(format!(
                    "{} crosses more than {} relationship(s)", field, self.max_hops
                )));
            }

            let target = self.target_of(&rel.target)?;
            if visited.contains(&target.name.as_str()) {
                return Err(ODataError::CircularReference(format!(
                    "{} re-enters {}", field, target.name
                )));
            }

            hops.push(Join::new(&current.name, rel));
            visited.push(target.name.as_str());
            current = target;
        }

        let name = field.field();
        let resolved = current.get_field(name)
            .filter(|_| visibility == Visibility::Internal || !current.is_hidden(name))
            .ok_or_else(|| ODataError::unknown_field(&current.name, name))?;

        trace!("bound {} on {} ({} hop(s))", field, entity.name, hops.len());
        Ok(BoundField {
            hops,
            field: resolved.name.clone(),
            kind: resolved.kind,
        })
    }

    /// Bind every field reference of a `$filter` tree
    pub fn bind_filter(&self, entity: &EntityType, expr: &FilterExpression, visibility: Visibility) -> Result<BoundExpr> {
        Ok(match expr {
            FilterExpression::Logical { op: LogicalOp::Not, left, .. } => {
                BoundExpr::Not(Box::new(self.bind_filter(entity, left, visibility)?))
            },
            FilterExpression::Logical { op, left, right } => {
                let left = self.bind_filter(entity, left, visibility)?;
                let right = match right {
                    Some(right) => self.bind_filter(entity, right, visibility)?,
                    None => return Err(ODataError::InvalidOperation(format!(
                        "'{}' without a right operand", op.as_str()
                    ))),
                };
                match op {
                    LogicalOp::Or => BoundExpr::or(left, right),
                    _ => BoundExpr::and(left, right),
                }
            },
            FilterExpression::Compare { op, left, right } => BoundExpr::Compare {
                op: *op,
                left: Box::new(self.bind_filter(entity, left, visibility)?),
                right: Box::new(self.bind_filter(entity, right, visibility)?),
            },
            FilterExpression::Arith { op, left, right } => BoundExpr::Arith {
                op: *op,
                left: Box::new(self.bind_filter(entity, left, visibility)?),
                right: Box::new(self.bind_filter(entity, right, visibility)?),
            },
            FilterExpression::Call { function, args } => BoundExpr::Call {
                function: *function,
                args: args.iter()
                    .map(|arg| self.bind_filter(entity, arg, visibility))
                    .collect::<Result<Vec<_>>>()?,
            },
            FilterExpression::Field(field) => BoundExpr::Field(self.bind_field(entity, field, visibility)?),
            FilterExpression::Literal(value) => BoundExpr::Literal(value.clone()),
        })
    }

    /// `$search` text as `contains(field, text)` over every searchable field,
    /// joined with `and`. `None` when the entity declares no searchable fields.
    pub fn bind_search(&self, entity: &EntityType, text: &str) -> Result<Option<BoundExpr>> {
        let mut terms = Vec::new();
        for name in &entity.searchable {
            let field = self.bind_field(entity, &FieldRef::new([name.as_str()]), Visibility::Internal)?;
            terms.push(Some(BoundExpr::Call {
                function: Function::Contains,
                args: vec![BoundExpr::Field(field), BoundExpr::Literal(Value::from(text))],
            }));
        }
        Ok(BoundExpr::all(terms))
    }
}
