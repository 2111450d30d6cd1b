//! Mutation planning
//!
//! Create, update and delete requests address entities with the same
//! resource paths as reads but carry a flat field/value record instead of
//! query options.

use std::fmt;

use log::debug;
use serde::Serialize;

use crate::core::errors::{ODataError, Result};
use crate::core::schema::EntityType;
use crate::core::value::{Record, Value};
use crate::engine::builder::{PlanBuilder, ResolvedPath};
use crate::engine::plan::{Join, PathStep};
use crate::ql::request::RequestDescriptor;

/// Kind of write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update { partial: bool },
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create => write!(f, "create"),
            MutationKind::Update { partial: true } => write!(f, "partial update"),
            MutationKind::Update { partial: false } => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Server-side values merged with the caller's record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPolicy {
    /// Always win over caller values
    pub overrides: Record,
    /// Used only where the caller gave no value
    pub defaults: Record,
}

impl FieldPolicy {
    pub fn with_override<S: Into<String>, V: Into<Value>>(mut self, field: S, value: V) -> Self {
        self.overrides.insert(field.into(), value.into());
        self
    }

    pub fn with_default<S: Into<String>, V: Into<Value>>(mut self, field: S, value: V) -> Self {
        self.defaults.insert(field.into(), value.into());
        self
    }
}

/// A validated write, ready for an executor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationPlan {
    pub kind: MutationKind,
    pub entity: String,
    pub primary_key: Vec<String>,
    /// Path segments above the target, root first
    pub scope: Vec<PathStep>,
    pub via: Option<Join>,
    /// Key of the addressed entity; empty for creates and for entities
    /// reached through a to-one navigation
    pub key: Vec<(String, Value)>,
    pub values: Record,
}

/// Plans writes against the registry
pub struct MutationPlanner<'a> {
    builder: &'a PlanBuilder<'a>,
}

impl<'a> MutationPlanner<'a> {
    pub fn new(builder: &'a PlanBuilder<'a>) -> Self {
        MutationPlanner { builder }
    }

    pub fn create(&self, request: &RequestDescriptor, values: Record, policy: &FieldPolicy) -> Result<MutationPlan> {
        let resolved = self.resolve(request, MutationKind::Create)?;
        if resolved.single {
            return Err(ODataError::InvalidOperation(format!(
                "create must target a collection, not {}", request.path
            )));
        }

        let target = resolved.target;
        let mut values = merge(target, values, policy)?;

        // Creating under a keyed parent fills the foreign key from the parent key
        if let (Some(join), Some(parent)) = (&resolved.via, resolved.scope.last()) {
            if join.many {
                if let Some((_, value)) = parent.key.iter().find(|(field, _)| *field == join.source_field) {
                    values.insert(join.target_field.clone(), value.clone());
                }
            }
        }

        let missing: Vec<&str> = target.fields.iter()
            .filter(|f| !f.nullable && !target.key.contains(&f.name) && !values.contains_key(&f.name))
            .map(|f| f.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ODataError::InvalidOperation(format!(
                "create on {} is missing required field(s): {}", target.name, missing.join(", ")
            )));
        }

        Ok(self.finish(MutationKind::Create, resolved, values))
    }

    pub fn update(&self, request: &RequestDescriptor, values: Record, partial: bool, policy: &FieldPolicy) -> Result<MutationPlan> {
        let kind = MutationKind::Update { partial };
        let resolved = self.resolve(request, kind)?;
        require_single(&resolved, kind, request)?;

        let target = resolved.target;
        let values = merge(target, values, policy)?;

        for (field, value) in &resolved.key {
            if values.get(field).map_or(false, |v| v != value) {
                return Err(ODataError::InvalidOperation(format!(
                    "key field {}.{} cannot be changed", target.name, field
                )));
            }
        }

        if !partial {
            let missing: Vec<&str> = target.fields.iter()
                .filter(|f| !target.key.contains(&f.name) && !values.contains_key(&f.name))
                .map(|f| f.name.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(ODataError::InvalidOperation(format!(
                    "full update of {} needs every field; missing {}", target.name, missing.join(", ")
                )));
            }
        }

        Ok(self.finish(kind, resolved, values))
    }

    pub fn delete(&self, request: &RequestDescriptor) -> Result<MutationPlan> {
        let resolved = self.resolve(request, MutationKind::Delete)?;
        require_single(&resolved, MutationKind::Delete, request)?;
        Ok(self.finish(MutationKind::Delete, resolved, Record::new()))
    }

    fn resolve(&self, request: &RequestDescriptor, kind: MutationKind) -> Result<ResolvedPath<'a>> {
        if request.options.has_parameters() {
            return Err(ODataError::InvalidOperation(format!("query options are not allowed on {}", kind)));
        }

        let resolved = self.builder.resolve_path(&request.path)?;
        let access = resolved.target.access;
        if !access.browsable || !access.modifiable {
            return Err(ODataError::AccessDenied(format!(
                "{} is not allowed on {}", kind, resolved.target.name
            )));
        }
        Ok(resolved)
    }

    fn finish(&self, kind: MutationKind, resolved: ResolvedPath<'a>, values: Record) -> MutationPlan {
        debug!("planned {} on {} ({} value(s))", kind, resolved.target.name, values.len());
        MutationPlan {
            kind,
            entity: resolved.target.name.clone(),
            primary_key: resolved.target.key.clone(),
            scope: resolved.scope,
            via: resolved.via,
            key: resolved.key,
            values,
        }
    }
}

fn require_single(resolved: &ResolvedPath<'_>, kind: MutationKind, request: &RequestDescriptor) -> Result<()> {
    if resolved.single {
        Ok(())
    } else {
        Err(ODataError::InvalidOperation(format!(
            "{} must target a single entity, not {}", kind, request.path
        )))
    }
}

/// Caller values, then overrides on top, then defaults underneath; every
/// field must exist and accept its value
fn merge(entity: &EntityType, values: Record, policy: &FieldPolicy) -> Result<Record> {
    let mut merged = values;
    for (field, value) in &policy.overrides {
        merged.insert(field.clone(), value.clone());
    }
    for (field, value) in &policy.defaults {
        merged.entry(field.clone()).or_insert_with(|| value.clone());
    }

    for (name, value) in &merged {
        let field = entity.get_field(name)
            .ok_or_else(|| ODataError::unknown_field(&entity.name, name))?;
        if (value.is_null() && !field.nullable) || !field.kind.accepts(value) {
            return Err(ODataError::InvalidOperation(format!(
                "{} is not a valid value for {}.{}", value, entity.name, name
            )));
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::fixtures::registry;
    use crate::ql::parse_request;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn with_planner<T>(f: impl FnOnce(&MutationPlanner<'_>) -> T) -> T {
        let registry = registry();
        let config = EngineConfig::default();
        let builder = PlanBuilder::new(&registry, &config);
        let planner = MutationPlanner::new(&builder);
        f(&planner)
    }

    #[test]
    fn test_create_through_parent_fills_foreign_key() {
        let plan = with_planner(|planner| {
            let request = parse_request("/users(5)/orders").unwrap();
            let values = record(&[("total", Value::Float(9.5)), ("status", Value::from("new"))]);
            planner.create(&request, values, &FieldPolicy::default()).unwrap()
        });

        assert_eq!(plan.kind, MutationKind::Create);
        assert_eq!(plan.entity, "Order");
        assert_eq!(plan.values.get("user_id"), Some(&Value::Integer(5)));
        assert_eq!(plan.primary_key, vec!["id"]);
    }

    #[test]
    fn test_overrides_and_defaults() {
        let plan = with_planner(|planner| {
            let request = parse_request("/orders").unwrap();
            let values = record(&[("user_id", Value::Integer(1)), ("total", Value::Float(1.0)), ("status", Value::from("paid"))]);
            let policy = FieldPolicy::default()
                .with_override("status", "pending")
                .with_default("total", 0.0)
                .with_default("placed", Value::Null);
            planner.create(&request, values, &policy).unwrap()
        });

        assert_eq!(plan.values.get("status"), Some(&Value::from("pending")));
        assert_eq!(plan.values.get("total"), Some(&Value::Float(1.0)));
        assert_eq!(plan.values.get("placed"), Some(&Value::Null));
    }

    #[test]
    fn test_create_validation() {
        with_planner(|planner| {
            let request = parse_request("/orders").unwrap();
            let err = planner.create(&request, record(&[("total", Value::Float(1.0))]), &FieldPolicy::default()).unwrap_err();
            assert!(matches!(err, ODataError::InvalidOperation(_)));

            let err = planner.create(&request, record(&[("colour", Value::from("red"))]), &FieldPolicy::default()).unwrap_err();
            assert_eq!(err, ODataError::unknown_field("Order", "colour"));

            let err = planner.create(&request, record(&[("total", Value::from("lots"))]), &FieldPolicy::default()).unwrap_err();
            assert!(matches!(err, ODataError::InvalidOperation(_)));

            let keyed = parse_request("/orders(1)").unwrap();
            assert!(matches!(planner.create(&keyed, Record::new(), &FieldPolicy::default()), Err(ODataError::InvalidOperation(_))));
        });
    }

    #[test]
    fn test_update_rules() {
        with_planner(|planner| {
            let request = parse_request("/users(3)").unwrap();
            let plan = planner.update(&request, record(&[("name", Value::from("Ann"))]), true, &FieldPolicy::default()).unwrap();
            assert_eq!(plan.kind, MutationKind::Update { partial: true });
            assert_eq!(plan.key, vec![("id".to_string(), Value::Integer(3))]);

            let err = planner.update(&request, record(&[("name", Value::from("Ann"))]), false, &FieldPolicy::default()).unwrap_err();
            assert!(matches!(err, ODataError::InvalidOperation(_)));

            let err = planner.update(&request, record(&[("id", Value::Integer(4))]), true, &FieldPolicy::default()).unwrap_err();
            assert!(matches!(err, ODataError::InvalidOperation(_)));

            let collection = parse_request("/users").unwrap();
            assert!(planner.update(&collection, Record::new(), true, &FieldPolicy::default()).is_err());
        });
    }

    #[test]
    fn test_delete_rules() {
        with_planner(|planner| {
            let plan = planner.delete(&parse_request("/orders(9)").unwrap()).unwrap();
            assert_eq!(plan.kind, MutationKind::Delete);
            assert!(plan.values.is_empty());

            assert!(matches!(
                planner.delete(&parse_request("/items(1)").unwrap()),
                Err(ODataError::AccessDenied(_))
            ));
            assert!(matches!(
                planner.delete(&parse_request("/orders(9)?$select=id").unwrap()),
                Err(ODataError::InvalidOperation(_))
            ));
        });
    }
}
