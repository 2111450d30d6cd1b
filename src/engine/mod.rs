//! Query engine
//!
//! Compiles parsed requests into `QueryPlan`s and `MutationPlan`s against a
//! schema registry. The registry is only borrowed: it cannot change while
//! an engine holds it.

pub mod binder;
pub mod builder;
pub mod mutation;
pub mod pagination;
pub mod plan;

pub use builder::PlanBuilder;
pub use mutation::{FieldPolicy, MutationKind, MutationPlan, MutationPlanner};
pub use pagination::{next_skiptoken, replace_skiptoken, Cursor};
pub use plan::{BoundExpr, BoundField, ChildPlan, Join, PageSpec, PathStep, Projection, QueryPlan, SortKey};

use crate::config::EngineConfig;
use crate::core::errors::Result;
use crate::core::schema::SchemaRegistry;
use crate::core::value::Record;
use crate::ql::request::{ODataParser, RequestDescriptor};

/// Entry point tying a registry to an engine configuration
pub struct QueryEngine<'a> {
    registry: &'a SchemaRegistry,
    config: EngineConfig,
}

impl<'a> QueryEngine<'a> {
    pub fn new(registry: &'a SchemaRegistry, config: EngineConfig) -> Self {
        QueryEngine { registry, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &'a SchemaRegistry {
        self.registry
    }

    /// URL parser honouring the configured service root
    pub fn parser(&self) -> ODataParser {
        match &self.config.service_root {
            Some(root) => ODataParser::new().with_service_root(root.as_str()),
            None => ODataParser::new(),
        }
    }

    /// Compile a read request
    pub fn query(&self, request: &RequestDescriptor) -> Result<QueryPlan> {
        PlanBuilder::new(self.registry, &self.config).build(request)
    }

    /// Parse and compile a read request in one step
    pub fn query_url(&self, url: &str) -> Result<QueryPlan> {
        let request = self.parser().parse(url)?;
        self.query(&request)
    }

    pub fn create(&self, request: &RequestDescriptor, values: Record, policy: &FieldPolicy) -> Result<MutationPlan> {
        let builder = PlanBuilder::new(self.registry, &self.config);
        MutationPlanner::new(&builder).create(request, values, policy)
    }

    pub fn update(&self, request: &RequestDescriptor, values: Record, partial: bool, policy: &FieldPolicy) -> Result<MutationPlan> {
        let builder = PlanBuilder::new(self.registry, &self.config);
        MutationPlanner::new(&builder).update(request, values, partial, policy)
    }

    pub fn delete(&self, request: &RequestDescriptor) -> Result<MutationPlan> {
        let builder = PlanBuilder::new(self.registry, &self.config);
        MutationPlanner::new(&builder).delete(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::registry;

    #[test]
    fn test_service_root_applies_to_urls() {
        let registry = registry();
        let config = EngineConfig { service_root: Some("/odata".to_string()), ..EngineConfig::default() };
        let engine = QueryEngine::new(&registry, config);

        let plan = engine.query_url("http://localhost:8080/odata/users?$top=3").unwrap();
        assert_eq!(plan.entity, "User");
        assert_eq!(plan.limit, Some(3));
        assert!(engine.query_url("/users").is_err());
    }

    #[test]
    fn test_mutations_through_engine() {
        let registry = registry();
        let engine = QueryEngine::new(&registry, EngineConfig::default());
        let request = engine.parser().parse("/orders(2)").unwrap();

        let plan = engine.delete(&request).unwrap();
        assert_eq!(plan.entity, "Order");
        assert_eq!(plan.key.len(), 1);
    }
}
