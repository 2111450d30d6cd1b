//! Plan builder
//!
//! Binds a `RequestDescriptor` to the schema registry and the engine
//! configuration. The whole expansion tree is built before anything is
//! returned, so a failure in any nested `$expand` fails the request.

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::config::{EngineConfig, PaginationMode};
use crate::core::errors::{ODataError, Result};
use crate::core::schema::{EntityType, SchemaRegistry};
use crate::core::value::Value;
use crate::engine::binder::{Binder, Visibility};
use crate::engine::pagination::{keyset_boundary, sort_signature, Cursor};
use crate::engine::plan::{BoundExpr, BoundField, ChildPlan, Join, PageSpec, PathStep, Projection, QueryPlan, SortKey};
use crate::ql::options::{QueryOptions, SortDirection};
use crate::ql::path::{KeyPredicate, NavigationPath, PathError};
use crate::ql::request::RequestDescriptor;

/// A resource path bound to the registry
#[derive(Debug)]
pub struct ResolvedPath<'a> {
    /// Segments above the target, root first
    pub scope: Vec<PathStep>,
    /// Join from the last scope step to the target
    pub via: Option<Join>,
    pub target: &'a EntityType,
    /// Bound key of the last segment
    pub key: Vec<(String, Value)>,
    pub single: bool,
    /// Entity names along the path, root first
    pub visited: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Top-level node; server paging applies unless it addresses one entity
    Root { paged: bool },
    /// Expanded node; `$top`/`$skip` apply per parent row
    Child,
}

/// Compiles request descriptors into query plans
pub struct PlanBuilder<'a> {
    registry: &'a SchemaRegistry,
    config: &'a EngineConfig,
    binder: Binder<'a>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(registry: &'a SchemaRegistry, config: &'a EngineConfig) -> Self {
        PlanBuilder {
            registry,
            config,
            binder: Binder::new(registry, config.max_navigation_hops),
        }
    }

    /// Build the plan tree for a read request
    pub fn build(&self, request: &RequestDescriptor) -> Result<QueryPlan> {
        let resolved = self.resolve_path(&request.path)?;
        let key = key_predicate(resolved.target, &resolved.key);

        let mut plan = self.build_node(
            resolved.target,
            &request.options,
            0,
            &resolved.visited,
            Role::Root { paged: !resolved.single },
            key,
            self.config.auto_expand_references,
        )?;

        plan.scope = resolved.scope;
        plan.via = resolved.via;
        plan.single = resolved.single;

        debug!("built plan for {} with {} node(s)", request.path, plan.node_count());
        Ok(plan)
    }

    /// Walk the path segments: entity set, then navigation properties
    pub fn resolve_path(&self, path: &NavigationPath) -> Result<ResolvedPath<'a>> {
        let root = path.root().ok_or(PathError::EmptyPath)?;
        let mut entity = self.registry.entity_by_set(&root.name)
            .ok_or_else(|| ODataError::UnknownEntity(root.name.clone()))?;
        if !entity.access.browsable {
            return Err(ODataError::AccessDenied(format!("{} is not browsable", root.name)));
        }

        let mut scope = Vec::new();
        let mut visited = vec![entity.name.clone()];
        let mut via: Option<Join> = None;
        let mut single = root.key.is_some();
        let mut key = match &root.key {
            Some(predicate) => self.bind_key(entity, predicate)?,
            None => Vec::new(),
        };
        let mut previous = root;

        for segment in &path.segments()[1..] {
            let rel = entity.get_relationship(&segment.name).ok_or_else(|| ODataError::UnknownNavigation {
                entity: entity.name.clone(),
                name: segment.name.clone(),
            })?;
            if !single && rel.is_collection() {
                return Err(PathError::CollectionNavigation {
                    from: previous.name.clone(),
                    to: segment.name.clone(),
                }.into());
            }

            let target = self.binder.target_of(&rel.target)?;
            if !target.access.browsable && !target.access.expandable {
                return Err(ODataError::AccessDenied(format!(
                    "{} is not reachable from {}", target.name, entity.name
                )));
            }
            if visited.contains(&target.name) {
                return Err(ODataError::CircularReference(format!(
                    "{} revisits {}", path, target.name
                )));
            }

            let predicate = self.step_predicate(entity, &key)?;
            scope.push(PathStep {
                entity: entity.name.clone(),
                via: via.take(),
                key: std::mem::take(&mut key),
                predicate,
            });

            debug!("navigated {}.{} -> {}", entity.name, rel.name, target.name);
            via = Some(Join::new(&entity.name, rel));
            single = segment.key.is_some() || (single && !rel.is_collection());
            if let Some(predicate) = &segment.key {
                key = self.bind_key(target, predicate)?;
            }
            visited.push(target.name.clone());
            entity = target;
            previous = segment;
        }

        Ok(ResolvedPath {
            scope,
            via,
            target: entity,
            key,
            single,
            visited,
        })
    }

    /// Bind a key predicate to the primary key or a lookup-enabled unique field
    pub fn bind_key(&self, entity: &EntityType, key: &KeyPredicate) -> Result<Vec<(String, Value)>> {
        let mismatch = |fields: String| -> ODataError {
            PathError::KeyMismatch { entity: entity.name.clone(), fields }.into()
        };

        let pairs = match key {
            KeyPredicate::Scalar(value) => match entity.key.as_slice() {
                [pk] => vec![(pk.clone(), value.clone())],
                _ => return Err(mismatch(format!("{} (single value)", value))),
            },
            KeyPredicate::Positional(values) => {
                if values.len() != entity.key.len() {
                    return Err(mismatch(format!("{} positional value(s)", values.len())));
                }
                entity.key.iter().cloned().zip(values.iter().cloned()).collect()
            },
            KeyPredicate::Composite(named) => {
                let given: BTreeSet<&str> = named.iter().map(|(f, _)| f.as_str()).collect();
                let declared: BTreeSet<&str> = entity.key.iter().map(String::as_str).collect();
                if given != declared {
                    return Err(mismatch(key.field_names().join(",")));
                }
                entity.key.iter()
                    .filter_map(|pk| named.iter().find(|(f, _)| f == pk).cloned())
                    .collect()
            },
            KeyPredicate::Unique(field, value) => {
                if entity.key.len() == 1 && entity.key[0] == *field {
                    vec![(field.clone(), value.clone())]
                } else if entity.is_unique(field) {
                    if !entity.is_lookup(field) {
                        return Err(ODataError::AccessDenied(format!(
                            "{}.{} is not enabled as a lookup key", entity.name, field
                        )));
                    }
                    vec![(field.clone(), value.clone())]
                } else {
                    return Err(mismatch(field.clone()));
                }
            },
        };

        for (name, value) in &pairs {
            let field = entity.get_field(name)
                .ok_or_else(|| ODataError::unknown_field(&entity.name, name))?;
            if value.is_null() || !field.kind.accepts(value) {
                return Err(PathError::InvalidFormat(format!(
                    "key value {} does not fit {}.{}", value, entity.name, name
                )).into());
            }
        }

        Ok(pairs)
    }

    /// Key and restriction of a path step above the target
    fn step_predicate(&self, entity: &EntityType, key: &[(String, Value)]) -> Result<Option<BoundExpr>> {
        let restriction = self.restriction(entity)?;
        Ok(BoundExpr::all([key_predicate(entity, key), restriction]))
    }

    fn restriction(&self, entity: &EntityType) -> Result<Option<BoundExpr>> {
        entity.restriction.as_ref()
            .map(|expr| self.binder.bind_filter(entity, expr, Visibility::Internal))
            .transpose()
    }

    #[allow(clippy::too_many_arguments)]
    fn build_node(
        &self,
        entity: &EntityType,
        options: &QueryOptions,
        depth: usize,
        ancestors: &[String],
        role: Role,
        key: Option<BoundExpr>,
        auto_expand: bool,
    ) -> Result<QueryPlan> {
        if role == Role::Child && options.skiptoken.is_some() {
            return Err(ODataError::parameter("$skiptoken", "not allowed inside $expand"));
        }

        let mut plan = QueryPlan::new(&entity.name);
        plan.projection = self.projection(entity, options.select.as_deref())?;
        plan.want_count = options.count;

        let filter = options.filter.as_ref()
            .map(|expr| self.binder.bind_filter(entity, expr, Visibility::Public))
            .transpose()?;
        let restriction = self.restriction(entity)?;
        let search = match &options.search {
            Some(text) => {
                let search = self.binder.bind_search(entity, text)?;
                if search.is_none() {
                    warn!("$search ignored: {} declares no searchable fields", entity.name);
                }
                search
            },
            None => None,
        };

        plan.order = options.orderby.iter()
            .map(|item| Ok(SortKey {
                field: self.binder.bind_field(entity, &item.field, Visibility::Public)?,
                direction: item.direction,
            }))
            .collect::<Result<Vec<_>>>()?;

        plan.children = self.build_children(entity, options, depth, ancestors, auto_expand, &mut plan.projection)?;

        let boundary = match role {
            Role::Root { paged: true } => self.paginate(entity, options, &mut plan)?,
            _ => {
                plan.limit = options.top;
                plan.offset = options.skip;
                None
            },
        };

        plan.predicate = BoundExpr::all([key, restriction, filter, search, boundary]);
        debug!(
            "{}: projection {:?}, predicate {}",
            entity.name,
            plan.projection.fields,
            plan.predicate.as_ref().map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
        );
        Ok(plan)
    }

    /// `((requested ∩ fields) ∪ select_always) \ hidden`, in declaration order
    fn projection(&self, entity: &EntityType, select: Option<&[String]>) -> Result<Projection> {
        if let Some(requested) = select {
            if let Some(unknown) = requested.iter().find(|name| !entity.has_field(name)) {
                return Err(ODataError::unknown_field(&entity.name, unknown));
            }
        }

        let fields = entity.fields.iter()
            .map(|f| &f.name)
            .filter(|name| !entity.is_hidden(name))
            .filter(|name| {
                select.map_or(true, |requested| requested.contains(*name))
                    || self.config.select_always.contains(*name)
            })
            .cloned()
            .collect();

        Ok(Projection { fields, implicit: Vec::new() })
    }

    fn build_children(
        &self,
        entity: &EntityType,
        options: &QueryOptions,
        depth: usize,
        ancestors: &[String],
        auto_expand: bool,
        projection: &mut Projection,
    ) -> Result<Vec<ChildPlan>> {
        let mut seen = BTreeSet::new();
        let mut children = Vec::new();

        for item in &options.expand {
            if !seen.insert(item.target.as_str()) {
                return Err(ODataError::parameter("$expand", format!("{} expanded more than once", item.target)));
            }
            let child = self.build_child(entity, &item.target, &item.options, depth, ancestors, self.config.auto_expand_references)?;
            projection.require(&child.join.source_field);
            children.push(child);
        }

        if auto_expand && depth < self.config.max_expand_depth {
            for rel in entity.relationships.iter().filter(|r| !r.is_collection()) {
                if seen.contains(rel.name.as_str()) {
                    continue;
                }
                let target = self.binder.target_of(&rel.target)?;
                if !target.access.expandable || ancestors.contains(&target.name) {
                    continue;
                }
                debug!("auto-expanding {}.{}", entity.name, rel.name);
                let child = self.build_child(entity, &rel.name, &QueryOptions::default(), depth, ancestors, false)?;
                projection.require(&child.join.source_field);
                children.push(child);
            }
        }

        Ok(children)
    }

    fn build_child(
        &self,
        parent: &EntityType,
        name: &str,
        options: &QueryOptions,
        depth: usize,
        ancestors: &[String],
        auto_expand: bool,
    ) -> Result<ChildPlan> {
        let rel = parent.get_relationship(name).ok_or_else(|| ODataError::UnknownNavigation {
            entity: parent.name.clone(),
            name: name.to_string(),
        })?;
        let target = self.binder.target_of(&rel.target)?;
        if !target.access.expandable && !target.access.browsable {
            return Err(ODataError::AccessDenied(format!(
                "{} cannot be expanded from {}", target.name, parent.name
            )));
        }

        let child_depth = depth + 1;
        if child_depth > self.config.max_expand_depth {
            return Err(ODataError::ExpansionDepthExceeded {
                depth: child_depth,
                max: self.config.max_expand_depth,
            });
        }
        if ancestors.contains(&target.name) {
            return Err(ODataError::CircularReference(format!(
                "{} -> {}", ancestors.join(" -> "), target.name
            )));
        }

        let mut path = ancestors.to_vec();
        path.push(target.name.clone());

        let join = Join::new(&parent.name, rel);
        let mut plan = self.build_node(target, options, child_depth, &path, Role::Child, None, auto_expand)?;
        plan.projection.require(&join.target_field);

        debug!("expanded {}.{} at depth {}", parent.name, name, child_depth);
        Ok(ChildPlan { join, plan })
    }

    /// Apply server paging and `$top`/`$skip` to a root plan; returns the
    /// keyset boundary predicate when a keyset cursor is replayed
    fn paginate(&self, entity: &EntityType, options: &QueryOptions, plan: &mut QueryPlan) -> Result<Option<BoundExpr>> {
        let cursor = options.skiptoken.as_deref().map(Cursor::decode).transpose()?;
        let page_size = match cursor.as_ref().map(|c| c.page_size).or(self.config.page_size) {
            Some(page_size) => page_size,
            None => {
                plan.limit = options.top;
                plan.offset = options.skip;
                return Ok(None);
            },
        };

        // Pages are only stable under a total order
        for pk in &entity.key {
            if !plan.order.iter().any(|k| k.field.is_local() && k.field.field == *pk) {
                if let Some(field) = entity.get_field(pk) {
                    plan.order.push(SortKey {
                        field: BoundField::local(pk.clone(), field.kind),
                        direction: SortDirection::Asc,
                    });
                }
            }
        }

        let mode = self.config.pagination;
        if mode == PaginationMode::Keyset && plan.order.iter().any(|k| !k.field.is_local()) {
            return Err(ODataError::parameter("$orderby", "keyset paging needs sort fields of the entity itself"));
        }

        let signature = sort_signature(&plan.order);
        if let Some(cursor) = &cursor {
            cursor.check_signature(&signature)?;
            if cursor.mode() != mode {
                return Err(ODataError::InvalidCursor(format!("token was not minted for {:?} paging", mode)));
            }
        }

        let served = cursor.as_ref().map_or(0, |c| c.served);
        let remaining = options.top.map(|top| top.saturating_sub(served));
        plan.limit = Some(remaining.map_or(page_size, |r| r.min(page_size)));

        let boundary = match (mode, cursor.as_ref().and_then(|c| c.key.as_ref())) {
            (PaginationMode::Keyset, Some(key)) => Some(keyset_boundary(&plan.order, key)?),
            (PaginationMode::Keyset, None) => {
                plan.offset = options.skip;
                None
            },
            (PaginationMode::Offset, _) => {
                if options.skip.is_some() || served > 0 {
                    let offset = options.skip.unwrap_or(0).checked_add(served).ok_or_else(|| {
                        ODataError::parameter("$skip", "offset past the end of the skiptoken range")
                    })?;
                    plan.offset = Some(offset);
                }
                None
            },
        };

        if mode == PaginationMode::Keyset {
            for key in &plan.order {
                plan.projection.require(&key.field.field);
            }
        }

        debug!("{}: page size {}, {} row(s) served, sort {}", entity.name, page_size, served, signature);
        plan.pagination = Some(PageSpec { mode, page_size, served, remaining, signature });
        Ok(boundary)
    }
}

/// `k1 eq v1 and k2 eq v2 ...` over local key fields
fn key_predicate(entity: &EntityType, key: &[(String, Value)]) -> Option<BoundExpr> {
    BoundExpr::all(key.iter().map(|(name, value)| {
        entity.get_field(name)
            .map(|field| BoundExpr::field_eq(BoundField::local(name.clone(), field.kind), value.clone()))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Record;
    use crate::engine::pagination::next_skiptoken;
    use crate::fixtures::registry;
    use crate::ql::parse_request;

    fn plan_with(config: &EngineConfig, url: &str) -> Result<QueryPlan> {
        let registry = registry();
        let request = parse_request(url)?;
        PlanBuilder::new(&registry, config).build(&request)
    }

    fn compile(url: &str) -> Result<QueryPlan> {
        plan_with(&EngineConfig::default(), url)
    }

    #[test]
    fn test_top_and_skip_become_limit_and_offset() {
        let plan = compile("/users?$top=10&$skip=20").unwrap();
        assert_eq!(plan.entity, "User");
        assert_eq!(plan.limit, Some(10));
        assert_eq!(plan.offset, Some(20));
        assert!(plan.predicate.is_none());
        assert!(plan.pagination.is_none());
    }

    #[test]
    fn test_default_projection_skips_hidden() {
        let plan = compile("/users").unwrap();
        assert_eq!(plan.projection.fields, vec!["id", "name", "email", "age", "active", "nickname"]);
    }

    #[test]
    fn test_hidden_field_removed_from_select() {
        let config = EngineConfig::default().with_select_always(Vec::<String>::new());
        let plan = plan_with(&config, "/users?$select=name,secret").unwrap();
        assert_eq!(plan.projection.fields, vec!["name"]);

        let plan = plan_with(&config, "/users?$select=secret").unwrap();
        assert!(plan.projection.fields.is_empty());
    }

    #[test]
    fn test_select_always_added() {
        let plan = compile("/users?$select=name").unwrap();
        assert_eq!(plan.projection.fields, vec!["id", "name"]);
        assert_eq!(
            compile("/users?$select=name,shoe_size").unwrap_err(),
            ODataError::unknown_field("User", "shoe_size")
        );
    }

    #[test]
    fn test_filter_restriction_and_key_are_combined() {
        let mut registry = registry();
        registry.restrict("Order", "status ne 'deleted'").unwrap();
        let config = EngineConfig::default();
        let request = parse_request("/users(7)/orders?$filter=total gt 10").unwrap();
        let plan = PlanBuilder::new(&registry, &config).build(&request).unwrap();

        assert_eq!(plan.entity, "Order");
        assert!(!plan.single);
        assert_eq!(plan.predicate.unwrap().to_string(), "(status ne 'deleted' and total gt 10)");
        assert_eq!(plan.scope.len(), 1);
        assert_eq!(plan.scope[0].key, vec![("id".to_string(), Value::Integer(7))]);
        assert_eq!(plan.scope[0].predicate.as_ref().unwrap().to_string(), "id eq 7");
        assert_eq!(plan.via.as_ref().unwrap().target_field, "user_id");
    }

    #[test]
    fn test_search_over_searchable_fields() {
        let plan = compile("/users?$search=ann&$filter=age gt 25").unwrap();
        assert_eq!(plan.predicate.unwrap().to_string(), "(age gt 25 and contains(name,'ann'))");

        let plan = plan_with(&EngineConfig::default(), "/orders?$search=ann").unwrap();
        assert!(plan.predicate.is_none());
    }

    #[test]
    fn test_single_entity_paths() {
        let plan = compile("/users(1)").unwrap();
        assert!(plan.single);
        assert_eq!(plan.predicate.unwrap().to_string(), "id eq 1");

        let plan = compile("/orders(3)/user").unwrap();
        assert!(plan.single);
        assert_eq!(plan.entity, "User");
    }

    #[test]
    fn test_key_binding() {
        let plan = compile("/memberships(3,'admins')").unwrap();
        assert_eq!(plan.predicate.unwrap().to_string(), "(user_id eq 3 and group_code eq 'admins')");

        let plan = compile("/memberships(group_code='admins',user_id=3)").unwrap();
        assert_eq!(plan.predicate.unwrap().to_string(), "(user_id eq 3 and group_code eq 'admins')");

        let plan = compile("/users(email='a@b.c')").unwrap();
        assert_eq!(plan.predicate.unwrap().to_string(), "email eq 'a@b.c'");
    }

    #[test]
    fn test_key_errors() {
        assert!(matches!(compile("/memberships(3)"), Err(ODataError::Path(PathError::KeyMismatch { .. }))));
        assert!(matches!(compile("/memberships(user_id=3,role='x')"), Err(ODataError::Path(PathError::KeyMismatch { .. }))));
        assert!(matches!(compile("/users(name='x')"), Err(ODataError::Path(PathError::KeyMismatch { .. }))));
        assert!(matches!(compile("/users(nickname='x')"), Err(ODataError::AccessDenied(_))));
        assert!(matches!(compile("/users('seven')"), Err(ODataError::Path(PathError::InvalidFormat(_)))));
    }

    #[test]
    fn test_path_errors() {
        assert_eq!(compile("/customers").unwrap_err(), ODataError::UnknownEntity("customers".to_string()));
        assert!(matches!(compile("/audit_logs"), Err(ODataError::AccessDenied(_))));
        assert!(matches!(compile("/products"), Err(ODataError::AccessDenied(_))));
        assert!(matches!(compile("/users(1)/invoices"), Err(ODataError::UnknownNavigation { .. })));
        assert!(matches!(
            compile("/users/orders"),
            Err(ODataError::Path(PathError::CollectionNavigation { .. }))
        ));
        assert!(matches!(compile("/users(1)/orders(2)/user"), Err(ODataError::CircularReference(_))));
    }

    #[test]
    fn test_navigation_through_keyed_segments() {
        let plan = compile("/users(1)/orders(2)/items?$orderby=quantity desc").unwrap();
        assert_eq!(plan.entity, "Item");
        assert_eq!(plan.scope.len(), 2);
        assert_eq!(plan.scope[1].entity, "Order");
        assert_eq!(plan.scope[1].via.as_ref().unwrap().relationship, "orders");
        assert_eq!(plan.order[0].direction, SortDirection::Desc);
    }

    #[test]
    fn test_nested_expand() {
        let plan = compile("/users?$select=name&$expand=orders($select=total;$top=2;$expand=items)").unwrap();
        let orders = plan.child("orders").unwrap();
        assert_eq!(orders.limit, Some(2));
        assert_eq!(orders.projection.fields, vec!["id", "total"]);
        assert_eq!(orders.projection.implicit, vec!["user_id"]);
        let items = orders.child("items").unwrap();
        assert_eq!(items.entity, "Item");
        assert_eq!(plan.node_count(), 3);
    }

    #[test]
    fn test_expand_cycle_detected() {
        let err = compile("/users?$expand=orders($expand=user)").unwrap_err();
        assert!(matches!(err, ODataError::CircularReference(_)));
    }

    #[test]
    fn test_expand_depth_limit() {
        let config = EngineConfig::default().with_max_expand_depth(2);
        let err = plan_with(&config, "/users?$expand=orders($expand=items($expand=product))").unwrap_err();
        assert_eq!(err, ODataError::ExpansionDepthExceeded { depth: 3, max: 2 });
        assert!(plan_with(&config, "/users?$expand=orders($expand=items)").is_ok());
    }

    #[test]
    fn test_expand_errors() {
        assert!(matches!(compile("/users?$expand=orders,orders"), Err(ODataError::Parameter { .. })));
        assert!(matches!(compile("/users?$expand=invoices"), Err(ODataError::UnknownNavigation { .. })));
        assert!(matches!(compile("/users?$expand=orders($skiptoken=abc)"), Err(ODataError::Parameter { .. })));
        // A failure deep in the tree fails the whole build
        assert!(matches!(
            compile("/users?$expand=orders($filter=nope eq 1)"),
            Err(ODataError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_hidden_field_in_filter_is_unknown() {
        assert_eq!(compile("/users?$filter=secret eq 'x'").unwrap_err(), ODataError::unknown_field("User", "secret"));
    }

    #[test]
    fn test_auto_expand_references() {
        let config = EngineConfig { auto_expand_references: true, ..EngineConfig::default() };
        let plan = plan_with(&config, "/items").unwrap();
        let names: Vec<&str> = plan.children.iter().map(|c| c.join.relationship.as_str()).collect();
        assert_eq!(names, vec!["order", "product"]);
        // one level only
        assert!(plan.child("product").unwrap().children.is_empty());
        assert!(plan.projection.implicit.is_empty());
    }

    #[test]
    fn test_server_paging_first_page() {
        let config = EngineConfig::default().with_page_size(25);
        let plan = plan_with(&config, "/users?$orderby=name").unwrap();
        assert_eq!(plan.limit, Some(25));
        assert_eq!(plan.offset, None);
        let page = plan.pagination.as_ref().unwrap();
        assert_eq!(page.signature, "+name,+id");
        assert_eq!(page.served, 0);
    }

    #[test]
    fn test_top_caps_page_size() {
        let config = EngineConfig::default().with_page_size(25);
        let plan = plan_with(&config, "/users?$top=10&$skip=5").unwrap();
        assert_eq!(plan.limit, Some(10));
        assert_eq!(plan.offset, Some(5));
    }

    #[test]
    fn test_offset_cursor_replay() {
        let config = EngineConfig::default().with_page_size(2);
        let token = Cursor::offset(4, 2, "+name,+id").encode().unwrap();

        let plan = plan_with(&config, &format!("/users?$orderby=name&$top=5&$skip=1&$skiptoken={}", token)).unwrap();
        assert_eq!(plan.offset, Some(5));
        assert_eq!(plan.limit, Some(1));

        let err = plan_with(&config, &format!("/users?$orderby=name desc&$skiptoken={}", token)).unwrap_err();
        assert!(matches!(err, ODataError::InvalidCursor(_)));
        assert!(matches!(plan_with(&config, "/users?$skiptoken=garbage!"), Err(ODataError::InvalidCursor(_))));
    }

    #[test]
    fn test_keyset_cursor_replay() {
        let config = EngineConfig::default()
            .with_page_size(2)
            .with_pagination(PaginationMode::Keyset);
        let token = Cursor::keyset(2, vec![Value::Integer(30), Value::Integer(8)], 2, "-age,+id").encode().unwrap();

        let plan = plan_with(&config, &format!("/users?$select=name&$orderby=age desc&$skiptoken={}", token)).unwrap();
        assert_eq!(plan.offset, None);
        assert_eq!(plan.predicate.as_ref().unwrap().to_string(), "(age lt 30 or (age eq 30 and id gt 8))");
        assert_eq!(plan.projection.implicit, vec!["age"]);

        let offset_token = Cursor::offset(2, 2, "-age,+id").encode().unwrap();
        let err = plan_with(&config, &format!("/users?$orderby=age desc&$skiptoken={}", offset_token)).unwrap_err();
        assert!(matches!(err, ODataError::InvalidCursor(_)));

        assert!(matches!(
            plan_with(&config, "/orders?$orderby=user/name"),
            Err(ODataError::Parameter { .. })
        ));
    }

    #[test]
    fn test_next_token_continues_where_page_ended() {
        let config = EngineConfig::default().with_page_size(2);
        let first = plan_with(&config, "/users").unwrap();
        let rows: Vec<Record> = vec![Record::new(), Record::new()];

        let token = next_skiptoken(&first, &rows).unwrap().unwrap();
        let second = plan_with(&config, &format!("/users?$skiptoken={}", token)).unwrap();
        assert_eq!(second.offset, Some(2));
        assert_eq!(second.limit, Some(2));

        assert!(next_skiptoken(&first, &rows[..1]).unwrap().is_none());
    }

    #[test]
    fn test_forged_cursor_cannot_overflow_offset() {
        let config = EngineConfig::default().with_page_size(2);
        let token = Cursor::offset(4, 2, "+id").encode().unwrap();
        let err = plan_with(&config, &format!("/users?$skip={}&$skiptoken={}", u64::MAX, token)).unwrap_err();
        assert!(matches!(err, ODataError::Parameter { .. }));

        let token = Cursor::offset(u64::MAX, 2, "+id").encode().unwrap();
        let plan = plan_with(&config, &format!("/users?$skiptoken={}", token)).unwrap();
        assert_eq!(plan.offset, Some(u64::MAX));
        let rows: Vec<Record> = vec![Record::new(), Record::new()];
        assert!(matches!(next_skiptoken(&plan, &rows), Err(ODataError::InvalidCursor(_))));
    }

    #[test]
    fn test_builds_are_repeatable() {
        let url = "/users?$filter=age gt 25 and contains(name,'john')&$expand=orders($orderby=total desc)";
        assert_eq!(compile(url).unwrap(), compile(url).unwrap());
    }
}
