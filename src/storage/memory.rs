//! In-memory executor for qodata
//!
//! Tables are vectors of records keyed by entity name. Every plan node is
//! a full scan; each expanded relationship is fetched once for all parent
//! rows and then split per parent.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use log::{debug, trace};

use crate::core::errors::{ODataError, Result};
use crate::core::store::{Executor, Expansion, QueryResult, Row};
use crate::core::value::{Record, Value};
use crate::engine::mutation::{MutationKind, MutationPlan};
use crate::engine::pagination::next_skiptoken;
use crate::engine::plan::{BoundExpr, ChildPlan, Join, PathStep, QueryPlan, SortKey};
use crate::ql::options::SortDirection;
use crate::storage::evaluator::{same, Evaluator};

/// An in-memory table store
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    /// Entity name to rows, in insertion order
    tables: BTreeMap<String, Vec<Record>>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        MemoryStore {
            tables: BTreeMap::new(),
        }
    }

    /// Append a row as is
    pub fn insert<S: Into<String>>(&mut self, entity: S, record: Record) {
        self.tables.entry(entity.into()).or_default().push(record);
    }

    pub fn rows(&self, entity: &str) -> &[Record] {
        self.tables.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Load rows from JSON shaped like `{"User": [{"id": 1, ...}], ...}`
    pub fn from_json(json: &str) -> Result<Self> {
        let data: BTreeMap<String, Vec<BTreeMap<String, serde_json::Value>>> = serde_json::from_str(json)
            .map_err(|e| ODataError::Config(format!("invalid data: {}", e)))?;

        let mut store = MemoryStore::new();
        for (entity, rows) in data {
            for row in rows {
                let record = row.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
                store.insert(entity.as_str(), record);
            }
        }
        Ok(store)
    }

    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.tables)
    }

    /// Rows of the last path step, or `None` for a path without steps
    fn steps(&self, scope: &[PathStep]) -> Result<Option<Vec<&Record>>> {
        let mut parents: Option<Vec<&Record>> = None;
        for step in scope {
            let rows = self.joined(parents.as_deref(), step.via.as_ref(), &step.entity);
            parents = Some(self.filter(rows, step.predicate.as_ref())?);
        }
        Ok(parents)
    }

    /// Rows of `entity` reachable through `scope` and `via`
    fn reachable(&self, scope: &[PathStep], via: Option<&Join>, entity: &str) -> Result<Vec<&Record>> {
        let parents = self.steps(scope)?;
        Ok(self.joined(parents.as_deref(), via, entity))
    }

    fn joined(&self, parents: Option<&[&Record]>, via: Option<&Join>, entity: &str) -> Vec<&Record> {
        let rows = self.rows(entity).iter();
        match (parents, via) {
            (Some(parents), Some(join)) => {
                let keys: Vec<&Value> = parents.iter()
                    .filter_map(|parent| parent.get(&join.source_field))
                    .collect();
                rows.filter(|row| {
                    row.get(&join.target_field).map_or(false, |v| keys.iter().any(|k| same(k, v)))
                }).collect()
            },
            _ => rows.collect(),
        }
    }

    fn filter<'s>(&self, rows: Vec<&'s Record>, predicate: Option<&BoundExpr>) -> Result<Vec<&'s Record>> {
        let predicate = match predicate {
            Some(predicate) => predicate,
            None => return Ok(rows),
        };

        let eval = self.evaluator();
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if eval.matches(predicate, row)? {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    fn sort<'s>(&self, rows: Vec<&'s Record>, order: &[SortKey]) -> Vec<&'s Record> {
        if order.is_empty() {
            return rows;
        }

        let eval = self.evaluator();
        let mut keyed: Vec<(Vec<Value>, &Record)> = rows.into_iter()
            .map(|row| (order.iter().map(|key| eval.field(&key.field, row)).collect(), row))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| compare_keys(order, a, b));
        keyed.into_iter().map(|(_, row)| row).collect()
    }

    /// Filter and order candidate rows of a plan node
    fn select<'s>(&self, plan: &QueryPlan, rows: Vec<&'s Record>) -> Result<Vec<&'s Record>> {
        let rows = self.filter(rows, plan.predicate.as_ref())?;
        Ok(self.sort(rows, &plan.order))
    }

    /// Project rows and attach their expansions
    fn materialize(&self, plan: &QueryPlan, records: &[&Record]) -> Result<Vec<Row>> {
        let mut rows: Vec<Row> = records.iter()
            .map(|record| Row::new(project(plan, record)))
            .collect();

        for child in &plan.children {
            let expansions = self.expand(child, records)?;
            for (row, expansion) in rows.iter_mut().zip(expansions) {
                row.expanded.insert(child.join.relationship.clone(), expansion);
            }
        }
        Ok(rows)
    }

    /// One fetch for all parents, then `$top`/`$skip`/`$count` per parent
    fn expand(&self, child: &ChildPlan, parents: &[&Record]) -> Result<Vec<Expansion>> {
        let join = &child.join;
        let keys: Vec<&Value> = parents.iter()
            .filter_map(|parent| parent.get(&join.source_field))
            .collect();
        let candidates: Vec<&Record> = self.rows(&child.plan.entity).iter()
            .filter(|row| row.get(&join.target_field).map_or(false, |v| keys.iter().any(|k| same(k, v))))
            .collect();
        let candidates = self.select(&child.plan, candidates)?;
        trace!("{}: {} candidate row(s) for {} parent(s)", join.relationship, candidates.len(), parents.len());

        let mut spans = Vec::with_capacity(parents.len());
        let mut flat = Vec::new();
        for parent in parents {
            let related: Vec<&Record> = match parent.get(&join.source_field) {
                Some(key) => candidates.iter()
                    .filter(|row| row.get(&join.target_field).map_or(false, |v| same(key, v)))
                    .copied()
                    .collect(),
                None => Vec::new(),
            };
            let total = related.len();
            let page = window(related, child.plan.offset, child.plan.limit);
            spans.push((page.len(), total));
            flat.extend(page);
        }

        let mut rows = self.materialize(&child.plan, &flat)?.into_iter();
        Ok(spans.into_iter()
            .map(|(len, total)| Expansion {
                rows: rows.by_ref().take(len).collect(),
                count: child.plan.want_count.then_some(total),
            })
            .collect())
    }

    /// Index of the row a mutation addresses
    fn locate(&self, plan: &MutationPlan) -> Result<Option<usize>> {
        let rows = self.reachable(&plan.scope, plan.via.as_ref(), &plan.entity)?;
        let found = rows.into_iter().find(|row| {
            plan.key.iter().all(|(field, value)| row.get(field).map_or(false, |v| same(v, value)))
        });
        Ok(found.and_then(|found| {
            self.rows(&plan.entity).iter().position(|row| std::ptr::eq(row, found))
        }))
    }

    fn create(&mut self, plan: &MutationPlan) -> Result<Option<Record>> {
        if !plan.scope.is_empty() && self.steps(&plan.scope)?.map_or(true, |parents| parents.is_empty()) {
            debug!("create on {} skipped: parent not found", plan.entity);
            return Ok(None);
        }

        let mut record = plan.values.clone();
        if let [pk] = plan.primary_key.as_slice() {
            if record.get(pk).map_or(true, Value::is_null) {
                let next = self.rows(&plan.entity).iter()
                    .filter_map(|row| match row.get(pk) {
                        Some(Value::Integer(i)) => Some(*i),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(0)
                    .checked_add(1)
                    .ok_or_else(|| ODataError::InvalidOperation(format!("{} key space exhausted", plan.entity)))?;
                record.insert(pk.clone(), Value::Integer(next));
            }
        }

        let key = key_of(&record, &plan.primary_key);
        if key.iter().any(Value::is_null) {
            return Err(ODataError::InvalidOperation(format!(
                "create on {} needs a value for every key field", plan.entity
            )));
        }
        let taken = self.rows(&plan.entity).iter().any(|row| {
            key_of(row, &plan.primary_key).iter().zip(&key).all(|(a, b)| same(a, b))
        });
        if taken {
            return Err(ODataError::InvalidOperation(format!(
                "{} with key {:?} already exists", plan.entity, key
            )));
        }

        self.insert(plan.entity.as_str(), record.clone());
        Ok(Some(record))
    }
}

impl Executor for MemoryStore {
    fn fetch(&self, plan: &QueryPlan) -> Result<QueryResult> {
        let candidates = self.reachable(&plan.scope, plan.via.as_ref(), &plan.entity)?;
        let matching = self.select(plan, candidates)?;
        let count = plan.want_count.then_some(matching.len());

        let page = window(matching, plan.offset, plan.limit);
        let next_skiptoken = next_skiptoken(plan, &page)?;
        let rows = self.materialize(plan, &page)?;

        debug!("fetched {} row(s) of {}", rows.len(), plan.entity);
        Ok(QueryResult { rows, count, next_skiptoken })
    }

    fn apply(&mut self, plan: &MutationPlan) -> Result<Option<Record>> {
        if let MutationKind::Create = plan.kind {
            return self.create(plan);
        }

        let index = match self.locate(plan)? {
            Some(index) => index,
            None => return Ok(None),
        };
        let table = self.tables.get_mut(&plan.entity)
            .ok_or_else(|| ODataError::InvalidOperation(format!("no table for {}", plan.entity)))?;

        debug!("{} on {} row {}", plan.kind, plan.entity, index);
        match plan.kind {
            MutationKind::Delete => Ok(Some(table.remove(index))),
            MutationKind::Update { partial } => {
                let record = &mut table[index];
                if !partial {
                    record.retain(|field, _| plan.primary_key.contains(field));
                }
                record.extend(plan.values.clone());
                Ok(Some(record.clone()))
            },
            MutationKind::Create => Ok(None),
        }
    }
}

fn project(plan: &QueryPlan, record: &Record) -> Record {
    plan.projection.fields.iter()
        .map(|field| (field.clone(), record.get(field).cloned().unwrap_or(Value::Null)))
        .collect()
}

fn window<T>(rows: Vec<T>, offset: Option<u64>, limit: Option<u64>) -> Vec<T> {
    let offset = offset.map_or(0, |o| o as usize);
    let limit = limit.map_or(usize::MAX, |l| l as usize);
    rows.into_iter().skip(offset).take(limit).collect()
}

fn key_of(record: &Record, fields: &[String]) -> Vec<Value> {
    fields.iter()
        .map(|field| record.get(field).cloned().unwrap_or(Value::Null))
        .collect()
}

fn compare_keys(order: &[SortKey], a: &[Value], b: &[Value]) -> Ordering {
    for ((key, x), y) in order.iter().zip(a).zip(b) {
        let ordering = x.compare(y).unwrap_or(Ordering::Equal);
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, PaginationMode};
    use crate::core::schema::SchemaRegistry;
    use crate::engine::mutation::FieldPolicy;
    use crate::engine::pagination::replace_skiptoken;
    use crate::engine::QueryEngine;
    use crate::fixtures::registry;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn user(id: i64, name: &str, age: i64) -> Record {
        record(&[
            ("id", Value::Integer(id)),
            ("name", Value::from(name)),
            ("email", Value::String(format!("{}@example.com", name.replace(' ', ".")))),
            ("age", Value::Integer(age)),
            ("secret", Value::from("hunter2")),
            ("active", Value::Boolean(true)),
            ("nickname", Value::Null),
        ])
    }

    fn order(id: i64, user_id: i64, total: f64, status: &str) -> Record {
        record(&[
            ("id", Value::Integer(id)),
            ("user_id", Value::Integer(user_id)),
            ("total", Value::Float(total)),
            ("status", Value::from(status)),
            ("placed", Value::Null),
        ])
    }

    fn item(id: i64, order_id: i64, product_id: i64, quantity: i64) -> Record {
        record(&[
            ("id", Value::Integer(id)),
            ("order_id", Value::Integer(order_id)),
            ("product_id", Value::Integer(product_id)),
            ("quantity", Value::Integer(quantity)),
        ])
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.insert("User", user(1, "ann", 31));
        store.insert("User", user(2, "john", 28));
        store.insert("User", user(3, "johnny", 22));
        store.insert("User", user(4, "bob", 40));
        store.insert("User", user(5, "big john", 45));

        store.insert("Order", order(10, 1, 50.0, "paid"));
        store.insert("Order", order(11, 1, 20.0, "new"));
        store.insert("Order", order(12, 2, 75.0, "paid"));
        store.insert("Order", order(13, 4, 5.0, "cancelled"));

        store.insert("Item", item(100, 10, 1000, 2));
        store.insert("Item", item(101, 10, 1001, 1));
        store.insert("Item", item(102, 12, 1000, 5));

        store.insert("Product", record(&[
            ("id", Value::Integer(1000)), ("sku", Value::from("A-1")),
            ("price", Value::Float(9.5)), ("category_id", Value::Integer(1)),
        ]));
        store.insert("Product", record(&[
            ("id", Value::Integer(1001)), ("sku", Value::from("B-2")),
            ("price", Value::Float(3.0)), ("category_id", Value::Integer(1)),
        ]));
        store.insert("Category", record(&[("id", Value::Integer(1)), ("label", Value::from("tools"))]));
        store
    }

    fn run_with(registry: &SchemaRegistry, config: &EngineConfig, store: &MemoryStore, url: &str) -> Result<QueryResult> {
        let engine = QueryEngine::new(registry, config.clone());
        let plan = engine.query_url(url)?;
        store.fetch(&plan)
    }

    fn run(url: &str) -> Result<QueryResult> {
        run_with(&registry(), &EngineConfig::default(), &store(), url)
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter()
            .filter_map(|row| match row.values.get("id") {
                Some(Value::Integer(id)) => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_filter_scenario() {
        let result = run("/users?$filter=age gt 25 and contains(name,'john')").unwrap();
        assert_eq!(ids(&result.rows), vec![2, 5]);
        assert!(result.rows.iter().all(|row| !row.values.contains_key("secret")));
        assert!(result.next_skiptoken.is_none());
    }

    #[test]
    fn test_order_top_skip() {
        let result = run("/users?$orderby=age desc&$top=2&$skip=1&$count=true").unwrap();
        assert_eq!(ids(&result.rows), vec![4, 1]);
        assert_eq!(result.count, Some(5));
    }

    #[test]
    fn test_navigation_scope() {
        let result = run("/users(1)/orders?$orderby=total").unwrap();
        assert_eq!(ids(&result.rows), vec![11, 10]);

        let result = run("/orders(12)/user").unwrap();
        assert_eq!(ids(&result.rows), vec![2]);

        assert!(run("/users(99)/orders").unwrap().rows.is_empty());
    }

    #[test]
    fn test_filter_through_to_one_join() {
        let result = run("/orders?$filter=user/name eq 'ann'&$orderby=id").unwrap();
        assert_eq!(ids(&result.rows), vec![10, 11]);
    }

    #[test]
    fn test_expand_per_parent_window() {
        let result = run("/users?$filter=id le 2&$expand=orders($orderby=total desc;$top=1;$count=true)").unwrap();
        assert_eq!(result.rows.len(), 2);

        let first = result.rows[0].expansion("orders").unwrap();
        assert_eq!(ids(&first.rows), vec![10]);
        assert_eq!(first.count, Some(2));

        let second = result.rows[1].expansion("orders").unwrap();
        assert_eq!(ids(&second.rows), vec![12]);
        assert_eq!(second.count, Some(1));
    }

    #[test]
    fn test_nested_expand_and_implicit_fields() {
        let result = run("/orders?$select=total&$filter=id eq 10&$expand=items($select=quantity;$expand=product($select=sku))").unwrap();
        let order = &result.rows[0];
        assert_eq!(order.values.keys().collect::<Vec<_>>(), vec!["id", "total"]);

        let items = order.expansion("items").unwrap();
        assert_eq!(ids(&items.rows), vec![100, 101]);
        assert!(!items.rows[0].values.contains_key("order_id"));

        let product = items.rows[1].expansion("product").unwrap();
        assert_eq!(product.rows.len(), 1);
        assert_eq!(product.rows[0].values.get("sku"), Some(&Value::from("B-2")));
    }

    #[test]
    fn test_restriction_applies() {
        let mut registry = registry();
        registry.restrict("Order", "status ne 'cancelled'").unwrap();
        let result = run_with(&registry, &EngineConfig::default(), &store(), "/orders").unwrap();
        assert_eq!(ids(&result.rows), vec![10, 11, 12]);
    }

    fn drain(config: &EngineConfig, url: &str) -> Vec<Row> {
        let registry = registry();
        let store = store();
        let mut url = url.to_string();
        let mut rows = Vec::new();
        loop {
            let result = run_with(&registry, config, &store, &url).unwrap();
            rows.extend(result.rows);
            match result.next_skiptoken {
                Some(token) => url = replace_skiptoken(&url, Some(&token)).unwrap(),
                None => return rows,
            }
        }
    }

    #[test]
    fn test_offset_paging_visits_every_row_once() {
        let config = EngineConfig::default().with_page_size(2);
        let rows = drain(&config, "/users?$orderby=name");
        let names: Vec<&str> = rows.iter().filter_map(|r| r.values.get("name").and_then(Value::as_str)).collect();
        assert_eq!(names, vec!["ann", "big john", "bob", "john", "johnny"]);

        assert_eq!(drain(&config, "/users?$orderby=name&$top=3").len(), 3);
    }

    #[test]
    fn test_keyset_paging_visits_every_row_once() {
        let config = EngineConfig::default()
            .with_page_size(2)
            .with_pagination(PaginationMode::Keyset);
        let rows = drain(&config, "/users?$select=name&$orderby=age desc");
        assert_eq!(ids(&rows), vec![5, 4, 1, 2, 3]);
        assert!(rows.iter().all(|row| !row.values.contains_key("age")));
    }

    #[test]
    fn test_mutations() {
        let registry = registry();
        let engine = QueryEngine::new(&registry, EngineConfig::default());
        let parser = engine.parser();
        let mut store = store();
        let policy = FieldPolicy::default();

        let values = record(&[("total", Value::Float(12.0)), ("status", Value::from("new"))]);
        let plan = engine.create(&parser.parse("/users(2)/orders").unwrap(), values, &policy).unwrap();
        let created = store.apply(&plan).unwrap().unwrap();
        assert_eq!(created.get("id"), Some(&Value::Integer(14)));
        assert_eq!(created.get("user_id"), Some(&Value::Integer(2)));

        let listed = store.fetch(&engine.query_url("/users(2)/orders").unwrap()).unwrap();
        assert_eq!(ids(&listed.rows), vec![12, 14]);

        let target = parser.parse("/orders(14)").unwrap();
        let plan = engine.update(&target, record(&[("status", Value::from("paid"))]), true, &policy).unwrap();
        let updated = store.apply(&plan).unwrap().unwrap();
        assert_eq!(updated.get("status"), Some(&Value::from("paid")));
        assert_eq!(updated.get("total"), Some(&Value::Float(12.0)));

        let plan = engine.delete(&target).unwrap();
        assert!(store.apply(&plan).unwrap().is_some());
        assert!(store.apply(&plan).unwrap().is_none());
        assert_eq!(store.rows("Order").len(), 4);
    }

    #[test]
    fn test_create_conflicts_and_missing_parent() {
        let registry = registry();
        let engine = QueryEngine::new(&registry, EngineConfig::default());
        let parser = engine.parser();
        let mut store = store();
        let policy = FieldPolicy::default();

        let values = record(&[("id", Value::Integer(10)), ("user_id", Value::Integer(1)),
            ("total", Value::Float(1.0)), ("status", Value::from("new"))]);
        let plan = engine.create(&parser.parse("/orders").unwrap(), values, &policy).unwrap();
        assert!(matches!(store.apply(&plan), Err(ODataError::InvalidOperation(_))));

        let values = record(&[("total", Value::Float(1.0)), ("status", Value::from("new"))]);
        let plan = engine.create(&parser.parse("/users(99)/orders").unwrap(), values, &policy).unwrap();
        assert!(store.apply(&plan).unwrap().is_none());
    }

    #[test]
    fn test_auto_key_does_not_overflow() {
        let registry = registry();
        let engine = QueryEngine::new(&registry, EngineConfig::default());
        let mut store = store();
        store.insert("Order", record(&[("id", Value::Integer(i64::MAX)), ("user_id", Value::Integer(2)),
            ("total", Value::Float(1.0)), ("status", Value::from("new"))]));

        let values = record(&[("total", Value::Float(3.0)), ("status", Value::from("new"))]);
        let plan = engine.create(&engine.parser().parse("/users(2)/orders").unwrap(), values, &FieldPolicy::default()).unwrap();
        assert!(matches!(store.apply(&plan), Err(ODataError::InvalidOperation(_))));
    }

    #[test]
    fn test_load_from_json() {
        let store = MemoryStore::from_json(r#"{"Category": [{"id": 1, "label": "tools"}, {"id": 2, "label": "toys"}]}"#).unwrap();
        assert_eq!(store.rows("Category").len(), 2);
        assert_eq!(store.rows("Category")[1].get("label"), Some(&Value::from("toys")));
        assert!(matches!(MemoryStore::from_json("[1, 2]"), Err(ODataError::Config(_))));
    }
}
