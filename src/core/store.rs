use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::errors::Result;
use crate::core::value::Record;
use crate::engine::mutation::MutationPlan;
use crate::engine::plan::QueryPlan;

/// Rows of one expanded relationship, already associated to their parent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Expansion {
    pub rows: Vec<Row>,
    /// Related rows before `$top`/`$skip`, when `$count` was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

/// A projected record plus its expanded relationships
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Row {
    #[serde(flatten)]
    pub values: Record,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub expanded: BTreeMap<String, Expansion>,
}

impl Row {
    pub fn new(values: Record) -> Self {
        Row { values, expanded: BTreeMap::new() }
    }

    pub fn expansion(&self, relationship: &str) -> Option<&Expansion> {
        self.expanded.get(relationship)
    }
}

/// Result of running a root query plan
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    /// Matching rows before paging, when `$count` was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Token for the next server-driven page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_skiptoken: Option<String>,
}

/// Trait defining what a backend must do with compiled plans
pub trait Executor: Send + Sync {
    /// Run a query plan, children included
    fn fetch(&self, plan: &QueryPlan) -> Result<QueryResult>;

    /// Apply a mutation; returns the affected record, or `None` when the
    /// addressed entity does not exist
    fn apply(&mut self, plan: &MutationPlan) -> Result<Option<Record>>;
}
