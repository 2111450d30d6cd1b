//! qodata: OData v4 request parsing and query planning
//!
//! This crate turns OData request URLs into a typed `RequestDescriptor`
//! and compiles that against a schema registry into an executable
//! `QueryPlan` tree (or a `MutationPlan` for writes). Policy such as
//! hidden fields, restrictions, expansion limits and skiptoken paging is
//! applied while planning. An in-memory executor runs plans for tests and
//! the command-line tool.

pub mod config;
pub mod core;
pub mod engine;
pub mod ql;
pub mod storage;

#[cfg(test)]
mod fixtures;

pub use crate::config::{EngineConfig, PaginationMode, ServiceConfig};
pub use crate::core::errors::{ODataError, Result};
pub use crate::core::schema::SchemaRegistry;
pub use crate::core::store::{Executor, QueryResult};
pub use crate::core::value::{Record, Value};
pub use crate::engine::{MutationPlan, QueryEngine, QueryPlan};
pub use crate::ql::{parse_request, ODataParser, RequestDescriptor};
pub use crate::storage::MemoryStore;
