pub mod errors;
pub mod schema;
pub mod store;
pub mod value;

pub use errors::{ODataError, Result};
pub use schema::{AccessFlags, EntityType, Field, FieldType, Relationship, RelationshipKind, SchemaRegistry};
pub use store::{Executor, Expansion, QueryResult, Row};
pub use value::{Record, Value};
