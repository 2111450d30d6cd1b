//! Query language front end
//!
//! This module turns a request URL into a `RequestDescriptor`: the resource
//! path, the `$filter` tree and the remaining system query options.

pub mod ast;
pub mod options;
pub mod parser;
pub mod path;
pub mod request;
pub mod segmenter;

pub use ast::{FieldRef, FilterExpression};
pub use options::{ExpandItem, OrderBy, QueryOptions, SortDirection};
pub use path::{KeyPredicate, NavigationPath, PathError, PathSegment};
pub use request::{ODataParser, RequestDescriptor};

use crate::core::errors::Result;

/// Parse a request URL with no service root
pub fn parse_request(url: &str) -> Result<RequestDescriptor> {
    ODataParser::new().parse(url)
}
