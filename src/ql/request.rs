//! Request descriptor
//!
//! Ties the resource path and the query options of one URL together.

use log::debug;
use serde::Serialize;

use crate::core::errors::Result;
use crate::ql::options::QueryOptions;
use crate::ql::parser::parse_resource_path;
use crate::ql::path::{NavigationPath, PathError};
use crate::ql::segmenter::percent_decode;

/// A fully parsed request: immutable once built
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDescriptor {
    pub path: NavigationPath,
    pub options: QueryOptions,
}

/// Parser for request URLs, optionally rooted under a service prefix
#[derive(Debug, Clone, Default)]
pub struct ODataParser {
    service_root: Option<String>,
}

impl ODataParser {
    pub fn new() -> Self {
        ODataParser { service_root: None }
    }

    /// Strip `root` (e.g. `/api/v1`) from every incoming path
    pub fn with_service_root<S: Into<String>>(mut self, root: S) -> Self {
        let root = root.into().trim_matches('/').to_string();
        self.service_root = if root.is_empty() { None } else { Some(root) };
        self
    }

    /// Parse a full or relative URL: `http://host/api/users(1)?$select=name`
    pub fn parse(&self, url: &str) -> Result<RequestDescriptor> {
        let url = url.split('#').next().unwrap_or("");
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, query),
            None => (url, ""),
        };
        self.parse_parts(strip_authority(path), query)
    }

    /// Parse a path and a query string given separately
    pub fn parse_parts(&self, path: &str, query: &str) -> Result<RequestDescriptor> {
        let decoded = percent_decode(path)?;
        let relative = self.strip_service_root(&decoded)?;

        let descriptor = RequestDescriptor {
            path: parse_resource_path(relative)?,
            options: QueryOptions::parse(query)?,
        };

        debug!("parsed request {}", descriptor.path);
        Ok(descriptor)
    }

    fn strip_service_root<'a>(&self, path: &'a str) -> Result<&'a str> {
        let trimmed = path.trim_start_matches('/');
        let root = match &self.service_root {
            Some(root) => root,
            None => return Ok(trimmed),
        };

        match trimmed.strip_prefix(root.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => Ok(rest),
            _ => Err(PathError::InvalidFormat(format!("'{}' is outside the service root /{}", path, root)).into()),
        }
    }
}

/// Drop `scheme://authority` from an absolute URL
fn strip_authority(path: &str) -> &str {
    match path.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ODataError;
    use crate::core::value::Value;
    use crate::ql::path::KeyPredicate;

    #[test]
    fn test_relative_url() {
        let request = ODataParser::new().parse("/users?$top=10&$skip=20").unwrap();
        assert_eq!(request.path.to_string(), "/users");
        assert_eq!(request.options.top, Some(10));
        assert_eq!(request.options.skip, Some(20));
        assert!(request.options.filter.is_none());
    }

    #[test]
    fn test_absolute_url_with_service_root() {
        let parser = ODataParser::new().with_service_root("/api/v1/");
        let request = parser.parse("https://example.com/api/v1/users(42)/orders?$count=true#top").unwrap();
        assert_eq!(request.path.len(), 2);
        assert_eq!(request.path.root().unwrap().key, Some(KeyPredicate::Scalar(Value::Integer(42))));
        assert!(request.options.count);

        let err = parser.parse("/other/users").unwrap_err();
        assert!(matches!(err, ODataError::Path(PathError::InvalidFormat(_))));
    }

    #[test]
    fn test_encoded_path_key() {
        let request = ODataParser::new().parse("/users(email=%27a%40b.c%27)").unwrap();
        assert_eq!(
            request.path.root().unwrap().key,
            Some(KeyPredicate::Unique("email".to_string(), Value::from("a@b.c")))
        );
    }

    #[test]
    fn test_root_only_is_empty_path() {
        let err = ODataParser::new().parse("http://example.com").unwrap_err();
        assert_eq!(err, ODataError::Path(PathError::EmptyPath));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let parser = ODataParser::new();
        let url = "/users?$filter=age gt 25 and contains(name,'john')&$orderby=name desc&$expand=orders($top=1)";
        assert_eq!(parser.parse(url).unwrap(), parser.parse(url).unwrap());
    }
}
