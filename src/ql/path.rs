//! Path module for qodata
//!
//! This module defines the NavigationPath structure, the parsed form of a
//! resource path such as `/users(123)/orders`. Only syntax lives here:
//! whether names and keys exist is decided by the plan builder.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::core::errors::ODataError;
use crate::core::value::Value;

/// Errors that can occur when working with resource paths
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("Invalid path format: {0}")]
    InvalidFormat(String),
    #[error("Empty path")]
    EmptyPath,
    #[error("Key fields [{fields}] do not match a key of {entity}")]
    KeyMismatch { entity: String, fields: String },
    #[error("Cannot navigate from collection {from} to {to} without a key")]
    CollectionNavigation { from: String, to: String },
}

/// A key predicate inside `( ... )`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPredicate {
    /// `users(123)`
    Scalar(Value),
    /// `grid(1,2)`, bound in declaration order to a multi-field key
    Positional(Vec<Value>),
    /// `items(order_id=1,product_id=2)`
    Composite(Vec<(String, Value)>),
    /// `users(email='a@b.c')`; may also name the primary key itself
    Unique(String, Value),
}

impl KeyPredicate {
    /// Field names spelled out by the predicate, if any
    pub fn field_names(&self) -> Vec<&str> {
        match self {
            KeyPredicate::Scalar(_) | KeyPredicate::Positional(_) => Vec::new(),
            KeyPredicate::Composite(pairs) => pairs.iter().map(|(f, _)| f.as_str()).collect(),
            KeyPredicate::Unique(field, _) => vec![field.as_str()],
        }
    }
}

impl fmt::Display for KeyPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPredicate::Scalar(v) => write!(f, "{}", v),
            KeyPredicate::Positional(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            },
            KeyPredicate::Composite(pairs) => {
                let parts: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{}", parts.join(","))
            },
            KeyPredicate::Unique(field, v) => write!(f, "{}={}", field, v),
        }
    }
}

/// A segment in a resource path: an entity set or navigation name with an
/// optional key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathSegment {
    pub name: String,
    pub key: Option<KeyPredicate>,
}

impl PathSegment {
    /// Create an unkeyed segment
    pub fn new<S: Into<String>>(name: S) -> Self {
        PathSegment { name: name.into(), key: None }
    }

    /// Create a keyed segment
    pub fn keyed<S: Into<String>>(name: S, key: KeyPredicate) -> Self {
        PathSegment { name: name.into(), key: Some(key) }
    }

    /// A segment without a key addresses a collection
    pub fn is_collection(&self) -> bool {
        self.key.is_none()
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}({})", self.name, key),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A resource path (e.g., "/users(123)/orders")
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationPath {
    segments: Vec<PathSegment>,
}

impl NavigationPath {
    /// Create a new empty path
    pub fn new() -> Self {
        NavigationPath { segments: Vec::new() }
    }

    /// Create a path from a vector of segments
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        NavigationPath { segments }
    }

    /// Get the number of segments in the path
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Check if the path is empty
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get all segments in the path
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// The entity-set segment
    pub fn root(&self) -> Option<&PathSegment> {
        self.segments.first()
    }

    /// The segment the request addresses
    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// True when the path ends on a collection rather than a single entity
    pub fn targets_collection(&self) -> bool {
        self.last().map(PathSegment::is_collection).unwrap_or(false)
    }
}

impl Default for NavigationPath {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a string into a NavigationPath
impl FromStr for NavigationPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::ql::parser::parse_resource_path(s).map_err(|e| match e {
            ODataError::Path(path_error) => path_error,
            other => PathError::InvalidFormat(other.to_string()),
        })
    }
}

/// Format a NavigationPath with a leading slash
impl fmt::Display for NavigationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}
