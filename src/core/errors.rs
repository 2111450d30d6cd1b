//! Error types for qodata
//!
//! Every stage (segmenting, parsing, plan building, cursor decoding)
//! fails fast with one of these variants; no partial result is ever
//! returned alongside an error.

use thiserror::Error;
use crate::ql::path::PathError;

/// Errors that can occur while parsing a request or compiling a plan
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ODataError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Filter syntax error near '{remainder}': {message}")]
    FilterSyntax { remainder: String, message: String },

    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),

    #[error("Function {name} expects {expected} argument(s), got {found}")]
    FunctionArity { name: String, expected: usize, found: usize },

    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Invalid value for {option}: {message}")]
    Parameter { option: String, message: String },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Unknown field '{field}' on {entity}")]
    UnknownField { entity: String, field: String },

    #[error("Unknown navigation property '{name}' on {entity}")]
    UnknownNavigation { entity: String, name: String },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Circular reference: {0}")]
    CircularReference(String),

    #[error("Expansion depth {depth} exceeds the maximum of {max}")]
    ExpansionDepthExceeded { depth: usize, max: usize },

    #[error("Invalid skiptoken: {0}")]
    InvalidCursor(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ODataError {
    /// Shorthand for a `ParameterError` on the given query option
    pub fn parameter<O: Into<String>, M: Into<String>>(option: O, message: M) -> Self {
        ODataError::Parameter {
            option: option.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an unknown field on an entity type
    pub fn unknown_field<E: Into<String>, F: Into<String>>(entity: E, field: F) -> Self {
        ODataError::UnknownField {
            entity: entity.into(),
            field: field.into(),
        }
    }
}

/// Result type for parsing and planning operations
pub type Result<T> = std::result::Result<T, ODataError>;
