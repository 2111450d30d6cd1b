//! Service configuration
//!
//! `EngineConfig` holds the plan builder's limits and paging policy.
//! `ServiceConfig` bundles it with entity declarations so a whole service
//! can be described in one JSON file.

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::core::errors::{ODataError, Result};
use crate::core::schema::{EntityType, SchemaRegistry};

/// How server-driven pages continue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    /// The token carries the number of rows already served
    #[default]
    Offset,
    /// The token carries the sort key of the last row served
    Keyset,
}

/// Limits and policy applied while building plans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_expand_depth: usize,
    /// Relationship hops allowed in a field path such as `order/customer/name`
    pub max_navigation_hops: usize,
    /// Server page size; `None` disables server-driven paging
    pub page_size: Option<u64>,
    pub pagination: PaginationMode,
    /// Fields projected whenever the entity has them, whatever `$select` says
    pub select_always: Vec<String>,
    /// Inline every to-one foreign key one level deep
    pub auto_expand_references: bool,
    /// Path prefix stripped from incoming URLs, e.g. `/api/v1`
    pub service_root: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_expand_depth: 3,
            max_navigation_hops: 3,
            page_size: None,
            pagination: PaginationMode::Offset,
            select_always: vec!["id".to_string()],
            auto_expand_references: false,
            service_root: None,
        }
    }
}

impl EngineConfig {
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_pagination(mut self, mode: PaginationMode) -> Self {
        self.pagination = mode;
        self
    }

    pub fn with_max_expand_depth(mut self, depth: usize) -> Self {
        self.max_expand_depth = depth;
        self
    }

    pub fn with_select_always<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select_always = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Reject settings no request could satisfy
    pub fn validate(&self) -> Result<()> {
        if self.page_size == Some(0) {
            return Err(ODataError::Config("page_size must be positive".to_string()));
        }
        Ok(())
    }
}

/// A complete service description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub entities: Vec<EntityType>,
}

impl ServiceConfig {
    /// Load a service description from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ODataError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        info!("Loaded {} entity type(s) from {}", config.entities.len(), path.display());
        Ok(config)
    }

    /// Parse a service description from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ServiceConfig = serde_json::from_str(text)
            .map_err(|e| ODataError::Config(e.to_string()))?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Build and validate the registry described by this configuration
    pub fn registry(&self) -> Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        for entity in &self.entities {
            registry.register(entity.clone())?;
        }
        registry.validate()?;
        Ok(registry)
    }
}
