use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use log::info;

use qodata::config::{EngineConfig, ServiceConfig};
use qodata::core::schema::SchemaRegistry;
use qodata::engine::QueryEngine;
use qodata::storage::MemoryStore;

use crate::utils::error::CliError;
use crate::formatters::json::JsonFormatter;
use crate::formatters::table::TableFormatter;
use crate::formatters::text::TextFormatter;
use crate::formatters::{Formatter, OutputFormat};

/// Everything a command needs: schema, engine settings, data and output
pub struct Context {
    registry: SchemaRegistry,
    engine: EngineConfig,
    store: MemoryStore,
    format: OutputFormat,
    colored: bool,
    formatter: Box<dyn Formatter>,
}

impl Context {
    pub fn load(schema: Option<&Path>, data: Option<&Path>, format: OutputFormat, colored: bool) -> Result<Self> {
        let service = match schema {
            Some(path) => ServiceConfig::from_file(path)?,
            None => ServiceConfig::default(),
        };
        let registry = service.registry()?;

        let store = match data {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                let store = MemoryStore::from_json(&text)?;
                info!("Loaded data from {}", path.display());
                store
            },
            None => MemoryStore::new(),
        };

        Ok(Context {
            registry,
            engine: service.engine,
            store,
            format,
            colored,
            formatter: make_formatter(format, colored),
        })
    }

    pub fn engine(&self) -> QueryEngine<'_> {
        QueryEngine::new(&self.registry, self.engine.clone())
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Fail unless a schema with at least one entity type was loaded
    pub fn require_schema(&self) -> Result<(), CliError> {
        if self.registry.entities().next().is_none() {
            return Err(CliError::NoSchema);
        }
        Ok(())
    }

    pub fn formatter(&self) -> &dyn Formatter {
        self.formatter.as_ref()
    }

    pub fn set_format(&mut self, format: OutputFormat) {
        if format != self.format {
            self.format = format;
            self.formatter = make_formatter(format, self.colored);
        }
    }
}

fn make_formatter(format: OutputFormat, colored: bool) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter::new(colored)),
        OutputFormat::Json => Box::new(JsonFormatter::new()),
        OutputFormat::Table => Box::new(TableFormatter::new(colored)),
    }
}
