pub mod formatter;
pub mod json;
pub mod table;
pub mod text;

pub use formatter::Formatter;

use clap::ValueEnum;
use serde_json::{json, Map};

use qodata::core::store::{QueryResult, Row};

/// Output formats
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl std::str::FromStr for OutputFormat {
    type Err = crate::utils::error::CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "table" => Ok(OutputFormat::Table),
            other => Err(crate::utils::error::CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// A row as a JSON object; expansions become nested arrays
pub fn row_json(row: &Row) -> serde_json::Value {
    let mut object = Map::new();
    for (field, value) in &row.values {
        object.insert(field.clone(), serde_json::Value::from(value));
    }
    for (name, expansion) in &row.expanded {
        let rows: Vec<serde_json::Value> = expansion.rows.iter().map(row_json).collect();
        object.insert(name.clone(), json!(rows));
        if let Some(count) = expansion.count {
            object.insert(format!("{}@odata.count", name), json!(count));
        }
    }
    serde_json::Value::Object(object)
}

/// A query result in the usual OData response shape
pub fn result_json(result: &QueryResult, next_link: Option<&str>) -> serde_json::Value {
    let mut object = Map::new();
    if let Some(count) = result.count {
        object.insert("@odata.count".to_string(), json!(count));
    }
    let rows: Vec<serde_json::Value> = result.rows.iter().map(row_json).collect();
    object.insert("value".to_string(), json!(rows));
    if let Some(link) = next_link {
        object.insert("@odata.nextLink".to_string(), json!(link));
    }
    serde_json::Value::Object(object)
}
