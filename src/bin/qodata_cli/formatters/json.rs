use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use qodata::core::store::QueryResult;
use qodata::engine::QueryPlan;
use qodata::ql::RequestDescriptor;

use crate::formatters::{result_json, Formatter};

/// JSON output
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        JsonFormatter { pretty: true }
    }

    fn render<T: Serialize>(&self, value: &T) -> Result<String> {
        if self.pretty {
            Ok(serde_json::to_string_pretty(value)?)
        } else {
            Ok(serde_json::to_string(value)?)
        }
    }

    fn message(&self, key: &str, text: &str) -> String {
        let mut object = serde_json::Map::new();
        object.insert(key.to_string(), json!(text));
        self.render(&object)
            .unwrap_or_else(|_| format!("{{\"{}\":{:?}}}", key, text))
    }
}

impl Formatter for JsonFormatter {
    fn format_request(&self, request: &RequestDescriptor) -> Result<String> {
        self.render(request)
    }

    fn format_plan(&self, plan: &QueryPlan) -> Result<String> {
        self.render(plan)
    }

    fn format_result(&self, result: &QueryResult, next_link: Option<&str>) -> Result<String> {
        self.render(&result_json(result, next_link))
    }

    fn format_sets(&self, sets: &[(String, String)]) -> Result<String> {
        let sets: Vec<serde_json::Value> = sets.iter()
            .map(|(name, description)| json!({ "name": name, "entity": description }))
            .collect();
        self.render(&json!({ "value": sets }))
    }

    fn format_error(&self, error: &str) -> String {
        self.message("error", error)
    }

    fn format_info(&self, info: &str) -> String {
        self.message("info", info)
    }

    fn format_success(&self, success: &str) -> String {
        self.message("success", success)
    }
}
