use anyhow::Result;

use qodata::core::store::QueryResult;
use qodata::engine::QueryPlan;
use qodata::ql::RequestDescriptor;

/// Renders command output in one format
pub trait Formatter {
    fn format_request(&self, request: &RequestDescriptor) -> Result<String>;

    fn format_plan(&self, plan: &QueryPlan) -> Result<String>;

    fn format_result(&self, result: &QueryResult, next_link: Option<&str>) -> Result<String>;

    /// Entity set name and description pairs
    fn format_sets(&self, sets: &[(String, String)]) -> Result<String>;

    fn format_error(&self, error: &str) -> String;

    fn format_info(&self, info: &str) -> String;

    fn format_success(&self, success: &str) -> String;
}
