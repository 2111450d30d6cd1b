use anyhow::Result;
use colored::*;
use prettytable::{Cell, Row as TableRow, Table};

use qodata::core::store::QueryResult;
use qodata::engine::QueryPlan;
use qodata::ql::RequestDescriptor;

use crate::formatters::Formatter;

/// Tabular output
pub struct TableFormatter {
    colored: bool,
}

impl TableFormatter {
    pub fn new(colored: bool) -> Self {
        TableFormatter { colored }
    }

    fn titles(&self, names: &[&str]) -> TableRow {
        TableRow::new(names.iter().map(|name| Cell::new(name).style_spec("b")).collect())
    }
}

fn pair(key: &str, value: &str) -> TableRow {
    TableRow::new(vec![Cell::new(key), Cell::new(value)])
}

/// One table row per plan node, depth first
fn plan_rows(table: &mut Table, plan: &QueryPlan, label: &str) {
    let window = match (plan.limit, plan.offset) {
        (Some(limit), Some(offset)) => format!("{} from {}", limit, offset),
        (Some(limit), None) => limit.to_string(),
        (None, Some(offset)) => format!("from {}", offset),
        (None, None) => String::new(),
    };
    let order: Vec<String> = plan.order.iter()
        .map(|key| format!("{} {}", key.field, key.direction))
        .collect();

    table.add_row(TableRow::new(vec![
        Cell::new(label),
        Cell::new(&plan.entity),
        Cell::new(&plan.projection.fields.join(", ")),
        Cell::new(&plan.predicate.as_ref().map(|p| p.to_string()).unwrap_or_default()),
        Cell::new(&order.join(", ")),
        Cell::new(&window),
    ]));

    for child in &plan.children {
        plan_rows(table, &child.plan, &format!("{}/{}", label, child.join.relationship));
    }
}

impl Formatter for TableFormatter {
    fn format_request(&self, request: &RequestDescriptor) -> Result<String> {
        let options = &request.options;
        let mut table = Table::new();
        table.set_titles(self.titles(&["Option", "Value"]));
        table.add_row(pair("path", &request.path.to_string()));

        if let Some(filter) = &options.filter {
            table.add_row(pair("$filter", &filter.to_string()));
        }
        if let Some(select) = &options.select {
            table.add_row(pair("$select", &select.join(", ")));
        }
        if !options.orderby.is_empty() {
            let items: Vec<String> = options.orderby.iter()
                .map(|item| format!("{} {}", item.field, item.direction))
                .collect();
            table.add_row(pair("$orderby", &items.join(", ")));
        }
        if !options.expand.is_empty() {
            let targets: Vec<&str> = options.expand.iter().map(|item| item.target.as_str()).collect();
            table.add_row(pair("$expand", &targets.join(", ")));
        }
        if let Some(top) = options.top {
            table.add_row(pair("$top", &top.to_string()));
        }
        if let Some(skip) = options.skip {
            table.add_row(pair("$skip", &skip.to_string()));
        }
        if let Some(token) = &options.skiptoken {
            table.add_row(pair("$skiptoken", token));
        }
        if options.count {
            table.add_row(pair("$count", "true"));
        }
        if let Some(search) = &options.search {
            table.add_row(pair("$search", search));
        }
        for (name, value) in &options.custom {
            table.add_row(pair(name, value));
        }
        Ok(table.to_string())
    }

    fn format_plan(&self, plan: &QueryPlan) -> Result<String> {
        let mut table = Table::new();
        table.set_titles(self.titles(&["Node", "Entity", "Fields", "Where", "Order", "Window"]));
        plan_rows(&mut table, plan, "$");
        Ok(table.to_string())
    }

    fn format_result(&self, result: &QueryResult, next_link: Option<&str>) -> Result<String> {
        let mut columns: Vec<&str> = Vec::new();
        let mut expansions: Vec<&str> = Vec::new();
        for row in &result.rows {
            for field in row.values.keys() {
                if !columns.contains(&field.as_str()) {
                    columns.push(field);
                }
            }
            for name in row.expanded.keys() {
                if !expansions.contains(&name.as_str()) {
                    expansions.push(name);
                }
            }
        }

        let mut table = Table::new();
        let titles: Vec<&str> = columns.iter().chain(expansions.iter()).copied().collect();
        table.set_titles(self.titles(&titles));

        for row in &result.rows {
            let mut cells: Vec<Cell> = columns.iter()
                .map(|column| Cell::new(&row.values.get(*column).map(|v| v.to_string()).unwrap_or_default()))
                .collect();
            for name in &expansions {
                let text = match row.expansion(name) {
                    Some(expansion) => format!("[{} row(s)]", expansion.rows.len()),
                    None => String::new(),
                };
                cells.push(Cell::new(&text));
            }
            table.add_row(TableRow::new(cells));
        }

        let mut out = table.to_string();
        if let Some(count) = result.count {
            out.push_str(&format!("total: {}\n", count));
        }
        if let Some(link) = next_link {
            out.push_str(&format!("next: {}\n", link));
        }
        Ok(out)
    }

    fn format_sets(&self, sets: &[(String, String)]) -> Result<String> {
        let mut table = Table::new();
        table.set_titles(self.titles(&["Entity set", "Type"]));
        for (name, description) in sets {
            table.add_row(pair(name, description));
        }
        Ok(table.to_string())
    }

    fn format_error(&self, error: &str) -> String {
        if self.colored {
            format!("{}", error.red().bold())
        } else {
            format!("Error: {}", error)
        }
    }

    fn format_info(&self, info: &str) -> String {
        if self.colored {
            format!("{}", info.blue())
        } else {
            info.to_string()
        }
    }

    fn format_success(&self, success: &str) -> String {
        if self.colored {
            format!("{}", success.green().bold())
        } else {
            success.to_string()
        }
    }
}
