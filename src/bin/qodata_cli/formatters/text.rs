use std::fmt::Write;

use anyhow::Result;
use colored::*;

use qodata::core::store::{QueryResult, Row};
use qodata::engine::QueryPlan;
use qodata::ql::{QueryOptions, RequestDescriptor};

use crate::formatters::Formatter;

/// Indented plain-text output
pub struct TextFormatter {
    colored: bool,
}

impl TextFormatter {
    pub fn new(colored: bool) -> Self {
        TextFormatter { colored }
    }

    fn heading(&self, text: &str) -> String {
        if self.colored {
            text.cyan().bold().to_string()
        } else {
            text.to_string()
        }
    }
}

fn write_options(out: &mut String, options: &QueryOptions, indent: usize) -> Result<()> {
    let pad = "  ".repeat(indent);
    if let Some(filter) = &options.filter {
        writeln!(out, "{}$filter: {}", pad, filter)?;
    }
    if let Some(select) = &options.select {
        writeln!(out, "{}$select: {}", pad, select.join(", "))?;
    }
    if !options.orderby.is_empty() {
        let items: Vec<String> = options.orderby.iter()
            .map(|item| format!("{} {}", item.field, item.direction))
            .collect();
        writeln!(out, "{}$orderby: {}", pad, items.join(", "))?;
    }
    if let Some(top) = options.top {
        writeln!(out, "{}$top: {}", pad, top)?;
    }
    if let Some(skip) = options.skip {
        writeln!(out, "{}$skip: {}", pad, skip)?;
    }
    if let Some(token) = &options.skiptoken {
        writeln!(out, "{}$skiptoken: {}", pad, token)?;
    }
    if options.count {
        writeln!(out, "{}$count: true", pad)?;
    }
    if let Some(search) = &options.search {
        writeln!(out, "{}$search: {}", pad, search)?;
    }
    if let Some(format) = &options.format {
        writeln!(out, "{}$format: {}", pad, format)?;
    }
    for (name, value) in &options.custom {
        writeln!(out, "{}{}: {}", pad, name, value)?;
    }
    for item in &options.expand {
        writeln!(out, "{}$expand: {}", pad, item.target)?;
        write_options(out, &item.options, indent + 1)?;
    }
    Ok(())
}

fn write_plan(out: &mut String, plan: &QueryPlan, indent: usize) -> Result<()> {
    let pad = "  ".repeat(indent);
    let mut fields = plan.projection.fields.join(", ");
    if !plan.projection.implicit.is_empty() {
        write!(fields, " (+{})", plan.projection.implicit.join(", "))?;
    }
    writeln!(out, "{}fields: {}", pad, fields)?;

    if let Some(predicate) = &plan.predicate {
        writeln!(out, "{}where: {}", pad, predicate)?;
    }
    if !plan.order.is_empty() {
        let keys: Vec<String> = plan.order.iter()
            .map(|key| format!("{} {}", key.field, key.direction))
            .collect();
        writeln!(out, "{}order: {}", pad, keys.join(", "))?;
    }
    if let Some(limit) = plan.limit {
        writeln!(out, "{}limit: {}", pad, limit)?;
    }
    if let Some(offset) = plan.offset {
        writeln!(out, "{}offset: {}", pad, offset)?;
    }
    if let Some(page) = &plan.pagination {
        writeln!(out, "{}paging: {:?}, {} per page, {} served", pad, page.mode, page.page_size, page.served)?;
    }
    if plan.want_count {
        writeln!(out, "{}count: yes", pad)?;
    }

    for child in &plan.children {
        let join = &child.join;
        writeln!(
            out, "{}+ {} -> {} on {}.{} = {}.{}{}",
            pad, join.relationship, join.target, join.source, join.source_field, join.target, join.target_field,
            if join.many { " (many)" } else { "" }
        )?;
        write_plan(out, &child.plan, indent + 1)?;
    }
    Ok(())
}

fn write_row(out: &mut String, row: &Row, indent: usize) -> Result<()> {
    let pad = "  ".repeat(indent);
    let cells: Vec<String> = row.values.iter()
        .map(|(field, value)| format!("{}={}", field, value))
        .collect();
    writeln!(out, "{}{{{}}}", pad, cells.join(", "))?;

    for (name, expansion) in &row.expanded {
        match expansion.count {
            Some(count) => writeln!(out, "{}  {} ({} total):", pad, name, count)?,
            None => writeln!(out, "{}  {}:", pad, name)?,
        }
        for child in &expansion.rows {
            write_row(out, child, indent + 2)?;
        }
    }
    Ok(())
}

impl Formatter for TextFormatter {
    fn format_request(&self, request: &RequestDescriptor) -> Result<String> {
        let mut out = String::new();
        writeln!(out, "{} {}", self.heading("path"), request.path)?;
        for segment in request.path.segments() {
            match &segment.key {
                Some(key) => writeln!(out, "  {} key {}", segment.name, key)?,
                None => writeln!(out, "  {}", segment.name)?,
            }
        }
        write_options(&mut out, &request.options, 0)?;
        Ok(out.trim_end().to_string())
    }

    fn format_plan(&self, plan: &QueryPlan) -> Result<String> {
        let mut out = String::new();
        let shape = if plan.single { "single" } else { "collection" };
        writeln!(out, "{} [{}]", self.heading(&plan.entity), shape)?;
        for step in &plan.scope {
            match &step.predicate {
                Some(predicate) => writeln!(out, "  via {} where {}", step.entity, predicate)?,
                None => writeln!(out, "  via {}", step.entity)?,
            }
        }
        write_plan(&mut out, plan, 1)?;
        Ok(out.trim_end().to_string())
    }

    fn format_result(&self, result: &QueryResult, next_link: Option<&str>) -> Result<String> {
        let mut out = String::new();
        for row in &result.rows {
            write_row(&mut out, row, 0)?;
        }
        let summary = match result.count {
            Some(count) => format!("{} row(s) of {}", result.rows.len(), count),
            None => format!("{} row(s)", result.rows.len()),
        };
        writeln!(out, "{}", self.heading(&summary))?;
        if let Some(link) = next_link {
            writeln!(out, "next: {}", link)?;
        }
        Ok(out.trim_end().to_string())
    }

    fn format_sets(&self, sets: &[(String, String)]) -> Result<String> {
        let lines: Vec<String> = sets.iter()
            .map(|(name, description)| format!("{}  {}", self.heading(name), description))
            .collect();
        Ok(lines.join("\n"))
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
