//! System query options
//!
//! Turns the segmented query string into typed options. `$expand` items
//! carry their own nested option set, parsed by the same routine with `;`
//! accepted as an extra separator.

use std::collections::BTreeSet;
use std::fmt;

use log::trace;
use serde::Serialize;

use crate::core::errors::{ODataError, Result};
use crate::ql::ast::{FieldRef, FilterExpression};
use crate::ql::parser::{is_expand_target, parse_filter, parse_orderby_list, parse_select_list};
use crate::ql::segmenter::{percent_decode, split_query, split_top_level, Segment};

/// Sort direction of an `$orderby` item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "asc"),
            SortDirection::Desc => write!(f, "desc"),
        }
    }
}

/// One `$orderby` item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBy {
    pub field: FieldRef,
    pub direction: SortDirection,
}

/// One `$expand` item with its nested options
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpandItem {
    pub target: String,
    pub options: QueryOptions,
}

/// Parsed system and custom query options
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOptions {
    pub filter: Option<FilterExpression>,
    /// `None` means no restriction; `*` and an empty list both map to it
    pub select: Option<Vec<String>>,
    pub orderby: Vec<OrderBy>,
    pub expand: Vec<ExpandItem>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub skiptoken: Option<String>,
    pub count: bool,
    pub search: Option<String>,
    pub format: Option<String>,
    /// Non-`$` options, kept verbatim in request order
    pub custom: Vec<(String, String)>,
}

impl QueryOptions {
    /// Parse a raw query string (the part after `?`)
    pub fn parse(query: &str) -> Result<Self> {
        let mut decoded = Vec::new();
        for segment in split_query(query)? {
            let (name, value) = segment.assignment();
            decoded.push((percent_decode(name)?, percent_decode(value)?));
        }
        Self::from_pairs(decoded.iter().map(|(name, value)| (name.trim(), value.trim())))
    }

    /// Parse the options inside `$expand=name( ... )`
    pub fn parse_nested(text: &str) -> Result<Self> {
        let segments = split_top_level(text, &[';', '&'])?;
        Self::from_pairs(segments.iter().map(Segment::assignment))
    }

    /// True when any option other than `$format` or a custom one is set
    pub fn has_parameters(&self) -> bool {
        self.filter.is_some()
            || self.select.is_some()
            || !self.orderby.is_empty()
            || !self.expand.is_empty()
            || self.top.is_some()
            || self.skip.is_some()
            || self.skiptoken.is_some()
            || self.count
            || self.search.is_some()
    }

    fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut options = QueryOptions::default();
        let mut seen = BTreeSet::new();

        for (name, value) in pairs {
            trace!("query option {} = {:?}", name, value);

            if !name.starts_with('$') {
                options.custom.push((name.to_string(), value.to_string()));
                continue;
            }
            if !seen.insert(name) {
                return Err(ODataError::parameter(name, "option given more than once"));
            }

            match name {
                "$filter" => {
                    require_value(name, value)?;
                    options.filter = Some(parse_filter(value)?);
                },
                "$select" => options.select = parse_select(value)?,
                "$orderby" => {
                    require_value(name, value)?;
                    options.orderby = parse_orderby_list(value)?;
                },
                "$expand" => {
                    require_value(name, value)?;
                    options.expand = parse_expand(value)?;
                },
                "$top" => options.top = Some(parse_count(name, value)?),
                "$skip" => options.skip = Some(parse_count(name, value)?),
                "$skiptoken" => {
                    require_value(name, value)?;
                    options.skiptoken = Some(value.to_string());
                },
                "$count" => {
                    options.count = match value {
                        "true" => true,
                        "false" => false,
                        _ => return Err(ODataError::parameter(name, "expected true or false")),
                    };
                },
                "$search" => {
                    let text = value.trim_matches('"').trim();
                    if !text.is_empty() {
                        options.search = Some(text.to_string());
                    }
                },
                "$format" => options.format = Some(value.to_string()),
                _ => return Err(ODataError::parameter(name, "unknown system query option")),
            }
        }

        Ok(options)
    }
}

fn require_value(option: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        Err(ODataError::parameter(option, "value is empty"))
    } else {
        Ok(())
    }
}

fn parse_count(option: &str, value: &str) -> Result<u64> {
    value.parse::<u64>()
        .map_err(|_| ODataError::parameter(option, format!("'{}' is not a non-negative integer", value)))
}

fn parse_select(value: &str) -> Result<Option<Vec<String>>> {
    let items = parse_select_list(value)?;
    if items.is_empty() || items.iter().any(|item| item == "*") {
        return Ok(None);
    }

    let mut seen = BTreeSet::new();
    let mut fields = Vec::new();
    for item in items {
        if seen.insert(item.clone()) {
            fields.push(item);
        }
    }
    Ok(Some(fields))
}

fn parse_expand(value: &str) -> Result<Vec<ExpandItem>> {
    let mut items = Vec::new();

    for segment in split_top_level(value, &[','])? {
        let text = segment.text;
        let (target, options) = match text.find('(') {
            Some(open) => {
                let inner = text[open + 1..].strip_suffix(')').ok_or_else(|| {
                    ODataError::parameter("$expand", format!("unexpected text after ')' in '{}'", text))
                })?;
                (text[..open].trim(), QueryOptions::parse_nested(inner)?)
            },
            None => (text, QueryOptions::default()),
        };

        if !is_expand_target(target) {
            return Err(ODataError::parameter("$expand", format!("'{}' is not a navigation property name", target)));
        }

        items.push(ExpandItem {
            target: target.to_string(),
            options,
        });
    }

    Ok(items)
}
