//! Parser for the OData query dialect
//!
//! This module runs the pest grammar over `$filter`, resource paths,
//! `$orderby` and `$select`, and builds the typed trees directly from the
//! resulting pairs.

use pest::Parser;
use pest::error::{Error as PestError, InputLocation};
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;

use chrono::{DateTime, NaiveDate};
use uuid::Uuid;

use crate::core::errors::{ODataError, Result};
use crate::core::value::Value;
use crate::ql::ast::{ArithOp, CompareOp, FieldRef, FilterExpression, Function, LogicalOp};
use crate::ql::options::{OrderBy, SortDirection};
use crate::ql::path::{KeyPredicate, NavigationPath, PathError, PathSegment};
use crate::ql::segmenter::check_balanced;

#[derive(Parser)]
#[grammar = "ql/grammar.pest"]
pub struct ODataGrammar;

/// Parse a `$filter` expression into its AST
pub fn parse_filter(input: &str) -> Result<FilterExpression> {
    // Unbalanced parentheses and quotes are reported with their offset
    // before the grammar gets a chance to produce a vaguer error
    check_balanced(input)?;

    let mut pairs = ODataGrammar::parse(Rule::filter, input)
        .map_err(|e| filter_error(input, e))?;

    let filter = next_pair(&mut pairs, "filter")?;
    let expr = next_pair(&mut filter.into_inner(), "filter expression")?;
    build_expression(expr)
}

/// Parse a resource path such as `/users(123)/orders`
pub fn parse_resource_path(input: &str) -> Result<NavigationPath> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return Err(PathError::EmptyPath.into());
    }

    let mut pairs = ODataGrammar::parse(Rule::resource_path, trimmed)
        .map_err(|e| PathError::InvalidFormat(describe(trimmed, &e)))?;

    let path = next_pair(&mut pairs, "resource path")?;
    let mut segments = Vec::new();

    for pair in path.into_inner() {
        if pair.as_rule() == Rule::path_segment {
            segments.push(build_segment(pair)?);
        }
    }

    Ok(NavigationPath::from_segments(segments))
}

/// Parse an `$orderby` list
pub fn parse_orderby_list(input: &str) -> Result<Vec<OrderBy>> {
    let mut pairs = ODataGrammar::parse(Rule::orderby, input)
        .map_err(|e| ODataError::parameter("$orderby", describe(input, &e)))?;

    let list = next_pair(&mut pairs, "orderby")?;
    let mut items = Vec::new();

    for item in list.into_inner() {
        if item.as_rule() != Rule::orderby_item {
            continue;
        }
        let mut inner = item.into_inner();
        let field = next_pair(&mut inner, "orderby field")?;
        let direction = match inner.next() {
            Some(dir) if dir.as_str() == "desc" => SortDirection::Desc,
            _ => SortDirection::Asc,
        };
        items.push(OrderBy {
            field: FieldRef::new(field.as_str().split('/')),
            direction,
        });
    }

    Ok(items)
}

/// Parse a `$select` list; `*` yields no entry
pub fn parse_select_list(input: &str) -> Result<Vec<String>> {
    let mut pairs = ODataGrammar::parse(Rule::select, input)
        .map_err(|e| ODataError::parameter("$select", describe(input, &e)))?;

    let list = next_pair(&mut pairs, "select")?;
    Ok(list.into_inner()
        .filter(|p| p.as_rule() == Rule::select_item)
        .map(|p| p.as_str().to_string())
        .collect())
}

/// Check that an `$expand` target is a plain navigation property name
pub fn is_expand_target(input: &str) -> bool {
    ODataGrammar::parse(Rule::expand_target, input).is_ok()
}

fn next_pair<'a>(pairs: &mut Pairs<'a, Rule>, what: &str) -> Result<Pair<'a, Rule>> {
    pairs.next().ok_or_else(|| ODataError::InvalidOperation(format!("grammar produced no {}", what)))
}

fn error_offset(e: &PestError<Rule>) -> usize {
    match e.location {
        InputLocation::Pos(pos) => pos,
        InputLocation::Span((start, _)) => start,
    }
}

fn describe(input: &str, e: &PestError<Rule>) -> String {
    let offset = error_offset(e);
    format!("{} at offset {} near '{}'", e.variant.message(), offset, input.get(offset..).unwrap_or(""))
}

fn filter_error(input: &str, e: PestError<Rule>) -> ODataError {
    ODataError::FilterSyntax {
        remainder: unparsed_remainder(input, error_offset(&e)).to_string(),
        message: e.variant.message().to_string(),
    }
}

/// Text from the failure offset on; a failure at end of input backs up to
/// the last token so the remainder is never empty
fn unparsed_remainder(input: &str, offset: usize) -> &str {
    let rest = input.get(offset..).unwrap_or("").trim();
    if !rest.is_empty() {
        return rest;
    }
    let consumed = input.get(..offset).unwrap_or(input).trim_end();
    let start = consumed
        .rfind(|c: char| c.is_whitespace() || c == '(' || c == ',')
        .map_or(0, |at| at + 1);
    &consumed[start..]
}

fn build_expression(pair: Pair<Rule>) -> Result<FilterExpression> {
    match pair.as_rule() {
        Rule::or_expr => fold_logical(pair, LogicalOp::Or),
        Rule::and_expr => fold_logical(pair, LogicalOp::And),
        Rule::not_expr => {
            let mut inner = pair.into_inner();
            let first = next_pair(&mut inner, "not operand")?;
            if first.as_rule() == Rule::not_op {
                let operand = build_expression(next_pair(&mut inner, "not operand")?)?;
                Ok(FilterExpression::not(operand))
            } else {
                build_expression(first)
            }
        },
        Rule::comparison => {
            let mut inner = pair.into_inner();
            let left = build_expression(next_pair(&mut inner, "comparison operand")?)?;
            match inner.next() {
                Some(op) => {
                    let op = CompareOp::from_keyword(op.as_str()).ok_or_else(|| {
                        ODataError::InvalidOperation(format!("unknown comparison {}", op.as_str()))
                    })?;
                    let right = build_expression(next_pair(&mut inner, "comparison operand")?)?;
                    Ok(FilterExpression::compare(op, left, right))
                },
                None => Ok(left),
            }
        },
        Rule::additive | Rule::multiplicative => fold_arith(pair),
        Rule::function_call => build_call(pair),
        Rule::field_path => Ok(FilterExpression::Field(FieldRef::new(pair.as_str().split('/')))),
        Rule::null_literal
        | Rule::boolean_literal
        | Rule::guid_literal
        | Rule::datetime_literal
        | Rule::date_literal
        | Rule::number_literal
        | Rule::string_literal => {
            let text = pair.as_str().to_string();
            build_literal(pair)
                .map(FilterExpression::Literal)
                .map_err(|message| ODataError::FilterSyntax { remainder: text, message })
        },
        other => Err(ODataError::InvalidOperation(format!("unexpected filter rule {:?}", other))),
    }
}

/// Fold `x op y op z` into a left-leaning chain
fn fold_logical(pair: Pair<Rule>, op: LogicalOp) -> Result<FilterExpression> {
    let mut inner = pair.into_inner();
    let mut acc = build_expression(next_pair(&mut inner, "logical operand")?)?;

    while inner.next().is_some() {
        let right = build_expression(next_pair(&mut inner, "logical operand")?)?;
        acc = FilterExpression::Logical {
            op,
            left: Box::new(acc),
            right: Some(Box::new(right)),
        };
    }

    Ok(acc)
}

fn fold_arith(pair: Pair<Rule>) -> Result<FilterExpression> {
    let mut inner = pair.into_inner();
    let mut acc = build_expression(next_pair(&mut inner, "arithmetic operand")?)?;

    while let Some(op) = inner.next() {
        let op = ArithOp::from_keyword(op.as_str()).ok_or_else(|| {
            ODataError::InvalidOperation(format!("unknown arithmetic operator {}", op.as_str()))
        })?;
        let right = build_expression(next_pair(&mut inner, "arithmetic operand")?)?;
        acc = FilterExpression::arith(op, acc, right);
    }

    Ok(acc)
}

fn build_call(pair: Pair<Rule>) -> Result<FilterExpression> {
    let mut inner = pair.into_inner();
    let name = next_pair(&mut inner, "function name")?.as_str().to_string();

    let function = Function::from_name(&name)
        .ok_or_else(|| ODataError::UnsupportedFunction(name.clone()))?;

    let args = inner.map(build_expression).collect::<Result<Vec<_>>>()?;

    if args.len() != function.arity() {
        return Err(ODataError::FunctionArity {
            name,
            expected: function.arity(),
            found: args.len(),
        });
    }

    Ok(FilterExpression::call(function, args))
}

/// Coerce a literal token to its typed value
fn build_literal(pair: Pair<Rule>) -> std::result::Result<Value, String> {
    let text = pair.as_str();
    match pair.as_rule() {
        Rule::null_literal => Ok(Value::Null),
        Rule::boolean_literal => Ok(Value::Boolean(text == "true")),
        Rule::guid_literal => Uuid::parse_str(text)
            .map(Value::Guid)
            .map_err(|e| format!("invalid guid literal: {}", e)),
        Rule::datetime_literal => parse_datetime(text).map(Value::DateTime),
        Rule::date_literal => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|e| format!("invalid date literal: {}", e)),
        Rule::number_literal => {
            if text.contains(['.', 'e', 'E']) {
                text.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|e| format!("invalid number: {}", e))
            } else {
                text.parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|e| format!("integer out of range: {}", e))
            }
        },
        Rule::string_literal => {
            let content = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Value::String(content.replace("''", "'")))
        },
        other => Err(format!("unexpected literal rule {:?}", other)),
    }
}

/// Accept `YYYY-MM-DDTHH:MM[:SS[.fff]][zone]`; a missing zone means UTC
fn parse_datetime(text: &str) -> std::result::Result<DateTime<chrono::FixedOffset>, String> {
    let (date, rest) = text.split_once('T')
        .ok_or_else(|| format!("invalid datetime literal: {}", text))?;

    let zone_at = rest.find(['Z', '+', '-']).unwrap_or(rest.len());
    let (time, zone) = rest.split_at(zone_at);
    let time = if time.len() == 5 { format!("{}:00", time) } else { time.to_string() };
    let zone = if zone.is_empty() { "Z" } else { zone };

    DateTime::parse_from_rfc3339(&format!("{}T{}{}", date, time, zone))
        .map_err(|e| format!("invalid datetime literal: {}", e))
}

fn build_segment(pair: Pair<Rule>) -> Result<PathSegment> {
    let mut inner = pair.into_inner();
    let name = next_pair(&mut inner, "segment name")?.as_str().to_string();

    let key = match inner.next() {
        Some(predicate) => Some(build_key_predicate(predicate)?),
        None => None,
    };

    Ok(PathSegment { name, key })
}

fn build_key_predicate(pair: Pair<Rule>) -> Result<KeyPredicate> {
    let body = next_pair(&mut pair.into_inner(), "key predicate")?;

    match body.as_rule() {
        Rule::named_keys => {
            let mut named = Vec::new();
            for key_pair in body.into_inner() {
                let mut parts = key_pair.into_inner();
                let field = next_pair(&mut parts, "key field")?.as_str().to_string();
                let value = key_value(next_pair(&mut parts, "key value")?)?;
                if named.iter().any(|(f, _): &(String, Value)| f == &field) {
                    return Err(PathError::InvalidFormat(format!("key field {} repeated", field)).into());
                }
                named.push((field, value));
            }
            if named.len() == 1 {
                let (field, value) = named.remove(0);
                Ok(KeyPredicate::Unique(field, value))
            } else {
                Ok(KeyPredicate::Composite(named))
            }
        },
        Rule::positional_keys => {
            let mut values = body.into_inner()
                .map(key_value)
                .collect::<Result<Vec<_>>>()?;
            if values.len() == 1 {
                Ok(KeyPredicate::Scalar(values.remove(0)))
            } else {
                Ok(KeyPredicate::Positional(values))
            }
        },
        other => Err(ODataError::InvalidOperation(format!("unexpected key rule {:?}", other))),
    }
}

fn key_value(pair: Pair<Rule>) -> Result<Value> {
    build_literal(pair).map_err(|message| PathError::InvalidFormat(message).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> FilterExpression {
        FilterExpression::field(name.split('/'))
    }

    fn eq(name: &str, value: i64) -> FilterExpression {
        FilterExpression::compare(CompareOp::Eq, field(name), FilterExpression::literal(value))
    }

    #[test]
    fn test_simple_comparison() {
        let expr = parse_filter("name eq 'John'").unwrap();
        assert_eq!(expr, FilterExpression::compare(CompareOp::Eq, field("name"), FilterExpression::literal("John")));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse_filter("a eq 1 or b eq 2 and c eq 3").unwrap();
        assert_eq!(expr, FilterExpression::or(eq("a", 1), FilterExpression::and(eq("b", 2), eq("c", 3))));
    }

    #[test]
    fn test_left_associative_chain() {
        let expr = parse_filter("a and b and c").unwrap();
        assert_eq!(
            expr,
            FilterExpression::and(FilterExpression::and(field("a"), field("b")), field("c"))
        );
    }

    #[test]
    fn test_parentheses_override_precedence() {
        let expr = parse_filter("(a eq 1 or b eq 2) and c eq 3").unwrap();
        assert_eq!(expr, FilterExpression::and(FilterExpression::or(eq("a", 1), eq("b", 2)), eq("c", 3)));
    }

    #[test]
    fn test_not_applies_to_comparison() {
        let expr = parse_filter("not age gt 30 and active").unwrap();
        let gt = FilterExpression::compare(CompareOp::Gt, field("age"), FilterExpression::literal(30));
        assert_eq!(expr, FilterExpression::and(FilterExpression::not(gt), field("active")));
    }

    #[test]
    fn test_function_and_comparison_scenario() {
        let expr = parse_filter("age gt 25 and contains(name,'john')").unwrap();
        assert_eq!(
            expr,
            FilterExpression::and(
                FilterExpression::compare(CompareOp::Gt, field("age"), FilterExpression::literal(25)),
                FilterExpression::call(Function::Contains, vec![field("name"), FilterExpression::literal("john")]),
            )
        );
    }

    #[test]
    fn test_arithmetic_evaluated_under_comparison() {
        let expr = parse_filter("price mul 2 add 1 le 10").unwrap();
        let arith = FilterExpression::arith(
            ArithOp::Add,
            FilterExpression::arith(ArithOp::Mul, field("price"), FilterExpression::literal(2)),
            FilterExpression::literal(1),
        );
        assert_eq!(expr, FilterExpression::compare(CompareOp::Le, arith, FilterExpression::literal(10)));
    }

    #[test]
    fn test_literal_coercion() {
        let lit = |src: &str| match parse_filter(&format!("x eq {}", src)).unwrap() {
            FilterExpression::Compare { right, .. } => match *right {
                FilterExpression::Literal(v) => v,
                other => panic!("not a literal: {:?}", other),
            },
            other => panic!("not a comparison: {:?}", other),
        };

        assert_eq!(lit("'O''Neil'"), Value::from("O'Neil"));
        assert_eq!(lit("-12"), Value::Integer(-12));
        assert_eq!(lit("4.5"), Value::Float(4.5));
        assert_eq!(lit("true"), Value::Boolean(true));
        assert_eq!(lit("null"), Value::Null);
        assert_eq!(lit("2024-03-01"), Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));
        assert_eq!(
            lit("2024-03-01T10:30"),
            Value::DateTime(DateTime::parse_from_rfc3339("2024-03-01T10:30:00Z").unwrap())
        );
        assert_eq!(
            lit("2024-03-01T10:30:15+02:00"),
            Value::DateTime(DateTime::parse_from_rfc3339("2024-03-01T10:30:15+02:00").unwrap())
        );
        assert!(matches!(lit("6f9619ff-8b86-d011-b42d-00c04fc964ff"), Value::Guid(_)));
    }

    #[test]
    fn test_field_names_starting_with_keywords() {
        let expr = parse_filter("notes eq 'x' and order_count ge 2 and true_flag").unwrap();
        let refs: Vec<String> = expr.field_refs().iter().map(|r| r.to_string()).collect();
        assert_eq!(refs, vec!["notes", "order_count", "true_flag"]);
    }

    #[test]
    fn test_navigation_field_reference() {
        let expr = parse_filter("order/customer/name eq 'x'").unwrap();
        assert_eq!(expr.field_refs()[0].path, vec!["order", "customer", "name"]);
    }

    #[test]
    fn test_unknown_function() {
        let err = parse_filter("substringof('a', name)").unwrap_err();
        assert_eq!(err, ODataError::UnsupportedFunction("substringof".to_string()));
    }

    #[test]
    fn test_wrong_arity() {
        let err = parse_filter("contains(name)").unwrap_err();
        assert!(matches!(err, ODataError::FunctionArity { expected: 2, found: 1, .. }));
        assert!(parse_filter("now() gt 2024-01-01T00:00:00Z").is_ok());
    }

    #[test]
    fn test_grammar_violation_carries_remainder() {
        match parse_filter("age gt 25 and").unwrap_err() {
            ODataError::FilterSyntax { remainder, .. } => assert_eq!(remainder, "and"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_filter_remainder_is_last_token() {
        for (input, expected) in [("age gt", "gt"), ("name eq 'x' or", "or")] {
            match parse_filter(input).unwrap_err() {
                ODataError::FilterSyntax { remainder, .. } => assert_eq!(remainder, expected, "{}", input),
                other => panic!("unexpected error for {}: {:?}", input, other),
            }
        }
        assert_eq!(unparsed_remainder("age gt 25 and", 13), "and");
        assert_eq!(unparsed_remainder("age gt 25 xx", 10), "xx");
    }

    #[test]
    fn test_unbalanced_parenthesis_is_syntax_error() {
        let err = parse_filter("(age gt 25 and name eq 'x'").unwrap_err();
        assert!(matches!(err, ODataError::Syntax { offset: 0, .. }));
    }

    #[test]
    fn test_parse_is_repeatable() {
        let src = "a eq 1 or (b ne 'x' and not c)";
        assert_eq!(parse_filter(src).unwrap(), parse_filter(src).unwrap());
    }

    #[test]
    fn test_display_reparses_to_same_tree() {
        let src = "(a eq 1 or b eq 2) and not (c lt 3 and d ge 4)";
        let expr = parse_filter(src).unwrap();
        assert_eq!(parse_filter(&expr.to_string()).unwrap(), expr);
    }

    #[test]
    fn test_resource_path_with_key() {
        let path = parse_resource_path("/users(123)/orders").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.segments()[0].name, "users");
        assert_eq!(path.segments()[0].key, Some(KeyPredicate::Scalar(Value::Integer(123))));
        assert_eq!(path.segments()[1].name, "orders");
        assert!(path.segments()[1].is_collection());
    }

    #[test]
    fn test_resource_path_key_forms() {
        let path = parse_resource_path("/order_items(order_id=1,product_id=2)").unwrap();
        assert_eq!(
            path.segments()[0].key,
            Some(KeyPredicate::Composite(vec![
                ("order_id".to_string(), Value::Integer(1)),
                ("product_id".to_string(), Value::Integer(2)),
            ]))
        );

        let path = parse_resource_path("users(email='a@b.c')").unwrap();
        assert_eq!(
            path.segments()[0].key,
            Some(KeyPredicate::Unique("email".to_string(), Value::from("a@b.c")))
        );

        let path = parse_resource_path("/grid(1,2)/").unwrap();
        assert_eq!(
            path.segments()[0].key,
            Some(KeyPredicate::Positional(vec![Value::Integer(1), Value::Integer(2)]))
        );
    }

    #[test]
    fn test_resource_path_errors() {
        assert_eq!(parse_resource_path("/").unwrap_err(), ODataError::Path(PathError::EmptyPath));
        assert!(matches!(
            parse_resource_path("/users(").unwrap_err(),
            ODataError::Path(PathError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_resource_path("/users(id=1,id=2)").unwrap_err(),
            ODataError::Path(PathError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_orderby_defaults_to_ascending() {
        let items = parse_orderby_list("name, age desc,customer/city asc").unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].direction, SortDirection::Asc);
        assert_eq!(items[1].direction, SortDirection::Desc);
        assert_eq!(items[2].field.path, vec!["customer", "city"]);
        assert!(parse_orderby_list("name sideways").is_err());
    }

    #[test]
    fn test_select_list() {
        assert_eq!(parse_select_list("name, email").unwrap(), vec!["name", "email"]);
        assert!(parse_select_list("").unwrap().is_empty());
        assert!(parse_select_list("name,").is_err());
    }
}
