//! Parser from OpenSearch Query DSL JSON to the typed [`SearchRequest`] tree.
//!
//! ## Accepted shapes
//!
//! ```text
//! request
//!   ├─ "query"                → parse_query()
//!   ├─ "aggs" | "aggregations" → parse_aggregations()
//!   ├─ "sort"                 → parse_sort()
//!   ├─ "size"                 → u64
//!   ├─ "from"                 → only 0
//!   └─ "track_total_hits"     → ignored
//!
//! parse_query()   exactly one clause per object
//!   ├─ match     {"f": v}        | {"f": {"query": v}}
//!   ├─ term      {"f": v}        | {"f": {"value": v}}
//!   ├─ range     {"f": {"gte" | "gt" | "lte" | "lt": v, ...}}
//!   ├─ wildcard  {"f": "p*t?"}   | {"f": {"value" | "wildcard": "p*t?"}}
//!   └─ bool      {"must" | "filter" | "should" | "must_not": node | [node...]}
//! ```
//!
//! A body without any request key is itself a query node, and a bare JSON string is
//! a keyword search over `@message`. Every other shape is rejected with the JSON path
//! of the offending node; nothing is ever skipped.

use serde_json::{Map, Value};

use crate::ast::{
    Aggregation, BoolQuery, Field, Literal, MetricAggregation, MetricFunc, QueryNode, RangeBound,
    RangeOp, SearchRequest, SortClause, SortOrder, Source, TermsAggregation,
};
use crate::error::TranslateError;

const ROOT: &str = "$";
const MESSAGE_FIELD: &str = "@message";
const REQUEST_KEYS: &[&str] = &[
    "query",
    "aggs",
    "aggregations",
    "sort",
    "size",
    "from",
    "track_total_hits",
];

type ParseResult<T> = Result<T, TranslateError>;

/// Parse a full search body (or a bare query node) into a [`SearchRequest`].
pub fn parse_request(body: &Value) -> ParseResult<SearchRequest> {
    let obj = match body {
        Value::String(keyword) => {
            return Ok(SearchRequest::from_query(QueryNode::Match {
                field: Field::new(MESSAGE_FIELD),
                value: Literal::String(keyword.clone()),
            }))
        }
        Value::Object(obj) => obj,
        other => return Err(unsupported(ROOT, other, "search body must be an object")),
    };

    if obj.is_empty() {
        return Ok(SearchRequest::default());
    }
    if !obj.keys().any(|k| REQUEST_KEYS.contains(&k.as_str())) {
        return Ok(SearchRequest::from_query(parse_query_at(body, ROOT)?));
    }
    if obj.contains_key("aggs") && obj.contains_key("aggregations") {
        return Err(unsupported(ROOT, body, "both `aggs` and `aggregations` given"));
    }

    let mut request = SearchRequest::default();
    for (key, value) in obj {
        let path = child(ROOT, key);
        match key.as_str() {
            "query" => request.query = Some(parse_query_at(value, &path)?),
            "aggs" | "aggregations" => request.aggregations = parse_aggregations(value, &path)?,
            "sort" => request.sort = parse_sort(value, &path)?,
            "size" => request.size = Some(as_u64(value, &path)?),
            "from" => {
                if as_u64(value, &path)? != 0 {
                    return Err(unsupported(&path, value, "pagination offsets are not supported"));
                }
            }
            "track_total_hits" => {
                if !(value.is_boolean() || value.is_u64()) {
                    return Err(unsupported(&path, value, "expected a boolean or a number"));
                }
            }
            other => {
                return Err(unsupported(
                    &path,
                    value,
                    format!("request key `{}` has no Insights equivalent", other),
                ))
            }
        }
    }
    Ok(request)
}

/// Parse a single query node.
pub fn parse_query(node: &Value) -> ParseResult<QueryNode> {
    parse_query_at(node, ROOT)
}

fn parse_query_at(node: &Value, path: &str) -> ParseResult<QueryNode> {
    let obj = as_object(node, path)?;
    let (kind, body) = match obj.iter().next() {
        Some(clause) if obj.len() == 1 => clause,
        _ => {
            return Err(unsupported(
                path,
                node,
                format!("a query node needs exactly one clause, found {}", obj.len()),
            ))
        }
    };
    let node_path = path;
    let path = child(path, kind);

    match kind.as_str() {
        "match" => {
            let (field, value, field_path) = single_field(body, &path)?;
            let value = unwrap_option(value, &field_path, &["query"])?;
            Ok(QueryNode::Match {
                field,
                value: literal(value, &field_path)?,
            })
        }
        "term" => {
            let (field, value, field_path) = single_field(body, &path)?;
            let value = unwrap_option(value, &field_path, &["value"])?;
            Ok(QueryNode::Term {
                field,
                value: literal(value, &field_path)?,
            })
        }
        "wildcard" => {
            let (field, value, field_path) = single_field(body, &path)?;
            let value = unwrap_option(value, &field_path, &["value", "wildcard"])?;
            match value {
                Value::String(pattern) => Ok(QueryNode::Wildcard {
                    field,
                    pattern: pattern.clone(),
                }),
                other => Err(unsupported(&field_path, other, "wildcard pattern must be a string")),
            }
        }
        "range" => parse_range(body, &path),
        "bool" => parse_bool(body, &path, Source::new(node_path, node)).map(QueryNode::Bool),
        other => Err(unsupported(
            &path,
            node,
            format!("`{}` queries have no Insights equivalent", other),
        )),
    }
}

fn parse_range(body: &Value, path: &str) -> ParseResult<QueryNode> {
    let (field, bounds_value, field_path) = single_field(body, path)?;
    let bounds_obj = as_object(bounds_value, &field_path)?;

    let mut bounds = Vec::new();
    for (key, value) in bounds_obj {
        let bound_path = child(&field_path, key);
        if key == "boost" {
            continue;
        }
        let op = RangeOp::from_key(key).ok_or_else(|| {
            unsupported(&bound_path, value, format!("range option `{}` is not supported", key))
        })?;
        bounds.push(RangeBound {
            op,
            value: literal(value, &bound_path)?,
        });
    }

    if bounds.is_empty() {
        return Err(unsupported(&field_path, bounds_value, "range without any bound"));
    }
    bounds.sort_by_key(|b| b.op);
    Ok(QueryNode::Range { field, bounds })
}

fn parse_bool(body: &Value, path: &str, source: Source) -> ParseResult<BoolQuery> {
    let obj = as_object(body, path)?;
    let mut query = BoolQuery {
        source,
        ..Default::default()
    };
    let mut filter = Vec::new();

    for (key, value) in obj {
        let clause_path = child(path, key);
        match key.as_str() {
            "must" => query.must = parse_clauses(value, &clause_path)?,
            "filter" => filter = parse_clauses(value, &clause_path)?,
            "should" => query.should = parse_clauses(value, &clause_path)?,
            "must_not" => query.must_not = parse_clauses(value, &clause_path)?,
            "boost" => {}
            "minimum_should_match" => {
                let is_one = value.as_u64() == Some(1) || value.as_str() == Some("1");
                if !is_one {
                    return Err(unsupported(
                        &clause_path,
                        value,
                        "only minimum_should_match = 1 can be expressed with `or`",
                    ));
                }
            }
            other => {
                return Err(unsupported(
                    &clause_path,
                    value,
                    format!("bool clause `{}` is not supported", other),
                ))
            }
        }
    }

    // filter is must without scoring
    query.must.extend(filter);
    Ok(query)
}

fn parse_clauses(value: &Value, path: &str) -> ParseResult<Vec<QueryNode>> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_query_at(item, &index(path, i)))
            .collect(),
        _ => Ok(vec![parse_query_at(value, path)?]),
    }
}

/// Parse an `aggs` object. Sibling order follows the JSON object order.
pub fn parse_aggregations(value: &Value, path: &str) -> ParseResult<Vec<Aggregation>> {
    let obj = as_object(value, path)?;
    obj.iter()
        .map(|(name, body)| parse_aggregation(name, body, &child(path, name)))
        .collect()
}

fn parse_aggregation(name: &str, body: &Value, path: &str) -> ParseResult<Aggregation> {
    let obj = as_object(body, path)?;
    let mut kind = None;
    let mut subs = None;

    for (key, value) in obj {
        match key.as_str() {
            "aggs" | "aggregations" => {
                if subs.is_some() {
                    return Err(unsupported(path, body, "sub-aggregations given twice"));
                }
                subs = Some(parse_aggregations(value, &child(path, key))?);
            }
            _ => {
                if kind.is_some() {
                    return Err(unsupported(path, body, "an aggregation needs exactly one type"));
                }
                kind = Some((key.as_str(), value));
            }
        }
    }

    let (kind, params) = kind.ok_or_else(|| unsupported(path, body, "aggregation type missing"))?;
    let kind_path = child(path, kind);

    if let Some(func) = MetricFunc::from_key(kind) {
        if subs.is_some() {
            return Err(unsupported(path, body, "metric aggregations cannot have sub-aggregations"));
        }
        // precision_threshold only tunes the approximation, count_distinct is approximate too
        let field = agg_field(params, &kind_path, &["precision_threshold"])?;
        return Ok(Aggregation::Metric(MetricAggregation {
            name: name.to_string(),
            func,
            field,
            source: Source::new(path, body),
        }));
    }

    if kind == "terms" {
        let field = agg_field(params, &kind_path, &["size"])?;
        let size = match params.get("size") {
            Some(size) => Some(as_u64(size, &child(&kind_path, "size"))?),
            None => None,
        };
        return terms_aggregation(name, field, size, subs.unwrap_or_default(), path, body);
    }

    Err(unsupported(
        &kind_path,
        params,
        format!("`{}` aggregations have no Insights stats equivalent", kind),
    ))
}

/// Folds a chain of nested `terms` aggregations into one multi-field group-by.
fn terms_aggregation(
    name: &str,
    field: Field,
    size: Option<u64>,
    subs: Vec<Aggregation>,
    path: &str,
    body: &Value,
) -> ParseResult<Aggregation> {
    let mut nested = Vec::new();
    let mut metrics = Vec::new();
    for sub in subs {
        match sub {
            Aggregation::Terms(terms) => nested.push(terms),
            Aggregation::Metric(metric) => metrics.push(metric),
        }
    }

    let mut terms = TermsAggregation {
        name: name.to_string(),
        fields: vec![field],
        size,
        metrics,
        source: Source::new(path, body),
    };

    match nested.pop() {
        None => {}
        Some(_) if !nested.is_empty() => {
            return Err(unsupported(path, body, "only one nested terms aggregation per level"))
        }
        Some(_) if !terms.metrics.is_empty() => {
            return Err(unsupported(
                path,
                body,
                "nested terms cannot be mixed with metric sub-aggregations at the same level",
            ))
        }
        Some(inner) => {
            if terms.size.is_some() || inner.size.is_some() {
                return Err(unsupported(
                    path,
                    body,
                    "per-level bucket sizes of nested terms cannot be expressed in one stats",
                ));
            }
            terms.fields.extend(inner.fields);
            terms.metrics = inner.metrics;
        }
    }
    Ok(Aggregation::Terms(terms))
}

fn agg_field(params: &Value, path: &str, allowed: &[&str]) -> ParseResult<Field> {
    let obj = as_object(params, path)?;
    for (key, value) in obj {
        if key != "field" && !allowed.contains(&key.as_str()) {
            return Err(unsupported(
                &child(path, key),
                value,
                format!("aggregation option `{}` is not supported", key),
            ));
        }
    }
    match obj.get("field") {
        Some(Value::String(field)) => Ok(Field::new(field.as_str())),
        Some(other) => Err(unsupported(&child(path, "field"), other, "field must be a string")),
        None => Err(unsupported(path, params, "aggregation needs a `field`")),
    }
}

/// Parse a `sort` value: a field name, a `{field: order}` object, or an array of them.
pub fn parse_sort(value: &Value, path: &str) -> ParseResult<Vec<SortClause>> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_sort_clause(item, &index(path, i)))
            .collect(),
        _ => Ok(vec![parse_sort_clause(value, path)?]),
    }
}

fn parse_sort_clause(value: &Value, path: &str) -> ParseResult<SortClause> {
    let (field, order) = match value {
        Value::String(field) => (Field::new(field.as_str()), SortOrder::Asc),
        Value::Object(_) => {
            let (field, order, field_path) = single_field(value, path)?;
            let order = unwrap_option(order, &field_path, &["order"])?;
            let order = match order.as_str() {
                Some("asc") => SortOrder::Asc,
                Some("desc") => SortOrder::Desc,
                _ => return Err(unsupported(&field_path, order, "sort order must be asc or desc")),
            };
            (field, order)
        }
        other => return Err(unsupported(path, other, "sort clause must be a string or an object")),
    };

    if field.as_str().starts_with('_') {
        return Err(unsupported(
            path,
            value,
            format!("sorting on `{}` has no Insights equivalent", field.as_str()),
        ));
    }
    Ok(SortClause {
        field,
        order,
        source: Source::new(path, value),
    })
}

/// A leaf clause body: `{field: value}` with exactly one field.
fn single_field<'v>(body: &'v Value, path: &str) -> ParseResult<(Field, &'v Value, String)> {
    let obj = as_object(body, path)?;
    let (field, value) = match obj.iter().next() {
        Some(entry) if obj.len() == 1 => entry,
        _ => {
            return Err(unsupported(
                path,
                body,
                format!("expected exactly one field, found {}", obj.len()),
            ))
        }
    };
    Ok((Field::new(field.as_str()), value, child(path, field)))
}

/// Unwrap the long form `{"query": v, "boost": 2}` of a leaf value.
///
/// `boost` only changes scoring and is dropped; any other option changes matching
/// semantics and is rejected.
fn unwrap_option<'v>(value: &'v Value, path: &str, keys: &[&str]) -> ParseResult<&'v Value> {
    let Value::Object(obj) = value else {
        return Ok(value);
    };

    let mut found = None;
    for (key, inner) in obj {
        if keys.contains(&key.as_str()) {
            if found.is_some() {
                return Err(unsupported(path, value, "value given more than once"));
            }
            found = Some(inner);
        } else if key != "boost" {
            return Err(unsupported(
                &child(path, key),
                inner,
                format!("option `{}` is not supported", key),
            ));
        }
    }
    found.ok_or_else(|| unsupported(path, value, format!("expected one of {:?}", keys)))
}

fn literal(value: &Value, path: &str) -> ParseResult<Literal> {
    match value {
        Value::String(s) => Ok(Literal::String(s.clone())),
        Value::Number(n) => n
            .as_f64()
            .map(Literal::Number)
            .ok_or_else(|| unsupported(path, value, "number out of range")),
        Value::Bool(b) => Ok(Literal::Bool(*b)),
        other => Err(unsupported(path, other, "expected a string, number or boolean")),
    }
}

fn as_object<'v>(value: &'v Value, path: &str) -> ParseResult<&'v Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| unsupported(path, value, "expected an object"))
}

fn as_u64(value: &Value, path: &str) -> ParseResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| unsupported(path, value, "expected a non-negative integer"))
}

fn unsupported(path: &str, node: &Value, reason: impl Into<String>) -> TranslateError {
    TranslateError::unsupported(path, node, reason)
}

fn child(path: &str, key: &str) -> String {
    format!("{}.{}", path, key)
}

fn index(path: &str, i: usize) -> String {
    format!("{}[{}]", path, i)
}
