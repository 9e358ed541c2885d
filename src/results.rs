//! Normalization of Insights result rows into the shapes the benchmark compares.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ExecuteError;
use crate::insights::ResultShape;

/// A `field: value` cell as returned by GetQueryResults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultField {
    pub field: String,
    pub value: String,
}

impl ResultField {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

pub type ResultRow = Vec<ResultField>;

/// Internal pointer column Insights adds to every row.
const POINTER_FIELD: &str = "@ptr";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum QueryResult {
    /// Single statistic, e.g. a `count(*)`
    Scalar { field: String, value: f64 },
    /// One row of several statistics, in column order
    Statistics(Vec<(String, f64)>),
    /// Group-by rows in the order the service returned them
    Groups(Vec<GroupRow>),
    /// Log events, `@message` JSON merged into the record
    Records(Vec<Map<String, Value>>),
}

impl QueryResult {
    /// Number of result entries, reported to the harness as hits.
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Scalar { .. } => 1,
            QueryResult::Statistics(values) => usize::from(!values.is_empty()),
            QueryResult::Groups(rows) => rows.len(),
            QueryResult::Records(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRow {
    /// Group-by field values; a field the service left out is `None`
    pub keys: Vec<(String, Option<String>)>,
    pub values: Vec<(String, f64)>,
}

/// Normalize raw rows according to the shape the translator expected.
pub fn normalize(rows: Vec<ResultRow>, shape: &ResultShape) -> Result<QueryResult, ExecuteError> {
    match shape {
        ResultShape::Records => Ok(QueryResult::Records(
            rows.into_iter().map(record_from_row).collect(),
        )),
        ResultShape::Statistics => {
            let mut rows = rows.into_iter();
            let Some(row) = rows.next() else {
                return Ok(QueryResult::Statistics(Vec::new()));
            };
            if rows.next().is_some() {
                return Err(ExecuteError::service(
                    "GetQueryResults",
                    "expected a single statistics row",
                ));
            }
            let mut values = row
                .into_iter()
                .filter(|cell| cell.field != POINTER_FIELD)
                .map(|cell| {
                    let value = parse_stat(&cell.field, &cell.value)?;
                    Ok((cell.field, value))
                })
                .collect::<Result<Vec<_>, ExecuteError>>()?;
            if values.len() == 1 {
                let (field, value) = values.remove(0);
                return Ok(QueryResult::Scalar { field, value });
            }
            Ok(QueryResult::Statistics(values))
        }
        ResultShape::Grouped { by } => rows
            .into_iter()
            .map(|row| group_from_row(row, by))
            .collect::<Result<Vec<_>, _>>()
            .map(QueryResult::Groups),
    }
}

fn group_from_row(row: ResultRow, by: &[String]) -> Result<GroupRow, ExecuteError> {
    let keys = by
        .iter()
        .map(|name| {
            let value = row
                .iter()
                .find(|cell| &cell.field == name)
                .map(|cell| cell.value.clone());
            (name.clone(), value)
        })
        .collect();

    let values = row
        .iter()
        .filter(|cell| cell.field != POINTER_FIELD && !by.contains(&cell.field))
        .map(|cell| Ok((cell.field.clone(), parse_stat(&cell.field, &cell.value)?)))
        .collect::<Result<Vec<_>, ExecuteError>>()?;

    Ok(GroupRow { keys, values })
}

fn record_from_row(row: ResultRow) -> Map<String, Value> {
    let mut record = Map::new();
    for ResultField { field, value } in row {
        match field.as_str() {
            POINTER_FIELD => {}
            "@message" => match serde_json::from_str::<Value>(&value) {
                Ok(Value::Object(parsed)) => record.extend(parsed),
                _ => {
                    record.insert("message".to_string(), Value::String(value));
                }
            },
            _ => {
                record.insert(field, Value::String(value));
            }
        }
    }
    record
}

fn parse_stat(field: &str, value: &str) -> Result<f64, ExecuteError> {
    value.trim().parse::<f64>().map_err(|_| {
        ExecuteError::service(
            "GetQueryResults",
            format!("statistic `{}` is not numeric: {:?}", field, value),
        )
    })
}
