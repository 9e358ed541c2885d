//! CloudWatch Logs Insights query model and its text rendering.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ast::{Field, Literal, RangeOp, SortOrder};

/// Inclusive query window in epoch seconds, as the StartQuery API expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// The `hours` hours leading up to `now`.
    pub fn last_hours(hours: u32, now: DateTime<Utc>) -> Self {
        let end = now.timestamp();
        Self {
            start: end - i64::from(hours) * 3600,
            end,
        }
    }

    pub fn duration_secs(&self) -> i64 {
        self.end - self.start
    }
}

/// What the rows of a finished query look like, known at translation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultShape {
    /// Raw log events
    Records,
    /// A single row of `stats` values
    Statistics,
    /// One row per group of a `stats ... by` command
    Grouped { by: Vec<String> },
}

/// Comparison operators usable inside a `filter` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gte,
    Gt,
    Lte,
    Lt,
}

impl From<RangeOp> for CompareOp {
    fn from(op: RangeOp) -> Self {
        match op {
            RangeOp::Gte => CompareOp::Gte,
            RangeOp::Gt => CompareOp::Gt,
            RangeOp::Lte => CompareOp::Lte,
            RangeOp::Lt => CompareOp::Lt,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Eq => "=",
            CompareOp::Gte => ">=",
            CompareOp::Gt => ">",
            CompareOp::Lte => "<=",
            CompareOp::Lt => "<",
        };
        f.write_str(symbol)
    }
}

/// Boolean expression of a `filter` command.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: Field,
        op: CompareOp,
        value: Literal,
    },
    /// `field like /regex/`; the regex is already escaped for the `/` delimiter
    Like { field: Field, regex: String },
    And(Vec<Predicate>),
    /// Always rendered inside parentheses
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { field, op, value } => {
                write!(f, "{} {} {}", FieldRef(field), op, LiteralRef(value))
            }
            Predicate::Like { field, regex } => write!(f, "{} like /{}/", FieldRef(field), regex),
            Predicate::And(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Predicate::Or(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" or ")?;
                    }
                    match item {
                        Predicate::And(_) => write!(f, "({})", item)?,
                        _ => write!(f, "{}", item)?,
                    }
                }
                f.write_str(")")
            }
            Predicate::Not(inner) => match inner.as_ref() {
                Predicate::Or(_) => write!(f, "not {}", inner),
                _ => write!(f, "not ({})", inner),
            },
        }
    }
}

/// A `stats` aggregation function call.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsFunction {
    pub name: &'static str,
    /// `None` renders as `*`
    pub field: Option<Field>,
    pub alias: Option<String>,
}

impl StatsFunction {
    pub fn count_all() -> Self {
        Self {
            name: "count",
            field: None,
            alias: None,
        }
    }

    pub fn of(name: &'static str, field: Field) -> Self {
        Self {
            name,
            field: Some(field),
            alias: None,
        }
    }

    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl fmt::Display for StatsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}({})", self.name, FieldRef(field))?,
            None => write!(f, "{}(*)", self.name)?,
        }
        if let Some(alias) = &self.alias {
            write!(f, " as {}", alias)?;
        }
        Ok(())
    }
}

/// One pipe-separated command of an Insights query.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Fields(Vec<Field>),
    Filter(Predicate),
    Stats {
        functions: Vec<StatsFunction>,
        by: Vec<Field>,
    },
    /// Sort keys are field names or `stats` aliases
    Sort(Vec<(String, SortOrder)>),
    Limit(u64),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fields(fields) => {
                f.write_str("fields ")?;
                write_list(f, fields.iter().map(FieldRef))
            }
            Stage::Filter(predicate) => write!(f, "filter {}", predicate),
            Stage::Stats { functions, by } => {
                f.write_str("stats ")?;
                write_list(f, functions.iter())?;
                if !by.is_empty() {
                    f.write_str(" by ")?;
                    write_list(f, by.iter().map(FieldRef))?;
                }
                Ok(())
            }
            Stage::Sort(keys) => {
                f.write_str("sort ")?;
                write_list(
                    f,
                    keys.iter()
                        .map(|(key, order)| format!("{} {}", key, order.as_str())),
                )
            }
            Stage::Limit(n) => write!(f, "limit {}", n),
        }
    }
}

/// A translated query: the ordered stages plus the window and result shape it was built for.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightsQuery {
    pub stages: Vec<Stage>,
    pub time_range: TimeRange,
    pub shape: ResultShape,
}

impl InsightsQuery {
    pub fn query_string(&self) -> String {
        self.to_string()
    }

    pub fn filter(&self) -> Option<&Predicate> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::Filter(predicate) => Some(predicate),
            _ => None,
        })
    }
}

impl fmt::Display for InsightsQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

fn write_list<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = T>,
) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// Field name as it must appear in query text.
pub fn render_field(field: &Field) -> String {
    FieldRef(field).to_string()
}

/// Field names outside `[A-Za-z0-9_.@]` must be backquoted in Insights.
struct FieldRef<'a>(&'a Field);

impl fmt::Display for FieldRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.0.as_str();
        let plain = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@'));
        if plain {
            f.write_str(name)
        } else {
            write!(f, "`{}`", name.replace('`', "``"))
        }
    }
}

struct LiteralRef<'a>(&'a Literal);

impl fmt::Display for LiteralRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Literal::String(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        _ => write!(f, "{}", c)?,
                    }
                }
                f.write_str("\"")
            }
            Literal::Number(n) => f.write_str(&format_number(*n)),
            Literal::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Integral values print without a fractional part: `200`, not `200.0`.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cmp(field: &str, op: CompareOp, value: Literal) -> Predicate {
        Predicate::Compare {
            field: Field::new(field),
            op,
            value,
        }
    }

    #[test]
    fn test_last_hours_window() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let range = TimeRange::last_hours(24, now);
        assert_eq!(range.end, now.timestamp());
        assert_eq!(range.start, now.timestamp() - 86_400);
        assert_eq!(range.duration_secs(), 86_400);
    }

    #[test]
    fn test_string_literal_is_escaped() {
        let p = cmp("msg", CompareOp::Eq, Literal::String(r#"say "hi" \o/"#.to_string()));
        assert_eq!(p.to_string(), r#"msg = "say \"hi\" \\o/""#);
    }

    #[test]
    fn test_numbers_render_without_trailing_zero() {
        assert_eq!(cmp("status", CompareOp::Gte, Literal::Number(500.0)).to_string(), "status >= 500");
        assert_eq!(cmp("ratio", CompareOp::Lt, Literal::Number(0.25)).to_string(), "ratio < 0.25");
    }

    #[test]
    fn test_or_parenthesizes_and_operands() {
        let p = Predicate::Or(vec![
            Predicate::And(vec![
                cmp("a", CompareOp::Gte, Literal::Number(1.0)),
                cmp("a", CompareOp::Lt, Literal::Number(2.0)),
            ]),
            cmp("b", CompareOp::Eq, Literal::Bool(true)),
        ]);
        assert_eq!(p.to_string(), "((a >= 1 and a < 2) or b = true)");
    }

    #[test]
    fn test_not_of_or_has_single_parentheses() {
        let p = Predicate::Not(Box::new(Predicate::Or(vec![
            cmp("a", CompareOp::Eq, Literal::Number(1.0)),
            cmp("b", CompareOp::Eq, Literal::Number(2.0)),
        ])));
        assert_eq!(p.to_string(), "not (a = 1 or b = 2)");
    }

    #[test]
    fn test_unusual_field_names_are_backquoted() {
        let stage = Stage::Fields(vec![Field::new("@timestamp"), Field::new("user-agent")]);
        assert_eq!(stage.to_string(), "fields @timestamp, `user-agent`");
    }

    #[test]
    fn test_stats_and_sort_rendering() {
        let stats = Stage::Stats {
            functions: vec![
                StatsFunction::count_all().aliased("doc_count"),
                StatsFunction::of("sum", Field::new("bytes")),
            ],
            by: vec![Field::new("host"), Field::new("status")],
        };
        assert_eq!(stats.to_string(), "stats count(*) as doc_count, sum(bytes) by host, status");

        let sort = Stage::Sort(vec![
            ("@timestamp".to_string(), SortOrder::Desc),
            ("host".to_string(), SortOrder::Asc),
        ]);
        assert_eq!(sort.to_string(), "sort @timestamp desc, host asc");
    }
}
