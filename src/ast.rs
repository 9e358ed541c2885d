//! Typed form of the OpenSearch Query DSL subset that can be translated.

use serde_json::Value;

/// Location of a clause in the source document, kept for errors raised after parsing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Source {
    /// JSON path, e.g. `$.query.bool.must[1]`
    pub path: String,
    pub node: Value,
}

impl Source {
    pub fn new(path: &str, node: &Value) -> Self {
        Self {
            path: path.to_string(),
            node: node.clone(),
        }
    }
}

/// A complete search request: the query tree plus the clauses that shape the result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchRequest {
    /// `None` matches every event in the time range
    pub query: Option<QueryNode>,
    pub aggregations: Vec<Aggregation>,
    pub sort: Vec<SortClause>,
    pub size: Option<u64>,
}

impl SearchRequest {
    pub fn from_query(query: QueryNode) -> Self {
        Self {
            query: Some(query),
            ..Default::default()
        }
    }
}

/// A node of the query tree. Only these five clause kinds have an Insights equivalent.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// Analyzed/substring match, e.g. `{"match": {"message": "timeout"}}`
    Match { field: Field, value: Literal },
    /// Exact match, e.g. `{"term": {"host": "service.internal"}}`
    Term { field: Field, value: Literal },
    /// Bounded comparison, e.g. `{"range": {"status": {"gte": 500}}}`
    Range { field: Field, bounds: Vec<RangeBound> },
    /// Glob match using `*` and `?`
    Wildcard { field: Field, pattern: String },
    /// Logical combinator
    Bool(BoolQuery),
}

impl QueryNode {
    /// True when the node filters nothing out.
    pub fn matches_all(&self) -> bool {
        matches!(self, QueryNode::Bool(query) if query.matches_all())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoolQuery {
    pub must: Vec<QueryNode>,
    pub should: Vec<QueryNode>,
    pub must_not: Vec<QueryNode>,
    /// The whole `{"bool": ...}` node
    pub source: Source,
}

impl BoolQuery {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }

    /// No `must` restricts, `should` is absent or has a match-all alternative, nothing is excluded.
    pub fn matches_all(&self) -> bool {
        self.must_not.is_empty()
            && self.must.iter().all(QueryNode::matches_all)
            && (self.should.is_empty() || self.should.iter().any(QueryNode::matches_all))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Field(pub String);

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One side of a range clause.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeBound {
    pub op: RangeOp,
    pub value: Literal,
}

/// Range comparison operators, declared in the order they are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RangeOp {
    Gte, // >=
    Gt,  // >
    Lte, // <=
    Lt,  // <
}

impl RangeOp {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "gte" => Some(RangeOp::Gte),
            "gt" => Some(RangeOp::Gt),
            "lte" => Some(RangeOp::Lte),
            "lt" => Some(RangeOp::Lt),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            RangeOp::Gte => ">=",
            RangeOp::Gt => ">",
            RangeOp::Lte => "<=",
            RangeOp::Lt => "<",
        }
    }
}

/// Leaf values. Dates arrive as strings in the DSL and are kept that way.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Bool(bool),
}

/// An aggregation clause, flattened from the nested DSL `aggs` object.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Metric(MetricAggregation),
    Terms(TermsAggregation),
}

/// Single-value metric over one field
#[derive(Debug, Clone, PartialEq)]
pub struct MetricAggregation {
    pub name: String,
    pub func: MetricFunc,
    pub field: Field,
    pub source: Source,
}

/// Group-by: nested `terms` aggregations contribute one field per level
#[derive(Debug, Clone, PartialEq)]
pub struct TermsAggregation {
    pub name: String,
    pub fields: Vec<Field>,
    /// Top-N buckets of a single-level terms aggregation
    pub size: Option<u64>,
    /// Metric sub-aggregations computed per bucket
    pub metrics: Vec<MetricAggregation>,
    /// The outermost `terms` aggregation of a folded chain
    pub source: Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFunc {
    Sum,
    Max,
    Min,
    Avg,
    Cardinality,
    ValueCount,
}

impl MetricFunc {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "sum" => Some(MetricFunc::Sum),
            "max" => Some(MetricFunc::Max),
            "min" => Some(MetricFunc::Min),
            "avg" => Some(MetricFunc::Avg),
            "cardinality" => Some(MetricFunc::Cardinality),
            "value_count" => Some(MetricFunc::ValueCount),
            _ => None,
        }
    }

    /// Name of the equivalent Insights `stats` function.
    pub fn insights_name(self) -> &'static str {
        match self {
            MetricFunc::Sum => "sum",
            MetricFunc::Max => "max",
            MetricFunc::Min => "min",
            MetricFunc::Avg => "avg",
            MetricFunc::Cardinality => "count_distinct",
            MetricFunc::ValueCount => "count",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortClause {
    pub field: Field,
    pub order: SortOrder,
    pub source: Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}
