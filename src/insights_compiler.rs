//! Compiler that converts a DSL [`SearchRequest`] into a CloudWatch Logs Insights query.

use crate::ast::{
    Aggregation, BoolQuery, Field, Literal, MetricAggregation, QueryNode, SearchRequest,
    SortClause, SortOrder, TermsAggregation,
};
use crate::error::TranslateError;
use crate::insights::{
    format_number, render_field, CompareOp, InsightsQuery, Predicate, ResultShape, Stage,
    StatsFunction, TimeRange,
};
use serde_json::Value;

const TIMESTAMP_FIELD: &str = "@timestamp";
const MESSAGE_FIELD: &str = "@message";
const DOC_COUNT_ALIAS: &str = "doc_count";

/// Characters with a meaning inside an Insights `/regex/`.
const REGEX_META: &[char] = &[
    '\\', '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$', '/',
];

/// Configuration for Insights compilation
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Insert `match` values into the regex without escaping metacharacters.
    /// Only for workloads whose match values were written as regex fragments.
    pub verbatim_match: bool,
    /// Largest `limit` the service accepts
    pub max_limit: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            verbatim_match: false,
            max_limit: 10_000,
        }
    }
}

/// Compiler from DSL requests to Insights queries. Stateless apart from its configuration.
#[derive(Debug, Clone, Default)]
pub struct InsightsCompiler {
    config: CompilerConfig,
}

/// Referenced field names in first-reference order, without duplicates.
#[derive(Debug, Default)]
struct FieldSet(Vec<Field>);

impl FieldSet {
    fn add(&mut self, field: &Field) {
        if !self.0.contains(field) {
            self.0.push(field.clone());
        }
    }
}

impl InsightsCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// Compile a request into an ordered `fields | filter | stats | sort | limit` query.
    pub fn compile(
        &self,
        request: &SearchRequest,
        time_range: TimeRange,
    ) -> Result<InsightsQuery, TranslateError> {
        let mut referenced = FieldSet::default();
        let mut stages = Vec::new();

        let filter = match &request.query {
            Some(node) => self.compile_node(node, &mut referenced)?,
            None => None,
        };

        let (stats, shape, top_n) = self.compile_aggregations(request, &mut referenced)?;

        let sort = self.compile_sort(&request.sort, &shape, &mut referenced)?;

        // fields
        let mut fields = vec![Field::new(TIMESTAMP_FIELD)];
        fields.extend(
            referenced
                .0
                .into_iter()
                .filter(|f| f.as_str() != TIMESTAMP_FIELD),
        );
        if fields.len() == 1 {
            fields.push(Field::new(MESSAGE_FIELD));
        }
        stages.push(Stage::Fields(fields));

        if let Some(predicate) = filter {
            stages.push(Stage::Filter(predicate));
        }
        if let Some(stats) = stats {
            stages.push(stats);
        }

        match top_n {
            Some((n, size_path)) => {
                if let Some(clause) = request.sort.first() {
                    return Err(TranslateError::unsupported(
                        &clause.source.path,
                        &clause.source.node,
                        "top-N terms buckets are already ordered by count",
                    ));
                }
                stages.push(Stage::Sort(vec![(
                    DOC_COUNT_ALIAS.to_string(),
                    SortOrder::Desc,
                )]));
                stages.push(Stage::Limit(self.checked_limit(n, &size_path)?));
            }
            None => {
                if !sort.is_empty() {
                    stages.push(Stage::Sort(sort));
                }
                if shape == ResultShape::Records {
                    if let Some(size) = request.size {
                        stages.push(Stage::Limit(self.checked_limit(size, "$.size")?));
                    }
                }
            }
        }

        Ok(InsightsQuery {
            stages,
            time_range,
            shape,
        })
    }

    /// Compile a query node into a filter predicate. `None` means the node matches everything.
    fn compile_node(
        &self,
        node: &QueryNode,
        referenced: &mut FieldSet,
    ) -> Result<Option<Predicate>, TranslateError> {
        let predicate = match node {
            QueryNode::Match { field, value } => {
                referenced.add(field);
                let text = literal_text(value);
                let regex = if self.config.verbatim_match {
                    text.replace('/', "\\/")
                } else {
                    escape_regex(&text)
                };
                Predicate::Like {
                    field: field.clone(),
                    regex,
                }
            }
            QueryNode::Term { field, value } => {
                referenced.add(field);
                Predicate::Compare {
                    field: field.clone(),
                    op: CompareOp::Eq,
                    value: value.clone(),
                }
            }
            QueryNode::Range { field, bounds } => {
                referenced.add(field);
                let mut comparisons: Vec<Predicate> = bounds
                    .iter()
                    .map(|bound| Predicate::Compare {
                        field: field.clone(),
                        op: bound.op.into(),
                        value: bound.value.clone(),
                    })
                    .collect();
                if comparisons.len() == 1 {
                    comparisons.remove(0)
                } else {
                    Predicate::And(comparisons)
                }
            }
            QueryNode::Wildcard { field, pattern } => {
                referenced.add(field);
                Predicate::Like {
                    field: field.clone(),
                    regex: glob_to_regex(pattern),
                }
            }
            QueryNode::Bool(bool_query) => return self.compile_bool(bool_query, referenced),
        };
        Ok(Some(predicate))
    }

    /// `must` terms and-ed, `should` or-ed as one group, each `must_not` negated; groups and-ed.
    fn compile_bool(
        &self,
        query: &BoolQuery,
        referenced: &mut FieldSet,
    ) -> Result<Option<Predicate>, TranslateError> {
        let mut conjuncts = Vec::new();

        for node in &query.must {
            match self.compile_node(node, referenced)? {
                Some(Predicate::And(items)) => conjuncts.extend(items),
                Some(predicate) => conjuncts.push(predicate),
                None => {}
            }
        }

        if !query.should.is_empty() {
            let mut alternatives = Vec::new();
            let mut matches_all = false;
            for node in &query.should {
                match self.compile_node(node, referenced)? {
                    Some(predicate) => alternatives.push(predicate),
                    None => matches_all = true,
                }
            }
            // a match-everything alternative makes the whole group true
            if !matches_all {
                conjuncts.push(Predicate::Or(alternatives));
            }
        }

        for node in &query.must_not {
            if let QueryNode::Bool(inner) = node {
                if inner.matches_all() {
                    return Err(TranslateError::unsupported(
                        &inner.source.path,
                        &inner.source.node,
                        "must_not over a match-everything clause excludes every event",
                    ));
                }
            }
            if let Some(predicate) = self.compile_node(node, referenced)? {
                conjuncts.push(Predicate::Not(Box::new(predicate)));
            }
        }

        Ok(match conjuncts.len() {
            0 => None,
            1 => conjuncts.pop(),
            _ => Some(Predicate::And(conjuncts)),
        })
    }

    /// Returns the `stats` stage, the result shape and an optional top-N bucket count
    /// together with the path of its `size`.
    fn compile_aggregations(
        &self,
        request: &SearchRequest,
        referenced: &mut FieldSet,
    ) -> Result<(Option<Stage>, ResultShape, Option<(u64, String)>), TranslateError> {
        let aggregations = &request.aggregations;

        if aggregations.is_empty() {
            if request.size == Some(0) {
                // size 0 without aggregations only asks for the hit count
                let stats = Stage::Stats {
                    functions: vec![StatsFunction::count_all()],
                    by: Vec::new(),
                };
                return Ok((Some(stats), ResultShape::Statistics, None));
            }
            return Ok((None, ResultShape::Records, None));
        }

        if let Some(size) = request.size.filter(|s| *s > 0) {
            return Err(TranslateError::unsupported(
                "$.size",
                &Value::from(size),
                "a stats query cannot return hits alongside aggregations",
            ));
        }

        let mut terms: Vec<&TermsAggregation> = Vec::new();
        let mut metrics: Vec<&MetricAggregation> = Vec::new();
        for agg in aggregations {
            match agg {
                Aggregation::Terms(t) => terms.push(t),
                Aggregation::Metric(m) => metrics.push(m),
            }
        }

        match (terms.as_slice(), metrics.as_slice()) {
            ([], _) => {
                let functions = metrics
                    .iter()
                    .map(|m| metric_function(m, referenced))
                    .collect();
                let stats = Stage::Stats {
                    functions,
                    by: Vec::new(),
                };
                Ok((Some(stats), ResultShape::Statistics, None))
            }
            ([group], []) => {
                for field in &group.fields {
                    referenced.add(field);
                }

                let mut count = StatsFunction::count_all();
                if group.size.is_some() {
                    count = count.aliased(DOC_COUNT_ALIAS);
                }
                let mut functions = vec![count];
                functions.extend(group.metrics.iter().map(|m| metric_function(m, referenced)));

                let shape = ResultShape::Grouped {
                    by: group.fields.iter().map(|f| f.as_str().to_string()).collect(),
                };
                let stats = Stage::Stats {
                    functions,
                    by: group.fields.clone(),
                };
                let top_n = group
                    .size
                    .map(|n| (n, format!("{}.terms.size", group.source.path)));
                Ok((Some(stats), shape, top_n))
            }
            ([_], [sibling, ..]) => Err(TranslateError::unsupported(
                &sibling.source.path,
                &sibling.source.node,
                "a metric cannot share one stats command with a sibling terms aggregation",
            )),
            ([_, second, ..], _) => Err(TranslateError::unsupported(
                &second.source.path,
                &second.source.node,
                "only one group-by aggregation can be expressed per query",
            )),
        }
    }

    fn compile_sort(
        &self,
        sort: &[SortClause],
        shape: &ResultShape,
        referenced: &mut FieldSet,
    ) -> Result<Vec<(String, SortOrder)>, TranslateError> {
        let mut keys = Vec::new();
        for clause in sort {
            let sortable = match shape {
                ResultShape::Records => true,
                ResultShape::Grouped { by } => by.iter().any(|f| f == clause.field.as_str()),
                ResultShape::Statistics => false,
            };
            if !sortable {
                return Err(TranslateError::unsupported(
                    &clause.source.path,
                    &clause.source.node,
                    "stats output can only be sorted by its group-by fields",
                ));
            }
            referenced.add(&clause.field);
            keys.push((render_field(&clause.field), clause.order));
        }
        Ok(keys)
    }

    fn checked_limit(&self, n: u64, path: &str) -> Result<u64, TranslateError> {
        if n == 0 || n > self.config.max_limit {
            return Err(TranslateError::unsupported(
                path,
                &Value::from(n),
                format!("limit must be between 1 and {}", self.config.max_limit),
            ));
        }
        Ok(n)
    }
}

fn metric_function(metric: &MetricAggregation, referenced: &mut FieldSet) -> StatsFunction {
    referenced.add(&metric.field);
    StatsFunction::of(metric.func.insights_name(), metric.field.clone())
}

fn literal_text(value: &Literal) -> String {
    match value {
        Literal::String(s) => s.clone(),
        Literal::Number(n) => format_number(*n),
        Literal::Bool(b) => b.to_string(),
    }
}

/// Escape every regex metacharacter so the text matches literally.
pub fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if REGEX_META.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Convert a DSL wildcard pattern to a regex: `*` → `.*`, `?` → `.`, the rest literal.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 8);
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c if REGEX_META.contains(&c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_request;
    use serde_json::json;

    fn range() -> TimeRange {
        TimeRange::new(1_700_000_000, 1_700_086_400)
    }

    fn translate(body: Value) -> Result<InsightsQuery, TranslateError> {
        let request = parse_request(&body)?;
        InsightsCompiler::new().compile(&request, range())
    }

    fn translate_str(body: Value) -> String {
        translate(body).unwrap().query_string()
    }

    #[test]
    fn test_term_scenario() {
        assert_eq!(
            translate_str(json!({"term": {"host": "service.internal"}})),
            r#"fields @timestamp, host | filter host = "service.internal""#
        );
    }

    #[test]
    fn test_numeric_term_is_unquoted() {
        assert_eq!(
            translate_str(json!({"term": {"status": 404}})),
            "fields @timestamp, status | filter status = 404"
        );
    }

    #[test]
    fn test_wildcard_scenario() {
        let query = translate_str(json!({"wildcard": {"Hostname": "*-cell-1-*"}}));
        assert_eq!(query, "fields @timestamp, Hostname | filter Hostname like /.*-cell-1-.*/");
    }

    #[test]
    fn test_wildcard_escapes_literal_dots() {
        let query = translate_str(json!({"wildcard": {"host": "api.?.example.*"}}));
        assert!(query.ends_with(r"filter host like /api\..\.example\..*/"));
    }

    #[test]
    fn test_match_escapes_metacharacters_by_default() {
        let query = translate_str(json!({"match": {"path": "/api/v1(beta).json"}}));
        assert!(query.ends_with(r"filter path like /\/api\/v1\(beta\)\.json/"));
    }

    #[test]
    fn test_verbatim_match_keeps_regex_fragment() {
        let request = parse_request(&json!({"match": {"msg": "err.r|fail"}})).unwrap();
        let compiler = InsightsCompiler::with_config(CompilerConfig {
            verbatim_match: true,
            ..Default::default()
        });
        let query = compiler.compile(&request, range()).unwrap().query_string();
        assert_eq!(query, "fields @timestamp, msg | filter msg like /err.r|fail/");
    }

    #[test]
    fn test_range_keeps_both_bounds() {
        let query = translate(json!({"range": {"latency": {"gte": 10, "lt": 20}}})).unwrap();
        match query.filter() {
            Some(Predicate::And(items)) => assert_eq!(items.len(), 2),
            other => panic!("Expected two and-ed comparisons, got {:?}", other),
        }
        assert_eq!(
            query.query_string(),
            "fields @timestamp, latency | filter latency >= 10 and latency < 20"
        );
    }

    #[test]
    fn test_date_range_is_quoted() {
        assert_eq!(
            translate_str(json!({"range": {"day": {"lte": "2023-12-31", "gte": "2023-01-01"}}})),
            r#"fields @timestamp, day | filter day >= "2023-01-01" and day <= "2023-12-31""#
        );
    }

    #[test]
    fn test_bool_must_is_and() {
        assert_eq!(
            translate_str(json!({"bool": {"must": [{"term": {"a": 1}}, {"term": {"b": 2}}]}})),
            "fields @timestamp, a, b | filter a = 1 and b = 2"
        );
    }

    #[test]
    fn test_bool_should_is_parenthesized_or() {
        assert_eq!(
            translate_str(json!({"bool": {"should": [{"term": {"a": 1}}, {"term": {"b": 2}}]}})),
            "fields @timestamp, a, b | filter (a = 1 or b = 2)"
        );
    }

    #[test]
    fn test_bool_must_not_is_negated() {
        assert_eq!(
            translate_str(json!({"bool": {"must_not": [{"term": {"a": 1}}]}})),
            "fields @timestamp, a | filter not (a = 1)"
        );
    }

    #[test]
    fn test_bool_groups_are_combined_with_and() {
        let query = translate_str(json!({
            "bool": {
                "must": [{"match": {"level": "ERROR"}}],
                "should": [{"term": {"region": "eu"}}, {"term": {"region": "us"}}],
                "must_not": [{"range": {"status": {"lt": 500}}}, {"wildcard": {"host": "test-*"}}]
            }
        }));
        assert_eq!(
            query,
            r#"fields @timestamp, level, region, status, host | filter level like /ERROR/ and (region = "eu" or region = "us") and not (status < 500) and not (host like /test-.*/)"#
        );
    }

    #[test]
    fn test_nested_bool_keeps_precedence() {
        let query = translate_str(json!({
            "bool": {
                "should": [
                    {"bool": {"must": [{"term": {"a": 1}}, {"term": {"b": 2}}]}},
                    {"term": {"c": 3}}
                ],
                "must_not": [{"bool": {"must": [{"term": {"d": 4}}, {"term": {"e": 5}}]}}]
            }
        }));
        assert!(query.ends_with("filter ((a = 1 and b = 2) or c = 3) and not (d = 4 and e = 5)"));
    }

    #[test]
    fn test_empty_bool_has_no_filter() {
        assert_eq!(
            translate_str(json!({"bool": {}})),
            "fields @timestamp, @message"
        );
    }

    fn error_location(body: Value) -> (String, Value) {
        match translate(body) {
            Err(TranslateError::UnsupportedQueryConstruct { path, node, .. }) => (path, node),
            Ok(query) => panic!("Expected an error, got {}", query),
        }
    }

    #[test]
    fn test_must_not_match_everything_is_rejected() {
        assert!(translate(json!({"bool": {"must_not": [{"bool": {}}]}})).is_err());
    }

    #[test]
    fn test_nested_must_not_match_everything_reports_location() {
        let (path, node) = error_location(json!({
            "query": {"bool": {"should": [{"bool": {"must_not": [{"bool": {}}]}}]}}
        }));
        assert_eq!(path, "$.query.bool.should[0].bool.must_not[0]");
        assert_eq!(node, json!({"bool": {}}));
    }

    #[test]
    fn test_must_not_over_match_all_should_is_rejected() {
        let (path, node) = error_location(json!({
            "bool": {"must_not": {"bool": {"should": [{"term": {"a": 1}}, {"bool": {}}]}}}
        }));
        assert_eq!(path, "$.bool.must_not");
        assert_eq!(node, json!({"bool": {"should": [{"term": {"a": 1}}, {"bool": {}}]}}));
    }

    #[test]
    fn test_unsupported_node_produces_no_output() {
        let result = translate(json!({
            "query": {"bool": {"must": [{"term": {"a": 1}}, {"fuzzy": {"name": "jon"}}]}}
        }));
        assert!(matches!(
            result,
            Err(TranslateError::UnsupportedQueryConstruct { ref path, .. }) if path == "$.query.bool.must[1].fuzzy"
        ));
    }

    #[test]
    fn test_cardinality_scenario() {
        let query = translate(json!({
            "size": 0,
            "aggs": {"unique_clients": {"cardinality": {"field": "REMOTE_ADDR"}}}
        }))
        .unwrap();
        assert_eq!(query.shape, ResultShape::Statistics);
        assert_eq!(
            query.query_string(),
            "fields @timestamp, REMOTE_ADDR | stats count_distinct(REMOTE_ADDR)"
        );
    }

    #[test]
    fn test_sibling_metrics_share_one_stats() {
        let query = translate_str(json!({
            "size": 0,
            "query": {"term": {"service": "checkout"}},
            "aggs": {
                "max_latency": {"max": {"field": "latency"}},
                "total_bytes": {"sum": {"field": "bytes"}}
            }
        }));
        assert_eq!(
            query,
            r#"fields @timestamp, service, latency, bytes | filter service = "checkout" | stats max(latency), sum(bytes)"#
        );
    }

    #[test]
    fn test_terms_group_by() {
        let query = translate(json!({
            "size": 0,
            "aggs": {
                "by_host": {
                    "terms": {"field": "host"},
                    "aggs": {"by_status": {"terms": {"field": "status"}}}
                }
            }
        }))
        .unwrap();
        assert_eq!(
            query.shape,
            ResultShape::Grouped { by: vec!["host".to_string(), "status".to_string()] }
        );
        assert_eq!(
            query.query_string(),
            "fields @timestamp, host, status | stats count(*) by host, status"
        );
    }

    #[test]
    fn test_terms_size_becomes_top_n() {
        assert_eq!(
            translate_str(json!({
                "size": 0,
                "aggs": {"top_paths": {"terms": {"field": "path", "size": 5}}}
            })),
            "fields @timestamp, path | stats count(*) as doc_count by path | sort doc_count desc | limit 5"
        );
    }

    #[test]
    fn test_terms_with_metric_sub_aggregation() {
        assert_eq!(
            translate_str(json!({
                "aggs": {
                    "by_host": {
                        "terms": {"field": "host"},
                        "aggs": {"avg_latency": {"avg": {"field": "latency"}}}
                    }
                }
            })),
            "fields @timestamp, host, latency | stats count(*), avg(latency) by host"
        );
    }

    #[test]
    fn test_terms_with_sibling_metric_is_rejected() {
        let (path, node) = error_location(json!({
            "aggregations": {
                "by_host": {"terms": {"field": "host"}},
                "total": {"sum": {"field": "bytes"}}
            }
        }));
        assert_eq!(path, "$.aggregations.total");
        assert_eq!(node, json!({"sum": {"field": "bytes"}}));
    }

    #[test]
    fn test_second_terms_aggregation_reports_location() {
        let (path, node) = error_location(json!({
            "size": 0,
            "aggs": {
                "a_hosts": {"terms": {"field": "host"}},
                "b_paths": {"terms": {"field": "path"}}
            }
        }));
        assert_eq!(path, "$.aggs.b_paths");
        assert_eq!(node, json!({"terms": {"field": "path"}}));
    }

    #[test]
    fn test_top_n_with_sort_reports_sort_clause() {
        let (path, node) = error_location(json!({
            "size": 0,
            "aggs": {"top_hosts": {"terms": {"field": "host", "size": 3}}},
            "sort": [{"host": "asc"}]
        }));
        assert_eq!(path, "$.sort[0]");
        assert_eq!(node, json!({"host": "asc"}));
    }

    #[test]
    fn test_top_n_size_out_of_range_reports_terms_size() {
        let (path, node) = error_location(json!({
            "size": 0,
            "aggs": {"top_hosts": {"terms": {"field": "host", "size": 20_000}}}
        }));
        assert_eq!(path, "$.aggs.top_hosts.terms.size");
        assert_eq!(node, json!(20_000));
    }

    #[test]
    fn test_hits_with_aggregations_is_rejected() {
        let result = translate(json!({
            "size": 10,
            "aggs": {"total": {"sum": {"field": "bytes"}}}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_size_zero_is_count_request() {
        let query = translate(json!({"size": 0, "query": {"term": {"level": "WARN"}}})).unwrap();
        assert_eq!(query.shape, ResultShape::Statistics);
        assert_eq!(
            query.query_string(),
            r#"fields @timestamp, level | filter level = "WARN" | stats count(*)"#
        );
    }

    #[test]
    fn test_sort_and_limit() {
        assert_eq!(
            translate_str(json!({
                "query": {"match": {"level": "ERROR"}},
                "sort": [{"@timestamp": "desc"}],
                "size": 100
            })),
            "fields @timestamp, level | filter level like /ERROR/ | sort @timestamp desc | limit 100"
        );
    }

    #[test]
    fn test_limit_above_service_maximum_is_rejected() {
        assert!(translate(json!({"size": 50_000, "query": {"term": {"a": 1}}})).is_err());
    }

    #[test]
    fn test_grouped_sort_must_use_group_field() {
        let ok = translate(json!({
            "size": 0,
            "aggs": {"by_host": {"terms": {"field": "host"}}},
            "sort": [{"host": "asc"}]
        }));
        assert!(ok.is_ok());

        let (path, node) = error_location(json!({
            "size": 0,
            "aggs": {"by_host": {"terms": {"field": "host"}}},
            "sort": {"latency": "asc"}
        }));
        assert_eq!(path, "$.sort");
        assert_eq!(node, json!({"latency": "asc"}));
    }

    #[test]
    fn test_translation_is_deterministic() {
        let body = json!({
            "query": {"bool": {
                "must": [{"range": {"bytes": {"gt": 1024}}}],
                "should": [{"wildcard": {"agent": "*curl*"}}, {"match": {"path": "admin"}}]
            }},
            "sort": ["host"],
            "size": 20
        });
        let first = translate_str(body.clone());
        for _ in 0..10 {
            assert_eq!(translate_str(body.clone()), first);
        }
    }

    #[test]
    fn test_time_range_is_carried() {
        let query = translate(json!({"term": {"a": 1}})).unwrap();
        assert_eq!(query.time_range, range());
    }
}
