//! Benchmark operation runner: the entry point the harness calls once per iteration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cloudwatch::CloudWatchLogsApi;
use crate::error::{Error, TranslateError};
use crate::executor::{ExecutorConfig, LogsInsightsApi, QueryExecutor, QueryRequest, QueryStatistics};
use crate::insights::{InsightsQuery, TimeRange};
use crate::insights_compiler::InsightsCompiler;
use crate::parser::parse_request;
use crate::results::QueryResult;

/// Operation type handled by [`CloudWatchSearchRunner`].
pub const OPERATION_TYPE: &str = "cloudwatch-logs-search";

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_time_range_hours() -> u32 {
    24
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_limit() -> i32 {
    1000
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OperationParams {
    pub log_group: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_time_range_hours")]
    pub time_range_hours: u32,
    /// Local deadline in seconds
    #[serde(rename = "timeout", default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Row limit passed to StartQuery
    #[serde(default = "default_limit")]
    pub limit: i32,
}

impl OperationParams {
    pub fn new(log_group: impl Into<String>) -> Self {
        Self {
            log_group: log_group.into(),
            region: default_region(),
            time_range_hours: default_time_range_hours(),
            timeout_secs: default_timeout_secs(),
            limit: default_limit(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One named benchmark operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: String,
    pub operation_type: String,
    /// DSL body: a full request, a bare query node, or a keyword string
    pub body: Option<Value>,
    pub params: OperationParams,
}

impl Operation {
    /// The part of the body that the translator consumes.
    pub fn query_body(&self) -> Value {
        match &self.body {
            None => Value::Object(Default::default()),
            Some(body) => body.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeError {
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: String,
}

/// Per-iteration record: `weight`/`unit` for throughput accounting plus an
/// OpenSearch-shaped summary of what came back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationOutcome {
    pub weight: u64,
    pub unit: &'static str,
    pub took_ms: u64,
    pub timed_out: bool,
    pub hits: usize,
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<QueryStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl OperationOutcome {
    /// Record of a failed iteration, for reporting. The harness still sees the error itself.
    pub fn from_error(error: &Error, took: Duration, query: Option<String>) -> Self {
        Self {
            weight: 0,
            unit: "ops",
            took_ms: took.as_millis() as u64,
            timed_out: error.is_timeout(),
            hits: 0,
            query,
            result: None,
            statistics: None,
            error: Some(OutcomeError {
                kind: error.kind().to_string(),
                reason: error.to_string(),
            }),
        }
    }
}

/// Translates and executes `cloudwatch-logs-search` operations, keeping one
/// executor per region for reuse across sequential iterations.
pub struct CloudWatchSearchRunner<A = CloudWatchLogsApi> {
    compiler: InsightsCompiler,
    executor_config: ExecutorConfig,
    executors: HashMap<String, Arc<QueryExecutor<A>>>,
}

impl<A: LogsInsightsApi> CloudWatchSearchRunner<A> {
    pub fn new(compiler: InsightsCompiler, executor_config: ExecutorConfig) -> Self {
        Self {
            compiler,
            executor_config,
            executors: HashMap::new(),
        }
    }

    /// Register an executor for its region, replacing any existing one.
    pub fn insert_executor(&mut self, executor: QueryExecutor<A>) {
        self.executors
            .insert(executor.region().to_string(), Arc::new(executor));
    }

    pub fn executor(&self, region: &str) -> Option<Arc<QueryExecutor<A>>> {
        self.executors.get(region).cloned()
    }

    /// Translate the operation body for a window ending now.
    pub fn translate(&self, operation: &Operation) -> Result<InsightsQuery, TranslateError> {
        let request = parse_request(&operation.query_body())?;
        let time_range = TimeRange::last_hours(operation.params.time_range_hours, Utc::now());
        self.compiler.compile(&request, time_range)
    }

    /// Run one iteration on the given executor. Any error fails only this iteration.
    pub async fn run_with(
        &self,
        executor: &QueryExecutor<A>,
        operation: &Operation,
    ) -> Result<OperationOutcome, Error> {
        let started = Instant::now();
        let query = self.translate(operation)?;
        let request = QueryRequest::for_query(&query, &operation.params.log_group, operation.params.timeout())
            .with_limit(operation.params.limit);

        tracing::debug!(operation = %operation.name, query = %request.query_string, "running operation");
        let outcome = executor.execute(&request).await?;

        let took = started.elapsed();
        tracing::info!(
            operation = %operation.name,
            took_ms = took.as_millis() as u64,
            hits = outcome.result.len(),
            "operation finished"
        );

        Ok(OperationOutcome {
            weight: 1,
            unit: "ops",
            took_ms: took.as_millis() as u64,
            timed_out: false,
            hits: outcome.result.len(),
            query: Some(request.query_string),
            result: Some(outcome.result),
            statistics: outcome.statistics,
            error: None,
        })
    }
}

impl CloudWatchSearchRunner<CloudWatchLogsApi> {
    /// Executor for `region`, connecting on first use.
    pub async fn executor_for(&mut self, region: &str) -> Arc<QueryExecutor<CloudWatchLogsApi>> {
        if let Some(executor) = self.executor(region) {
            return executor;
        }
        let executor = Arc::new(QueryExecutor::<CloudWatchLogsApi>::connect(region, self.executor_config.clone()).await);
        self.executors.insert(region.to_string(), executor.clone());
        executor
    }

    pub async fn run(&mut self, operation: &Operation) -> Result<OperationOutcome, Error> {
        let executor = self.executor_for(&operation.params.region).await;
        self.run_with(&executor, operation).await
    }
}

impl Default for CloudWatchSearchRunner<CloudWatchLogsApi> {
    fn default() -> Self {
        Self::new(InsightsCompiler::new(), ExecutorConfig::default())
    }
}
