//! # Query Executor
//!
//! Runs one translated query through the CloudWatch Logs Insights lifecycle:
//!
//! ```text
//! submit ──▶ StartQuery(log_group, start, end, query) ──▶ query_id
//!   │
//! poll  ──▶ GetQueryResults(query_id) every poll_interval
//!   │         ├─ Scheduled | Running | Unknown ─▶ sleep, or ClientTimeout past the deadline
//!   │         ├─ Failed | Cancelled | Timeout  ─▶ RemoteQueryFailed
//!   │         └─ Complete
//! fetch ──▶ rows normalized by the expected ResultShape
//! ```
//!
//! Nothing is retried here. Throttling and other service errors surface as
//! [`ExecuteError::ServiceCallError`] and the harness decides what to do with them.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::ExecuteError;
use crate::insights::{InsightsQuery, ResultShape, TimeRange};
use crate::results::{normalize, QueryResult, ResultRow};

/// Query status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueryStatus {
    Scheduled,
    Running,
    Complete,
    Failed,
    Cancelled,
    Timeout,
    Unknown,
}

impl QueryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueryStatus::Complete | QueryStatus::Failed | QueryStatus::Cancelled | QueryStatus::Timeout
        )
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Scan statistics returned alongside the results.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct QueryStatistics {
    pub records_matched: f64,
    pub records_scanned: f64,
    pub bytes_scanned: f64,
}

/// One GetQueryResults response.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResultsPage {
    pub status: QueryStatus,
    pub rows: Vec<ResultRow>,
    pub statistics: Option<QueryStatistics>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartQueryInput {
    pub log_group: String,
    /// Epoch seconds
    pub start_time: i64,
    /// Epoch seconds
    pub end_time: i64,
    pub query_string: String,
    pub limit: Option<i32>,
}

/// The three CloudWatch Logs Insights calls the executor needs.
#[async_trait]
pub trait LogsInsightsApi: Send + Sync {
    /// Returns the service-assigned query id.
    async fn start_query(&self, input: StartQueryInput) -> Result<String, ExecuteError>;

    async fn get_query_results(&self, query_id: &str) -> Result<QueryResultsPage, ExecuteError>;

    /// Returns whether the service accepted the stop request.
    async fn stop_query(&self, query_id: &str) -> Result<bool, ExecuteError>;
}

/// Which events a query scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryWindow {
    /// The last N hours, measured when the query is submitted
    LastHours(u32),
    Fixed(TimeRange),
}

impl QueryWindow {
    fn resolve(self) -> TimeRange {
        match self {
            QueryWindow::LastHours(hours) => TimeRange::last_hours(hours, Utc::now()),
            QueryWindow::Fixed(range) => range,
        }
    }
}

/// Everything one execution needs apart from the region, which is bound to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query_string: String,
    pub shape: ResultShape,
    pub log_group: String,
    pub window: QueryWindow,
    /// Local deadline for the whole submit/poll/fetch lifecycle
    pub timeout: Duration,
    pub limit: Option<i32>,
}

impl QueryRequest {
    pub fn new(
        query_string: impl Into<String>,
        log_group: impl Into<String>,
        time_range_hours: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            query_string: query_string.into(),
            shape: ResultShape::Records,
            log_group: log_group.into(),
            window: QueryWindow::LastHours(time_range_hours),
            timeout,
            limit: None,
        }
    }

    /// Request for a translated query, scanning the window it was translated for.
    pub fn for_query(query: &InsightsQuery, log_group: impl Into<String>, timeout: Duration) -> Self {
        Self {
            query_string: query.query_string(),
            shape: query.shape.clone(),
            log_group: log_group.into(),
            window: QueryWindow::Fixed(query.time_range),
            timeout,
            limit: None,
        }
    }

    pub fn with_shape(mut self, shape: ResultShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Runtime state of one submitted query. Never shared between invocations.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryJob {
    pub query_string: String,
    pub log_group: String,
    pub region: String,
    pub time_range: TimeRange,
    pub query_id: String,
    pub status: QueryStatus,
    pub polls: u32,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub poll_interval: Duration,
    /// Issue a best-effort StopQuery when the local deadline passes
    pub cancel_on_timeout: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            cancel_on_timeout: true,
        }
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub query_id: String,
    pub result: QueryResult,
    pub statistics: Option<QueryStatistics>,
    pub time_range: TimeRange,
    pub polls: u32,
    pub elapsed: Duration,
}

/// Executes queries against one region. The client inside is reusable across
/// sequential calls; each call owns its own [`QueryJob`].
pub struct QueryExecutor<A> {
    api: A,
    region: String,
    config: ExecutorConfig,
}

impl<A: LogsInsightsApi> QueryExecutor<A> {
    pub fn new(api: A, region: impl Into<String>, config: ExecutorConfig) -> Self {
        Self {
            api,
            region: region.into(),
            config,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Submit, poll until a terminal status or the deadline, then normalize the rows.
    pub async fn execute(&self, request: &QueryRequest) -> Result<QueryOutcome, ExecuteError> {
        let started = Instant::now();
        let deadline = started + request.timeout;

        let mut job = self.submit(request).await?;
        let page = self.poll(&mut job, deadline, request.timeout).await?;

        let result = normalize(page.rows, &request.shape)?;
        let elapsed = started.elapsed();
        tracing::info!(
            query_id = %job.query_id,
            polls = job.polls,
            hits = result.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "query complete"
        );

        Ok(QueryOutcome {
            query_id: job.query_id,
            result,
            statistics: page.statistics,
            time_range: job.time_range,
            polls: job.polls,
            elapsed,
        })
    }

    async fn submit(&self, request: &QueryRequest) -> Result<QueryJob, ExecuteError> {
        let time_range = request.window.resolve();
        let input = StartQueryInput {
            log_group: request.log_group.clone(),
            start_time: time_range.start,
            end_time: time_range.end,
            query_string: request.query_string.clone(),
            limit: request.limit,
        };

        let query_id = self.api.start_query(input).await?;
        tracing::debug!(
            query_id = %query_id,
            log_group = %request.log_group,
            region = %self.region,
            start = time_range.start,
            end = time_range.end,
            "query submitted"
        );

        Ok(QueryJob {
            query_string: request.query_string.clone(),
            log_group: request.log_group.clone(),
            region: self.region.clone(),
            time_range,
            query_id,
            status: QueryStatus::Running,
            polls: 0,
        })
    }

    async fn poll(
        &self,
        job: &mut QueryJob,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<QueryResultsPage, ExecuteError> {
        loop {
            let page = self.api.get_query_results(&job.query_id).await?;
            job.polls += 1;
            job.status = page.status;

            if page.status == QueryStatus::Complete {
                return Ok(page);
            }
            if page.status.is_terminal() {
                tracing::warn!(query_id = %job.query_id, status = %page.status, "query did not complete");
                return Err(ExecuteError::RemoteQueryFailed {
                    query_id: job.query_id.clone(),
                    status: page.status,
                    reason: format!("service reported status {}", page.status),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                self.abandon(job).await;
                return Err(ExecuteError::ClientTimeout {
                    query_id: job.query_id.clone(),
                    timeout,
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn abandon(&self, job: &QueryJob) {
        tracing::warn!(query_id = %job.query_id, polls = job.polls, "query deadline passed");
        if !self.config.cancel_on_timeout {
            return;
        }
        match self.api.stop_query(&job.query_id).await {
            Ok(stopped) => tracing::debug!(query_id = %job.query_id, stopped, "stop requested"),
            Err(e) => tracing::warn!(query_id = %job.query_id, "stop request failed: {}", e),
        }
    }
}
