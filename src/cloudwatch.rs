//! [`LogsInsightsApi`] backed by the AWS SDK CloudWatch Logs client.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_cloudwatchlogs::config::Region;
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudwatchlogs::types::QueryStatus as SdkQueryStatus;
use aws_sdk_cloudwatchlogs::Client;

use crate::error::ExecuteError;
use crate::executor::{
    ExecutorConfig, LogsInsightsApi, QueryExecutor, QueryResultsPage, QueryStatistics, QueryStatus,
    StartQueryInput,
};
use crate::results::ResultField;

/// Thin wrapper over [`Client`]; cloning shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct CloudWatchLogsApi {
    client: Client,
}

impl CloudWatchLogsApi {
    /// Load credentials and settings from the environment for `region`.
    pub async fn connect(region: impl Into<String>) -> Self {
        let region = region.into();
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;
        tracing::debug!(region = %region, "cloudwatch logs client ready");
        Self::from_client(Client::new(&config))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl QueryExecutor<CloudWatchLogsApi> {
    pub async fn connect(region: &str, config: ExecutorConfig) -> Self {
        QueryExecutor::new(CloudWatchLogsApi::connect(region).await, region, config)
    }
}

#[async_trait]
impl LogsInsightsApi for CloudWatchLogsApi {
    async fn start_query(&self, input: StartQueryInput) -> Result<String, ExecuteError> {
        let output = self
            .client
            .start_query()
            .log_group_name(input.log_group)
            .start_time(input.start_time)
            .end_time(input.end_time)
            .query_string(input.query_string)
            .set_limit(input.limit)
            .send()
            .await
            .map_err(|e| service_error("StartQuery", e))?;

        output
            .query_id()
            .map(str::to_owned)
            .ok_or_else(|| ExecuteError::service("StartQuery", "response carried no query id"))
    }

    async fn get_query_results(&self, query_id: &str) -> Result<QueryResultsPage, ExecuteError> {
        let output = self
            .client
            .get_query_results()
            .query_id(query_id)
            .send()
            .await
            .map_err(|e| service_error("GetQueryResults", e))?;

        let status = output
            .status()
            .map(QueryStatus::from)
            .unwrap_or(QueryStatus::Unknown);

        let rows = output
            .results()
            .iter()
            .map(|row| {
                row.iter()
                    .filter_map(|cell| {
                        Some(ResultField::new(
                            cell.field()?,
                            cell.value().unwrap_or_default(),
                        ))
                    })
                    .collect()
            })
            .collect();

        let statistics = output.statistics().map(|s| QueryStatistics {
            records_matched: s.records_matched(),
            records_scanned: s.records_scanned(),
            bytes_scanned: s.bytes_scanned(),
        });

        Ok(QueryResultsPage {
            status,
            rows,
            statistics,
        })
    }

    async fn stop_query(&self, query_id: &str) -> Result<bool, ExecuteError> {
        let output = self
            .client
            .stop_query()
            .query_id(query_id)
            .send()
            .await
            .map_err(|e| service_error("StopQuery", e))?;
        Ok(output.success())
    }
}

impl From<&SdkQueryStatus> for QueryStatus {
    fn from(status: &SdkQueryStatus) -> Self {
        match status {
            SdkQueryStatus::Scheduled => QueryStatus::Scheduled,
            SdkQueryStatus::Running => QueryStatus::Running,
            SdkQueryStatus::Complete => QueryStatus::Complete,
            SdkQueryStatus::Failed => QueryStatus::Failed,
            SdkQueryStatus::Cancelled => QueryStatus::Cancelled,
            SdkQueryStatus::Timeout => QueryStatus::Timeout,
            _ => QueryStatus::Unknown,
        }
    }
}

fn service_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> ExecuteError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    ExecuteError::ServiceCallError {
        operation,
        code: err.code().map(str::to_owned),
        message: DisplayErrorContext(&err).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(QueryStatus::from(&SdkQueryStatus::Complete), QueryStatus::Complete);
        assert_eq!(QueryStatus::from(&SdkQueryStatus::Timeout), QueryStatus::Timeout);
        assert_eq!(QueryStatus::from(&SdkQueryStatus::Scheduled), QueryStatus::Scheduled);
        assert_eq!(
            QueryStatus::from(&SdkQueryStatus::from("SomethingNew")),
            QueryStatus::Unknown
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(QueryStatus::Complete.is_terminal());
        assert!(QueryStatus::Cancelled.is_terminal());
        assert!(!QueryStatus::Running.is_terminal());
        assert!(!QueryStatus::Unknown.is_terminal());
    }
}
