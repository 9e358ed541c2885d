//! Error types shared across translation, execution and the benchmark runner.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::config::ConfigError;
use crate::executor::QueryStatus;

/// Raised when a DSL document contains something with no Insights equivalent.
/// Translation never falls back to a weaker query.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslateError {
    #[error("unsupported query construct at `{path}`: {reason}")]
    UnsupportedQueryConstruct {
        /// JSON path of the offending node, e.g. `$.query.bool.must[1]`
        path: String,
        node: Value,
        reason: String,
    },
}

impl TranslateError {
    pub fn unsupported(path: &str, node: &Value, reason: impl Into<String>) -> Self {
        TranslateError::UnsupportedQueryConstruct {
            path: path.to_string(),
            node: node.clone(),
            reason: reason.into(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            TranslateError::UnsupportedQueryConstruct { path, .. } => path,
        }
    }
}

/// Failures of a single submit/poll/fetch lifecycle. None of them are retried here.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("query {query_id} still running after {timeout:?}")]
    ClientTimeout { query_id: String, timeout: Duration },

    #[error("query {query_id} ended with status {status}: {reason}")]
    RemoteQueryFailed {
        query_id: String,
        status: QueryStatus,
        reason: String,
    },

    #[error("{operation} call failed: {message}")]
    ServiceCallError {
        operation: &'static str,
        /// Service error code such as `ThrottlingException`, when one was returned
        code: Option<String>,
        message: String,
    },
}

impl ExecuteError {
    pub fn service(operation: &'static str, message: impl Into<String>) -> Self {
        ExecuteError::ServiceCallError {
            operation,
            code: None,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecuteError::ClientTimeout { .. })
    }

    /// Short name used in the error record handed back to the harness.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecuteError::ClientTimeout { .. } => "ClientTimeout",
            ExecuteError::RemoteQueryFailed { .. } => "RemoteQueryFailed",
            ExecuteError::ServiceCallError { .. } => "ServiceCallError",
        }
    }
}

/// Crate-level error returned by the benchmark runner.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Execute(#[from] ExecuteError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Translate(_) => "UnsupportedQueryConstruct",
            Error::Execute(e) => e.kind(),
            Error::Config(_) => "ConfigError",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Execute(e) if e.is_timeout())
    }
}
