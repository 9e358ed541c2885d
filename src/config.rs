//! Workload configuration: loads operation definitions from a JSON file.
//!
//! ```json
//! {
//!   "defaults": {"log_group": "/benchmark/http_logs", "region": "us-east-1"},
//!   "operations": [
//!     {
//!       "name": "status-500",
//!       "operation-type": "cloudwatch-logs-search",
//!       "body": {"query": {"term": {"status": 500}}},
//!       "params": {"time_range_hours": 1}
//!     }
//!   ]
//! }
//! ```
//!
//! Operation `params` override `defaults` key by key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::runner::{Operation, OperationParams};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("workload file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("cannot read workload file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse workload file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid parameters for operation `{name}`: {source}")]
    Params {
        name: String,
        source: serde_json::Error,
    },
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawWorkload {
    #[serde(default)]
    defaults: Map<String, Value>,
    operations: Vec<RawOperation>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawOperation {
    name: String,
    #[serde(rename = "operation-type", default = "default_operation_type")]
    operation_type: String,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    params: Map<String, Value>,
}

fn default_operation_type() -> String {
    crate::runner::OPERATION_TYPE.to_string()
}

/// The operations of one workload, with parameters already merged with the defaults.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    operations: Vec<Operation>,
}

impl WorkloadConfig {
    /// Load a workload from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ConfigError::NotFound(path_ref.to_path_buf()));
        }

        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;

        let raw: RawWorkload = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_ref.to_path_buf(),
            source,
        })?;

        Self::from_raw(raw)
    }

    /// Build a workload from an already parsed JSON document.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let raw: RawWorkload = serde_json::from_value(value).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawWorkload) -> Result<Self, ConfigError> {
        let mut operations = Vec::with_capacity(raw.operations.len());
        for op in raw.operations {
            let mut merged = raw.defaults.clone();
            merged.extend(op.params);
            let params: OperationParams =
                serde_json::from_value(Value::Object(merged)).map_err(|source| ConfigError::Params {
                    name: op.name.clone(),
                    source,
                })?;
            operations.push(Operation {
                name: op.name,
                operation_type: op.operation_type,
                body: op.body,
                params,
            });
        }
        Ok(Self { operations })
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Look an operation up by name.
    pub fn operation(&self, name: &str) -> Result<&Operation, ConfigError> {
        self.operations
            .iter()
            .find(|op| op.name == name)
            .ok_or_else(|| ConfigError::UnknownOperation(name.to_string()))
    }
}
