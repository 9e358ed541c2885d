//! Benchmark client that runs OpenSearch-style search bodies against
//! CloudWatch Logs Insights.
//!
//! ```text
//! DSL JSON ─parser─▶ SearchRequest ─insights_compiler─▶ InsightsQuery ─executor─▶ QueryResult
//! ```

pub mod ast;
pub mod cloudwatch;
pub mod config;
pub mod error;
pub mod executor;
pub mod insights;
pub mod insights_compiler;
pub mod parser;
pub mod results;
pub mod runner;

use serde_json::Value;

pub use error::{Error, ExecuteError, TranslateError};
pub use insights::{InsightsQuery, TimeRange};
pub use insights_compiler::{CompilerConfig, InsightsCompiler};

/// Translate an already parsed request with the default compiler settings.
pub fn translate(
    request: &ast::SearchRequest,
    time_range: TimeRange,
) -> Result<InsightsQuery, TranslateError> {
    InsightsCompiler::new().compile(request, time_range)
}

/// Parse and translate a DSL body.
pub fn translate_json(body: &Value, time_range: TimeRange) -> Result<InsightsQuery, TranslateError> {
    let request = parser::parse_request(body)?;
    translate(&request, time_range)
}
