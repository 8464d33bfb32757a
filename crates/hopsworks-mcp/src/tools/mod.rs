//! MCP tool implementations for Hopsworks.
//!
//! Each sub-module owns one capability and registers its own tool router on
//! [`HopsworksMcpServer`]; [`HopsworksMcpServer::create_tool_router`] merges
//! them. Tool methods delegate to free `*_impl` functions that take the
//! client and the parameters, so tests can call them directly.

mod auth;
mod datasets;
mod environments;
mod executions;
mod expectations;
mod external_feature_groups;
mod feature_groups;
mod feature_store;
mod feature_views;
mod features;
mod flink;
mod git;
mod jobs;
mod kafka;
mod model_registry;
mod model_serving;
mod opensearch;
mod projects;
mod queries;
mod secrets;
mod spine_groups;
mod transformation_functions;

use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::model::{CallToolResult, Content};
use serde_json::Value;
use std::time::Duration;

/// Default wait for `await_termination` style parameters.
pub(crate) const DEFAULT_AWAIT_SECS: u64 = 600;

/// How often await loops poll Hopsworks.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(3);

impl HopsworksMcpServer {
    pub(crate) fn create_tool_router() -> ToolRouter<Self> {
        Self::auth_router()
            + Self::projects_router()
            + Self::datasets_router()
            + Self::feature_store_router()
            + Self::feature_groups_router()
            + Self::external_feature_groups_router()
            + Self::spine_groups_router()
            + Self::features_router()
            + Self::expectations_router()
            + Self::queries_router()
            + Self::feature_views_router()
            + Self::transformation_functions_router()
            + Self::model_registry_router()
            + Self::model_serving_router()
            + Self::jobs_router()
            + Self::executions_router()
            + Self::flink_router()
            + Self::git_router()
            + Self::kafka_router()
            + Self::opensearch_router()
            + Self::secrets_router()
            + Self::environments_router()
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

pub(crate) fn success_text(text: String) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text)])
}

pub(crate) fn error_text(text: String) -> CallToolResult {
    CallToolResult::error(vec![Content::text(text)])
}

/// Pretty-printed JSON result.
pub(crate) fn json_result(value: &Value) -> CallToolResult {
    success_text(serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()))
}

pub(crate) fn from_result(result: Result<Value, HopsworksError>) -> CallToolResult {
    match result {
        Ok(value) => json_result(&value),
        Err(e) => e.into_tool_result(),
    }
}

/// `{"name": .., "status": ..}` acknowledgement.
pub(crate) fn status_result(name: &str, status: &str) -> CallToolResult {
    json_result(&serde_json::json!({ "name": name, "status": status }))
}

/// Parse an ISO-8601 timestamp. Times without an offset are UTC; a bare
/// date is midnight UTC.
pub(crate) fn parse_datetime(input: &str) -> Result<DateTime<Utc>, HopsworksError> {
    let input = input.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(input) {
        return Ok(t.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(t) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(t.and_utc());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(d.and_time(NaiveTime::MIN).and_utc());
    }
    Err(HopsworksError::InvalidArgument(format!(
        "invalid timestamp {:?}; expected ISO-8601 such as 2024-01-31T12:00:00",
        input
    )))
}

/// Hopsworks timestamps are epoch milliseconds; render them as RFC 3339.
pub(crate) fn format_millis(value: &Value) -> Value {
    value
        .as_i64()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|t| Value::String(t.to_rfc3339()))
        .unwrap_or_else(|| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_tool_is_registered_once() {
        let router = HopsworksMcpServer::create_tool_router();
        let tools = router.list_all();
        let mut names: Vec<String> = tools.iter().map(|t| t.name.to_string()).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total, "duplicate tool names");
        assert_eq!(total, 135);
        for expected in [
            "login",
            "list_files",
            "create_feature_group",
            "get_batch_query",
            "add_column_expectation",
            "create_external_feature_group",
            "get_or_create_spine_group",
            "search_features",
            "time_travel_query",
            "create_transformation_function",
            "compute_training_dataset_statistics",
            "deploy_model",
            "schedule_job",
            "run_job",
            "submit_flink_job",
            "clone_repo",
            "create_schema",
            "get_project_index",
            "get_secret_value",
            "install_requirements",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing tool {}", expected);
        }
    }

    #[test]
    fn format_millis_renders_rfc3339() {
        assert_eq!(format_millis(&json!(0)), json!("1970-01-01T00:00:00+00:00"));
        assert_eq!(format_millis(&json!("already")), json!("already"));
        assert_eq!(format_millis(&Value::Null), Value::Null);
    }

    #[test]
    fn parses_iso_timestamps() {
        let utc = parse_datetime("2024-03-01T10:00:00Z").unwrap();
        assert_eq!(utc.timestamp(), 1709287200);
        assert_eq!(parse_datetime("2024-03-01T10:00:00").unwrap(), utc);
        assert_eq!(parse_datetime("2024-03-01 10:00").unwrap(), utc);
        assert_eq!(
            parse_datetime("2024-03-01T12:00:00+02:00").unwrap(),
            utc
        );
        assert_eq!(parse_datetime("2024-03-01").unwrap().timestamp(), 1709251200);
        assert!(parse_datetime("next tuesday").is_err());
    }

    #[test]
    fn error_results_are_flagged() {
        let result = from_result(Err(HopsworksError::NotFound("job etl".into())));
        assert_eq!(result.is_error, Some(true));
        let ok = from_result(Ok(json!({"a": 1})));
        assert_eq!(ok.is_error, Some(false));
    }
}
