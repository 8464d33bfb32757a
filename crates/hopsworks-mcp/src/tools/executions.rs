//! Running jobs and inspecting their executions.

use super::{format_millis, json_result, DEFAULT_AWAIT_SECS, POLL_INTERVAL};
use crate::client::{is_terminal_state, HopsworksClient};
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_EXECUTION_LIMIT: usize = 20;
const MAX_LOG_CHARS: usize = 100_000;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunJobParams {
    /// Job name
    pub job_name: String,
    /// Arguments passed to the job
    pub args: Option<String>,
    /// Wait until the execution reaches a terminal state
    pub await_termination: Option<bool>,
    /// Maximum wait in seconds (default 600)
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListExecutionsParams {
    /// Job name
    pub job_name: String,
    /// Maximum number of executions, most recent first (default 20)
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetExecutionParams {
    /// Job name
    pub job_name: String,
    /// Execution id
    pub execution_id: i64,
    /// Wait until the execution reaches a terminal state
    pub await_termination: Option<bool>,
    /// Maximum wait in seconds (default 600)
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecutionParams {
    /// Job name
    pub job_name: String,
    /// Execution id
    pub execution_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecutionLogsParams {
    /// Job name
    pub job_name: String,
    /// Execution id
    pub execution_id: i64,
    /// `out` (stdout, default) or `err` (stderr)
    pub log_type: Option<String>,
}

#[tool_router(router = executions_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(
        description = "Start an execution of a job, optionally waiting for it to finish. Returns \
                       the execution id, state and final status."
    )]
    async fn run_job(
        &self,
        params: Parameters<RunJobParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(run_job_impl(&self.client, params.0, POLL_INTERVAL).await)
    }

    #[tool(description = "List the executions of a job, most recent first.")]
    async fn list_executions(
        &self,
        params: Parameters<ListExecutionsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let limit = p.limit.unwrap_or(DEFAULT_EXECUTION_LIMIT).max(1);
        Ok(match self.client.list_executions(&p.job_name, 0, limit).await {
            Ok(executions) => {
                let summaries: Vec<Value> = executions.iter().map(execution_summary).collect();
                json_result(&json!({
                    "job_name": p.job_name,
                    "count": summaries.len(),
                    "executions": summaries,
                }))
            }
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Get the state of an execution, optionally waiting for it to finish.")]
    async fn get_execution(
        &self,
        params: Parameters<GetExecutionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(get_execution_impl(&self.client, params.0, POLL_INTERVAL).await)
    }

    #[tool(description = "Stop a running execution.")]
    async fn stop_execution(
        &self,
        params: Parameters<ExecutionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(match self.client.stop_execution(&p.job_name, p.execution_id).await {
            Ok(_) => json_result(&json!({
                "job_name": p.job_name,
                "execution_id": p.execution_id,
                "status": "stopped",
            })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Delete an execution and its logs.")]
    async fn delete_execution(
        &self,
        params: Parameters<ExecutionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(match self.client.delete_execution(&p.job_name, p.execution_id).await {
            Ok(_) => json_result(&json!({
                "job_name": p.job_name,
                "execution_id": p.execution_id,
                "status": "deleted",
            })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Get the stdout or stderr log of an execution.")]
    async fn get_execution_logs(
        &self,
        params: Parameters<ExecutionLogsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(execution_logs_impl(&self.client, params.0).await)
    }
}

pub(crate) fn execution_summary(execution: &Value) -> Value {
    let state = execution["state"].as_str().unwrap_or_default();
    json!({
        "id": execution["id"],
        "state": execution["state"],
        "final_status": execution["finalStatus"],
        "finished": is_terminal_state(state),
        "success": execution["finalStatus"].as_str().map(|s| s == "SUCCEEDED"),
        "submission_time": format_millis(&execution["submissionTime"]),
        "duration_ms": execution["duration"],
        "progress": execution["progress"],
        "args": execution["args"],
        "app_id": execution["appId"],
    })
}

fn timeout(secs: Option<u64>) -> Duration {
    Duration::from_secs(secs.unwrap_or(DEFAULT_AWAIT_SECS))
}

async fn run_job_impl(
    client: &HopsworksClient,
    params: RunJobParams,
    interval: Duration,
) -> CallToolResult {
    let execution = match client
        .start_execution(&params.job_name, params.args.as_deref())
        .await
    {
        Ok(e) => e,
        Err(e) if e.is_not_found() => {
            return json_result(&json!({
                "job_name": params.job_name,
                "status": "not_found",
                "message": e.to_string(),
            }))
        }
        Err(e) => return e.into_tool_result(),
    };
    tracing::info!(job = %params.job_name, execution = %execution["id"], "Started execution");

    let execution = if params.await_termination.unwrap_or(false) {
        let Some(id) = execution["id"].as_i64() else {
            return super::error_text(format!("Execution without id: {}", execution));
        };
        match client
            .await_execution(&params.job_name, id, timeout(params.timeout_secs), interval)
            .await
        {
            Ok(e) => e,
            Err(e) => return e.into_tool_result(),
        }
    } else {
        execution
    };
    let mut summary = execution_summary(&execution);
    summary["job_name"] = json!(params.job_name);
    json_result(&summary)
}

async fn get_execution_impl(
    client: &HopsworksClient,
    params: GetExecutionParams,
    interval: Duration,
) -> CallToolResult {
    let result = if params.await_termination.unwrap_or(false) {
        client
            .await_execution(
                &params.job_name,
                params.execution_id,
                timeout(params.timeout_secs),
                interval,
            )
            .await
    } else {
        client
            .get_execution(&params.job_name, params.execution_id)
            .await
    };
    match result {
        Ok(execution) => {
            let mut summary = execution_summary(&execution);
            summary["job_name"] = json!(params.job_name);
            json_result(&summary)
        }
        Err(e) if e.is_not_found() => json_result(&json!({
            "job_name": params.job_name,
            "execution_id": params.execution_id,
            "status": "not_found",
        })),
        Err(e) => e.into_tool_result(),
    }
}

/// Keep the tail of long logs, where failures usually are.
fn tail(log: &str, max_chars: usize) -> (String, bool) {
    let total = log.chars().count();
    if total <= max_chars {
        return (log.to_string(), false);
    }
    (log.chars().skip(total - max_chars).collect(), true)
}

async fn execution_logs_impl(
    client: &HopsworksClient,
    params: ExecutionLogsParams,
) -> CallToolResult {
    let log_type = params.log_type.as_deref().unwrap_or("out").to_lowercase();
    let log_type = match log_type.as_str() {
        "out" | "stdout" => "out",
        "err" | "stderr" => "err",
        other => {
            return super::error_text(format!("log_type must be `out` or `err`, got {:?}", other))
        }
    };
    match client
        .execution_log(&params.job_name, params.execution_id, log_type)
        .await
    {
        Ok(resp) => {
            let (log, truncated) = tail(resp["log"].as_str().unwrap_or_default(), MAX_LOG_CHARS);
            json_result(&json!({
                "job_name": params.job_name,
                "execution_id": params.execution_id,
                "log_type": log_type,
                "truncated": truncated,
                "log": log,
            }))
        }
        Err(e) => e.into_tool_result(),
    }
}
