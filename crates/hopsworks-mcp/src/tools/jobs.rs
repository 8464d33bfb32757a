//! Job definitions and schedules.

use super::{format_millis, json_result, parse_datetime, status_result};
use crate::client::{HopsworksClient, JOB_TYPES};
use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use chrono::Utc;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct JobConfigurationParams {
    /// SPARK, PYSPARK, PYTHON, DOCKER or FLINK
    pub job_type: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct JobConfigParams {
    /// Job name
    pub name: String,
    /// Job configuration, usually a template from get_job_configuration with appPath set
    pub config: Value,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct JobNameParams {
    /// Job name
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScheduleJobParams {
    /// Job name
    pub name: String,
    /// Quartz cron expression with seconds, e.g. `0 0 * ? * * *` for hourly
    pub cron_expression: String,
    /// First time the schedule may fire (ISO-8601, UTC when no offset); now when omitted
    pub start_time: Option<String>,
    /// Time after which the schedule stops firing (ISO-8601)
    pub end_time: Option<String>,
}

#[tool_router(router = jobs_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(
        description = "Get the default configuration template for a job type: SPARK, PYSPARK, \
                       PYTHON, DOCKER or FLINK."
    )]
    async fn get_job_configuration(
        &self,
        params: Parameters<JobConfigurationParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(job_configuration_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Create a job from a configuration. An existing job with the same name is \
                       replaced."
    )]
    async fn create_job(
        &self,
        params: Parameters<JobConfigParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(match self.client.put_job(&p.name, p.config).await {
            Ok(job) => {
                let mut summary = job_summary(&job);
                summary["status"] = json!("created");
                json_result(&summary)
            }
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Replace the configuration of an existing job.")]
    async fn update_job(
        &self,
        params: Parameters<JobConfigParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(update_job_impl(&self.client, params.0).await)
    }

    #[tool(description = "Get a job's type, configuration and schedule.")]
    async fn get_job(
        &self,
        params: Parameters<JobNameParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let name = params.0.name;
        Ok(match self.client.find_job(&name).await {
            Ok(Some(job)) => {
                let mut details = job_summary(&job);
                details["config"] = job["config"].clone();
                details["exists"] = json!(true);
                json_result(&details)
            }
            Ok(None) => json_result(&json!({ "name": name, "exists": false })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "List the jobs of the current project.")]
    async fn list_jobs(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(match self.client.list_jobs().await {
            Ok(jobs) => {
                let summaries: Vec<Value> = jobs.iter().map(job_summary).collect();
                json_result(&json!({ "count": summaries.len(), "jobs": summaries }))
            }
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Delete a job and its executions.")]
    async fn delete_job(
        &self,
        params: Parameters<JobNameParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let name = params.0.name;
        Ok(match self.client.delete_job(&name).await {
            Ok(_) => status_result(&name, "deleted"),
            Err(e) if e.is_not_found() => status_result(&name, "not_found"),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(
        description = "Schedule a job with a Quartz cron expression between optional start and \
                       end times."
    )]
    async fn schedule_job(
        &self,
        params: Parameters<ScheduleJobParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(schedule_job_impl(&self.client, params.0).await)
    }

    #[tool(description = "Remove the schedule of a job.")]
    async fn unschedule_job(
        &self,
        params: Parameters<JobNameParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(schedule_change_impl(&self.client, &params.0.name, ScheduleChange::Remove).await)
    }

    #[tool(description = "Pause the schedule of a job without removing it.")]
    async fn pause_schedule(
        &self,
        params: Parameters<JobNameParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(schedule_change_impl(&self.client, &params.0.name, ScheduleChange::Pause).await)
    }

    #[tool(description = "Resume a paused job schedule.")]
    async fn resume_schedule(
        &self,
        params: Parameters<JobNameParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(schedule_change_impl(&self.client, &params.0.name, ScheduleChange::Resume).await)
    }

    #[tool(description = "Get the state and final status of a job's most recent execution.")]
    async fn get_job_state(
        &self,
        params: Parameters<JobNameParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(job_state_impl(&self.client, &params.0.name).await)
    }
}

fn schedule_summary(schedule: &Value) -> Value {
    if !schedule.is_object() {
        return Value::Null;
    }
    json!({
        "cron_expression": schedule["cronExpression"],
        "start_time": format_millis(&schedule["startDateTime"]),
        "end_time": format_millis(&schedule["endDateTime"]),
        "next_execution": format_millis(&schedule["nextExecutionDateTime"]),
        "enabled": schedule["enabled"],
    })
}

fn job_summary(job: &Value) -> Value {
    let mut summary = json!({
        "id": job["id"],
        "name": job["name"],
        "job_type": job["jobType"],
        "creator": job["creator"]["email"],
        "creation_time": format_millis(&job["creationTime"]),
    });
    if job["jobSchedule"].is_object() {
        summary["schedule"] = schedule_summary(&job["jobSchedule"]);
    }
    summary
}

async fn job_configuration_impl(
    client: &HopsworksClient,
    params: JobConfigurationParams,
) -> CallToolResult {
    let job_type = params.job_type.trim().to_uppercase();
    if !JOB_TYPES.contains(&job_type.as_str()) {
        return json_result(&json!({
            "job_type": params.job_type,
            "status": "invalid_type",
            "message": format!("Job type must be one of: {}", JOB_TYPES.join(", ")),
        }));
    }
    super::from_result(client.get_job_configuration(&job_type).await)
}

async fn update_job_impl(client: &HopsworksClient, params: JobConfigParams) -> CallToolResult {
    let JobConfigParams { name, config } = params;
    let result = async {
        if client.find_job(&name).await?.is_none() {
            return Ok(None);
        }
        client.put_job(&name, config).await.map(Some)
    }
    .await;
    match result {
        Ok(Some(job)) => json_result(&json!({
            "id": job["id"],
            "name": name,
            "status": "updated",
        })),
        Ok(None) => status_result(&name, "not_found"),
        Err(e) => e.into_tool_result(),
    }
}

/// Quartz expressions have six or seven fields, seconds first.
fn check_cron(expression: &str) -> Result<(), HopsworksError> {
    let fields = expression.split_whitespace().count();
    if (6..=7).contains(&fields) {
        Ok(())
    } else {
        Err(HopsworksError::InvalidArgument(format!(
            "cron expression {:?} has {} fields; Hopsworks expects a Quartz expression \
             with 6 or 7 fields (seconds first)",
            expression, fields
        )))
    }
}

async fn schedule_job_impl(client: &HopsworksClient, params: ScheduleJobParams) -> CallToolResult {
    let result = async {
        check_cron(&params.cron_expression)?;
        let start = match &params.start_time {
            Some(t) => parse_datetime(t)?,
            None => Utc::now(),
        };
        let end = params.end_time.as_deref().map(parse_datetime).transpose()?;
        if end.is_some_and(|end| end <= start) {
            return Err(HopsworksError::InvalidArgument(
                "end_time must be after start_time".into(),
            ));
        }
        if client.find_job(&params.name).await?.is_none() {
            return Ok(None);
        }
        let schedule = json!({
            "cronExpression": params.cron_expression.trim(),
            "startDateTime": start.timestamp_millis(),
            "endDateTime": end.map(|e| e.timestamp_millis()),
            "enabled": true,
        });
        client.create_schedule(&params.name, schedule).await.map(Some)
    }
    .await;
    match result {
        Ok(Some(schedule)) => {
            let mut summary = schedule_summary(&schedule);
            if summary.is_null() {
                summary = json!({ "cron_expression": params.cron_expression });
            }
            summary["name"] = json!(params.name);
            summary["status"] = json!("scheduled");
            json_result(&summary)
        }
        Ok(None) => status_result(&params.name, "not_found"),
        Err(e) => e.into_tool_result(),
    }
}

#[derive(Debug, Clone, Copy)]
enum ScheduleChange {
    Remove,
    Pause,
    Resume,
}

impl ScheduleChange {
    fn done(self) -> &'static str {
        match self {
            ScheduleChange::Remove => "unscheduled",
            ScheduleChange::Pause => "paused",
            ScheduleChange::Resume => "resumed",
        }
    }
}

async fn schedule_change_impl(
    client: &HopsworksClient,
    name: &str,
    change: ScheduleChange,
) -> CallToolResult {
    let job = match client.find_job(name).await {
        Ok(Some(job)) => job,
        Ok(None) => return status_result(name, "not_found"),
        Err(e) => return e.into_tool_result(),
    };
    let schedule = job["jobSchedule"].clone();
    if !schedule.is_object() {
        return status_result(name, "not_scheduled");
    }
    let result = match change {
        ScheduleChange::Remove => client.delete_schedule(name).await,
        ScheduleChange::Pause | ScheduleChange::Resume => {
            let mut updated = schedule;
            updated["enabled"] = json!(matches!(change, ScheduleChange::Resume));
            client.update_schedule(name, updated).await
        }
    };
    match result {
        Ok(_) => status_result(name, change.done()),
        Err(e) => e.into_tool_result(),
    }
}

async fn job_state_impl(client: &HopsworksClient, name: &str) -> CallToolResult {
    let result = async {
        if client.find_job(name).await?.is_none() {
            return Ok(None);
        }
        client.latest_execution(name).await.map(Some)
    }
    .await;
    match result {
        Ok(Some(Some(execution))) => json_result(&json!({
            "name": name,
            "execution_id": execution["id"],
            "state": execution["state"],
            "final_state": execution["finalStatus"],
        })),
        Ok(Some(None)) => json_result(&json!({
            "name": name,
            "state": null,
            "final_state": null,
            "message": "The job has not been executed yet",
        })),
        Ok(None) => status_result(name, "not_found"),
        Err(e) => e.into_tool_result(),
    }
}
