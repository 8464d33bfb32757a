//! Jobs, schedules and executions.

use super::{items, poll_until, segment, ApiRequest, HopsworksClient};
use crate::error::HopsworksError;
use serde_json::{json, Value};
use std::time::Duration;

/// Execution states after which nothing changes any more.
pub const TERMINAL_STATES: &[&str] = &[
    "FINISHED",
    "FAILED",
    "KILLED",
    "FRAMEWORK_FAILURE",
    "APP_MASTER_START_FAILED",
    "INITIALIZATION_FAILED",
];

/// Job types a configuration template can be fetched for.
pub const JOB_TYPES: &[&str] = &["SPARK", "PYSPARK", "PYTHON", "DOCKER", "FLINK"];

pub fn is_terminal_state(state: &str) -> bool {
    TERMINAL_STATES.contains(&state.to_ascii_uppercase().as_str())
}

impl HopsworksClient {
    async fn jobs_path(&self, suffix: &str) -> Result<String, HopsworksError> {
        let project = self.project().await?;
        Ok(if suffix.is_empty() {
            format!("project/{}/jobs", project.id)
        } else {
            format!("project/{}/jobs/{}", project.id, suffix)
        })
    }

    /// Default configuration of a job type (one of [`JOB_TYPES`]).
    pub async fn get_job_configuration(&self, job_type: &str) -> Result<Value, HopsworksError> {
        let path = self
            .jobs_path(&format!("{}/configuration", job_type.to_lowercase()))
            .await?;
        self.get(path).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<Value>, HopsworksError> {
        let path = self.jobs_path("").await?;
        let resp = self
            .execute(
                ApiRequest::get(path)
                    .query("sort_by", "submissiontime:desc")
                    .query("expand", "creator"),
            )
            .await?;
        Ok(items(&resp))
    }

    pub async fn get_job(&self, name: &str) -> Result<Value, HopsworksError> {
        let path = self.jobs_path(&segment(name)).await?;
        self.execute(ApiRequest::get(path).query("expand", "creator"))
            .await
    }

    /// `None` when the job does not exist.
    pub async fn find_job(&self, name: &str) -> Result<Option<Value>, HopsworksError> {
        match self.get_job(name).await {
            Ok(job) => Ok(Some(job)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create or replace a job. The job name is forced into the configuration.
    pub async fn put_job(&self, name: &str, mut config: Value) -> Result<Value, HopsworksError> {
        if !config.is_object() {
            return Err(HopsworksError::InvalidArgument(
                "job configuration must be a JSON object".into(),
            ));
        }
        config["appName"] = json!(name);
        let path = self.jobs_path(&segment(name)).await?;
        self.execute(ApiRequest::put(path).json(config)).await
    }

    pub async fn delete_job(&self, name: &str) -> Result<Value, HopsworksError> {
        let path = self.jobs_path(&segment(name)).await?;
        self.delete(path).await
    }

    // ─── Schedules ───────────────────────────────────────────────────

    pub async fn create_schedule(
        &self,
        name: &str,
        schedule: Value,
    ) -> Result<Value, HopsworksError> {
        let path = self.jobs_path(&format!("{}/schedule/v2", segment(name))).await?;
        self.execute(ApiRequest::post(path).json(schedule)).await
    }

    pub async fn update_schedule(
        &self,
        name: &str,
        schedule: Value,
    ) -> Result<Value, HopsworksError> {
        let path = self.jobs_path(&format!("{}/schedule/v2", segment(name))).await?;
        self.execute(ApiRequest::put(path).json(schedule)).await
    }

    pub async fn delete_schedule(&self, name: &str) -> Result<Value, HopsworksError> {
        let path = self.jobs_path(&format!("{}/schedule/v2", segment(name))).await?;
        self.delete(path).await
    }

    // ─── Executions ──────────────────────────────────────────────────

    pub async fn start_execution(
        &self,
        name: &str,
        args: Option<&str>,
    ) -> Result<Value, HopsworksError> {
        let path = self.jobs_path(&format!("{}/executions", segment(name))).await?;
        let request = ApiRequest::post(path);
        let request = match args {
            Some(a) if !a.is_empty() => request.text(a),
            _ => request,
        };
        self.execute(request).await
    }

    /// Executions of a job, most recent first.
    pub async fn list_executions(
        &self,
        name: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, HopsworksError> {
        let path = self.jobs_path(&format!("{}/executions", segment(name))).await?;
        let resp = self
            .execute(
                ApiRequest::get(path)
                    .query("sort_by", "submissiontime:desc")
                    .query("offset", offset)
                    .query("limit", limit),
            )
            .await?;
        Ok(items(&resp))
    }

    pub async fn latest_execution(&self, name: &str) -> Result<Option<Value>, HopsworksError> {
        Ok(self.list_executions(name, 0, 1).await?.into_iter().next())
    }

    pub async fn get_execution(&self, name: &str, id: i64) -> Result<Value, HopsworksError> {
        let path = self.jobs_path(&format!("{}/executions/{}", segment(name), id)).await?;
        self.get(path).await
    }

    pub async fn stop_execution(&self, name: &str, id: i64) -> Result<Value, HopsworksError> {
        let path = self
            .jobs_path(&format!("{}/executions/{}/status", segment(name), id))
            .await?;
        self.execute(ApiRequest::put(path).json(json!({ "state": "stopped" })))
            .await
    }

    pub async fn delete_execution(&self, name: &str, id: i64) -> Result<Value, HopsworksError> {
        let path = self.jobs_path(&format!("{}/executions/{}", segment(name), id)).await?;
        self.delete(path).await
    }

    /// `log_type` is `out` or `err`.
    pub async fn execution_log(
        &self,
        name: &str,
        id: i64,
        log_type: &str,
    ) -> Result<Value, HopsworksError> {
        let path = self
            .jobs_path(&format!(
                "{}/executions/{}/log/{}",
                segment(name),
                id,
                log_type
            ))
            .await?;
        self.get(path).await
    }

    /// Poll an execution until it reaches a terminal state.
    pub async fn await_execution(
        &self,
        name: &str,
        id: i64,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Value, HopsworksError> {
        poll_until(
            &format!("execution {} of job {}", id, name),
            timeout,
            interval,
            || async move {
                let execution = self.get_execution(name, id).await?;
                let state = execution["state"].as_str().unwrap_or_default();
                tracing::debug!(job = %name, execution = id, state, "Polled execution");
                Ok(is_terminal_state(state).then_some(execution))
            },
        )
        .await
    }
}
