//! Flink clusters: FLINK jobs whose running execution exposes a Flink REST
//! master through the Hopsworks proxy.

use super::{is_terminal_state, poll_until, segment, ApiRequest, HopsworksClient};
use crate::error::HopsworksError;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

/// Overlay the keys of `overrides` on `base`.
pub(crate) fn merge_config(base: &mut Value, overrides: &Value) {
    if let (Some(base), Some(overrides)) = (base.as_object_mut(), overrides.as_object()) {
        for (k, v) in overrides {
            base.insert(k.clone(), v.clone());
        }
    }
}

impl HopsworksClient {
    /// Create or update the FLINK job backing a cluster. `overrides` are
    /// applied on top of the default Flink configuration.
    pub async fn setup_flink_cluster(
        &self,
        name: &str,
        overrides: Option<&Value>,
    ) -> Result<Value, HopsworksError> {
        let mut config = self.get_job_configuration("FLINK").await?;
        if let Some(overrides) = overrides {
            merge_config(&mut config, overrides);
        }
        self.put_job(name, config).await
    }

    /// The execution currently running the cluster.
    pub async fn running_flink_execution(&self, name: &str) -> Result<Value, HopsworksError> {
        let execution = self.latest_execution(name).await?.ok_or_else(|| {
            HopsworksError::InvalidArgument(format!(
                "Flink cluster {} has never been started",
                name
            ))
        })?;
        if execution["state"] != "RUNNING" {
            return Err(HopsworksError::InvalidArgument(format!(
                "Flink cluster {} is not running (state {})",
                name,
                execution["state"].as_str().unwrap_or("unknown")
            )));
        }
        Ok(execution)
    }

    async fn flink_app_id(&self, cluster: &str) -> Result<String, HopsworksError> {
        let execution = self.running_flink_execution(cluster).await?;
        execution["appId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                HopsworksError::Other(format!("cluster {} has no application id yet", cluster))
            })
    }

    /// Start a cluster and wait until its execution is RUNNING.
    pub async fn start_flink_cluster(
        &self,
        name: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Value, HopsworksError> {
        let execution = self.start_execution(name, None).await?;
        let id = execution["id"]
            .as_i64()
            .ok_or_else(|| HopsworksError::Other(format!("execution without id: {}", execution)))?;
        poll_until(
            &format!("start of Flink cluster {}", name),
            timeout,
            interval,
            || async move {
                let execution = self.get_execution(name, id).await?;
                let state = execution["state"].as_str().unwrap_or_default();
                if state == "RUNNING" {
                    return Ok(Some(execution));
                }
                if is_terminal_state(state) {
                    return Err(HopsworksError::Other(format!(
                        "Flink cluster {} stopped while starting (state {})",
                        name, state
                    )));
                }
                Ok(None)
            },
        )
        .await
    }

    pub async fn stop_flink_cluster(&self, name: &str) -> Result<Value, HopsworksError> {
        let execution = self.running_flink_execution(name).await?;
        let id = execution["id"]
            .as_i64()
            .ok_or_else(|| HopsworksError::Other(format!("execution without id: {}", execution)))?;
        self.stop_execution(name, id).await
    }

    // ─── Flink REST master ───────────────────────────────────────────

    pub async fn list_flink_jars(&self, cluster: &str) -> Result<Value, HopsworksError> {
        let app_id = self.flink_app_id(cluster).await?;
        self.execute(ApiRequest::get("jars").flink_master(&app_id))
            .await
    }

    pub async fn upload_flink_jar(
        &self,
        cluster: &str,
        jar: &Path,
    ) -> Result<Value, HopsworksError> {
        let app_id = self.flink_app_id(cluster).await?;
        let file_name = jar
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "job.jar".into());
        let file = tokio::fs::File::open(jar).await?;
        let length = file.metadata().await?.len();
        let part = reqwest::multipart::Part::stream_with_length(file, length)
            .file_name(file_name)
            .mime_str("application/x-java-archive")
            .map_err(|e| HopsworksError::Other(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("jarfile", part);
        self.execute(
            ApiRequest::post("jars/upload")
                .multipart(form)
                .flink_master(&app_id),
        )
        .await
    }

    pub async fn submit_flink_job(
        &self,
        cluster: &str,
        jar_id: &str,
        main_class: &str,
        args: Option<&str>,
    ) -> Result<Value, HopsworksError> {
        let app_id = self.flink_app_id(cluster).await?;
        self.execute(
            ApiRequest::post(format!("jars/{}/run", segment(jar_id)))
                .json(json!({
                    "entryClass": main_class,
                    "programArgs": args.unwrap_or_default(),
                }))
                .flink_master(&app_id),
        )
        .await
    }

    pub async fn list_flink_jobs(&self, cluster: &str) -> Result<Value, HopsworksError> {
        let app_id = self.flink_app_id(cluster).await?;
        self.execute(ApiRequest::get("jobs/overview").flink_master(&app_id))
            .await
    }

    pub async fn get_flink_job(
        &self,
        cluster: &str,
        job_id: &str,
    ) -> Result<Value, HopsworksError> {
        let app_id = self.flink_app_id(cluster).await?;
        self.execute(ApiRequest::get(format!("jobs/{}", segment(job_id))).flink_master(&app_id))
            .await
    }

    pub async fn cancel_flink_job(
        &self,
        cluster: &str,
        job_id: &str,
    ) -> Result<Value, HopsworksError> {
        let app_id = self.flink_app_id(cluster).await?;
        self.execute(
            ApiRequest::patch(format!("jobs/{}", segment(job_id)))
                .query("mode", "cancel")
                .flink_master(&app_id),
        )
        .await
    }
}
