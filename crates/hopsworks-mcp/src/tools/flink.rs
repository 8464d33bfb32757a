//! Flink clusters and the streaming jobs submitted to them.

use super::{format_millis, json_result, status_result};
use crate::client::HopsworksClient;
use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Clusters take a while to get a YARN container and start the job manager.
const DEFAULT_START_SECS: u64 = 1800;
const START_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetupClusterParams {
    /// Cluster name (the name of the backing FLINK job)
    pub name: String,
    /// Overrides for the default Flink configuration, e.g. `{"jobmanager.memory": 4096}`
    pub config: Option<Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClusterParams {
    /// Cluster name
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartClusterParams {
    /// Cluster name
    pub name: String,
    /// Maximum wait for the cluster to be RUNNING, in seconds (default 1800)
    pub await_secs: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UploadJarParams {
    /// Cluster name
    pub cluster: String,
    /// Path of the jar on the local filesystem
    pub local_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SubmitJobParams {
    /// Cluster name
    pub cluster: String,
    /// Jar id as returned by `list_flink_jars` or `upload_flink_jar`
    pub jar_id: String,
    /// Fully qualified main class
    pub main_class: String,
    /// Program arguments, space separated
    pub job_arguments: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FlinkJobParams {
    /// Cluster name
    pub cluster: String,
    /// Flink job id
    pub job_id: String,
}

#[tool_router(router = flink_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(
        description = "Create or update a Flink cluster. The cluster is a FLINK job built from \
                       the default Flink configuration plus the given overrides."
    )]
    async fn setup_flink_cluster(
        &self,
        params: Parameters<SetupClusterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(setup_cluster_impl(&self.client, params.0).await)
    }

    #[tool(description = "Get a Flink cluster and the state of its latest execution.")]
    async fn get_flink_cluster(
        &self,
        params: Parameters<ClusterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(get_cluster_impl(&self.client, &params.0.name).await)
    }

    #[tool(description = "Start a Flink cluster and wait until it is RUNNING.")]
    async fn start_flink_cluster(
        &self,
        params: Parameters<StartClusterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(start_cluster_impl(&self.client, params.0, START_POLL_INTERVAL).await)
    }

    #[tool(description = "Stop a running Flink cluster and every job on it.")]
    async fn stop_flink_cluster(
        &self,
        params: Parameters<ClusterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let name = params.0.name;
        Ok(match self.client.stop_flink_cluster(&name).await {
            Ok(_) => status_result(&name, "stopped"),
            Err(e) => cluster_error(&name, e),
        })
    }

    #[tool(description = "List the jars uploaded to a running Flink cluster.")]
    async fn list_flink_jars(
        &self,
        params: Parameters<ClusterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let name = params.0.name;
        Ok(match self.client.list_flink_jars(&name).await {
            Ok(resp) => {
                let jars: Vec<Value> = resp["files"]
                    .as_array()
                    .map(|files| {
                        files
                            .iter()
                            .map(|f| {
                                json!({
                                    "id": f["id"],
                                    "name": f["name"],
                                    "uploaded": format_millis(&f["uploaded"]),
                                    "entry": f["entry"],
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                json_result(&json!({ "cluster": name, "count": jars.len(), "jars": jars }))
            }
            Err(e) => cluster_error(&name, e),
        })
    }

    #[tool(description = "Upload a local jar to a running Flink cluster.")]
    async fn upload_flink_jar(
        &self,
        params: Parameters<UploadJarParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(upload_jar_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Run the main class of an uploaded jar as a job on a running Flink cluster."
    )]
    async fn submit_flink_job(
        &self,
        params: Parameters<SubmitJobParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(
            match self
                .client
                .submit_flink_job(&p.cluster, &p.jar_id, &p.main_class, p.job_arguments.as_deref())
                .await
            {
                Ok(resp) => json_result(&json!({
                    "cluster": p.cluster,
                    "job_id": resp["jobid"],
                    "status": "submitted",
                })),
                Err(e) => cluster_error(&p.cluster, e),
            },
        )
    }

    #[tool(description = "List the jobs of a running Flink cluster.")]
    async fn list_flink_jobs(
        &self,
        params: Parameters<ClusterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(list_jobs_impl(&self.client, &params.0.name).await)
    }

    #[tool(description = "Get the details of a job on a Flink cluster.")]
    async fn get_flink_job(
        &self,
        params: Parameters<FlinkJobParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(match self.client.get_flink_job(&p.cluster, &p.job_id).await {
            Ok(job) => json_result(&flink_job_summary(&job)),
            Err(e) if e.is_not_found() => json_result(&json!({
                "cluster": p.cluster,
                "job_id": p.job_id,
                "status": "not_found",
            })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Cancel a job on a Flink cluster. The cluster keeps running.")]
    async fn stop_flink_job(
        &self,
        params: Parameters<FlinkJobParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(match self.client.cancel_flink_job(&p.cluster, &p.job_id).await {
            Ok(_) => json_result(&json!({
                "cluster": p.cluster,
                "job_id": p.job_id,
                "status": "cancelling",
            })),
            Err(e) => cluster_error(&p.cluster, e),
        })
    }
}

fn cluster_summary(job: &Value, execution: Option<&Value>) -> Value {
    json!({
        "id": job["id"],
        "name": job["name"],
        "state": execution.map(|e| e["state"].clone()).unwrap_or(Value::Null),
        "app_id": execution.map(|e| e["appId"].clone()).unwrap_or(Value::Null),
        "creation_time": job["creationTime"],
        "creator": job["creator"]["email"],
    })
}

fn flink_job_summary(job: &Value) -> Value {
    json!({
        "job_id": job["jid"],
        "name": job["name"],
        "state": job["state"],
        "start_time": format_millis(&job["start-time"]),
        "end_time": format_millis(&job["end-time"]),
        "duration_ms": job["duration"],
    })
}

/// A missing backing job becomes a `cluster_not_found` status.
fn cluster_error(name: &str, err: HopsworksError) -> CallToolResult {
    if err.is_not_found() {
        status_result(name, "cluster_not_found")
    } else {
        err.into_tool_result()
    }
}

async fn setup_cluster_impl(
    client: &HopsworksClient,
    params: SetupClusterParams,
) -> CallToolResult {
    if let Some(config) = &params.config {
        if !config.is_object() {
            return super::error_text("config must be a JSON object".into());
        }
    }
    match client
        .setup_flink_cluster(&params.name, params.config.as_ref())
        .await
    {
        Ok(job) => {
            tracing::info!(cluster = %params.name, "Flink cluster configured");
            json_result(&cluster_summary(&job, None))
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn get_cluster_impl(client: &HopsworksClient, name: &str) -> CallToolResult {
    let result = async {
        let Some(job) = client.find_job(name).await? else {
            return Ok(None);
        };
        if job["jobType"].as_str().is_some_and(|t| t != "FLINK") {
            return Err(HopsworksError::InvalidArgument(format!(
                "job {} is a {} job, not a Flink cluster",
                name, job["jobType"]
            )));
        }
        let execution = client.latest_execution(name).await?;
        Ok(Some(cluster_summary(&job, execution.as_ref())))
    }
    .await;
    match result {
        Ok(Some(summary)) => json_result(&summary),
        Ok(None) => json_result(&json!({ "name": name, "exists": false })),
        Err(e) => e.into_tool_result(),
    }
}

async fn start_cluster_impl(
    client: &HopsworksClient,
    params: StartClusterParams,
    interval: Duration,
) -> CallToolResult {
    let timeout = Duration::from_secs(params.await_secs.unwrap_or(DEFAULT_START_SECS));
    match client.start_flink_cluster(&params.name, timeout, interval).await {
        Ok(execution) => {
            tracing::info!(
                cluster = %params.name,
                app_id = %execution["appId"],
                "Flink cluster running"
            );
            json_result(&json!({
                "name": params.name,
                "execution_id": execution["id"],
                "app_id": execution["appId"],
                "state": execution["state"],
            }))
        }
        Err(e) => cluster_error(&params.name, e),
    }
}

async fn upload_jar_impl(client: &HopsworksClient, params: UploadJarParams) -> CallToolResult {
    let path = PathBuf::from(&params.local_path);
    if !path.is_file() {
        return json_result(&json!({
            "cluster": params.cluster,
            "local_path": params.local_path,
            "status": "file_not_found",
        }));
    }
    match client.upload_flink_jar(&params.cluster, &path).await {
        Ok(resp) => {
            let filename = resp["filename"].as_str().unwrap_or_default();
            // The master answers with the stored path; the jar id is its last segment.
            let jar_id = filename.rsplit('/').next().unwrap_or(filename);
            json_result(&json!({
                "cluster": params.cluster,
                "jar_id": jar_id,
                "status": resp["status"],
            }))
        }
        Err(e) => cluster_error(&params.cluster, e),
    }
}

async fn list_jobs_impl(client: &HopsworksClient, cluster: &str) -> CallToolResult {
    match client.list_flink_jobs(cluster).await {
        Ok(resp) => {
            let jobs: Vec<Value> = resp["jobs"]
                .as_array()
                .map(|jobs| jobs.iter().map(flink_job_summary).collect())
                .unwrap_or_default();
            json_result(&json!({ "cluster": cluster, "count": jobs.len(), "jobs": jobs }))
        }
        Err(e) => cluster_error(cluster, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{result_json, MockHopsworks};
    use std::io::Write;

    #[tokio::test]
    async fn missing_cluster_reports_not_exists() {
        let mock = MockHopsworks::start().await;
        let client = mock.client().await;
        let value = result_json(&get_cluster_impl(&client, "streams").await);
        assert_eq!(value, json!({"name": "streams", "exists": false}));
    }

    #[tokio::test]
    async fn cluster_state_comes_from_latest_execution() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/jobs/streams",
            200,
            json!({"id": 3, "name": "streams", "jobType": "FLINK", "creator": {"email": "a@b.c"}}),
        )
        .await;
        mock.on(
            "GET",
            "project/119/jobs/streams/executions",
            200,
            json!({"items": [{"id": 9, "state": "RUNNING", "appId": "application_1_0009"}]}),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(&get_cluster_impl(&client, "streams").await);
        assert_eq!(value["state"], "RUNNING");
        assert_eq!(value["app_id"], "application_1_0009");
        assert_eq!(value["creator"], "a@b.c");
    }

    #[tokio::test]
    async fn non_flink_job_is_not_a_cluster() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/jobs/etl",
            200,
            json!({"id": 1, "name": "etl", "jobType": "PYTHON"}),
        )
        .await;
        let client = mock.client().await;
        let result = get_cluster_impl(&client, "etl").await;
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn starting_unknown_cluster() {
        let mock = MockHopsworks::start().await;
        let client = mock.client().await;
        let value = result_json(
            &start_cluster_impl(
                &client,
                StartClusterParams {
                    name: "ghost".into(),
                    await_secs: Some(1),
                },
                Duration::from_millis(1),
            )
            .await,
        );
        assert_eq!(value["status"], "cluster_not_found");
    }

    #[tokio::test]
    async fn setup_rejects_non_object_config() {
        let mock = MockHopsworks::start().await;
        let client = mock.client().await;
        let result = setup_cluster_impl(
            &client,
            SetupClusterParams {
                name: "streams".into(),
                config: Some(json!([1, 2])),
            },
        )
        .await;
        assert_eq!(result.is_error, Some(true));
        assert!(mock.requests().await.is_empty());
    }

    #[tokio::test]
    async fn start_with_huge_wait_returns_result() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "POST",
            "project/119/jobs/streams/executions",
            201,
            json!({"id": 9, "state": "INITIALIZING"}),
        )
        .await;
        mock.on(
            "GET",
            "project/119/jobs/streams/executions/9",
            200,
            json!({"id": 9, "state": "RUNNING", "appId": "application_1_0009"}),
        )
        .await;
        let client = mock.client().await;

        let result = tokio::spawn(async move {
            start_cluster_impl(
                &client,
                StartClusterParams {
                    name: "streams".into(),
                    await_secs: Some(u64::MAX),
                },
                Duration::from_millis(1),
            )
            .await
        })
        .await
        .expect("tool task must not panic");
        assert_eq!(result_json(&result)["app_id"], "application_1_0009");
    }

    #[tokio::test]
    async fn upload_missing_jar() {
        let mock = MockHopsworks::start().await;
        let client = mock.client().await;
        let value = result_json(
            &upload_jar_impl(
                &client,
                UploadJarParams {
                    cluster: "streams".into(),
                    local_path: "/definitely/not/here.jar".into(),
                },
            )
            .await,
        );
        assert_eq!(value["status"], "file_not_found");
    }

    #[tokio::test]
    async fn upload_returns_jar_id() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/jobs/streams/executions",
            200,
            json!({"items": [{"id": 9, "state": "RUNNING", "appId": "application_1_0009"}]}),
        )
        .await;
        mock.on(
            "POST",
            "flinkmaster/application_1_0009/jars/upload",
            200,
            json!({"filename": "/tmp/flink-web/upload/abcd_wordcount.jar", "status": "success"}),
        )
        .await;
        let client = mock.client().await;

        let mut jar = tempfile::NamedTempFile::new().unwrap();
        jar.write_all(b"PK\x03\x04").unwrap();
        let value = result_json(
            &upload_jar_impl(
                &client,
                UploadJarParams {
                    cluster: "streams".into(),
                    local_path: jar.path().to_string_lossy().into_owned(),
                },
            )
            .await,
        );
        assert_eq!(value["jar_id"], "abcd_wordcount.jar");
        let upload = &mock
            .requests_to("POST", "flinkmaster/application_1_0009/jars/upload")
            .await[0];
        assert!(upload
            .content_type
            .as_deref()
            .unwrap_or_default()
            .starts_with("multipart/form-data"));
    }

    #[tokio::test]
    async fn large_jar_is_streamed_whole() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/jobs/streams/executions",
            200,
            json!({"items": [{"id": 9, "state": "RUNNING", "appId": "application_1_0009"}]}),
        )
        .await;
        mock.on(
            "POST",
            "flinkmaster/application_1_0009/jars/upload",
            200,
            json!({"filename": "/tmp/flink-web/upload/ef01_big.jar", "status": "success"}),
        )
        .await;
        let client = mock.client().await;

        let payload = "0123456789abcdef".repeat(64 * 1024);
        let mut jar = tempfile::NamedTempFile::new().unwrap();
        jar.write_all(payload.as_bytes()).unwrap();
        let value = result_json(
            &upload_jar_impl(
                &client,
                UploadJarParams {
                    cluster: "streams".into(),
                    local_path: jar.path().to_string_lossy().into_owned(),
                },
            )
            .await,
        );
        assert_eq!(value["jar_id"], "ef01_big.jar");
        let upload = &mock
            .requests_to("POST", "flinkmaster/application_1_0009/jars/upload")
            .await[0];
        assert!(upload.body.contains(&payload));
    }

    #[tokio::test]
    async fn lists_jobs_on_cluster() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/jobs/streams/executions",
            200,
            json!({"items": [{"id": 9, "state": "RUNNING", "appId": "app_9"}]}),
        )
        .await;
        mock.on(
            "GET",
            "flinkmaster/app_9/jobs/overview",
            200,
            json!({"jobs": [
                {"jid": "abc", "name": "wordcount", "state": "RUNNING", "start-time": 0}
            ]}),
        )
        .await;
        let client = mock.client().await;
        let value = result_json(&list_jobs_impl(&client, "streams").await);
        assert_eq!(value["count"], 1);
        assert_eq!(value["jobs"][0]["job_id"], "abc");
    }
}
