//! Model deployments (KServe predictors).

use super::{format_millis, json_result};
use crate::client::HopsworksClient;
use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeploymentParams {
    /// Deployment name
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeployModelParams {
    /// Model name
    pub model_name: String,
    /// Model version
    pub model_version: i64,
    /// Deployment name; defaults to the model name without non-alphanumeric characters
    pub deployment_name: Option<String>,
}

#[tool_router(router = model_serving_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(description = "List model deployments with their status.")]
    async fn list_deployments(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(match self.client.list_deployments().await {
            Ok(deployments) => {
                let summaries: Vec<Value> = deployments.iter().map(deployment_summary).collect();
                json_result(&json!({ "count": summaries.len(), "deployments": summaries }))
            }
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Get a model deployment by name.")]
    async fn get_deployment(
        &self,
        params: Parameters<DeploymentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(match self.client.get_deployment(&params.0.name).await {
            Ok(d) => json_result(&deployment_summary(&d)),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(
        description = "Deploy a model version from the model registry. Creates the deployment; \
                       use start_deployment to start serving."
    )]
    async fn deploy_model(
        &self,
        params: Parameters<DeployModelParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(deploy_model_impl(&self.client, params.0).await)
    }

    #[tool(description = "Start a model deployment.")]
    async fn start_deployment(
        &self,
        params: Parameters<DeploymentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(deployment_action_impl(&self.client, &params.0.name, "start").await)
    }

    #[tool(description = "Stop a model deployment.")]
    async fn stop_deployment(
        &self,
        params: Parameters<DeploymentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(deployment_action_impl(&self.client, &params.0.name, "stop").await)
    }

    #[tool(description = "Delete a model deployment. The deployment must be stopped.")]
    async fn delete_deployment(
        &self,
        params: Parameters<DeploymentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let name = params.0.name;
        let result = async {
            let d = self.client.get_deployment(&name).await?;
            self.client.delete_deployment(deployment_id(&d)?).await
        }
        .await;
        Ok(match result {
            Ok(_) => super::status_result(&name, "deleted"),
            Err(e) if e.is_not_found() => super::status_result(&name, "not_found"),
            Err(e) => e.into_tool_result(),
        })
    }
}

/// Deployment names may only contain letters and digits.
pub(crate) fn default_deployment_name(model_name: &str) -> String {
    model_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// TensorFlow models are served by TensorFlow Serving, everything else by
/// the Python model server.
pub(crate) fn model_server_for(framework: Option<&str>) -> &'static str {
    match framework {
        Some(f) if f.eq_ignore_ascii_case("TENSORFLOW") => "TENSORFLOW_SERVING",
        _ => "PYTHON",
    }
}

fn deployment_id(d: &Value) -> Result<i64, HopsworksError> {
    d["id"]
        .as_i64()
        .ok_or_else(|| HopsworksError::Other(format!("deployment without id: {}", d)))
}

fn deployment_summary(d: &Value) -> Value {
    json!({
        "id": d["id"],
        "name": d["name"],
        "model_name": d["modelName"],
        "model_version": d["modelVersion"],
        "model_server": d["modelServer"],
        "status": d["status"],
        "available_instances": d["availableInstances"],
        "requested_instances": d["requestedInstances"],
        "created": format_millis(&d["created"]),
        "endpoint": d["internalPath"],
    })
}

async fn deploy_model_impl(client: &HopsworksClient, params: DeployModelParams) -> CallToolResult {
    let name = params
        .deployment_name
        .clone()
        .unwrap_or_else(|| default_deployment_name(&params.model_name));
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return HopsworksError::InvalidArgument(format!(
            "deployment name {:?} must be non-empty and alphanumeric",
            name
        ))
        .into_tool_result();
    }
    let result = async {
        let project = client.project().await?;
        let model = client
            .get_model(&params.model_name, Some(params.model_version))
            .await?;
        let body = json!({
            "name": name,
            "modelName": params.model_name,
            "modelVersion": params.model_version,
            "modelPath": format!("/Projects/{}/Models/{}", project.name, params.model_name),
            "modelFramework": model["framework"],
            "modelServer": model_server_for(model["framework"].as_str()),
            "servingTool": "KSERVE",
            "requestedInstances": 1,
            "batchingConfiguration": { "batchingEnabled": false },
        });
        tracing::info!(
            deployment = %name,
            model = %params.model_name,
            version = params.model_version,
            "Creating deployment"
        );
        client.put_deployment(body).await?;
        client.get_deployment(&name).await
    }
    .await;
    match result {
        Ok(d) => {
            let mut summary = deployment_summary(&d);
            summary["model"] =
                json!({ "name": params.model_name, "version": params.model_version });
            json_result(&summary)
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn deployment_action_impl(
    client: &HopsworksClient,
    name: &str,
    action: &str,
) -> CallToolResult {
    let result = async {
        let d = client.get_deployment(name).await?;
        client.deployment_action(deployment_id(&d)?, action).await
    }
    .await;
    match result {
        Ok(_) => {
            let status = if action == "start" { "starting" } else { "stopping" };
            super::status_result(name, status)
        }
        Err(e) => e.into_tool_result(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{result_json, MockHopsworks};

    #[test]
    fn deployment_name_strips_non_alphanumerics() {
        assert_eq!(default_deployment_name("fraud_model-v2"), "fraudmodelv2");
    }

    #[test]
    fn model_server_by_framework() {
        assert_eq!(model_server_for(Some("TENSORFLOW")), "TENSORFLOW_SERVING");
        assert_eq!(model_server_for(Some("SKLEARN")), "PYTHON");
        assert_eq!(model_server_for(None), "PYTHON");
    }

    #[tokio::test]
    async fn deploys_tensorflow_model() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/modelregistries/119/models/mnist_model_3",
            200,
            json!({"name": "mnist_model", "version": 3, "framework": "TENSORFLOW"}),
        )
        .await;
        mock.on("PUT", "project/119/serving", 201, json!({"id": 12})).await;
        mock.on(
            "GET",
            "project/119/serving",
            200,
            json!([{"id": 12, "name": "mnistmodel", "status": "CREATED"}]),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(
            &deploy_model_impl(
                &client,
                DeployModelParams {
                    model_name: "mnist_model".into(),
                    model_version: 3,
                    deployment_name: None,
                },
            )
            .await,
        );
        assert_eq!(value["name"], "mnistmodel");
        assert_eq!(value["status"], "CREATED");

        let sent = mock.requests_to("PUT", "project/119/serving").await[0].json();
        assert_eq!(sent["modelServer"], "TENSORFLOW_SERVING");
        assert_eq!(sent["modelPath"], "/Projects/demo/Models/mnist_model");
    }

    #[tokio::test]
    async fn start_posts_action() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "project/119/serving", 200, json!([{"id": 12, "name": "fraud"}]))
            .await;
        mock.on("POST", "project/119/serving/12", 200, Value::Null).await;
        let client = mock.client().await;

        let value = result_json(&deployment_action_impl(&client, "fraud", "start").await);
        assert_eq!(value["status"], "starting");
        let post = &mock.requests_to("POST", "project/119/serving/12").await[0];
        assert_eq!(post.query_param("action").as_deref(), Some("start"));
    }
}
