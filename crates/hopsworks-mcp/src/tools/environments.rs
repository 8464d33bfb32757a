//! Python environments of the current project.

use super::{json_result, status_result};
use crate::client::{HopsworksClient, PackageSource};
use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Environment builds resolve and download packages; they are slow.
const ENVIRONMENT_AWAIT: Duration = Duration::from_secs(1800);
const ENVIRONMENT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EnvironmentParams {
    /// Environment name
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateEnvironmentParams {
    /// Name of the new environment
    pub name: String,
    /// Environment to clone, e.g. `python-feature-pipeline`
    pub base_environment_name: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Wait until the environment is built (default true)
    pub await_creation: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InstallParams {
    /// Environment name
    pub environment_name: String,
    /// Path of the file in the project, e.g. `Resources/requirements.txt`
    pub path: String,
    /// Wait until the installation finishes (default true)
    pub await_installation: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LibrariesParams {
    /// Environment name
    pub environment_name: String,
}

#[tool_router(router = environments_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(description = "List the Python environments of the current project.")]
    async fn list_environments(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(match self.client.list_environments().await {
            Ok(envs) => {
                let envs: Vec<Value> = envs.iter().map(environment_summary).collect();
                json_result(&json!({ "count": envs.len(), "environments": envs }))
            }
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Get a Python environment by name.")]
    async fn get_environment(
        &self,
        params: Parameters<EnvironmentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let name = params.0.name;
        Ok(match self.client.find_environment(&name).await {
            Ok(Some(env)) => {
                let mut summary = environment_summary(&env);
                summary["exists"] = json!(true);
                json_result(&summary)
            }
            Ok(None) => json_result(&json!({ "name": name, "exists": false })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(
        description = "Create a Python environment, optionally cloned from a base environment, \
                       and wait for it to be built."
    )]
    async fn create_environment(
        &self,
        params: Parameters<CreateEnvironmentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(create_environment_impl(&self.client, params.0, ENVIRONMENT_POLL_INTERVAL).await)
    }

    #[tool(description = "Delete a Python environment. Jobs using it will fail to start.")]
    async fn delete_environment(
        &self,
        params: Parameters<EnvironmentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let name = params.0.name;
        let result = async {
            if self.client.find_environment(&name).await?.is_none() {
                return Ok(false);
            }
            self.client.delete_environment(&name).await?;
            Ok::<_, HopsworksError>(true)
        }
        .await;
        Ok(match result {
            Ok(true) => {
                tracing::info!(environment = %name, "Deleted environment");
                status_result(&name, "deleted")
            }
            Ok(false) => status_result(&name, "not_found"),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(
        description = "Install the packages of a requirements.txt stored in the project into an \
                       environment."
    )]
    async fn install_requirements(
        &self,
        params: Parameters<InstallParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(install_impl(
            &self.client,
            params.0,
            PackageSource::RequirementsTxt,
            ENVIRONMENT_POLL_INTERVAL,
        )
        .await)
    }

    #[tool(description = "Install a wheel stored in the project into an environment.")]
    async fn install_wheel(
        &self,
        params: Parameters<InstallParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(install_impl(
            &self.client,
            params.0,
            PackageSource::Wheel,
            ENVIRONMENT_POLL_INTERVAL,
        )
        .await)
    }

    #[tool(description = "List the libraries installed in an environment.")]
    async fn list_libraries(
        &self,
        params: Parameters<LibrariesParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let name = params.0.environment_name;
        Ok(match self.client.list_libraries(&name).await {
            Ok(libraries) => {
                let libraries: Vec<Value> = libraries
                    .iter()
                    .map(|l| {
                        json!({
                            "library": l["library"],
                            "version": l["version"],
                            "source": l["packageSource"],
                        })
                    })
                    .collect();
                json_result(&json!({
                    "environment": name,
                    "count": libraries.len(),
                    "libraries": libraries,
                }))
            }
            Err(e) if e.is_not_found() => json_result(&json!({
                "environment": name,
                "status": "environment_not_found",
            })),
            Err(e) => e.into_tool_result(),
        })
    }
}

fn environment_summary(env: &Value) -> Value {
    json!({
        "name": env["name"],
        "python_version": env["pythonVersion"],
        "description": env["description"],
        "conflicts": env["pythonConflicts"],
    })
}

async fn create_environment_impl(
    client: &HopsworksClient,
    params: CreateEnvironmentParams,
    interval: Duration,
) -> CallToolResult {
    let wait = params.await_creation.unwrap_or(true);
    let result = async {
        let env = client
            .create_environment(
                &params.name,
                params.base_environment_name.as_deref(),
                params.description.as_deref(),
            )
            .await?;
        if wait {
            client
                .await_environment(&params.name, ENVIRONMENT_AWAIT, interval)
                .await?;
        }
        Ok::<_, HopsworksError>(env)
    }
    .await;
    match result {
        Ok(env) => {
            tracing::info!(environment = %params.name, "Created environment");
            let mut summary = environment_summary(&env);
            summary["name"] = json!(params.name);
            summary["status"] = json!(if wait { "created" } else { "creating" });
            json_result(&summary)
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn install_impl(
    client: &HopsworksClient,
    params: InstallParams,
    source: PackageSource,
    interval: Duration,
) -> CallToolResult {
    let wait = params.await_installation.unwrap_or(true);
    let result = async {
        if client.find_environment(&params.environment_name).await?.is_none() {
            return Ok(None);
        }
        let library = client
            .install_library(&params.environment_name, &params.path, source)
            .await?;
        if wait {
            client
                .await_environment(&params.environment_name, ENVIRONMENT_AWAIT, interval)
                .await?;
        }
        Ok::<_, HopsworksError>(Some(library))
    }
    .await;
    match result {
        Ok(Some(library)) => json_result(&json!({
            "environment": params.environment_name,
            "library": library["library"],
            "status": if wait { "installed" } else { "installing" },
        })),
        Ok(None) => json_result(&json!({
            "environment": params.environment_name,
            "status": "environment_not_found",
        })),
        Err(e) => e.into_tool_result(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{result_json, MockHopsworks};

    #[tokio::test]
    async fn create_without_waiting() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "POST",
            "project/119/python/environments/ml",
            201,
            json!({"name": "ml", "pythonVersion": "3.10"}),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(
            &create_environment_impl(
                &client,
                CreateEnvironmentParams {
                    name: "ml".into(),
                    base_environment_name: Some("python-feature-pipeline".into()),
                    description: None,
                    await_creation: Some(false),
                },
                Duration::from_millis(1),
            )
            .await,
        );
        assert_eq!(value["status"], "creating");
        assert_eq!(value["python_version"], "3.10");
        let sent = mock
            .requests_to("POST", "project/119/python/environments/ml")
            .await[0]
            .json();
        assert_eq!(sent["baseEnvironmentName"], "python-feature-pipeline");
        assert!(mock
            .requests_to("GET", "project/119/python/environments/ml/commands")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn install_into_missing_environment() {
        let mock = MockHopsworks::start().await;
        let client = mock.client().await;
        let value = result_json(
            &install_impl(
                &client,
                InstallParams {
                    environment_name: "ghost".into(),
                    path: "Resources/requirements.txt".into(),
                    await_installation: None,
                },
                PackageSource::RequirementsTxt,
                Duration::from_millis(1),
            )
            .await,
        );
        assert_eq!(value["status"], "environment_not_found");
    }

    #[tokio::test]
    async fn install_requirements_and_wait() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "project/119/python/environments/ml", 200, json!({"name": "ml"}))
            .await;
        mock.on(
            "POST",
            "project/119/python/environments/ml/libraries/requirements.txt",
            200,
            json!({"library": "requirements.txt"}),
        )
        .await;
        mock.on(
            "GET",
            "project/119/python/environments/ml/commands",
            200,
            json!({"items": [{"status": "DONE"}]}),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(
            &install_impl(
                &client,
                InstallParams {
                    environment_name: "ml".into(),
                    path: "Resources/requirements.txt".into(),
                    await_installation: None,
                },
                PackageSource::RequirementsTxt,
                Duration::from_millis(1),
            )
            .await,
        );
        assert_eq!(value["status"], "installed");
        let sent = mock
            .requests_to(
                "POST",
                "project/119/python/environments/ml/libraries/requirements.txt",
            )
            .await[0]
            .json();
        assert_eq!(sent["packageSource"], "REQUIREMENTS_TXT");
    }
}
