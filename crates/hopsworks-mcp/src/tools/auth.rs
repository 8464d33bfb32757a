//! Connecting to a Hopsworks instance.

use super::{json_result, success_text};
use crate::client::{HopsworksClient, LoginRequest};
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct LoginParams {
    /// Hopsworks host name or URL; defaults to the configured host
    pub host: Option<String>,
    /// Port; defaults to the configured port (443)
    pub port: Option<u16>,
    /// Project to select; defaults to the first accessible project
    pub project: Option<String>,
    /// API key; defaults to the configured key
    pub api_key_value: Option<String>,
}

#[tool_router(router = auth_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(
        description = "Connect to a Hopsworks instance and select the project all other tools \
                       operate on. Host, port and API key default to the server configuration."
    )]
    async fn login(
        &self,
        params: Parameters<LoginParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(login_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Show the current Hopsworks connection: host, port, project and whether an \
                       API key is set."
    )]
    async fn get_connection(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(get_connection_impl(&self.client).await)
    }
}

async fn login_impl(client: &HopsworksClient, params: LoginParams) -> CallToolResult {
    let request = LoginRequest {
        host: params.host,
        port: params.port,
        project: params.project,
        api_key: params.api_key_value,
    };
    match client.login(request).await {
        Ok(project) => {
            let connection = client.connection().await;
            json_result(&json!({
                "connected": true,
                "host": connection.endpoint.host,
                "port": connection.endpoint.port,
                "project_name": project.name,
                "project_id": project.id,
            }))
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn get_connection_impl(client: &HopsworksClient) -> CallToolResult {
    let connection = client.connection().await;
    let value = json!({
        "host": connection.endpoint.host,
        "port": connection.endpoint.port,
        "url": connection.endpoint.base_url(),
        "api_key_set": connection.has_api_key(),
        "project": connection.project,
        "connected": connection.project.is_some(),
    });
    success_text(serde_json::to_string_pretty(&value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{result_json, MockHopsworks};

    #[tokio::test]
    async fn login_reports_project() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/getProjectInfo/fraud",
            200,
            json!({"projectId": 7, "projectName": "fraud"}),
        )
        .await;
        let client = mock.disconnected_client().await;

        let result = login_impl(
            &client,
            LoginParams {
                project: Some("fraud".into()),
                ..Default::default()
            },
        )
        .await;
        let value = result_json(&result);
        assert_eq!(value["connected"], true);
        assert_eq!(value["project_id"], 7);
        assert_eq!(value["host"], "127.0.0.1");
    }

    #[tokio::test]
    async fn failed_login_is_a_tool_error() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "project/getProjectInfo/fraud", 401, json!({}))
            .await;
        let client = mock.disconnected_client().await;

        let result = login_impl(
            &client,
            LoginParams {
                project: Some("fraud".into()),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn connection_without_project() {
        let mock = MockHopsworks::start().await;
        let client = mock.disconnected_client().await;
        let value = result_json(&get_connection_impl(&client).await);
        assert_eq!(value["connected"], false);
        assert_eq!(value["api_key_set"], true);
        assert!(value["project"].is_null());
    }
}
