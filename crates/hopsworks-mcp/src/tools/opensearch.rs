//! OpenSearch connection details and index naming.

use super::{from_result, json_result};
use crate::client::project_index;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProjectIndexParams {
    /// Index name without the project prefix
    pub index: String,
}

#[tool_router(router = opensearch_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(
        description = "Get the configuration for an OpenSearch client (hosts, Authorization \
                       header, TLS flags) for the current project."
    )]
    async fn get_opensearch_config(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(from_result(self.client.opensearch_config().await))
    }

    #[tool(
        description = "Prefix an index name with the current project name, as required for \
                       project-owned OpenSearch indices."
    )]
    async fn get_project_index(
        &self,
        params: Parameters<ProjectIndexParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let index = params.0.index;
        Ok(match self.client.project().await {
            Ok(project) => json_result(&json!({
                "index": project_index(&project.name, &index),
                "original_index": index,
            })),
            Err(e) => e.into_tool_result(),
        })
    }
}
