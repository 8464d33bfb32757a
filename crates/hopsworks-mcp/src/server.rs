//! MCP server implementation for Hopsworks.

use crate::client::HopsworksClient;
use crate::resources;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::model::*;
use rmcp::service::RequestContext;
use rmcp::{tool_handler, ErrorData as McpError, RoleServer, ServerHandler};

/// The Hopsworks MCP server.
#[derive(Clone)]
pub struct HopsworksMcpServer {
    pub(crate) client: HopsworksClient,
    pub(crate) tool_router: ToolRouter<Self>,
}

impl HopsworksMcpServer {
    pub fn new(client: HopsworksClient) -> Self {
        Self {
            client,
            tool_router: Self::create_tool_router(),
        }
    }

    pub fn client(&self) -> &HopsworksClient {
        &self.client
    }
}

#[tool_handler]
impl ServerHandler for HopsworksMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Hopsworks MCP server. Provides tools for the Hopsworks feature store \
                 (including data validation and transformation functions), model registry, \
                 model serving, jobs, Flink clusters, datasets, Kafka, OpenSearch, secrets, \
                 git and Python environments. Call `login` first unless the server was \
                 started with an API key and project."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "hopsworks-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    // ─── Resources ───────────────────────────────────────────────────

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            resources: resources::list_resources(),
            next_cursor: None,
            ..Default::default()
        })
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        Ok(ListResourceTemplatesResult {
            resource_templates: resources::list_resource_templates(),
            next_cursor: None,
            ..Default::default()
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        resources::read_resource(&request.uri, &self.client).await
    }
}
