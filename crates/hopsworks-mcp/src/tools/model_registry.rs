use super::{format_millis, json_result};
use crate::client::HopsworksClient;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListModelsParams {
    /// Only list versions of this model
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetModelParams {
    /// Model name
    pub name: String,
    /// Version; latest when omitted
    pub version: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteModelParams {
    /// Model name
    pub name: String,
    /// Version to delete
    pub version: i64,
}

#[tool_router(router = model_registry_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(description = "Get the project's model registry.")]
    async fn get_model_registry(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(match self.client.get_model_registry().await {
            Ok(mr) => json_result(&json!({
                "id": mr["id"],
                "project_name": mr["name"],
                "connected": true,
            })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "List models in the model registry, newest version first.")]
    async fn list_models(
        &self,
        params: Parameters<ListModelsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(list_models_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Get a model version with its metrics and framework. Returns the latest \
                       version when no version is given."
    )]
    async fn get_model(
        &self,
        params: Parameters<GetModelParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(match self.client.get_model(&p.name, p.version).await {
            Ok(model) => json_result(&model_details(&model)),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Delete a model version from the model registry.")]
    async fn delete_model(
        &self,
        params: Parameters<DeleteModelParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(match self.client.delete_model(&p.name, p.version).await {
            Ok(_) => {
                json_result(&json!({ "name": p.name, "version": p.version, "status": "deleted" }))
            }
            Err(e) if e.is_not_found() => {
                json_result(&json!({ "name": p.name, "version": p.version, "status": "not_found" }))
            }
            Err(e) => e.into_tool_result(),
        })
    }
}

fn model_summary(model: &Value) -> Value {
    json!({
        "name": model["name"],
        "version": model["version"],
        "framework": model["framework"],
        "description": model["description"],
        "created": format_millis(&model["created"]),
        "metrics": model["metrics"],
    })
}

fn model_details(model: &Value) -> Value {
    let mut details = model_summary(model);
    details["id"] = model["id"].clone();
    details["creator"] = model["creator"].clone();
    details["environment"] = model["environment"].clone();
    details["training_dataset"] = model["trainingDataset"].clone();
    details["input_example"] = model["inputExample"].clone();
    details["model_schema"] = model["modelSchema"].clone();
    details
}

async fn list_models_impl(client: &HopsworksClient, params: ListModelsParams) -> CallToolResult {
    match client.list_models(params.name.as_deref()).await {
        Ok(models) => {
            let summaries: Vec<Value> = models.iter().map(model_summary).collect();
            json_result(&json!({ "count": summaries.len(), "models": summaries }))
        }
        Err(e) => e.into_tool_result(),
    }
}
