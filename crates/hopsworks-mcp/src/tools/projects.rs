use super::{format_millis, from_result, json_result};
use crate::client::{items, HopsworksClient};
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetProjectParams {
    /// Project name
    pub name: String,
}

#[tool_router(router = projects_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(description = "Get details of the project selected at login.")]
    async fn get_current_project(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(from_result(
            self.client.get_current_project().await.map(|p| project_details(&p)),
        ))
    }

    #[tool(description = "List all Hopsworks projects accessible with the current API key.")]
    async fn list_projects(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(list_projects_impl(&self.client).await)
    }

    #[tool(description = "Get details of a Hopsworks project by name.")]
    async fn get_project(
        &self,
        params: Parameters<GetProjectParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(from_result(
            self.client
                .get_project_by_name(&params.0.name)
                .await
                .map(|p| project_details(&p)),
        ))
    }
}

async fn list_projects_impl(client: &HopsworksClient) -> CallToolResult {
    let projects = match client.list_projects().await {
        Ok(v) => v,
        Err(e) => return e.into_tool_result(),
    };
    let summaries: Vec<Value> = items(&projects)
        .iter()
        .map(|entry| {
            let project = entry.get("project").unwrap_or(entry);
            json!({
                "id": project["id"],
                "name": project["name"],
                "owner": project["owner"],
                "created": format_millis(&project["created"]),
                "role": entry["teamRole"],
            })
        })
        .collect();
    json_result(&json!({ "count": summaries.len(), "projects": summaries }))
}

fn project_details(info: &Value) -> Value {
    json!({
        "id": info["projectId"],
        "name": info["projectName"],
        "owner": info["owner"],
        "description": info["description"],
        "created": format_millis(&info["created"]),
        "services": info["services"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{result_json, MockHopsworks};

    #[tokio::test]
    async fn lists_projects_with_roles() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project",
            200,
            json!([
                {"project": {"id": 1, "name": "a", "owner": "alice"}, "teamRole": "Data owner"},
                {"project": {"id": 2, "name": "b"}, "teamRole": "Data scientist"}
            ]),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(&list_projects_impl(&client).await);
        assert_eq!(value["count"], 2);
        assert_eq!(value["projects"][1]["role"], "Data scientist");
        assert_eq!(value["projects"][0]["owner"], "alice");
    }

    #[test]
    fn details_from_project_info() {
        let details = project_details(&json!({
            "projectId": 119,
            "projectName": "demo",
            "created": 0
        }));
        assert_eq!(details["id"], 119);
        assert_eq!(details["created"], "1970-01-01T00:00:00+00:00");
    }
}
