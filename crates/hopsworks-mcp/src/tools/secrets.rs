//! User secrets. Values are only returned by `get_secret_value`.

use super::{format_millis, json_result, status_result};
use crate::client::{HopsworksClient, ProjectRef};
use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

const REDACTED: &str = "********";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SecretParams {
    /// Secret name
    pub name: String,
    /// Owner's username, for secrets shared by another user
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateSecretParams {
    /// Secret name
    pub name: String,
    /// Secret value
    pub value: String,
    /// Share the secret with the members of this project; private when omitted
    pub project: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteSecretParams {
    /// Secret name
    pub name: String,
}

#[tool_router(router = secrets_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(description = "List the secrets of the current user. Values are not included.")]
    async fn list_secrets(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(match self.client.list_secrets().await {
            Ok(secrets) => {
                let secrets: Vec<Value> = secrets.iter().map(secret_summary).collect();
                json_result(&json!({ "count": secrets.len(), "secrets": secrets }))
            }
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(
        description = "Get a secret's metadata. The value is redacted; use get_secret_value to \
                       read it."
    )]
    async fn get_secret(
        &self,
        params: Parameters<SecretParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(match self.client.get_secret(&p.name, p.owner.as_deref()).await {
            Ok(secret) => {
                let mut summary = secret_summary(&secret);
                summary["value"] = json!(REDACTED);
                json_result(&summary)
            }
            Err(e) if e.is_not_found() => status_result(&p.name, "not_found"),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Read the value of a secret.")]
    async fn get_secret_value(
        &self,
        params: Parameters<SecretParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(match self.client.get_secret(&p.name, p.owner.as_deref()).await {
            Ok(secret) => json_result(&json!({ "name": p.name, "value": secret["secret"] })),
            Err(e) if e.is_not_found() => status_result(&p.name, "not_found"),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(
        description = "Create a secret. Private to the current user unless a project is given, in \
                       which case members of that project can read it."
    )]
    async fn create_secret(
        &self,
        params: Parameters<CreateSecretParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(create_secret_impl(&self.client, params.0).await)
    }

    #[tool(description = "Delete a secret of the current user.")]
    async fn delete_secret(
        &self,
        params: Parameters<DeleteSecretParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let name = params.0.name;
        Ok(match self.client.delete_secret(&name).await {
            Ok(_) => status_result(&name, "deleted"),
            Err(e) if e.is_not_found() => status_result(&name, "not_found"),
            Err(e) => e.into_tool_result(),
        })
    }
}

/// Secret metadata without the value.
fn secret_summary(secret: &Value) -> Value {
    json!({
        "name": secret["name"],
        "owner": secret["owner"],
        "created": format_millis(&secret["addedOn"]),
        "visibility": secret["visibility"],
        "scope": secret["scope"],
    })
}

async fn create_secret_impl(
    client: &HopsworksClient,
    params: CreateSecretParams,
) -> CallToolResult {
    let result = async {
        let project_id = match params.project.as_deref() {
            Some(name) => {
                let project = client.get_project_by_name(name).await?;
                let project = ProjectRef::from_value(&project).ok_or_else(|| {
                    HopsworksError::Other(format!("project {} has no id", name))
                })?;
                Some(project.id)
            }
            None => None,
        };
        client
            .create_secret(&params.name, &params.value, project_id)
            .await?;
        Ok::<_, HopsworksError>(project_id)
    }
    .await;
    match result {
        Ok(project_id) => json_result(&json!({
            "name": params.name,
            "visibility": if project_id.is_some() { "PROJECT" } else { "PRIVATE" },
            "project": params.project,
            "status": "created",
        })),
        Err(e) => e.into_tool_result(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{result_json, result_text, MockHopsworks};

    #[test]
    fn summary_never_carries_value() {
        let secret = json!({
            "name": "db",
            "secret": "hunter2",
            "owner": "alice",
            "visibility": "PRIVATE"
        });
        let summary = secret_summary(&secret);
        assert!(!summary.to_string().contains("hunter2"));
        assert_eq!(summary["owner"], "alice");
    }

    #[tokio::test]
    async fn get_secret_redacts_value() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "users/secrets/db",
            200,
            json!({"items": [{"name": "db", "secret": "hunter2", "visibility": "PRIVATE"}]}),
        )
        .await;
        let client = mock.client().await;
        let server = HopsworksMcpServer::new(client);

        let result = server
            .get_secret(Parameters(SecretParams {
                name: "db".into(),
                owner: None,
            }))
            .await
            .unwrap();
        assert!(!result_text(&result).contains("hunter2"));
        assert_eq!(result_json(&result)["value"], REDACTED);

        let value = server
            .get_secret_value(Parameters(SecretParams {
                name: "db".into(),
                owner: None,
            }))
            .await
            .unwrap();
        assert_eq!(result_json(&value)["value"], "hunter2");
    }

    #[tokio::test]
    async fn project_secret_resolves_project_id() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/getProjectInfo/analytics",
            200,
            json!({"projectId": 77, "projectName": "analytics"}),
        )
        .await;
        mock.on("POST", "users/secrets", 200, json!({})).await;
        let client = mock.client().await;

        let value = result_json(
            &create_secret_impl(
                &client,
                CreateSecretParams {
                    name: "shared".into(),
                    value: "v".into(),
                    project: Some("analytics".into()),
                },
            )
            .await,
        );
        assert_eq!(value["visibility"], "PROJECT");
        assert_eq!(mock.requests_to("POST", "users/secrets").await[0].json()["scope"], 77);
    }
}
