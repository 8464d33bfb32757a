//! Model registry and model serving calls.

use super::{items, segment, ApiRequest, HopsworksClient};
use crate::error::HopsworksError;
use serde_json::Value;

impl HopsworksClient {
    /// The project's own model registry shares the project id.
    async fn registry_path(&self) -> Result<String, HopsworksError> {
        let project = self.project().await?;
        Ok(format!(
            "project/{}/modelregistries/{}",
            project.id, project.id
        ))
    }

    pub async fn get_model_registry(&self) -> Result<Value, HopsworksError> {
        let path = self.registry_path().await?;
        self.get(path).await
    }

    /// Models in the registry, newest version first; only `name` when given.
    pub async fn list_models(&self, name: Option<&str>) -> Result<Vec<Value>, HopsworksError> {
        let path = self.registry_path().await?;
        let resp = self
            .execute(
                ApiRequest::get(format!("{}/models", path))
                    .query_opt("filter_by", name.map(|n| format!("name_eq:{}", n)))
                    .query("sort_by", "version:desc"),
            )
            .await?;
        Ok(items(&resp))
    }

    /// One model version; the latest when `version` is `None`.
    pub async fn get_model(
        &self,
        name: &str,
        version: Option<i64>,
    ) -> Result<Value, HopsworksError> {
        let path = self.registry_path().await?;
        match version {
            Some(v) => {
                let id = format!("{}_{}", name, v);
                self.get(format!("{}/models/{}", path, segment(&id))).await
            }
            None => {
                let resp = self
                    .execute(
                        ApiRequest::get(format!("{}/models", path))
                            .query("filter_by", format!("name_eq:{}", name))
                            .query("sort_by", "version:desc")
                            .query("limit", 1),
                    )
                    .await?;
                items(&resp)
                    .into_iter()
                    .next()
                    .ok_or_else(|| HopsworksError::NotFound(format!("model {}", name)))
            }
        }
    }

    pub async fn delete_model(&self, name: &str, version: i64) -> Result<Value, HopsworksError> {
        let path = self.registry_path().await?;
        self.delete(format!("{}/models/{}", path, segment(&format!("{}_{}", name, version))))
            .await
    }

    // ─── Serving ─────────────────────────────────────────────────────

    pub async fn list_deployments(&self) -> Result<Vec<Value>, HopsworksError> {
        let project = self.project().await?;
        Ok(items(
            &self.get(format!("project/{}/serving", project.id)).await?,
        ))
    }

    pub async fn get_deployment(&self, name: &str) -> Result<Value, HopsworksError> {
        let project = self.project().await?;
        let resp = self
            .execute(ApiRequest::get(format!("project/{}/serving", project.id)).query("name", name))
            .await?;
        match resp {
            Value::Array(list) => list
                .into_iter()
                .find(|d| d["name"] == name)
                .ok_or_else(|| HopsworksError::NotFound(format!("deployment {}", name))),
            other => Ok(other),
        }
    }

    /// Create or update a deployment.
    pub async fn put_deployment(&self, body: Value) -> Result<Value, HopsworksError> {
        let project = self.project().await?;
        self.execute(ApiRequest::put(format!("project/{}/serving", project.id)).json(body))
            .await
    }

    /// `action` is `start` or `stop`.
    pub async fn deployment_action(&self, id: i64, action: &str) -> Result<Value, HopsworksError> {
        let project = self.project().await?;
        self.execute(
            ApiRequest::post(format!("project/{}/serving/{}", project.id, id))
                .query("action", action),
        )
        .await
    }

    pub async fn delete_deployment(&self, id: i64) -> Result<Value, HopsworksError> {
        let project = self.project().await?;
        self.delete(format!("project/{}/serving/{}", project.id, id))
            .await
    }
}
