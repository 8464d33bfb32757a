use super::{segment, ApiRequest, HopsworksClient};
use crate::error::HopsworksError;
use serde_json::Value;

impl HopsworksClient {
    pub async fn list_projects(&self) -> Result<Value, HopsworksError> {
        self.get("project").await
    }

    pub async fn get_project_by_name(&self, name: &str) -> Result<Value, HopsworksError> {
        self.get(format!("project/getProjectInfo/{}", segment(name))).await
    }

    pub async fn get_project_by_id(&self, id: i64) -> Result<Value, HopsworksError> {
        self.execute(ApiRequest::get(format!("project/{}", id)))
            .await
    }

    pub async fn get_current_project(&self) -> Result<Value, HopsworksError> {
        let project = self.project().await?;
        self.get_project_by_name(&project.name).await
    }
}
