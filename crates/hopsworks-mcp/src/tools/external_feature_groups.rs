//! External (on-demand) feature groups: metadata over data that stays in a
//! storage connector's system.

use super::feature_groups::{
    feature_group_details, feature_group_summary, feature_schema, fg_id, next_version,
    update_metadata_impl, FeatureSpec,
};
use super::json_result;
use crate::client::HopsworksClient;
use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub(crate) const ON_DEMAND_TYPE: &str = "onDemandFeaturegroupDTO";

/// Connectors read with SQL; the others read files.
const QUERY_CONNECTORS: &[&str] = &["JDBC", "SNOWFLAKE", "REDSHIFT", "BIGQUERY"];

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateExternalFeatureGroupParams {
    /// Feature group name
    pub name: String,
    /// Storage connector holding the data
    pub storage_connector: String,
    /// Schema of the external data
    pub features: Vec<FeatureSpec>,
    /// Primary key feature names
    pub primary_key: Option<Vec<String>>,
    /// SQL query; required for JDBC, Snowflake, Redshift and BigQuery connectors
    pub query: Option<String>,
    /// File format for file based connectors, e.g. parquet or csv
    pub data_format: Option<String>,
    /// Location within the connector
    pub path: Option<String>,
    /// Extra read options for the storage engine
    pub options: Option<BTreeMap<String, String>>,
    /// Event time feature name
    pub event_time: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Version; latest existing version + 1 when omitted
    pub version: Option<i64>,
    /// Make the feature group available in the online store
    pub online_enabled: Option<bool>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExternalFeatureGroupParams {
    /// Feature group name
    pub name: String,
    /// Version; latest when omitted
    pub version: Option<i64>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListExternalFeatureGroupsParams {
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteExternalFeatureGroupParams {
    /// Feature group name
    pub name: String,
    /// Version to delete
    pub version: i64,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateExternalDescriptionParams {
    /// Feature group name
    pub name: String,
    /// Version; latest when omitted
    pub version: Option<i64>,
    /// New description
    pub description: String,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[tool_router(router = external_feature_groups_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(
        description = "Register an external feature group over data read through a storage \
                       connector. \
                       JDBC-style connectors need a query; file connectors need a data format."
    )]
    async fn create_external_feature_group(
        &self,
        params: Parameters<CreateExternalFeatureGroupParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(create_external_impl(&self.client, params.0).await)
    }

    #[tool(description = "Get an external feature group with its schema and data source.")]
    async fn get_external_feature_group(
        &self,
        params: Parameters<ExternalFeatureGroupParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(get_external_impl(&self.client, params.0).await)
    }

    #[tool(description = "List the external feature groups of a feature store.")]
    async fn list_external_feature_groups(
        &self,
        params: Parameters<ListExternalFeatureGroupsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(list_external_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Delete one version of an external feature group. The external data is \
                       untouched."
    )]
    async fn delete_external_feature_group(
        &self,
        params: Parameters<DeleteExternalFeatureGroupParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(delete_external_impl(&self.client, params.0).await)
    }

    #[tool(description = "Update the description of an external feature group.")]
    async fn update_external_feature_group_description(
        &self,
        params: Parameters<UpdateExternalDescriptionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(update_metadata_impl(
            &self.client,
            p.feature_store.as_deref(),
            &p.name,
            p.version,
            |fg| {
                ensure_external(fg)?;
                fg["description"] = json!(p.description);
                Ok(())
            },
        )
        .await)
    }
}

pub(crate) fn is_spine(fg: &Value) -> bool {
    fg["spine"].as_bool().unwrap_or(false)
}

fn is_external(fg: &Value) -> bool {
    fg["type"] == ON_DEMAND_TYPE && !is_spine(fg)
}

fn ensure_external(fg: &Value) -> Result<(), HopsworksError> {
    if is_external(fg) {
        Ok(())
    } else {
        Err(HopsworksError::InvalidArgument(format!(
            "feature group {} is not an external feature group",
            fg["name"].as_str().unwrap_or_default()
        )))
    }
}

fn external_details(fg: &Value) -> Value {
    let mut details = feature_group_details(fg);
    details["storage_connector"] = fg["storageConnector"]["name"].clone();
    details["connector_type"] = fg["storageConnector"]["storageConnectorType"].clone();
    details["query"] = fg["query"].clone();
    details["data_format"] = fg["dataFormat"].clone();
    details["path"] = fg["path"].clone();
    details["options"] = fg["options"].clone();
    details
}

/// What the connector type needs to locate the data.
fn check_source(
    connector_type: &str,
    query: Option<&str>,
    data_format: Option<&str>,
) -> Result<(), HopsworksError> {
    if QUERY_CONNECTORS.contains(&connector_type) {
        if query.map_or(true, |q| q.trim().is_empty()) {
            return Err(HopsworksError::InvalidArgument(format!(
                "{} connectors need a query",
                connector_type
            )));
        }
    } else if data_format.is_none() {
        return Err(HopsworksError::InvalidArgument(format!(
            "{} connectors need a data_format",
            connector_type
        )));
    }
    Ok(())
}

async fn create_external_impl(
    client: &HopsworksClient,
    params: CreateExternalFeatureGroupParams,
) -> CallToolResult {
    let primary_key = params.primary_key.clone().unwrap_or_default();
    let features = match feature_schema(
        &params.features,
        &primary_key,
        &[],
        params.event_time.as_deref(),
    ) {
        Ok(f) => f,
        Err(e) => return e.into_tool_result(),
    };
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let connector = client
            .get_storage_connector(&fs, &params.storage_connector)
            .await?;
        check_source(
            connector["storageConnectorType"].as_str().unwrap_or_default(),
            params.query.as_deref(),
            params.data_format.as_deref(),
        )?;
        let version = next_version(client, &fs, &params.name, params.version).await?;
        let options: Vec<Value> = params
            .options
            .iter()
            .flatten()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        let body = json!({
            "type": ON_DEMAND_TYPE,
            "name": params.name,
            "version": version,
            "description": params.description.clone().unwrap_or_default(),
            "onlineEnabled": params.online_enabled.unwrap_or(false),
            "eventTime": params.event_time,
            "featurestoreId": fs.id,
            "features": features,
            "storageConnector": connector,
            "query": params.query,
            "dataFormat": params.data_format.as_deref().map(str::to_uppercase),
            "path": params.path,
            "options": options,
            "spine": false,
        });
        tracing::info!(
            name = %params.name,
            version,
            connector = %params.storage_connector,
            "Creating external feature group"
        );
        client.create_feature_group(&fs, body).await
    }
    .await;
    match result {
        Ok(fg) => {
            let mut details = external_details(&fg);
            details["status"] = json!("created");
            json_result(&details)
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn get_external_impl(
    client: &HopsworksClient,
    params: ExternalFeatureGroupParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let fg = client
            .get_feature_group(&fs, &params.name, params.version)
            .await?;
        ensure_external(&fg)?;
        Ok::<_, HopsworksError>(fg)
    }
    .await;
    match result {
        Ok(fg) => json_result(&external_details(&fg)),
        Err(e) => e.into_tool_result(),
    }
}

async fn list_external_impl(
    client: &HopsworksClient,
    params: ListExternalFeatureGroupsParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        client.list_feature_groups(&fs).await
    }
    .await;
    match result {
        Ok(groups) => {
            let external: Vec<Value> = groups
                .iter()
                .filter(|fg| is_external(fg))
                .map(|fg| {
                    let mut summary = feature_group_summary(fg);
                    summary["storage_connector"] = fg["storageConnector"]["name"].clone();
                    summary
                })
                .collect();
            json_result(&json!({ "count": external.len(), "feature_groups": external }))
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn delete_external_impl(
    client: &HopsworksClient,
    params: DeleteExternalFeatureGroupParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let fg = client
            .get_feature_group(&fs, &params.name, Some(params.version))
            .await?;
        ensure_external(&fg)?;
        client.delete_feature_group(&fs, fg_id(&fg)?).await
    }
    .await;
    match result {
        Ok(_) => json_result(&json!({
            "name": params.name,
            "version": params.version,
            "status": "deleted",
        })),
        Err(e) if e.is_not_found() => json_result(&json!({
            "name": params.name,
            "version": params.version,
            "status": "not_found",
        })),
        Err(e) => e.into_tool_result(),
    }
}
