//! Spine groups: feature group metadata (keys, event time, schema) whose
//! rows are supplied at read time instead of stored in the feature store.

use super::external_feature_groups::{is_spine, ON_DEMAND_TYPE};
use super::feature_groups::{feature_group_details, feature_schema, fg_id, FeatureSpec};
use super::json_result;
use crate::client::HopsworksClient;
use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetOrCreateSpineGroupParams {
    /// Spine group name
    pub name: String,
    /// Primary key feature names
    pub primary_key: Vec<String>,
    /// Event time feature name
    pub event_time: Option<String>,
    /// Schema; inferred from `data` when omitted
    pub features: Option<Vec<FeatureSpec>>,
    /// Sample rows (JSON objects) the schema is inferred from
    pub data: Option<Vec<Map<String, Value>>>,
    /// Description
    pub description: Option<String>,
    /// Version; the latest existing version, or 1, when omitted
    pub version: Option<i64>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SpineGroupParams {
    /// Spine group name
    pub name: String,
    /// Version; latest when omitted
    pub version: Option<i64>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteSpineGroupParams {
    /// Spine group name
    pub name: String,
    /// Version to delete
    pub version: i64,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[tool_router(router = spine_groups_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(
        description = "Get a spine group, or create it when it does not exist. The schema comes \
                       from `features` \
                       or is inferred from sample `data` rows; rows are not stored."
    )]
    async fn get_or_create_spine_group(
        &self,
        params: Parameters<GetOrCreateSpineGroupParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(get_or_create_impl(&self.client, params.0).await)
    }

    #[tool(description = "Get a spine group's keys, event time and schema.")]
    async fn get_spine_group(
        &self,
        params: Parameters<SpineGroupParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let result = async {
            let fs = self.client.feature_store_ref(p.feature_store.as_deref()).await?;
            let fg = self.client.get_feature_group(&fs, &p.name, p.version).await?;
            ensure_spine(&fg)?;
            Ok::<_, HopsworksError>(fg)
        }
        .await;
        Ok(match result {
            Ok(fg) => json_result(&feature_group_details(&fg)),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Delete one version of a spine group.")]
    async fn delete_spine_group(
        &self,
        params: Parameters<DeleteSpineGroupParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(delete_impl(&self.client, params.0).await)
    }
}

fn ensure_spine(fg: &Value) -> Result<(), HopsworksError> {
    if is_spine(fg) {
        Ok(())
    } else {
        Err(HopsworksError::InvalidArgument(format!(
            "feature group {} is not a spine group",
            fg["name"].as_str().unwrap_or_default()
        )))
    }
}

/// Offline type of a JSON value; `None` for null.
fn json_type(value: &Value) -> Option<&'static str> {
    match value {
        Value::Bool(_) => Some("boolean"),
        Value::Number(n) if n.is_f64() => Some("double"),
        Value::Number(_) => Some("bigint"),
        Value::String(_) => Some("string"),
        Value::Array(_) | Value::Object(_) => Some("string"),
        Value::Null => None,
    }
}

/// Infer a schema from sample rows. A column with both integers and floats
/// is `double`; an all-null column is `string`; the event time column is a
/// `timestamp`.
fn infer_schema(rows: &[Map<String, Value>], event_time: Option<&str>) -> Vec<FeatureSpec> {
    let mut columns: Vec<(String, Option<&'static str>)> = Vec::new();
    for row in rows {
        for (name, value) in row {
            let seen = json_type(value);
            match columns.iter_mut().find(|column| column.0 == *name) {
                Some(column) => {
                    let widen = column.1 == Some("bigint") && seen == Some("double");
                    if column.1.is_none() || widen {
                        column.1 = seen;
                    }
                }
                None => columns.push((name.clone(), seen)),
            }
        }
    }
    columns
        .into_iter()
        .map(|(name, ty)| {
            let feature_type = if event_time == Some(name.as_str()) {
                "timestamp"
            } else {
                ty.unwrap_or("string")
            };
            FeatureSpec {
                name,
                feature_type: feature_type.to_string(),
                description: None,
            }
        })
        .collect()
}

async fn get_or_create_impl(
    client: &HopsworksClient,
    params: GetOrCreateSpineGroupParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        match client.get_feature_group(&fs, &params.name, params.version).await {
            Ok(existing) => {
                ensure_spine(&existing)?;
                return Ok((existing, "exists"));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let specs = match (&params.features, &params.data) {
            (Some(features), _) if !features.is_empty() => features.clone(),
            (_, Some(rows)) if !rows.is_empty() => {
                infer_schema(rows, params.event_time.as_deref())
            }
            _ => {
                return Err(HopsworksError::InvalidArgument(
                    "a new spine group needs features or sample data".into(),
                ))
            }
        };
        let features = feature_schema(
            &specs,
            &params.primary_key,
            &[],
            params.event_time.as_deref(),
        )?;
        let version = params.version.unwrap_or(1);
        let body = json!({
            "type": ON_DEMAND_TYPE,
            "name": params.name,
            "version": version,
            "description": params.description.clone().unwrap_or_default(),
            "onlineEnabled": false,
            "eventTime": params.event_time,
            "featurestoreId": fs.id,
            "features": features,
            "spine": true,
        });
        tracing::info!(name = %params.name, version, "Creating spine group");
        Ok((client.create_feature_group(&fs, body).await?, "created"))
    }
    .await;
    match result {
        Ok((fg, status)) => {
            let mut details = feature_group_details(&fg);
            if let Some(rows) = &params.data {
                details["rows_count"] = json!(rows.len());
            }
            details["status"] = json!(status);
            json_result(&details)
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn delete_impl(client: &HopsworksClient, params: DeleteSpineGroupParams) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let fg = client
            .get_feature_group(&fs, &params.name, Some(params.version))
            .await?;
        ensure_spine(&fg)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{result_json, MockHopsworks};

    const FS: &str = "project/119/featurestores/67";

    async fn fs_mock() -> MockHopsworks {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/featurestores/demo_featurestore",
            200,
            json!({"featurestoreId": 67, "featurestoreName": "demo_featurestore"}),
        )
        .await;
        mock
    }

    fn rows(value: Value) -> Vec<Map<String, Value>> {
        serde_json::from_value(value).unwrap()
    }

    fn create_params(data: Value) -> GetOrCreateSpineGroupParams {
        GetOrCreateSpineGroupParams {
            name: "labels".into(),
            primary_key: vec!["customer_id".into()],
            event_time: Some("ts".into()),
            features: None,
            data: Some(rows(data)),
            description: None,
            version: None,
            feature_store: None,
        }
    }

    #[test]
    fn infers_widened_types() {
        let schema = infer_schema(
            &rows(json!([
                {"customer_id": 1, "score": 3, "note": null, "ts": "2024-01-01T00:00:00Z"},
                {"customer_id": 2, "score": 4.5, "note": null, "ts": "2024-01-02T00:00:00Z"}
            ])),
            Some("ts"),
        );
        let ty = |name: &str| {
            schema
                .iter()
                .find(|f| f.name == name)
                .map(|f| f.feature_type.clone())
        };
        assert_eq!(ty("customer_id").as_deref(), Some("bigint"));
        assert_eq!(ty("score").as_deref(), Some("double"));
        assert_eq!(ty("note").as_deref(), Some("string"));
        assert_eq!(ty("ts").as_deref(), Some("timestamp"));
    }

    #[tokio::test]
    async fn creates_first_version_from_data() {
        let mock = fs_mock().await;
        mock.on(
            "POST",
            &format!("{}/featuregroups", FS),
            201,
            json!({"id": 4, "name": "labels", "version": 1, "spine": true, "features": []}),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(
            &get_or_create_impl(
                &client,
                create_params(json!([
                    {"customer_id": 1, "ts": "2024-01-01T00:00:00Z", "churned": true}
                ])),
            )
            .await,
        );
        assert_eq!(value["status"], "created");
        assert_eq!(value["rows_count"], 1);

        let sent = mock.requests_to("POST", &format!("{}/featuregroups", FS)).await[0].json();
        assert_eq!(sent["spine"], true);
        assert_eq!(sent["version"], 1);
        let churned = sent["features"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["name"] == "churned")
            .cloned()
            .unwrap();
        assert_eq!(churned["type"], "boolean");
    }

    #[tokio::test]
    async fn existing_spine_is_returned() {
        let mock = fs_mock().await;
        mock.on(
            "GET",
            &format!("{}/featuregroups/labels", FS),
            200,
            json!([
                {"id": 4, "name": "labels", "version": 2, "spine": true, "type": ON_DEMAND_TYPE}
            ]),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(&get_or_create_impl(&client, create_params(json!([]))).await);
        assert_eq!(value["status"], "exists");
        assert_eq!(value["version"], 2);
        assert!(mock.requests_to("POST", &format!("{}/featuregroups", FS)).await.is_empty());
    }

    #[tokio::test]
    async fn new_spine_needs_a_schema() {
        let mock = fs_mock().await;
        let client = mock.client().await;
        let result = get_or_create_impl(&client, create_params(json!([]))).await;
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn cached_group_is_not_deleted() {
        let mock = fs_mock().await;
        mock.on(
            "GET",
            &format!("{}/featuregroups/sales", FS),
            200,
            json!([{"id": 1, "name": "sales", "version": 1, "type": "cachedFeaturegroupDTO"}]),
        )
        .await;
        let client = mock.client().await;

        let result = delete_impl(
            &client,
            DeleteSpineGroupParams {
                name: "sales".into(),
                version: 1,
                feature_store: None,
            },
        )
        .await;
        assert_eq!(result.is_error, Some(true));
    }
}
