//! Feature group metadata, previews and statistics.

use super::{format_millis, json_result};
use crate::client::{items, FeatureStoreRef, HopsworksClient};
use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};

const DEFAULT_PREVIEW_ROWS: usize = 10;
const MAX_PREVIEW_ROWS: usize = 1000;

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListFeatureGroupsParams {
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FeatureGroupParams {
    /// Feature group name
    pub name: String,
    /// Version; latest when omitted
    pub version: Option<i64>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FeatureGroupByIdParams {
    /// Feature group id
    pub id: i64,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FeatureSpec {
    /// Feature name
    pub name: String,
    /// Offline (Hive) type, e.g. `bigint`, `string`, `double`, `timestamp`
    #[serde(rename = "type")]
    pub feature_type: String,
    /// Feature description
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateFeatureGroupParams {
    /// Feature group name
    pub name: String,
    /// Schema of the feature group
    pub features: Vec<FeatureSpec>,
    /// Primary key feature names
    pub primary_key: Vec<String>,
    /// Partition key feature names
    pub partition_key: Option<Vec<String>>,
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
pub struct UpdateFeatureGroupDescriptionParams {
    /// Feature group name
    pub name: String,
    /// Version; latest when omitted
    pub version: Option<i64>,
    /// New description
    pub description: String,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateFeatureDescriptionParams {
    /// Feature group name
    pub name: String,
    /// Version; latest when omitted
    pub version: Option<i64>,
    /// Feature whose description changes
    pub feature_name: String,
    /// New description
    pub description: String,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteFeatureGroupParams {
    /// Feature group name
    pub name: String,
    /// Version to delete
    pub version: i64,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PreviewFeatureGroupParams {
    /// Feature group name
    pub name: String,
    /// Version; latest when omitted
    pub version: Option<i64>,
    /// Number of rows (default 10, max 1000)
    pub limit: Option<usize>,
    /// Read from the online store instead of the offline store
    pub online: Option<bool>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FeatureGroupStatisticsParams {
    /// Feature group name
    pub name: String,
    /// Version; latest when omitted
    pub version: Option<i64>,
    /// Restrict the result to these features
    pub feature_names: Option<Vec<String>>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[tool_router(router = feature_groups_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(description = "List the feature groups of a feature store.")]
    async fn list_feature_groups(
        &self,
        params: Parameters<ListFeatureGroupsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(list_feature_groups_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Get a feature group's metadata and schema. Returns the latest version when \
                       no version is given."
    )]
    async fn get_feature_group(
        &self,
        params: Parameters<FeatureGroupParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(get_feature_group_impl(&self.client, params.0).await)
    }

    #[tool(description = "Get a feature group's metadata and schema by its id.")]
    async fn get_feature_group_by_id(
        &self,
        params: Parameters<FeatureGroupByIdParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let result = async {
            let fs = self.client.feature_store_ref(p.feature_store.as_deref()).await?;
            self.client.get_feature_group_by_id(&fs, p.id).await
        }
        .await;
        Ok(match result {
            Ok(fg) => json_result(&feature_group_details(&fg)),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(
        description = "Create a cached feature group from a schema. Primary key, partition key \
                       and event time must name declared features. Data is inserted separately."
    )]
    async fn create_feature_group(
        &self,
        params: Parameters<CreateFeatureGroupParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(create_feature_group_impl(&self.client, params.0).await)
    }

    #[tool(description = "Update the description of a feature group.")]
    async fn update_feature_group_description(
        &self,
        params: Parameters<UpdateFeatureGroupDescriptionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(update_metadata_impl(
            &self.client,
            p.feature_store.as_deref(),
            &p.name,
            p.version,
            |fg| {
                fg["description"] = json!(p.description);
                Ok(())
            },
        )
        .await)
    }

    #[tool(description = "Update the description of one feature of a feature group.")]
    async fn update_feature_description(
        &self,
        params: Parameters<UpdateFeatureDescriptionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(update_metadata_impl(
            &self.client,
            p.feature_store.as_deref(),
            &p.name,
            p.version,
            |fg| set_feature_description(fg, &p.feature_name, &p.description),
        )
        .await)
    }

    #[tool(description = "Delete one version of a feature group, including its data.")]
    async fn delete_feature_group(
        &self,
        params: Parameters<DeleteFeatureGroupParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(delete_feature_group_impl(&self.client, params.0).await)
    }

    #[tool(description = "Preview rows of a feature group from the offline or online store.")]
    async fn preview_feature_group(
        &self,
        params: Parameters<PreviewFeatureGroupParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(preview_feature_group_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Get the most recently computed descriptive statistics of a feature group."
    )]
    async fn get_feature_group_statistics(
        &self,
        params: Parameters<FeatureGroupStatisticsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(statistics_impl(&self.client, params.0).await)
    }
}

pub(crate) fn key_names(fg: &Value, flag: &str) -> Vec<Value> {
    fg["features"]
        .as_array()
        .map(|fs| {
            fs.iter()
                .filter(|f| f[flag].as_bool().unwrap_or(false))
                .map(|f| f["name"].clone())
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn feature_group_summary(fg: &Value) -> Value {
    json!({
        "id": fg["id"],
        "name": fg["name"],
        "version": fg["version"],
        "description": fg["description"],
        "online_enabled": fg["onlineEnabled"],
        "type": fg["type"],
        "created": format_millis(&fg["created"]),
    })
}

pub(crate) fn feature_group_details(fg: &Value) -> Value {
    let features: Vec<Value> = fg["features"]
        .as_array()
        .map(|fs| {
            fs.iter()
                .map(|f| {
                    json!({
                        "name": f["name"],
                        "type": f["type"],
                        "description": f["description"],
                        "primary": f["primary"].as_bool().unwrap_or(false),
                        "partition": f["partition"].as_bool().unwrap_or(false),
                        "event_time": fg["eventTime"].is_string() && f["name"] == fg["eventTime"],
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    let mut details = feature_group_summary(fg);
    details["primary_key"] = json!(key_names(fg, "primary"));
    details["partition_key"] = json!(key_names(fg, "partition"));
    details["event_time"] = fg["eventTime"].clone();
    details["time_travel_format"] = fg["timeTravelFormat"].clone();
    details["creator"] = fg["creator"]["email"].clone();
    details["features"] = json!(features);
    details
}

async fn list_feature_groups_impl(
    client: &HopsworksClient,
    params: ListFeatureGroupsParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        client.list_feature_groups(&fs).await
    }
    .await;
    match result {
        Ok(groups) => {
            let summaries: Vec<Value> = groups.iter().map(feature_group_summary).collect();
            json_result(&json!({ "count": summaries.len(), "feature_groups": summaries }))
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn get_feature_group_impl(
    client: &HopsworksClient,
    params: FeatureGroupParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        client
            .get_feature_group(&fs, &params.name, params.version)
            .await
    }
    .await;
    match result {
        Ok(fg) => json_result(&feature_group_details(&fg)),
        Err(e) => e.into_tool_result(),
    }
}

fn feature_group_schema(params: &CreateFeatureGroupParams) -> Result<Vec<Value>, HopsworksError> {
    feature_schema(
        &params.features,
        &params.primary_key,
        params.partition_key.as_deref().unwrap_or_default(),
        params.event_time.as_deref(),
    )
}

/// Check that every key names a declared feature and build the feature list.
pub(crate) fn feature_schema(
    features: &[FeatureSpec],
    primary_key: &[String],
    partition_key: &[String],
    event_time: Option<&str>,
) -> Result<Vec<Value>, HopsworksError> {
    if features.is_empty() {
        return Err(HopsworksError::InvalidArgument(
            "a feature group needs at least one feature".into(),
        ));
    }
    let declared: Vec<&str> = features.iter().map(|f| f.name.as_str()).collect();
    let keys = primary_key
        .iter()
        .map(|k| ("primary key", k.as_str()))
        .chain(partition_key.iter().map(|k| ("partition key", k.as_str())))
        .chain(event_time.map(|k| ("event time", k)));
    for (role, key) in keys {
        if !declared.contains(&key) {
            return Err(HopsworksError::InvalidArgument(format!(
                "{} {} is not a declared feature (features: {})",
                role,
                key,
                declared.join(", ")
            )));
        }
    }
    Ok(features
        .iter()
        .map(|f| {
            json!({
                "name": f.name,
                "type": f.feature_type,
                "description": f.description.clone().unwrap_or_default(),
                "primary": primary_key.contains(&f.name),
                "partition": partition_key.contains(&f.name),
            })
        })
        .collect())
}

/// `version` when given, else one past the latest existing version.
pub(crate) async fn next_version(
    client: &HopsworksClient,
    fs: &FeatureStoreRef,
    name: &str,
    version: Option<i64>,
) -> Result<i64, HopsworksError> {
    match version {
        Some(v) => Ok(v),
        None => Ok(client
            .latest_feature_group_version(fs, name)
            .await?
            .unwrap_or(0)
            + 1),
    }
}

async fn create_feature_group_impl(
    client: &HopsworksClient,
    params: CreateFeatureGroupParams,
) -> CallToolResult {
    let features = match feature_group_schema(&params) {
        Ok(f) => f,
        Err(e) => return e.into_tool_result(),
    };
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let version = next_version(client, &fs, &params.name, params.version).await?;
        let body = json!({
            "type": "cachedFeaturegroupDTO",
            "name": params.name,
            "version": version,
            "description": params.description.clone().unwrap_or_default(),
            "onlineEnabled": params.online_enabled.unwrap_or(false),
            "timeTravelFormat": "HUDI",
            "eventTime": params.event_time,
            "featurestoreId": fs.id,
            "features": features,
        });
        tracing::info!(name = %params.name, version, "Creating feature group");
        client.create_feature_group(&fs, body).await
    }
    .await;
    match result {
        Ok(fg) => {
            let mut details = feature_group_details(&fg);
            details["status"] = json!("created");
            json_result(&details)
        }
        Err(e) => e.into_tool_result(),
    }
}

fn set_feature_description(
    fg: &mut Value,
    feature_name: &str,
    description: &str,
) -> Result<(), HopsworksError> {
    let feature = fg["features"]
        .as_array_mut()
        .and_then(|fs| fs.iter_mut().find(|f| f["name"] == feature_name))
        .ok_or_else(|| {
            HopsworksError::InvalidArgument(format!("feature {} does not exist", feature_name))
        })?;
    feature["description"] = json!(description);
    Ok(())
}

pub(crate) async fn update_metadata_impl<F>(
    client: &HopsworksClient,
    feature_store: Option<&str>,
    name: &str,
    version: Option<i64>,
    edit: F,
) -> CallToolResult
where
    F: FnOnce(&mut Value) -> Result<(), HopsworksError>,
{
    let result = async {
        let fs = client.feature_store_ref(feature_store).await?;
        let mut fg = client.get_feature_group(&fs, name, version).await?;
        edit(&mut fg)?;
        client.update_feature_group_metadata(&fs, fg).await
    }
    .await;
    match result {
        Ok(fg) => {
            let mut details = feature_group_details(&fg);
            details["status"] = json!("updated");
            json_result(&details)
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn delete_feature_group_impl(
    client: &HopsworksClient,
    params: DeleteFeatureGroupParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let fg = client
            .get_feature_group(&fs, &params.name, Some(params.version))
            .await?;
        let id = fg_id(&fg)?;
        client.delete_feature_group(&fs, id).await
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

pub(crate) fn fg_id(fg: &Value) -> Result<i64, HopsworksError> {
    fg["id"]
        .as_i64()
        .ok_or_else(|| HopsworksError::Other(format!("feature group without id: {}", fg)))
}

/// Preview rows come back as `[{columnName, value}]` lists.
fn preview_rows(preview: &Value) -> Vec<Value> {
    items(preview)
        .iter()
        .map(|row| {
            let columns: Map<String, Value> = row["row"]
                .as_array()
                .map(|cols| {
                    cols.iter()
                        .filter_map(|c| {
                            c["columnName"]
                                .as_str()
                                .map(|name| (name.to_string(), c["value"].clone()))
                        })
                        .collect()
                })
                .unwrap_or_default();
            Value::Object(columns)
        })
        .collect()
}

async fn preview_feature_group_impl(
    client: &HopsworksClient,
    params: PreviewFeatureGroupParams,
) -> CallToolResult {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PREVIEW_ROWS)
        .clamp(1, MAX_PREVIEW_ROWS);
    let online = params.online.unwrap_or(false);
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let fg = client
            .get_feature_group(&fs, &params.name, params.version)
            .await?;
        if online && !fg["onlineEnabled"].as_bool().unwrap_or(false) {
            return Err(HopsworksError::InvalidArgument(format!(
                "feature group {} is not online enabled",
                params.name
            )));
        }
        let preview = client
            .preview_feature_group(&fs, fg_id(&fg)?, online, limit)
            .await?;
        Ok((fg, preview))
    }
    .await;
    match result {
        Ok((fg, preview)) => {
            let rows = preview_rows(&preview);
            json_result(&json!({
                "name": fg["name"],
                "version": fg["version"],
                "storage": if online { "online" } else { "offline" },
                "row_count": rows.len(),
                "rows": rows,
            }))
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn statistics_impl(
    client: &HopsworksClient,
    params: FeatureGroupStatisticsParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let fg = client
            .get_feature_group(&fs, &params.name, params.version)
            .await?;
        let stats = client.feature_group_statistics(&fs, fg_id(&fg)?).await?;
        Ok::<_, HopsworksError>((fg, stats))
    }
    .await;
    let (fg, stats) = match result {
        Ok(v) => v,
        Err(e) => return e.into_tool_result(),
    };

    let Some(latest) = items(&stats).into_iter().next() else {
        return json_result(&json!({
            "name": params.name,
            "version": fg["version"],
            "status": "not_found",
            "message": "No statistics found for this feature group",
        }));
    };

    let wanted = params.feature_names.unwrap_or_default();
    let mut features = Map::new();
    for fds in latest["featureDescriptiveStatistics"]
        .as_array()
        .cloned()
        .unwrap_or_default()
    {
        let Some(name) = fds["featureName"].as_str() else {
            continue;
        };
        if !wanted.is_empty() && !wanted.iter().any(|w| w == name) {
            continue;
        }
        features.insert(
            name.to_string(),
            json!({
                "count": fds["count"],
                "distinct_count": fds["distinctness"],
                "unique_count": fds["uniqueness"],
                "mean": fds["mean"],
                "max": fds["max"],
                "min": fds["min"],
                "std_dev": fds["stddev"],
                "completeness": fds["completeness"],
            }),
        );
    }
    json_result(&json!({
        "name": params.name,
        "version": fg["version"],
        "computation_time": format_millis(&latest["computationTime"]),
        "features": features,
        "status": "success",
    }))
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

    fn create_params() -> CreateFeatureGroupParams {
        CreateFeatureGroupParams {
            name: "sales".into(),
            features: vec![
                FeatureSpec { name: "id".into(), feature_type: "bigint".into(), description: None },
                FeatureSpec {
                    name: "ts".into(),
                    feature_type: "timestamp".into(),
                    description: None,
                },
                FeatureSpec {
                    name: "day".into(),
                    feature_type: "string".into(),
                    description: None,
                },
            ],
            primary_key: vec!["id".into()],
            partition_key: Some(vec!["day".into()]),
            event_time: Some("ts".into()),
            description: None,
            version: None,
            online_enabled: None,
            feature_store: None,
        }
    }

    #[test]
    fn schema_marks_keys() {
        let schema = feature_group_schema(&create_params()).unwrap();
        assert_eq!(schema[0]["primary"], true);
        assert_eq!(schema[2]["partition"], true);
        assert_eq!(schema[1]["primary"], false);
    }

    #[test]
    fn schema_rejects_undeclared_keys() {
        let mut params = create_params();
        params.primary_key = vec!["customer_id".into()];
        let err = feature_group_schema(&params).unwrap_err();
        assert!(err.to_string().contains("customer_id"));

        let mut params = create_params();
        params.event_time = Some("event_ts".into());
        assert!(feature_group_schema(&params).is_err());
    }

    #[tokio::test]
    async fn create_uses_next_version() {
        let mock = fs_mock().await;
        mock.on(
            "GET",
            &format!("{}/featuregroups/sales", FS),
            200,
            json!([{"id": 1, "version": 1}, {"id": 2, "version": 2}]),
        )
        .await;
        mock.on(
            "POST",
            &format!("{}/featuregroups", FS),
            201,
            json!({"id": 3, "name": "sales", "version": 3, "features": []}),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(&create_feature_group_impl(&client, create_params()).await);
        assert_eq!(value["status"], "created");

        let sent = mock.requests_to("POST", &format!("{}/featuregroups", FS)).await[0].json();
        assert_eq!(sent["version"], 3);
        assert_eq!(sent["type"], "cachedFeaturegroupDTO");
        assert_eq!(sent["eventTime"], "ts");
    }

    #[tokio::test]
    async fn feature_description_update_sends_full_dto() {
        let mock = fs_mock().await;
        mock.on(
            "GET",
            &format!("{}/featuregroups/sales", FS),
            200,
            json!([{"id": 2, "name": "sales", "version": 1, "features": [
                {"name": "id", "description": ""}, {"name": "amount", "description": ""}
            ]}]),
        )
        .await;
        mock.on("PUT", &format!("{}/featuregroups/2", FS), 200, json!({"id": 2}))
            .await;
        let client = mock.client().await;

        let result = update_metadata_impl(&client, None, "sales", None, |fg| {
            set_feature_description(fg, "amount", "Order total in EUR")
        })
        .await;
        assert_eq!(result_json(&result)["status"], "updated");

        let put = &mock.requests_to("PUT", &format!("{}/featuregroups/2", FS)).await[0];
        assert_eq!(put.query_param("updateMetadata").as_deref(), Some("true"));
        assert_eq!(put.json()["features"][1]["description"], "Order total in EUR");

        let missing = update_metadata_impl(&client, None, "sales", None, |fg| {
            set_feature_description(fg, "nope", "x")
        })
        .await;
        assert_eq!(missing.is_error, Some(true));
    }

    #[test]
    fn preview_rows_become_objects() {
        let rows = preview_rows(&json!({"items": [
            {"row": [{"columnName": "id", "value": "1"}, {"columnName": "amount", "value": "9.5"}]}
        ]}));
        assert_eq!(rows, vec![json!({"id": "1", "amount": "9.5"})]);
    }

    #[tokio::test]
    async fn statistics_filtered_by_feature() {
        let mock = fs_mock().await;
        mock.on(
            "GET",
            &format!("{}/featuregroups/sales", FS),
            200,
            json!([{"id": 2, "name": "sales", "version": 1}]),
        )
        .await;
        mock.on(
            "GET",
            &format!("{}/featuregroups/2/statistics", FS),
            200,
            json!({"count": 1, "items": [{"computationTime": 0, "featureDescriptiveStatistics": [
                {"featureName": "id", "count": 10},
                {"featureName": "amount", "count": 10, "mean": 4.2}
            ]}]}),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(
            &statistics_impl(
                &client,
                FeatureGroupStatisticsParams {
                    name: "sales".into(),
                    version: None,
                    feature_names: Some(vec!["amount".into()]),
                    feature_store: None,
                },
            )
            .await,
        );
        assert_eq!(value["features"]["amount"]["mean"], 4.2);
        assert!(value["features"].get("id").is_none());
    }

    #[tokio::test]
    async fn delete_missing_reports_not_found() {
        let mock = fs_mock().await;
        let client = mock.client().await;
        let value = result_json(
            &delete_feature_group_impl(
                &client,
                DeleteFeatureGroupParams {
                    name: "ghost".into(),
                    version: 1,
                    feature_store: None,
                },
            )
            .await,
        );
        assert_eq!(value["status"], "not_found");
    }
}
