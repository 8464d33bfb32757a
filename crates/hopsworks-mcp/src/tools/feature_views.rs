//! Feature views and their training datasets.

use super::feature_store::{feature_names, select_query};
use super::{format_millis, json_result, parse_datetime};
use crate::client::HopsworksClient;
use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

const DATA_FORMATS: &[&str] = &["parquet", "csv", "tsv", "avro", "orc", "json"];

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListFeatureViewsParams {
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FeatureViewParams {
    /// Feature view name
    pub name: String,
    /// Version; latest when omitted
    pub version: Option<i64>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateFeatureViewParams {
    /// Feature view name
    pub name: String,
    /// Feature group the view selects from
    pub feature_group: String,
    /// Feature group version; latest when omitted
    pub feature_group_version: Option<i64>,
    /// Features to select; all when omitted
    pub features: Option<Vec<String>>,
    /// Selected features used as training labels
    pub labels: Option<Vec<String>>,
    /// Description
    pub description: Option<String>,
    /// Version; latest existing version + 1 when omitted
    pub version: Option<i64>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateFeatureViewDescriptionParams {
    /// Feature view name
    pub name: String,
    /// Version
    pub version: i64,
    /// New description
    pub description: String,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteFeatureViewParams {
    /// Feature view name
    pub name: String,
    /// Version to delete
    pub version: i64,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BatchQueryParams {
    /// Feature view name
    pub name: String,
    /// Version; latest when omitted
    pub version: Option<i64>,
    /// Start of the event time window (ISO-8601)
    pub start_time: Option<String>,
    /// End of the event time window (ISO-8601)
    pub end_time: Option<String>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateTrainingDatasetParams {
    /// Feature view name
    pub feature_view: String,
    /// Feature view version; latest when omitted
    pub version: Option<i64>,
    /// Description
    pub description: Option<String>,
    /// File format: parquet, csv, tsv, avro, orc or json (default parquet)
    pub data_format: Option<String>,
    /// Start of the event time window (ISO-8601)
    pub start_time: Option<String>,
    /// End of the event time window (ISO-8601)
    pub end_time: Option<String>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteTrainingDatasetParams {
    /// Feature view name
    pub feature_view: String,
    /// Feature view version
    pub version: i64,
    /// Training dataset version
    pub training_dataset_version: i64,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TrainingDatasetParams {
    /// Feature view name
    pub feature_view: String,
    /// Feature view version; latest when omitted
    pub version: Option<i64>,
    /// Training dataset version
    pub training_dataset_version: i64,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[tool_router(router = feature_views_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(description = "List the feature views of a feature store.")]
    async fn list_feature_views(
        &self,
        params: Parameters<ListFeatureViewsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let result = async {
            let fs = self.client.feature_store_ref(p.feature_store.as_deref()).await?;
            self.client.list_feature_views(&fs).await
        }
        .await;
        Ok(match result {
            Ok(views) => {
                let summaries: Vec<Value> = views.iter().map(feature_view_summary).collect();
                json_result(&json!({ "count": summaries.len(), "feature_views": summaries }))
            }
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(
        description = "Get a feature view with its features and labels. Returns the latest \
                       version when no version is given."
    )]
    async fn get_feature_view(
        &self,
        params: Parameters<FeatureViewParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let result = async {
            let fs = self.client.feature_store_ref(p.feature_store.as_deref()).await?;
            self.client.get_feature_view(&fs, &p.name, p.version).await
        }
        .await;
        Ok(match result {
            Ok(fv) => json_result(&feature_view_details(&fv)),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(
        description = "Create a feature view selecting features from a feature group. Labels must \
                       be among the selected features."
    )]
    async fn create_feature_view(
        &self,
        params: Parameters<CreateFeatureViewParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(create_feature_view_impl(&self.client, params.0).await)
    }

    #[tool(description = "Update the description of a feature view version.")]
    async fn update_feature_view_description(
        &self,
        params: Parameters<UpdateFeatureViewDescriptionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let result = async {
            let fs = self.client.feature_store_ref(p.feature_store.as_deref()).await?;
            let mut fv = self
                .client
                .get_feature_view(&fs, &p.name, Some(p.version))
                .await?;
            fv["description"] = json!(p.description);
            self.client
                .update_feature_view(&fs, &p.name, p.version, fv)
                .await
        }
        .await;
        Ok(match result {
            Ok(_) => json_result(&json!({
                "name": p.name,
                "version": p.version,
                "description": p.description,
                "status": "updated",
            })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Delete a feature view version and its training dataset metadata.")]
    async fn delete_feature_view(
        &self,
        params: Parameters<DeleteFeatureViewParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let result = async {
            let fs = self.client.feature_store_ref(p.feature_store.as_deref()).await?;
            self.client.delete_feature_view(&fs, &p.name, p.version).await
        }
        .await;
        Ok(match result {
            Ok(_) => {
                json_result(&json!({ "name": p.name, "version": p.version, "status": "deleted" }))
            }
            Err(e) if e.is_not_found() => {
                json_result(&json!({ "name": p.name, "version": p.version, "status": "not_found" }))
            }
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(
        description = "Get the SQL that reads a feature view's batch data, optionally restricted \
                       to an event time window."
    )]
    async fn get_batch_query(
        &self,
        params: Parameters<BatchQueryParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(batch_query_impl(&self.client, params.0).await)
    }

    #[tool(description = "List the training datasets of a feature view.")]
    async fn list_training_datasets(
        &self,
        params: Parameters<FeatureViewParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let result = async {
            let fs = self.client.feature_store_ref(p.feature_store.as_deref()).await?;
            let version = resolve_version(&self.client, &fs, &p.name, p.version).await?;
            self.client.list_training_datasets(&fs, &p.name, version).await
        }
        .await;
        Ok(match result {
            Ok(tds) => {
                let summaries: Vec<Value> = tds.iter().map(training_dataset_summary).collect();
                json_result(&json!({ "count": summaries.len(), "training_datasets": summaries }))
            }
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(
        description = "Create a training dataset from a feature view and launch the job that \
                       materializes it. Returns the training dataset version and job name."
    )]
    async fn create_training_dataset(
        &self,
        params: Parameters<CreateTrainingDatasetParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(create_training_dataset_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Get one training dataset version of a feature view, with its latest \
                       statistics when computed."
    )]
    async fn get_training_dataset(
        &self,
        params: Parameters<TrainingDatasetParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(get_training_dataset_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Launch the job that computes descriptive statistics of a training dataset. \
                       Returns the job name."
    )]
    async fn compute_training_dataset_statistics(
        &self,
        params: Parameters<TrainingDatasetParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(compute_statistics_impl(&self.client, params.0).await)
    }

    #[tool(description = "Delete one version of a feature view's training dataset.")]
    async fn delete_training_dataset(
        &self,
        params: Parameters<DeleteTrainingDatasetParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let result = async {
            let fs = self.client.feature_store_ref(p.feature_store.as_deref()).await?;
            self.client
                .delete_training_dataset(
                    &fs,
                    &p.feature_view,
                    p.version,
                    p.training_dataset_version,
                )
                .await
        }
        .await;
        Ok(match result {
            Ok(_) => json_result(&json!({
                "feature_view": p.feature_view,
                "version": p.version,
                "training_dataset_version": p.training_dataset_version,
                "status": "deleted",
            })),
            Err(e) => e.into_tool_result(),
        })
    }
}

async fn resolve_version(
    client: &HopsworksClient,
    fs: &crate::client::FeatureStoreRef,
    name: &str,
    version: Option<i64>,
) -> Result<i64, HopsworksError> {
    match version {
        Some(v) => Ok(v),
        None => client
            .get_feature_view(fs, name, None)
            .await?["version"]
            .as_i64()
            .ok_or_else(|| HopsworksError::Other(format!("feature view {} without version", name))),
    }
}

fn feature_view_summary(fv: &Value) -> Value {
    json!({
        "id": fv["id"],
        "name": fv["name"],
        "version": fv["version"],
        "description": fv["description"],
        "created": format_millis(&fv["created"]),
    })
}

fn feature_view_details(fv: &Value) -> Value {
    let features = fv["features"].as_array().cloned().unwrap_or_default();
    let names = |label: bool| -> Vec<Value> {
        features
            .iter()
            .filter(|f| f["label"].as_bool().unwrap_or(false) == label)
            .map(|f| f["name"].clone())
            .collect()
    };
    let mut details = feature_view_summary(fv);
    details["features"] = json!(names(false));
    details["labels"] = json!(names(true));
    details["feature_groups"] = json!(features
        .iter()
        .filter_map(|f| f["featureGroup"]["name"].as_str())
        .collect::<std::collections::BTreeSet<_>>());
    details
}

fn training_dataset_summary(td: &Value) -> Value {
    json!({
        "id": td["id"],
        "name": td["name"],
        "version": td["version"],
        "description": td["description"],
        "data_format": td["dataFormat"],
        "event_start_time": format_millis(&td["eventStartTime"]),
        "event_end_time": format_millis(&td["eventEndTime"]),
        "created": format_millis(&td["created"]),
    })
}

/// Labels must be selected features.
fn check_labels(selected: &[String], labels: &[String]) -> Result<(), HopsworksError> {
    match labels.iter().find(|l| !selected.contains(l)) {
        Some(label) => Err(HopsworksError::InvalidArgument(format!(
            "label {} is not one of the selected features ({})",
            label,
            selected.join(", ")
        ))),
        None => Ok(()),
    }
}

async fn create_feature_view_impl(
    client: &HopsworksClient,
    params: CreateFeatureViewParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let fg = client
            .get_feature_group(&fs, &params.feature_group, params.feature_group_version)
            .await?;
        let query = select_query(&fs, &fg, params.features.as_deref())?;
        let selected = match &params.features {
            Some(f) if !f.is_empty() => f.clone(),
            _ => feature_names(&fg),
        };
        let labels = params.labels.clone().unwrap_or_default();
        check_labels(&selected, &labels)?;

        let version = match params.version {
            Some(v) => v,
            None => match client.get_feature_view(&fs, &params.name, None).await {
                Ok(latest) => latest["version"].as_i64().unwrap_or(0) + 1,
                Err(e) if e.is_not_found() => 1,
                Err(e) => return Err(e),
            },
        };
        let features: Vec<Value> = selected
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "label": labels.contains(name),
                    "featureGroup": { "id": fg["id"] },
                })
            })
            .collect();
        let body = json!({
            "name": params.name,
            "version": version,
            "description": params.description.clone().unwrap_or_default(),
            "featurestoreId": fs.id,
            "query": query,
            "features": features,
            "type": "featureViewDTO",
        });
        tracing::info!(name = %params.name, version, "Creating feature view");
        client.create_feature_view(&fs, body).await
    }
    .await;
    match result {
        Ok(fv) => {
            let mut details = feature_view_details(&fv);
            details["status"] = json!("created");
            json_result(&details)
        }
        Err(e) => e.into_tool_result(),
    }
}

fn millis(input: Option<&str>) -> Result<Option<i64>, HopsworksError> {
    input
        .map(|t| parse_datetime(t).map(|t| t.timestamp_millis()))
        .transpose()
}

async fn batch_query_impl(client: &HopsworksClient, params: BatchQueryParams) -> CallToolResult {
    let result = async {
        let start = millis(params.start_time.as_deref())?;
        let end = millis(params.end_time.as_deref())?;
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let version = resolve_version(client, &fs, &params.name, params.version).await?;
        let query = client
            .feature_view_batch_query(&fs, &params.name, version, start, end)
            .await?;
        let sql = client.construct_query(query).await?;
        Ok::<_, HopsworksError>((version, sql))
    }
    .await;
    match result {
        Ok((version, sql)) => json_result(&json!({
            "name": params.name,
            "version": version,
            "start_time": params.start_time,
            "end_time": params.end_time,
            "query": sql["query"],
            "query_online": sql["queryOnline"],
        })),
        Err(e) => e.into_tool_result(),
    }
}

async fn create_training_dataset_impl(
    client: &HopsworksClient,
    params: CreateTrainingDatasetParams,
) -> CallToolResult {
    let format = params
        .data_format
        .as_deref()
        .unwrap_or("parquet")
        .to_lowercase();
    if !DATA_FORMATS.contains(&format.as_str()) {
        return HopsworksError::InvalidArgument(format!(
            "data_format must be one of {}",
            DATA_FORMATS.join(", ")
        ))
        .into_tool_result();
    }
    let result = async {
        let start = millis(params.start_time.as_deref())?;
        let end = millis(params.end_time.as_deref())?;
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let version = resolve_version(client, &fs, &params.feature_view, params.version).await?;
        let body = json!({
            "description": params.description.clone().unwrap_or_default(),
            "dataFormat": format,
            "trainingDatasetType": "HOPSFS_TRAINING_DATASET",
            "eventStartTime": start,
            "eventEndTime": end,
            "splits": [],
            "featurestoreId": fs.id,
            "type": "trainingDatasetDTO",
        });
        let (td, job) = client
            .create_training_dataset(&fs, &params.feature_view, version, body)
            .await?;
        Ok::<_, HopsworksError>((version, td, job))
    }
    .await;
    match result {
        Ok((version, td, job)) => json_result(&json!({
            "feature_view": params.feature_view,
            "version": version,
            "training_dataset_version": td["version"],
            "data_format": format,
            "job_name": job["name"],
            "status": "materialization_started",
        })),
        Err(e) => e.into_tool_result(),
    }
}

fn statistics_summary(stats: &Value) -> Value {
    let features: Vec<Value> = stats["featureDescriptiveStatistics"]
        .as_array()
        .map(|list| {
            list.iter()
                .map(|f| {
                    json!({
                        "name": f["featureName"],
                        "count": f["count"],
                        "mean": f["mean"],
                        "min": f["min"],
                        "max": f["max"],
                        "std_dev": f["stddev"],
                        "completeness": f["completeness"],
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    json!({
        "computation_time": format_millis(&stats["computationTime"]),
        "features_count": features.len(),
        "features": features,
    })
}

async fn get_training_dataset_impl(
    client: &HopsworksClient,
    params: TrainingDatasetParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let version = resolve_version(client, &fs, &params.feature_view, params.version).await?;
        let td = client
            .get_training_dataset(
                &fs,
                &params.feature_view,
                version,
                params.training_dataset_version,
            )
            .await?;
        let stats = match client
            .training_dataset_statistics(
                &fs,
                &params.feature_view,
                version,
                params.training_dataset_version,
            )
            .await
        {
            Ok(stats) => crate::client::items(&stats).into_iter().next(),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        Ok((version, td, stats))
    }
    .await;
    match result {
        Ok((version, td, stats)) => {
            let mut details = training_dataset_summary(&td);
            details["feature_view"] = json!(params.feature_view);
            details["feature_view_version"] = json!(version);
            details["splits"] = td["splits"].clone();
            details["location"] = td["location"].clone();
            details["schema"] = json!(td["features"]
                .as_array()
                .map(|fs| {
                    fs.iter()
                        .map(|f| {
                            json!({ "name": f["name"], "type": f["type"], "label": f["label"] })
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default());
            details["statistics"] = stats.as_ref().map(statistics_summary).unwrap_or(Value::Null);
            json_result(&details)
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn compute_statistics_impl(
    client: &HopsworksClient,
    params: TrainingDatasetParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let version = resolve_version(client, &fs, &params.feature_view, params.version).await?;
        tracing::info!(
            feature_view = %params.feature_view,
            version,
            training_dataset_version = params.training_dataset_version,
            "Computing training dataset statistics"
        );
        let job = client
            .compute_training_dataset_statistics(
                &fs,
                &params.feature_view,
                version,
                params.training_dataset_version,
            )
            .await?;
        Ok::<_, HopsworksError>((version, job))
    }
    .await;
    match result {
        Ok((version, job)) => json_result(&json!({
            "feature_view": params.feature_view,
            "version": version,
            "training_dataset_version": params.training_dataset_version,
            "job_name": job["name"],
            "status": "computation_started",
        })),
        Err(e) => e.into_tool_result(),
    }
}
