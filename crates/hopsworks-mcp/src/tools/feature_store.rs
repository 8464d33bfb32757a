//! Feature store discovery and query construction.

use super::{from_result, json_result};
use crate::client::{FeatureStoreRef, HopsworksClient};
use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct FeatureStoreParams {
    /// Feature store name; defaults to the project's feature store
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct JoinParams {
    /// Feature group to join with
    pub feature_group: String,
    /// Version of the joined feature group; latest when omitted
    pub version: Option<i64>,
    /// Features to select from the joined feature group; all when omitted
    pub features: Option<Vec<String>>,
    /// Join keys present on both sides
    pub on: Option<Vec<String>>,
    /// Join keys on the left side
    pub left_on: Option<Vec<String>>,
    /// Join keys on the right side
    pub right_on: Option<Vec<String>>,
    /// INNER, LEFT, RIGHT or FULL (default INNER)
    pub join_type: Option<String>,
    /// Prefix for the joined feature names
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConstructQueryParams {
    /// Feature group to select from
    pub feature_group: String,
    /// Feature group version; latest when omitted
    pub version: Option<i64>,
    /// Features to select; all when omitted
    pub features: Option<Vec<String>>,
    /// Optional join with a second feature group
    pub join: Option<JoinParams>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[tool_router(router = feature_store_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(description = "Get a feature store by name, or the project's default feature store.")]
    async fn get_feature_store(
        &self,
        params: Parameters<FeatureStoreParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(from_result(
            self.client
                .get_feature_store(params.0.name.as_deref())
                .await
                .map(|fs| feature_store_summary(&fs)),
        ))
    }

    #[tool(
        description = "List the feature stores accessible from the current project, including \
                       shared ones."
    )]
    async fn list_feature_stores(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(from_result(self.client.list_feature_stores().await.map(|stores| {
            Value::Array(
                crate::client::items(&stores)
                    .iter()
                    .map(feature_store_summary)
                    .collect(),
            )
        })))
    }

    #[tool(description = "List the transformation functions registered in a feature store.")]
    async fn list_transformation_functions(
        &self,
        params: Parameters<FeatureStoreParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(list_transformation_functions_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Build the offline and online SQL for selecting features from a feature \
                       group, optionally joined with a second feature group."
    )]
    async fn construct_query(
        &self,
        params: Parameters<ConstructQueryParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(construct_query_impl(&self.client, params.0).await)
    }
}

fn feature_store_summary(fs: &Value) -> Value {
    json!({
        "id": fs["featurestoreId"],
        "name": fs["featurestoreName"],
        "project_name": fs["projectName"],
        "project_id": fs["projectId"],
        "online_enabled": fs["onlineEnabled"],
        "offline_featurestore_name": fs["offlineFeaturestoreName"],
        "online_featurestore_name": fs["onlineFeaturestoreName"],
        "num_feature_groups": fs["numFeatureGroups"],
        "num_feature_views": fs["numFeatureViews"],
    })
}

async fn list_transformation_functions_impl(
    client: &HopsworksClient,
    params: FeatureStoreParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.name.as_deref()).await?;
        client.list_transformation_functions(&fs).await
    }
    .await;
    from_result(result.map(|resp| {
        Value::Array(
            crate::client::items(&resp)
                .iter()
                .map(transformation_function_summary)
                .collect(),
        )
    }))
}

pub(crate) fn transformation_function_summary(tf: &Value) -> Value {
    let udf = &tf["hopsworksUdf"];
    json!({
        "id": tf["id"],
        "version": tf["version"],
        "name": udf["name"],
        "output_types": udf["outputTypes"],
        "transformation_features": udf["transformationFeatures"],
        "dropped_features": udf["droppedArgumentNames"],
        "execution_mode": udf["executionMode"],
        "source_code": udf["sourceCode"],
    })
}

/// Names of a feature group's features.
pub(crate) fn feature_names(feature_group: &Value) -> Vec<String> {
    feature_group["features"]
        .as_array()
        .map(|fs| {
            fs.iter()
                .filter_map(|f| f["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Query description selecting `features` (all when `None`) from a feature group.
pub(crate) fn select_query(
    fs: &FeatureStoreRef,
    feature_group: &Value,
    features: Option<&[String]>,
) -> Result<Value, HopsworksError> {
    let available = feature_names(feature_group);
    let selected: Vec<String> = match features {
        Some(requested) if !requested.is_empty() => {
            if let Some(unknown) = requested.iter().find(|f| !available.contains(f)) {
                return Err(HopsworksError::InvalidArgument(format!(
                    "feature {} is not in feature group {} (available: {})",
                    unknown,
                    feature_group["name"].as_str().unwrap_or_default(),
                    available.join(", ")
                )));
            }
            requested.to_vec()
        }
        _ => available,
    };
    Ok(json!({
        "featureStoreName": fs.name,
        "featureStoreId": fs.id,
        "leftFeatureGroup": feature_group,
        "leftFeatures": selected.iter().map(|f| json!({ "name": f })).collect::<Vec<_>>(),
        "joins": [],
    }))
}

fn join_clause(query: Value, join: &JoinParams) -> Result<Value, HopsworksError> {
    let join_type = join
        .join_type
        .as_deref()
        .unwrap_or("INNER")
        .to_uppercase();
    if !["INNER", "LEFT", "RIGHT", "FULL"].contains(&join_type.as_str()) {
        return Err(HopsworksError::InvalidArgument(format!(
            "join_type must be one of INNER, LEFT, RIGHT, FULL (got {})",
            join_type
        )));
    }
    let names = |keys: &Option<Vec<String>>| -> Vec<Value> {
        keys.iter()
            .flatten()
            .map(|k| json!({ "name": k }))
            .collect()
    };
    let left_on = names(&join.left_on);
    let right_on = names(&join.right_on);
    if left_on.len() != right_on.len() {
        return Err(HopsworksError::InvalidArgument(
            "left_on and right_on must name the same number of keys".into(),
        ));
    }
    Ok(json!({
        "query": query,
        "on": names(&join.on),
        "leftOn": left_on,
        "rightOn": right_on,
        "type": join_type,
        "prefix": join.prefix,
    }))
}

async fn construct_query_impl(
    client: &HopsworksClient,
    params: ConstructQueryParams,
) -> CallToolResult {
    let result = async {
        let fs = client
            .feature_store_ref(params.feature_store.as_deref())
            .await?;
        let fg = client
            .get_feature_group(&fs, &params.feature_group, params.version)
            .await?;
        let mut query = select_query(&fs, &fg, params.features.as_deref())?;
        if let Some(join) = &params.join {
            let right_fg = client
                .get_feature_group(&fs, &join.feature_group, join.version)
                .await?;
            let right = select_query(&fs, &right_fg, join.features.as_deref())?;
            query["joins"] = json!([join_clause(right, join)?]);
        }
        client.construct_query(query).await
    }
    .await;
    match result {
        Ok(sql) => json_result(&json!({
            "feature_group": params.feature_group,
            "query": sql["query"],
            "query_online": sql["queryOnline"],
            "pit_query": sql["pitQuery"],
        })),
        Err(e) => e.into_tool_result(),
    }
}
