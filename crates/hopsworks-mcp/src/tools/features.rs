//! Individual features: lookup, search across feature groups, and appending
//! new features to an existing feature group.

use super::feature_groups::update_metadata_impl;
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

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FeatureInfoParams {
    /// Feature group name
    pub feature_group: String,
    /// Feature group version; latest when omitted
    pub version: Option<i64>,
    /// Feature name
    pub feature: String,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchFeaturesParams {
    /// SQL LIKE pattern, e.g. `%amount%`; `_` matches one character
    pub pattern: String,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateFeatureParams {
    /// Feature group the feature is appended to
    pub feature_group: String,
    /// Feature group version; latest when omitted
    pub version: Option<i64>,
    /// Feature name
    pub name: String,
    /// Offline (Hive) type, e.g. `bigint`, `string`, `double`
    #[serde(rename = "type")]
    pub feature_type: String,
    /// Description
    pub description: Option<String>,
    /// Online (MySQL) type when it differs from the offline type
    pub online_type: Option<String>,
    /// Value for existing rows
    pub default_value: Option<String>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[tool_router(router = features_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(
        description = "Get the type, description and key flags of one feature of a feature group."
    )]
    async fn get_feature_info(
        &self,
        params: Parameters<FeatureInfoParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(feature_info_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Search the features of every feature group with a SQL LIKE pattern \
                       (case-insensitive)."
    )]
    async fn search_features(
        &self,
        params: Parameters<SearchFeaturesParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(search_features_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Append a new feature to an existing feature group. Appended features \
                       cannot be primary or partition keys."
    )]
    async fn create_feature(
        &self,
        params: Parameters<CreateFeatureParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(create_feature_impl(&self.client, params.0).await)
    }
}

fn feature_info(fg: &Value, feature: &Value) -> Value {
    json!({
        "name": feature["name"],
        "type": feature["type"],
        "online_type": feature["onlineType"],
        "description": feature["description"],
        "primary": feature["primary"].as_bool().unwrap_or(false),
        "partition": feature["partition"].as_bool().unwrap_or(false),
        "default_value": feature["defaultValue"],
        "event_time": fg["eventTime"].is_string() && feature["name"] == fg["eventTime"],
        "feature_group": fg["name"],
        "feature_group_version": fg["version"],
    })
}

/// SQL LIKE match, ignoring case.
fn like_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = text.to_lowercase().chars().collect();
    // Positions in `pattern` reachable after consuming a prefix of `text`.
    let mut states = vec![false; pattern.len() + 1];
    states[0] = true;
    let close = |states: &mut Vec<bool>| {
        for i in 0..pattern.len() {
            if states[i] && pattern[i] == '%' {
                states[i + 1] = true;
            }
        }
    };
    close(&mut states);
    for c in text {
        let mut next = vec![false; pattern.len() + 1];
        for i in 0..pattern.len() {
            if !states[i] {
                continue;
            }
            match pattern[i] {
                '%' => next[i] = true,
                '_' => next[i + 1] = true,
                p if p == c => next[i + 1] = true,
                _ => {}
            }
        }
        close(&mut next);
        states = next;
    }
    states[pattern.len()]
}

async fn feature_info_impl(client: &HopsworksClient, params: FeatureInfoParams) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        client
            .get_feature_group(&fs, &params.feature_group, params.version)
            .await
    }
    .await;
    let fg = match result {
        Ok(fg) => fg,
        Err(e) => return e.into_tool_result(),
    };
    let feature = fg["features"]
        .as_array()
        .and_then(|features| features.iter().find(|f| f["name"] == params.feature.as_str()));
    match feature {
        Some(feature) => {
            let mut info = feature_info(&fg, feature);
            info["status"] = json!("success");
            json_result(&info)
        }
        None => json_result(&json!({
            "feature": params.feature,
            "feature_group": params.feature_group,
            "status": "not_found",
            "message": format!(
                "feature {} not found in feature group {}",
                params.feature, params.feature_group
            ),
        })),
    }
}

async fn search_features_impl(
    client: &HopsworksClient,
    params: SearchFeaturesParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        client.list_feature_groups(&fs).await
    }
    .await;
    let groups = match result {
        Ok(groups) => groups,
        Err(e) => return e.into_tool_result(),
    };
    let pattern = params.pattern.as_str();
    let mut matches: Vec<Value> = groups
        .iter()
        .flat_map(|fg| {
            fg["features"]
                .as_array()
                .into_iter()
                .flatten()
                .filter(move |f| like_match(pattern, f["name"].as_str().unwrap_or_default()))
                .map(move |f| feature_info(fg, f))
        })
        .collect();
    matches.sort_by(|a, b| {
        let key = |v: &Value| {
            (
                v["feature_group"].as_str().unwrap_or_default().to_string(),
                v["feature_group_version"].as_i64().unwrap_or_default(),
                v["name"].as_str().unwrap_or_default().to_string(),
            )
        };
        key(a).cmp(&key(b))
    });
    json_result(&json!({
        "pattern": params.pattern,
        "count": matches.len(),
        "features": matches,
    }))
}

fn append_feature(fg: &mut Value, params: &CreateFeatureParams) -> Result<(), HopsworksError> {
    let features = fg["features"]
        .as_array_mut()
        .ok_or_else(|| HopsworksError::Other("feature group without features".into()))?;
    if features.iter().any(|f| f["name"] == params.name.as_str()) {
        return Err(HopsworksError::InvalidArgument(format!(
            "feature {} already exists in feature group {}",
            params.name, params.feature_group
        )));
    }
    features.push(json!({
        "name": params.name,
        "type": params.feature_type,
        "onlineType": params.online_type,
        "description": params.description.clone().unwrap_or_default(),
        "defaultValue": params.default_value,
        "primary": false,
        "partition": false,
    }));
    Ok(())
}

async fn create_feature_impl(
    client: &HopsworksClient,
    params: CreateFeatureParams,
) -> CallToolResult {
    tracing::info!(
        feature_group = %params.feature_group,
        feature = %params.name,
        "Appending feature"
    );
    let result = update_metadata_impl(
        client,
        params.feature_store.as_deref(),
        &params.feature_group,
        params.version,
        |fg| append_feature(fg, &params),
    )
    .await;
    if result.is_error == Some(true) {
        return result;
    }
    json_result(&json!({
        "name": params.name,
        "type": params.feature_type,
        "feature_group": params.feature_group,
        "status": "created",
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
        mock.on(
            "GET",
            &format!("{}/featuregroups/sales", FS),
            200,
            json!([{"id": 2, "name": "sales", "version": 1, "eventTime": "ts", "features": [
                {"name": "id", "type": "bigint", "primary": true},
                {"name": "ts", "type": "timestamp"}
            ]}]),
        )
        .await;
        mock
    }

    #[test]
    fn like_patterns() {
        assert!(like_match("%amount%", "total_AMOUNT_eur"));
        assert!(like_match("amount", "Amount"));
        assert!(!like_match("amount", "amounts"));
        assert!(like_match("am_unt", "amount"));
        assert!(like_match("%", ""));
        assert!(like_match("a%b%c", "aXXbYc"));
        assert!(!like_match("a%b%c", "aXXcYb"));
    }

    #[tokio::test]
    async fn info_flags_event_time() {
        let mock = fs_mock().await;
        let client = mock.client().await;
        let info = |feature: &str| FeatureInfoParams {
            feature_group: "sales".into(),
            version: None,
            feature: feature.into(),
            feature_store: None,
        };

        let ts = result_json(&feature_info_impl(&client, info("ts")).await);
        assert_eq!(ts["event_time"], true);
        assert_eq!(ts["primary"], false);
        let missing = result_json(&feature_info_impl(&client, info("price")).await);
        assert_eq!(missing["status"], "not_found");
    }

    #[tokio::test]
    async fn search_spans_feature_groups() {
        let mock = fs_mock().await;
        mock.on(
            "GET",
            &format!("{}/featuregroups", FS),
            200,
            json!([
                {"name": "sales", "version": 1, "features": [{"name": "amount"}, {"name": "id"}]},
                {"name": "refunds", "version": 2, "features": [{"name": "refund_amount"}]}
            ]),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(
            &search_features_impl(
                &client,
                SearchFeaturesParams { pattern: "%amount".into(), feature_store: None },
            )
            .await,
        );
        assert_eq!(value["count"], 2);
        assert_eq!(value["features"][0]["feature_group"], "refunds");
        assert_eq!(value["features"][1]["name"], "amount");
    }

    #[tokio::test]
    async fn appended_feature_is_sent_with_existing_schema() {
        let mock = fs_mock().await;
        mock.on("PUT", &format!("{}/featuregroups/2", FS), 200, json!({"id": 2}))
            .await;
        let client = mock.client().await;
        let params = |name: &str| CreateFeatureParams {
            feature_group: "sales".into(),
            version: None,
            name: name.into(),
            feature_type: "double".into(),
            description: Some("Discount applied".into()),
            online_type: None,
            default_value: Some("0.0".into()),
            feature_store: None,
        };

        let value = result_json(&create_feature_impl(&client, params("discount")).await);
        assert_eq!(value["status"], "created");
        let put = &mock.requests_to("PUT", &format!("{}/featuregroups/2", FS)).await[0];
        assert_eq!(put.query_param("updateMetadata").as_deref(), Some("true"));
        let features = put.json()["features"].clone();
        assert_eq!(features.as_array().unwrap().len(), 3);
        assert_eq!(features[2]["defaultValue"], "0.0");

        let duplicate = create_feature_impl(&client, params("id")).await;
        assert_eq!(duplicate.is_error, Some(true));
    }
}
