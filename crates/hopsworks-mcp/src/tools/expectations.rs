//! Great Expectations suites attached to feature groups, and the reports of
//! past validations.

use super::feature_groups::fg_id;
use super::{format_millis, json_result};
use crate::client::{FeatureStoreRef, HopsworksClient};
use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};

const DEFAULT_REPORTS: usize = 10;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateExpectationSuiteParams {
    /// Feature group the suite is attached to
    pub feature_group: String,
    /// Feature group version; latest when omitted
    pub version: Option<i64>,
    /// Suite name; `<feature_group>_suite` when omitted
    pub name: Option<String>,
    /// Validate data on insertion (default true)
    pub run_validation: Option<bool>,
    /// `always` ingests data even when validation fails, `strict` rejects it (default always)
    pub validation_ingestion_policy: Option<String>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddColumnExpectationParams {
    /// Feature group name
    pub feature_group: String,
    /// Feature group version; latest when omitted
    pub version: Option<i64>,
    /// Column (feature) the expectation checks
    pub column: String,
    /// Great Expectations type, e.g. `expect_column_values_to_be_between`
    pub expectation_type: String,
    /// Lower bound
    pub min_value: Option<f64>,
    /// Upper bound
    pub max_value: Option<f64>,
    /// Expected value
    pub value: Option<Value>,
    /// Allowed values
    pub value_set: Option<Vec<Value>>,
    /// Fraction of rows that must pass, between 0 and 1
    pub mostly: Option<f64>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FeatureGroupExpectationsParams {
    /// Feature group name
    pub feature_group: String,
    /// Feature group version; latest when omitted
    pub version: Option<i64>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RemoveExpectationParams {
    /// Feature group name
    pub feature_group: String,
    /// Feature group version; latest when omitted
    pub version: Option<i64>,
    /// Id of the expectation, as listed by get_feature_group_expectations
    pub expectation_id: i64,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ValidationHistoryParams {
    /// Feature group name
    pub feature_group: String,
    /// Feature group version; latest when omitted
    pub version: Option<i64>,
    /// Number of reports (default 10)
    pub limit: Option<usize>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[tool_router(router = expectations_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(
        description = "Attach an empty expectation suite to a feature group, replacing any \
                       existing suite."
    )]
    async fn create_expectation_suite(
        &self,
        params: Parameters<CreateExpectationSuiteParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(create_suite_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Add a column expectation to a feature group's suite. A suite is created \
                       when the feature group has none."
    )]
    async fn add_column_expectation(
        &self,
        params: Parameters<AddColumnExpectationParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(add_expectation_impl(&self.client, params.0).await)
    }

    #[tool(description = "List the expectations of a feature group's suite.")]
    async fn get_feature_group_expectations(
        &self,
        params: Parameters<FeatureGroupExpectationsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(get_expectations_impl(&self.client, params.0).await)
    }

    #[tool(description = "Remove one expectation from a feature group's suite.")]
    async fn remove_expectation(
        &self,
        params: Parameters<RemoveExpectationParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(remove_expectation_impl(&self.client, params.0).await)
    }

    #[tool(description = "List recent validation reports of a feature group, newest first.")]
    async fn get_validation_history(
        &self,
        params: Parameters<ValidationHistoryParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(validation_history_impl(&self.client, params.0).await)
    }
}

async fn resolve_feature_group(
    client: &HopsworksClient,
    feature_store: Option<&str>,
    name: &str,
    version: Option<i64>,
) -> Result<(FeatureStoreRef, Value), HopsworksError> {
    let fs = client.feature_store_ref(feature_store).await?;
    let fg = client.get_feature_group(&fs, name, version).await?;
    Ok((fs, fg))
}

fn ingestion_policy(input: Option<&str>) -> Result<&'static str, HopsworksError> {
    match input.map(str::to_lowercase).as_deref() {
        None | Some("always") => Ok("ALWAYS"),
        Some("strict") => Ok("STRICT"),
        Some(other) => Err(HopsworksError::InvalidArgument(format!(
            "validation_ingestion_policy must be always or strict (got {})",
            other
        ))),
    }
}

fn empty_suite(
    fs: &FeatureStoreRef,
    fg_id: i64,
    name: &str,
    run_validation: bool,
    policy: &str,
) -> Value {
    json!({
        "expectationSuiteName": name,
        "expectations": [],
        "meta": json!({ "notes": format!("Expectation suite {}", name) }).to_string(),
        "runValidation": run_validation,
        "validationIngestionPolicy": policy,
        "featureStoreId": fs.id,
        "featureGroupId": fg_id,
        "dataAssetType": null,
        "geCloudId": null,
    })
}

/// `kwargs` of a column expectation.
fn expectation_kwargs(params: &AddColumnExpectationParams) -> Result<Value, HopsworksError> {
    if !params.expectation_type.starts_with("expect_") {
        return Err(HopsworksError::InvalidArgument(format!(
            "{} is not a Great Expectations type (expected expect_...)",
            params.expectation_type
        )));
    }
    if let (Some(min), Some(max)) = (params.min_value, params.max_value) {
        if min > max {
            return Err(HopsworksError::InvalidArgument(format!(
                "min_value {} is greater than max_value {}",
                min, max
            )));
        }
    }
    if let Some(mostly) = params.mostly {
        if !(mostly > 0.0 && mostly <= 1.0) {
            return Err(HopsworksError::InvalidArgument(
                "mostly must be greater than 0 and at most 1".into(),
            ));
        }
    }
    let mut kwargs = Map::new();
    kwargs.insert("column".into(), json!(params.column));
    if let Some(min) = params.min_value {
        kwargs.insert("min_value".into(), json!(min));
    }
    if let Some(max) = params.max_value {
        kwargs.insert("max_value".into(), json!(max));
    }
    if let Some(value) = &params.value {
        kwargs.insert("value".into(), value.clone());
    }
    if let Some(set) = &params.value_set {
        kwargs.insert("value_set".into(), json!(set));
    }
    if let Some(mostly) = params.mostly {
        kwargs.insert("mostly".into(), json!(mostly));
    }
    Ok(Value::Object(kwargs))
}

/// Fields that Hopsworks keeps as JSON-encoded strings.
fn decode_embedded(value: &Value) -> Value {
    match value.as_str() {
        Some(text) => serde_json::from_str(text).unwrap_or_else(|_| value.clone()),
        None => value.clone(),
    }
}

fn expectation_summary(expectation: &Value) -> Value {
    let kwargs = decode_embedded(&expectation["kwargs"]);
    json!({
        "id": expectation["id"],
        "type": expectation["expectationType"],
        "column": kwargs["column"],
        "parameters": kwargs,
    })
}

async fn create_suite_impl(
    client: &HopsworksClient,
    params: CreateExpectationSuiteParams,
) -> CallToolResult {
    let policy = match ingestion_policy(params.validation_ingestion_policy.as_deref()) {
        Ok(p) => p,
        Err(e) => return e.into_tool_result(),
    };
    let run_validation = params.run_validation.unwrap_or(true);
    let name = params
        .name
        .clone()
        .unwrap_or_else(|| format!("{}_suite", params.feature_group));
    let result = async {
        let (fs, fg) = resolve_feature_group(
            client,
            params.feature_store.as_deref(),
            &params.feature_group,
            params.version,
        )
        .await?;
        let id = fg_id(&fg)?;
        tracing::info!(
            feature_group = %params.feature_group,
            suite = %name,
            "Attaching expectation suite"
        );
        client
            .attach_expectation_suite(&fs, id, empty_suite(&fs, id, &name, run_validation, policy))
            .await?;
        Ok::<_, HopsworksError>(fg)
    }
    .await;
    match result {
        Ok(fg) => json_result(&json!({
            "feature_group": params.feature_group,
            "version": fg["version"],
            "name": name,
            "run_validation": run_validation,
            "validation_ingestion_policy": policy,
            "expectations_count": 0,
            "status": "created",
        })),
        Err(e) => e.into_tool_result(),
    }
}

async fn add_expectation_impl(
    client: &HopsworksClient,
    params: AddColumnExpectationParams,
) -> CallToolResult {
    let kwargs = match expectation_kwargs(&params) {
        Ok(k) => k,
        Err(e) => return e.into_tool_result(),
    };
    let result = async {
        let (fs, fg) = resolve_feature_group(
            client,
            params.feature_store.as_deref(),
            &params.feature_group,
            params.version,
        )
        .await?;
        let id = fg_id(&fg)?;
        let suite = match client.get_expectation_suite(&fs, id).await? {
            Some(suite) => suite,
            None => {
                let name = format!("{}_suite", params.feature_group);
                client
                    .attach_expectation_suite(&fs, id, empty_suite(&fs, id, &name, true, "ALWAYS"))
                    .await?
            }
        };
        let suite_id = suite["id"]
            .as_i64()
            .ok_or_else(|| {
                HopsworksError::Other(format!("expectation suite without id: {}", suite))
            })?;
        let expectation = json!({
            "expectationType": params.expectation_type,
            "kwargs": kwargs.to_string(),
            "meta": "{}",
        });
        client.add_expectation(&fs, id, suite_id, expectation).await
    }
    .await;
    match result {
        Ok(added) => json_result(&json!({
            "feature_group": params.feature_group,
            "column": params.column,
            "expectation_type": params.expectation_type,
            "expectation_id": added["id"],
            "parameters": kwargs,
            "status": "added",
        })),
        Err(e) => e.into_tool_result(),
    }
}

async fn get_expectations_impl(
    client: &HopsworksClient,
    params: FeatureGroupExpectationsParams,
) -> CallToolResult {
    let result = async {
        let (fs, fg) = resolve_feature_group(
            client,
            params.feature_store.as_deref(),
            &params.feature_group,
            params.version,
        )
        .await?;
        let suite = client.get_expectation_suite(&fs, fg_id(&fg)?).await?;
        Ok::<_, HopsworksError>((fg, suite))
    }
    .await;
    match result {
        Ok((fg, None)) => json_result(&json!({
            "feature_group": params.feature_group,
            "version": fg["version"],
            "status": "no_expectations",
            "message": "This feature group has no expectation suite",
        })),
        Ok((fg, Some(suite))) => {
            let expectations: Vec<Value> = suite["expectations"]
                .as_array()
                .map(|list| list.iter().map(expectation_summary).collect())
                .unwrap_or_default();
            json_result(&json!({
                "feature_group": params.feature_group,
                "version": fg["version"],
                "suite_name": suite["expectationSuiteName"],
                "run_validation": suite["runValidation"],
                "validation_ingestion_policy": suite["validationIngestionPolicy"],
                "expectations": expectations,
                "status": "success",
            }))
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn remove_expectation_impl(
    client: &HopsworksClient,
    params: RemoveExpectationParams,
) -> CallToolResult {
    let result = async {
        let (fs, fg) = resolve_feature_group(
            client,
            params.feature_store.as_deref(),
            &params.feature_group,
            params.version,
        )
        .await?;
        let id = fg_id(&fg)?;
        let suite = client.get_expectation_suite(&fs, id).await?.ok_or_else(|| {
            HopsworksError::NotFound(format!(
                "feature group {} has no expectation suite",
                params.feature_group
            ))
        })?;
        let suite_id = suite["id"].as_i64().unwrap_or_default();
        client
            .delete_expectation(&fs, id, suite_id, params.expectation_id)
            .await
    }
    .await;
    match result {
        Ok(_) => json_result(&json!({
            "feature_group": params.feature_group,
            "expectation_id": params.expectation_id,
            "status": "removed",
        })),
        Err(e) if e.is_not_found() => json_result(&json!({
            "feature_group": params.feature_group,
            "expectation_id": params.expectation_id,
            "status": "not_found",
            "message": e.to_string(),
        })),
        Err(e) => e.into_tool_result(),
    }
}

fn report_summary(report: &Value) -> Value {
    let results = report["results"].as_array().cloned().unwrap_or_default();
    let passed = results
        .iter()
        .filter(|r| r["success"].as_bool().unwrap_or(false))
        .count();
    json!({
        "id": report["id"],
        "time": format_millis(&report["validationTime"]),
        "success": report["success"].as_bool().unwrap_or(false),
        "ingestion_result": report["ingestionResult"],
        "expectations_passed": passed,
        "expectations_failed": results.len() - passed,
        "total_expectations": results.len(),
    })
}

async fn validation_history_impl(
    client: &HopsworksClient,
    params: ValidationHistoryParams,
) -> CallToolResult {
    let limit = params.limit.unwrap_or(DEFAULT_REPORTS).max(1);
    let result = async {
        let (fs, fg) = resolve_feature_group(
            client,
            params.feature_store.as_deref(),
            &params.feature_group,
            params.version,
        )
        .await?;
        client.validation_reports(&fs, fg_id(&fg)?, limit).await
    }
    .await;
    match result {
        Ok(reports) => {
            let reports: Vec<Value> = reports.iter().map(report_summary).collect();
            json_result(&json!({
                "feature_group": params.feature_group,
                "count": reports.len(),
                "reports": reports,
                "status": "success",
            }))
        }
        Err(e) => e.into_tool_result(),
    }
}
