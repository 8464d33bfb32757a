//! Registering, reading and deleting transformation functions (Python UDFs
//! stored in the feature store).

use super::feature_store::transformation_function_summary;
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

/// Arguments Hopsworks fills in itself rather than from features.
const RESERVED_ARGUMENTS: &[&str] = &["statistics", "context"];

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateTransformationFunctionParams {
    /// Python source containing one `def` (decorators are ignored)
    pub source_code: String,
    /// Output types, one per output column, e.g. `["float"]`
    pub output_types: Vec<String>,
    /// Name; the function name when omitted
    pub name: Option<String>,
    /// default, python or pandas (default default)
    pub execution_mode: Option<String>,
    /// Input features dropped after the transformation
    pub drop_features: Option<Vec<String>>,
    /// Names of the output columns
    pub output_column_names: Option<Vec<String>>,
    /// Version; assigned by Hopsworks when omitted
    pub version: Option<i64>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TransformationFunctionParams {
    /// Transformation function name
    pub name: String,
    /// Version; latest when omitted
    pub version: Option<i64>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[tool_router(router = transformation_functions_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(
        description = "Register a Python transformation function. Its arguments become the \
                       transformation features; \
                       one output type per output column."
    )]
    async fn create_transformation_function(
        &self,
        params: Parameters<CreateTransformationFunctionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(create_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Get a transformation function with its source code. Latest version when no \
                       version is given."
    )]
    async fn get_transformation_function(
        &self,
        params: Parameters<TransformationFunctionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let result = async {
            let fs = self.client.feature_store_ref(p.feature_store.as_deref()).await?;
            find_function(&self.client, &fs, &p.name, p.version).await
        }
        .await;
        Ok(match result {
            Ok(tf) => json_result(&transformation_function_summary(&tf)),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(
        description = "Delete one version of a transformation function; the latest when no \
                       version is given."
    )]
    async fn delete_transformation_function(
        &self,
        params: Parameters<TransformationFunctionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(delete_impl(&self.client, params.0).await)
    }
}

/// Name and arguments of the first function defined in `source`.
fn parse_signature(source: &str) -> Result<(String, Vec<String>), HopsworksError> {
    let invalid = || HopsworksError::InvalidArgument("source_code defines no function".into());
    let start = source
        .match_indices("def ")
        .map(|(at, _)| at)
        .find(|&at| {
            let line_start = source[..at].rfind('\n').map_or(0, |n| n + 1);
            matches!(source[line_start..at].trim(), "" | "async")
        })
        .ok_or_else(invalid)?;
    let def = &source[start + "def ".len()..];
    let open = def.find('(').ok_or_else(invalid)?;
    let name = def[..open].trim().to_string();
    let close = def[open..].find(')').ok_or_else(invalid)? + open;
    if name.is_empty() {
        return Err(invalid());
    }
    let arguments = def[open + 1..close]
        .split(',')
        .map(|arg| {
            arg.split([':', '='])
                .next()
                .unwrap_or_default()
                .trim()
                .to_string()
        })
        .filter(|arg| !arg.is_empty() && !arg.starts_with('*') && arg != "self")
        .collect();
    Ok((name, arguments))
}

/// Feature store type of a Python type name.
fn output_type(python: &str) -> String {
    match python.trim().to_lowercase().as_str() {
        "int" | "integer" | "bigint" => "bigint".into(),
        "float" | "double" => "double".into(),
        "str" | "string" => "string".into(),
        "bool" | "boolean" => "boolean".into(),
        "datetime" | "timestamp" => "timestamp".into(),
        "date" => "date".into(),
        other => other.to_string(),
    }
}

fn execution_mode(input: Option<&str>) -> Result<&'static str, HopsworksError> {
    match input.map(str::to_lowercase).as_deref() {
        None | Some("default") => Ok("DEFAULT"),
        Some("python") => Ok("PYTHON"),
        Some("pandas") => Ok("PANDAS"),
        Some(other) => Err(HopsworksError::InvalidArgument(format!(
            "execution_mode must be default, python or pandas (got {})",
            other
        ))),
    }
}

fn pattern(inputs: usize, outputs: usize) -> &'static str {
    match (inputs > 1, outputs > 1) {
        (false, false) => "one-to-one",
        (false, true) => "one-to-many",
        (true, false) => "many-to-one",
        (true, true) => "many-to-many",
    }
}

/// Request body for a new transformation function, plus its input features.
fn function_body(
    fs_id: i64,
    params: &CreateTransformationFunctionParams,
) -> Result<(Value, Vec<String>), HopsworksError> {
    let (function_name, arguments) = parse_signature(&params.source_code)?;
    let features: Vec<String> = arguments
        .into_iter()
        .filter(|a| !RESERVED_ARGUMENTS.contains(&a.as_str()))
        .collect();
    if features.is_empty() {
        return Err(HopsworksError::InvalidArgument(format!(
            "function {} takes no feature arguments",
            function_name
        )));
    }
    if params.output_types.is_empty() {
        return Err(HopsworksError::InvalidArgument(
            "output_types needs at least one type".into(),
        ));
    }
    let dropped = params.drop_features.clone().unwrap_or_default();
    if let Some(unknown) = dropped.iter().find(|d| !features.contains(d)) {
        return Err(HopsworksError::InvalidArgument(format!(
            "cannot drop {}: not an argument of {}",
            unknown, function_name
        )));
    }
    if let Some(columns) = &params.output_column_names {
        if columns.len() != params.output_types.len() {
            return Err(HopsworksError::InvalidArgument(format!(
                "{} output column names for {} output types",
                columns.len(),
                params.output_types.len()
            )));
        }
    }
    let mode = execution_mode(params.execution_mode.as_deref())?;
    let body = json!({
        "version": params.version,
        "featurestoreId": fs_id,
        "hopsworksUdf": {
            "sourceCode": params.source_code,
            "name": params.name.clone().unwrap_or(function_name),
            "outputTypes": params.output_types.iter().map(|t| output_type(t)).collect::<Vec<_>>(),
            "transformationFeatures": features,
            "transformationFunctionArgumentNames": features,
            "droppedArgumentNames": dropped,
            "statisticsArgumentNames": [],
            "executionMode": mode,
            "outputColumnNames": params.output_column_names,
        },
    });
    Ok((body, features))
}

async fn find_function(
    client: &HopsworksClient,
    fs: &crate::client::FeatureStoreRef,
    name: &str,
    version: Option<i64>,
) -> Result<Value, HopsworksError> {
    client
        .get_transformation_functions(fs, name, version)
        .await?
        .into_iter()
        .max_by_key(|tf| tf["version"].as_i64().unwrap_or(0))
        .ok_or_else(|| {
            HopsworksError::NotFound(match version {
                Some(v) => format!("transformation function {} version {}", name, v),
                None => format!("transformation function {}", name),
            })
        })
}

async fn create_impl(
    client: &HopsworksClient,
    params: CreateTransformationFunctionParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let (body, features) = function_body(fs.id, &params)?;
        let udf_name = body["hopsworksUdf"]["name"].as_str().unwrap_or_default().to_string();
        tracing::info!(name = %udf_name, "Creating transformation function");
        let created = client.create_transformation_function(&fs, body).await?;
        Ok::<_, HopsworksError>((created, features))
    }
    .await;
    match result {
        Ok((created, features)) => {
            let mut summary = transformation_function_summary(&created);
            summary["pattern"] = json!(pattern(features.len(), params.output_types.len()));
            summary["status"] = json!("created");
            json_result(&summary)
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn delete_impl(
    client: &HopsworksClient,
    params: TransformationFunctionParams,
) -> CallToolResult {
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let tf = find_function(client, &fs, &params.name, params.version).await?;
        let id = tf["id"].as_i64().ok_or_else(|| {
            HopsworksError::Other(format!("transformation function without id: {}", tf))
        })?;
        client.delete_transformation_function(&fs, id).await?;
        Ok::<_, HopsworksError>(tf["version"].clone())
    }
    .await;
    match result {
        Ok(version) => json_result(&json!({
            "name": params.name,
            "version": version,
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
