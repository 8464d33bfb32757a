//! Filtered and point-in-time queries over a feature group, compiled to SQL
//! by Hopsworks.

use super::feature_store::select_query;
use super::{json_result, parse_datetime};
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
pub struct FilterFeatureGroupParams {
    /// Feature group name
    pub feature_group: String,
    /// Feature group version; latest when omitted
    pub version: Option<i64>,
    /// Conditions such as `amount > 10 and category == 'books'`. Operators:
    /// ==, !=, >, >=, <, <=, like
    pub filter: String,
    /// Features to select; all when omitted
    pub features: Option<Vec<String>>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TimeTravelQueryParams {
    /// Feature group name
    pub feature_group: String,
    /// Feature group version; latest when omitted
    pub version: Option<i64>,
    /// Read the feature group as it was at this time (ISO-8601)
    pub as_of: String,
    /// Only include changes committed after this time (ISO-8601)
    pub exclude_until: Option<String>,
    /// Features to select; all when omitted
    pub features: Option<Vec<String>>,
    /// Feature store name; defaults to the project's feature store
    pub feature_store: Option<String>,
}

#[tool_router(router = queries_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(
        description = "Build the SQL that reads a feature group filtered by conditions on its \
                       features, \
                       e.g. `amount > 10 and category == 'books'`."
    )]
    async fn filter_feature_group(
        &self,
        params: Parameters<FilterFeatureGroupParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(filter_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Build the SQL that reads a time travel enabled feature group as of a point \
                       in time, \
                       optionally only with changes after exclude_until."
    )]
    async fn time_travel_query(
        &self,
        params: Parameters<TimeTravelQueryParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(time_travel_impl(&self.client, params.0).await)
    }
}

/// One parsed `feature operator value` condition.
#[derive(Debug, PartialEq)]
struct Condition {
    feature: String,
    condition: &'static str,
    value: String,
}

fn operator(op: &str) -> Option<&'static str> {
    Some(match op.to_lowercase().as_str() {
        "==" | "=" => "EQUALS",
        "!=" | "<>" => "NOT_EQUALS",
        ">" => "GREATER_THAN",
        ">=" => "GREATER_THAN_OR_EQUAL",
        "<" => "LESS_THAN",
        "<=" => "LESS_THAN_OR_EQUAL",
        "like" => "LIKE",
        _ => return None,
    })
}

fn unquote(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Parse `a > 1 and b == 'x'` into conditions, all of which must hold.
fn parse_filter(expression: &str) -> Result<Vec<Condition>, HopsworksError> {
    let tokens: Vec<&str> = expression.split_whitespace().collect();
    let clauses = tokens.split(|t| t.eq_ignore_ascii_case("and"));
    let mut conditions = Vec::new();
    for clause in clauses {
        let [feature, op, value @ ..] = clause else {
            return Err(HopsworksError::InvalidArgument(format!(
                "invalid condition {:?}; expected `feature operator value`",
                clause.join(" ")
            )));
        };
        if value.is_empty() {
            return Err(HopsworksError::InvalidArgument(format!(
                "condition on {} has no value",
                feature
            )));
        }
        let condition = operator(op).ok_or_else(|| {
            HopsworksError::InvalidArgument(format!(
                "unsupported operator {} (use ==, !=, >, >=, <, <=, like)",
                op
            ))
        })?;
        conditions.push(Condition {
            feature: feature.to_string(),
            condition,
            value: unquote(&value.join(" ")).to_string(),
        });
    }
    Ok(conditions)
}

/// Filter logic tree over the feature group's features, conditions joined
/// with AND.
fn filter_logic(feature_group: &Value, conditions: &[Condition]) -> Result<Value, HopsworksError> {
    let mut logic: Option<Value> = None;
    for c in conditions {
        let mut feature = feature_group["features"]
            .as_array()
            .and_then(|fs| fs.iter().find(|f| f["name"] == c.feature.as_str()))
            .cloned()
            .ok_or_else(|| {
                HopsworksError::InvalidArgument(format!(
                    "feature {} is not in feature group {}",
                    c.feature,
                    feature_group["name"].as_str().unwrap_or_default()
                ))
            })?;
        feature["featureGroupId"] = feature_group["id"].clone();
        let single = json!({
            "type": "SINGLE",
            "leftFilter": { "feature": feature, "condition": c.condition, "value": c.value },
            "rightFilter": null,
            "leftLogic": null,
            "rightLogic": null,
        });
        logic = Some(match logic {
            None => single,
            Some(left) => json!({
                "type": "AND",
                "leftFilter": null,
                "rightFilter": null,
                "leftLogic": left,
                "rightLogic": single,
            }),
        });
    }
    logic.ok_or_else(|| HopsworksError::InvalidArgument("filter is empty".into()))
}

fn sql_result(sql: &Value) -> Value {
    json!({
        "query": sql["query"],
        "query_online": sql["queryOnline"],
    })
}

async fn filter_impl(client: &HopsworksClient, params: FilterFeatureGroupParams) -> CallToolResult {
    let conditions = match parse_filter(&params.filter) {
        Ok(c) => c,
        Err(e) => return e.into_tool_result(),
    };
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let fg = client
            .get_feature_group(&fs, &params.feature_group, params.version)
            .await?;
        let mut query = select_query(&fs, &fg, params.features.as_deref())?;
        query["filter"] = filter_logic(&fg, &conditions)?;
        let sql = client.construct_query(query).await?;
        Ok::<_, HopsworksError>((fg, sql))
    }
    .await;
    match result {
        Ok((fg, sql)) => {
            let mut value = sql_result(&sql);
            value["feature_group"] = fg["name"].clone();
            value["version"] = fg["version"].clone();
            value["filter"] = json!(params.filter);
            json_result(&value)
        }
        Err(e) => e.into_tool_result(),
    }
}

async fn time_travel_impl(
    client: &HopsworksClient,
    params: TimeTravelQueryParams,
) -> CallToolResult {
    let window = parse_datetime(&params.as_of).and_then(|end| {
        let start = params
            .exclude_until
            .as_deref()
            .map(parse_datetime)
            .transpose()?;
        match start {
            Some(start) if start >= end => Err(HopsworksError::InvalidArgument(
                "exclude_until must be before as_of".into(),
            )),
            _ => Ok((start, end)),
        }
    });
    let (start, end) = match window {
        Ok(w) => w,
        Err(e) => return e.into_tool_result(),
    };
    let result = async {
        let fs = client.feature_store_ref(params.feature_store.as_deref()).await?;
        let fg = client
            .get_feature_group(&fs, &params.feature_group, params.version)
            .await?;
        let format = fg["timeTravelFormat"].as_str().unwrap_or("NONE");
        if format.eq_ignore_ascii_case("NONE") {
            return Err(HopsworksError::InvalidArgument(format!(
                "feature group {} does not support time travel",
                params.feature_group
            )));
        }
        let mut query = select_query(&fs, &fg, params.features.as_deref())?;
        query["leftFeatureGroupEndTime"] = json!(end.timestamp_millis());
        query["leftFeatureGroupStartTime"] = json!(start.map(|s| s.timestamp_millis()));
        let sql = client.construct_query(query).await?;
        Ok((fg, sql))
    }
    .await;
    match result {
        Ok((fg, sql)) => {
            let mut value = sql_result(&sql);
            value["feature_group"] = fg["name"].clone();
            value["version"] = fg["version"].clone();
            value["as_of"] = json!(end.to_rfc3339());
            value["exclude_until"] = json!(start.map(|s| s.to_rfc3339()));
            json_result(&value)
        }
        Err(e) => e.into_tool_result(),
    }
}
