//! Kafka topics and Avro schemas.

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
pub struct KafkaConfigParams {
    /// Use the externally reachable brokers (default true)
    pub external: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TopicParams {
    /// Topic name
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateTopicParams {
    /// Topic name
    pub name: String,
    /// Schema subject for the topic's messages
    pub schema: String,
    /// Schema version
    pub schema_version: i64,
    /// Replication factor (default 1)
    pub replicas: Option<u32>,
    /// Number of partitions (default 1)
    pub partitions: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SubjectParams {
    /// Schema subject
    pub subject: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetSchemaParams {
    /// Schema subject
    pub subject: String,
    /// Schema version (latest when omitted)
    pub version: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateSchemaParams {
    /// Schema subject
    pub subject: String,
    /// Avro schema as a JSON object
    pub schema: Value,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SchemaVersionParams {
    /// Schema subject
    pub subject: String,
    /// Schema version
    pub version: i64,
}

#[tool_router(router = kafka_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(description = "Get producer/consumer configuration for the project's Kafka brokers.")]
    async fn get_kafka_config(
        &self,
        params: Parameters<KafkaConfigParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let external = params.0.external.unwrap_or(true);
        Ok(super::from_result(self.client.kafka_config(external).await))
    }

    #[tool(description = "List the Kafka topics of the current project.")]
    async fn list_topics(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(match self.client.list_topics().await {
            Ok(topics) => {
                let topics: Vec<Value> = topics.iter().map(topic_summary).collect();
                json_result(&json!({ "count": topics.len(), "topics": topics }))
            }
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Get a Kafka topic by name.")]
    async fn get_topic(
        &self,
        params: Parameters<TopicParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let name = params.0.name;
        Ok(match self.client.find_topic(&name).await {
            Ok(Some(topic)) => {
                let mut summary = topic_summary(&topic);
                summary["exists"] = json!(true);
                json_result(&summary)
            }
            Ok(None) => json_result(&json!({ "name": name, "exists": false })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Create a Kafka topic bound to a schema version.")]
    async fn create_topic(
        &self,
        params: Parameters<CreateTopicParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let replicas = p.replicas.unwrap_or(1);
        let partitions = p.partitions.unwrap_or(1);
        if replicas == 0 || partitions == 0 {
            return Ok(super::error_text(
                "replicas and partitions must be at least 1".into(),
            ));
        }
        Ok(
            match self
                .client
                .create_topic(&p.name, &p.schema, p.schema_version, replicas, partitions)
                .await
            {
                Ok(_) => json_result(&json!({
                    "name": p.name,
                    "partitions": partitions,
                    "replicas": replicas,
                    "schema": p.schema,
                    "schema_version": p.schema_version,
                    "status": "created",
                })),
                Err(e) => e.into_tool_result(),
            },
        )
    }

    #[tool(description = "Delete a Kafka topic.")]
    async fn delete_topic(
        &self,
        params: Parameters<TopicParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(delete_topic_impl(&self.client, &params.0.name).await)
    }

    #[tool(description = "List the subjects of the project's schema registry.")]
    async fn list_subjects(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(match self.client.list_subjects().await {
            Ok(subjects) => json_result(&json!({ "count": subjects.len(), "subjects": subjects })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "List the versions registered under a schema subject.")]
    async fn list_schema_versions(
        &self,
        params: Parameters<SubjectParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let subject = params.0.subject;
        Ok(match self.client.list_schema_versions(&subject).await {
            Ok(versions) => json_result(&json!({ "subject": subject, "versions": versions })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Get a schema by subject and version (latest when omitted).")]
    async fn get_schema(
        &self,
        params: Parameters<GetSchemaParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(get_schema_impl(&self.client, params.0).await)
    }

    #[tool(description = "Register a new version of an Avro schema under a subject.")]
    async fn create_schema(
        &self,
        params: Parameters<CreateSchemaParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(create_schema_impl(&self.client, params.0).await)
    }

    #[tool(description = "Delete one version of a schema.")]
    async fn delete_schema(
        &self,
        params: Parameters<SchemaVersionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(match self.client.delete_schema(&p.subject, p.version).await {
            Ok(_) => json_result(&json!({
                "subject": p.subject,
                "version": p.version,
                "status": "deleted",
            })),
            Err(e) if e.is_not_found() => json_result(&json!({
                "subject": p.subject,
                "version": p.version,
                "status": "not_found",
            })),
            Err(e) => e.into_tool_result(),
        })
    }
}

fn topic_summary(topic: &Value) -> Value {
    json!({
        "name": topic["name"],
        "partitions": topic["numOfPartitions"],
        "replicas": topic["numOfReplicas"],
        "schema": topic["schemaName"],
        "schema_version": topic["schemaVersion"],
        "shared": topic["isShared"],
    })
}

/// The registry returns the schema document as a string; parse it back when
/// it is JSON.
fn schema_summary(schema: &Value) -> Value {
    let document = schema["schema"]
        .as_str()
        .and_then(|s| serde_json::from_str::<Value>(s).ok())
        .unwrap_or_else(|| schema["schema"].clone());
    json!({
        "id": schema["id"],
        "subject": schema["subject"],
        "version": schema["version"],
        "schema": document,
    })
}

async fn latest_version(
    client: &HopsworksClient,
    subject: &str,
) -> Result<Option<i64>, HopsworksError> {
    match client.list_schema_versions(subject).await {
        Ok(versions) => Ok(versions.into_iter().max()),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

async fn delete_topic_impl(client: &HopsworksClient, name: &str) -> CallToolResult {
    let result = async {
        if client.find_topic(name).await?.is_none() {
            return Ok(false);
        }
        client.delete_topic(name).await?;
        Ok::<_, HopsworksError>(true)
    }
    .await;
    match result {
        Ok(true) => json_result(&json!({ "name": name, "status": "deleted" })),
        Ok(false) => json_result(&json!({ "name": name, "status": "not_found" })),
        Err(e) => e.into_tool_result(),
    }
}

async fn get_schema_impl(client: &HopsworksClient, params: GetSchemaParams) -> CallToolResult {
    let result = async {
        let version = match params.version {
            Some(v) => v,
            None => match latest_version(client, &params.subject).await? {
                Some(v) => v,
                None => return Ok(None),
            },
        };
        match client.get_schema(&params.subject, version).await {
            Ok(schema) => Ok(Some(schema)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
    .await;
    match result {
        Ok(Some(schema)) => {
            let mut summary = schema_summary(&schema);
            summary["exists"] = json!(true);
            json_result(&summary)
        }
        Ok(None) => json_result(&json!({
            "subject": params.subject,
            "version": params.version,
            "exists": false,
        })),
        Err(e) => e.into_tool_result(),
    }
}

async fn create_schema_impl(
    client: &HopsworksClient,
    params: CreateSchemaParams,
) -> CallToolResult {
    if !params.schema.is_object() {
        return super::error_text("schema must be a JSON object".into());
    }
    let result = async {
        let created = client.create_schema(&params.subject, &params.schema).await?;
        let version = latest_version(client, &params.subject).await?;
        Ok::<_, HopsworksError>((created, version))
    }
    .await;
    match result {
        Ok((created, version)) => {
            tracing::info!(subject = %params.subject, version = ?version, "Registered schema");
            json_result(&json!({
                "id": created["id"],
                "subject": params.subject,
                "version": version,
                "status": "created",
            }))
        }
        Err(e) => e.into_tool_result(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{result_json, MockHopsworks};

    #[test]
    fn schema_document_is_parsed() {
        let schema = json!({
            "id": 3,
            "subject": "events",
            "version": 2,
            "schema": "{\"type\":\"string\"}"
        });
        assert_eq!(schema_summary(&schema)["schema"]["type"], "string");
    }

    #[tokio::test]
    async fn latest_schema_by_default() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "project/119/kafka/subjects/events/versions", 200, json!([1, 3, 2]))
            .await;
        mock.on(
            "GET",
            "project/119/kafka/subjects/events/versions/3",
            200,
            json!({"id": 30, "subject": "events", "version": 3, "schema": "{\"type\":\"record\"}"}),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(
            &get_schema_impl(
                &client,
                GetSchemaParams {
                    subject: "events".into(),
                    version: None,
                },
            )
            .await,
        );
        assert_eq!(value["version"], 3);
        assert_eq!(value["schema"]["type"], "record");
    }

    #[tokio::test]
    async fn unknown_subject() {
        let mock = MockHopsworks::start().await;
        let client = mock.client().await;
        let value = result_json(
            &get_schema_impl(
                &client,
                GetSchemaParams {
                    subject: "ghost".into(),
                    version: None,
                },
            )
            .await,
        );
        assert_eq!(value["exists"], false);
    }

    #[tokio::test]
    async fn create_schema_reports_new_version() {
        let mock = MockHopsworks::start().await;
        mock.on("POST", "project/119/kafka/subjects/events/versions", 200, json!({"id": 31}))
            .await;
        mock.on("GET", "project/119/kafka/subjects/events/versions", 200, json!([1, 2]))
            .await;
        let client = mock.client().await;
        let value = result_json(
            &create_schema_impl(
                &client,
                CreateSchemaParams {
                    subject: "events".into(),
                    schema: json!({"type": "record", "name": "E", "fields": []}),
                },
            )
            .await,
        );
        assert_eq!(value["id"], 31);
        assert_eq!(value["version"], 2);
        assert_eq!(value["status"], "created");
    }

    #[tokio::test]
    async fn delete_missing_topic() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "project/119/kafka/topics", 200, json!({"items": [{"name": "other"}]}))
            .await;
        let client = mock.client().await;
        let value = result_json(&delete_topic_impl(&client, "events").await);
        assert_eq!(value["status"], "not_found");
        assert!(mock.requests_to("DELETE", "project/119/kafka/topics/events").await.is_empty());
    }
}
