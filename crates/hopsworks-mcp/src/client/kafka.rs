//! Kafka topics and the schema registry of the current project.

use super::{items, segment, ApiRequest, HopsworksClient};
use crate::error::HopsworksError;
use serde_json::{json, Value};

/// Broker endpoints from a cluster-info response, with the listener prefix
/// (`INTERNAL://`, `EXTERNAL://`) removed.
pub(crate) fn broker_endpoints(cluster_info: &Value, external: bool) -> Vec<String> {
    let listener = if external { "EXTERNAL://" } else { "INTERNAL://" };
    cluster_info["brokers"]
        .as_array()
        .map(|brokers| {
            brokers
                .iter()
                .filter_map(|b| b["address"].as_str())
                .filter_map(|a| a.strip_prefix(listener))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl HopsworksClient {
    async fn kafka_path(&self, suffix: &str) -> Result<String, HopsworksError> {
        let project = self.project().await?;
        Ok(format!("project/{}/kafka/{}", project.id, suffix))
    }

    /// Producer/consumer settings for the project's brokers.
    pub async fn kafka_config(&self, external: bool) -> Result<Value, HopsworksError> {
        let path = self.kafka_path("clusterinfo").await?;
        let info = self
            .execute(ApiRequest::get(path).query("external", external))
            .await?;
        let brokers = broker_endpoints(&info, external);
        if brokers.is_empty() {
            return Err(HopsworksError::Other(format!(
                "no {} Kafka brokers advertised",
                if external { "external" } else { "internal" }
            )));
        }
        Ok(json!({
            "bootstrap.servers": brokers.join(","),
            "security.protocol": "SSL",
            "ssl.endpoint.identification.algorithm": "",
        }))
    }

    // ─── Topics ──────────────────────────────────────────────────────

    pub async fn list_topics(&self) -> Result<Vec<Value>, HopsworksError> {
        let path = self.kafka_path("topics").await?;
        Ok(items(&self.get(path).await?))
    }

    /// `None` when no topic has that name.
    pub async fn find_topic(&self, name: &str) -> Result<Option<Value>, HopsworksError> {
        Ok(self
            .list_topics()
            .await?
            .into_iter()
            .find(|t| t["name"] == name))
    }

    pub async fn create_topic(
        &self,
        name: &str,
        schema: &str,
        schema_version: i64,
        replicas: u32,
        partitions: u32,
    ) -> Result<Value, HopsworksError> {
        let path = self.kafka_path("topics").await?;
        self.execute(ApiRequest::post(path).json(json!({
            "name": name,
            "schemaName": schema,
            "schemaVersion": schema_version,
            "numOfReplicas": replicas,
            "numOfPartitions": partitions,
        })))
        .await
    }

    pub async fn delete_topic(&self, name: &str) -> Result<Value, HopsworksError> {
        let path = self.kafka_path(&format!("topics/{}", segment(name))).await?;
        self.delete(path).await
    }

    // ─── Schema registry ─────────────────────────────────────────────

    pub async fn list_subjects(&self) -> Result<Vec<Value>, HopsworksError> {
        let path = self.kafka_path("subjects").await?;
        Ok(items(&self.get(path).await?))
    }

    pub async fn list_schema_versions(&self, subject: &str) -> Result<Vec<i64>, HopsworksError> {
        let path = self.kafka_path(&format!("subjects/{}/versions", segment(subject))).await?;
        Ok(items(&self.get(path).await?)
            .iter()
            .filter_map(Value::as_i64)
            .collect())
    }

    pub async fn get_schema(&self, subject: &str, version: i64) -> Result<Value, HopsworksError> {
        let path = self
            .kafka_path(&format!("subjects/{}/versions/{}", segment(subject), version))
            .await?;
        self.get(path).await
    }

    /// Register a schema version. The registry takes the schema document as
    /// a string.
    pub async fn create_schema(
        &self,
        subject: &str,
        schema: &Value,
    ) -> Result<Value, HopsworksError> {
        let path = self.kafka_path(&format!("subjects/{}/versions", segment(subject))).await?;
        self.execute(ApiRequest::post(path).json(json!({ "schema": schema.to_string() })))
            .await
    }

    pub async fn delete_schema(
        &self,
        subject: &str,
        version: i64,
    ) -> Result<Value, HopsworksError> {
        let path = self
            .kafka_path(&format!("subjects/{}/versions/{}", segment(subject), version))
            .await?;
        self.delete(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHopsworks;

    #[test]
    fn brokers_by_listener() {
        let info = json!({"brokers": [
            {"address": "INTERNAL://10.0.0.1:9091"},
            {"address": "EXTERNAL://kafka.example.com:9092"},
        ]});
        assert_eq!(broker_endpoints(&info, false), vec!["10.0.0.1:9091"]);
        assert_eq!(broker_endpoints(&info, true), vec!["kafka.example.com:9092"]);
        assert!(broker_endpoints(&json!({}), true).is_empty());
    }

    #[tokio::test]
    async fn schema_sent_as_string() {
        let mock = MockHopsworks::start().await;
        mock.on("POST", "project/119/kafka/subjects/events/versions", 200, json!({"id": 12}))
            .await;
        let client = mock.client().await;

        let schema = json!({"type": "record", "name": "Event", "fields": []});
        client.create_schema("events", &schema).await.unwrap();
        let sent = mock
            .requests_to("POST", "project/119/kafka/subjects/events/versions")
            .await[0]
            .json();
        let embedded: Value = serde_json::from_str(sent["schema"].as_str().unwrap()).unwrap();
        assert_eq!(embedded, schema);
    }

    #[tokio::test]
    async fn config_without_brokers_fails() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "project/119/kafka/clusterinfo", 200, json!({"brokers": []}))
            .await;
        let client = mock.client().await;
        assert!(client.kafka_config(true).await.is_err());
    }
}
