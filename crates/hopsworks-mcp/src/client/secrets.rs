//! Per-user secrets, optionally shared with a project.

use super::{items, segment, ApiRequest, HopsworksClient};
use crate::error::HopsworksError;
use serde_json::{json, Value};

impl HopsworksClient {
    pub async fn list_secrets(&self) -> Result<Vec<Value>, HopsworksError> {
        Ok(items(&self.get("users/secrets").await?))
    }

    /// A secret with its value. Without `owner` the secret is one of the
    /// caller's own; with it, a secret shared by that user.
    pub async fn get_secret(
        &self,
        name: &str,
        owner: Option<&str>,
    ) -> Result<Value, HopsworksError> {
        let resp = match owner {
            Some(owner) => {
                self.execute(
                    ApiRequest::get("users/secrets/shared")
                        .query("name", name)
                        .query("owner", owner),
                )
                .await?
            }
            None => self.get(format!("users/secrets/{}", segment(name))).await?,
        };
        // Single secrets come back wrapped in a one-element collection.
        let secret = match items(&resp).into_iter().next() {
            Some(secret) => secret,
            None if resp.get("name").is_some() => resp,
            None => return Err(HopsworksError::NotFound(format!("secret {}", name))),
        };
        Ok(secret)
    }

    /// Create a secret. With `project_id` it is visible to members of that
    /// project, otherwise only to its owner.
    pub async fn create_secret(
        &self,
        name: &str,
        value: &str,
        project_id: Option<i64>,
    ) -> Result<Value, HopsworksError> {
        let mut body = json!({ "name": name, "secret": value, "visibility": "PRIVATE" });
        if let Some(id) = project_id {
            body["visibility"] = json!("PROJECT");
            body["scope"] = json!(id);
        }
        self.execute(ApiRequest::post("users/secrets").json(body))
            .await
    }

    pub async fn delete_secret(&self, name: &str) -> Result<Value, HopsworksError> {
        self.delete(format!("users/secrets/{}", segment(name))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHopsworks;

    #[tokio::test]
    async fn private_unless_project_given() {
        let mock = MockHopsworks::start().await;
        mock.on("POST", "users/secrets", 200, json!({})).await;
        let client = mock.client().await;

        client.create_secret("token", "s3cr3t", None).await.unwrap();
        client.create_secret("shared", "s3cr3t", Some(119)).await.unwrap();

        let sent = mock.requests_to("POST", "users/secrets").await;
        assert_eq!(sent[0].json()["visibility"], "PRIVATE");
        assert!(sent[0].json().get("scope").is_none());
        assert_eq!(sent[1].json()["visibility"], "PROJECT");
        assert_eq!(sent[1].json()["scope"], 119);
    }

    #[tokio::test]
    async fn shared_secret_lookup() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "users/secrets/shared",
            200,
            json!({"items": [{"name": "db", "secret": "pw", "owner": "alice"}]}),
        )
        .await;
        let client = mock.client().await;

        let secret = client.get_secret("db", Some("alice")).await.unwrap();
        assert_eq!(secret["secret"], "pw");
        let request = &mock.requests_to("GET", "users/secrets/shared").await[0];
        assert_eq!(request.query_param("owner").as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn empty_collection_is_not_found() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "users/secrets/db", 200, json!({"count": 0}))
            .await;
        let client = mock.client().await;
        assert!(client.get_secret("db", None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn slash_in_name_is_one_segment() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "users/secrets/team%2Fdb",
            200,
            json!({"items": [{"name": "team/db", "secret": "pw"}]}),
        )
        .await;
        mock.on_text("DELETE", "users/secrets/team%2Fdb", 204, "").await;
        let client = mock.client().await;

        let secret = client.get_secret("team/db", None).await.unwrap();
        assert_eq!(secret["name"], "team/db");
        client.delete_secret("team/db").await.unwrap();
        assert!(mock.requests_to("GET", "users/secrets/team/db").await.is_empty());
    }
}
