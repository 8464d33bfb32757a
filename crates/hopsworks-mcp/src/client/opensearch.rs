//! OpenSearch access for the current project.

use super::HopsworksClient;
use crate::error::HopsworksError;
use serde_json::{json, Value};

const DEFAULT_OPENSEARCH_PORT: u16 = 9200;

/// Project-scoped index name: `<project>_<index>`, lowercased project prefix.
/// An index that already carries the prefix is returned unchanged.
pub fn project_index(project: &str, index: &str) -> String {
    let prefix = format!("{}_", project.to_lowercase());
    if index.starts_with(&prefix) {
        index.to_string()
    } else {
        format!("{}{}", prefix, index)
    }
}

/// Split an `elastic_endpoint` value (`host:port`, optionally with a scheme)
/// into host and port.
pub(crate) fn parse_endpoint(value: &str) -> Option<(String, u16)> {
    let value = value.trim();
    let value = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(value)
        .trim_end_matches('/');
    if value.is_empty() {
        return None;
    }
    match value.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((value.to_string(), DEFAULT_OPENSEARCH_PORT)),
    }
}

impl HopsworksClient {
    /// Connection settings for an opensearch-py style client: hosts, bearer
    /// token header and TLS flags.
    pub async fn opensearch_config(&self) -> Result<Value, HopsworksError> {
        let project = self.project().await?;
        let variable = self.get("variables/elastic_endpoint").await?;
        let endpoint = variable["successMessage"].as_str().unwrap_or_default();
        let (host, port) = parse_endpoint(endpoint).ok_or_else(|| {
            HopsworksError::Other(format!("unusable OpenSearch endpoint {:?}", endpoint))
        })?;
        let jwt = self.get(format!("elastic/jwt/{}", project.id)).await?;
        let token = jwt["token"]
            .as_str()
            .ok_or_else(|| HopsworksError::Other("no OpenSearch token issued".into()))?;
        Ok(json!({
            "hosts": [{ "host": host, "port": port }],
            "http_compress": false,
            "headers": { "Authorization": format!("Bearer {}", token) },
            "use_ssl": true,
            "verify_certs": true,
            "ssl_assert_hostname": false,
        }))
    }
}
