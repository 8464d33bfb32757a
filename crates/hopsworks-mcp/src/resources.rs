//! MCP resources: the projects visible to the API key.

use crate::client::HopsworksClient;
use rmcp::model::{
    RawResource, RawResourceTemplate, ReadResourceResult, Resource, ResourceContents,
    ResourceTemplate,
};
use rmcp::ErrorData as McpError;
use serde_json::Value;

/// URI of the project list resource.
pub const PROJECTS_URI: &str = "hopsworks://projects";
/// URI template of a single project.
pub const PROJECT_TEMPLATE: &str = "hopsworks://projects/{project_id}";

const PROJECT_PREFIX: &str = "hopsworks://projects/";

pub fn list_resources() -> Vec<Resource> {
    let mut raw = RawResource::new(PROJECTS_URI, "Projects");
    raw.description = Some("All Hopsworks projects accessible with the configured API key".into());
    raw.mime_type = Some("application/json".into());
    vec![Resource::new(raw, None)]
}

pub fn list_resource_templates() -> Vec<ResourceTemplate> {
    let raw = RawResourceTemplate {
        uri_template: PROJECT_TEMPLATE.into(),
        name: "Project".into(),
        title: None,
        description: Some("Details of one Hopsworks project by numeric id".into()),
        mime_type: Some("application/json".into()),
        icons: None,
    };
    vec![ResourceTemplate::new(raw, None)]
}

/// Which resource a URI names.
#[derive(Debug, PartialEq, Eq)]
enum ResourceUri {
    Projects,
    Project(i64),
}

fn parse_uri(uri: &str) -> Result<ResourceUri, String> {
    if uri == PROJECTS_URI {
        return Ok(ResourceUri::Projects);
    }
    match uri.strip_prefix(PROJECT_PREFIX) {
        Some(id) => id
            .parse()
            .map(ResourceUri::Project)
            .map_err(|_| format!("Invalid project id {:?} in {}", id, uri)),
        None => Err(format!("Unknown resource URI: {}", uri)),
    }
}

/// Read a resource by URI.
pub async fn read_resource(
    uri: &str,
    client: &HopsworksClient,
) -> Result<ReadResourceResult, McpError> {
    let value = match parse_uri(uri).map_err(|e| McpError::resource_not_found(e, None))? {
        ResourceUri::Projects => {
            let projects = client
                .list_projects()
                .await
                .map_err(|e| {
                    McpError::internal_error(format!("Failed to list projects: {}", e), None)
                })?;
            Value::Array(
                crate::client::items(&projects)
                    .iter()
                    .map(project_summary)
                    .collect(),
            )
        }
        ResourceUri::Project(id) => client
            .get_project_by_id(id)
            .await
            .map_err(|e| {
                McpError::internal_error(format!("Failed to fetch project {}: {}", id, e), None)
            })?,
    };

    let text = serde_json::to_string_pretty(&value).unwrap_or_default();
    Ok(ReadResourceResult {
        contents: vec![ResourceContents::text(text, uri)],
    })
}

fn project_summary(entry: &Value) -> Value {
    let project = entry.get("project").unwrap_or(entry);
    serde_json::json!({
        "id": project["id"],
        "name": project["name"],
        "owner": project["owner"],
        "created": project["created"],
        "role": entry["teamRole"],
    })
}
