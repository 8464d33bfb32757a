//! File operations on the project's datasets.

use super::{error_text, from_result, json_result};
use crate::client::HopsworksClient;
use crate::error::HopsworksError;
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;
const DEFAULT_READ_BYTES: usize = 64 * 1024;
const ARCHIVE_TIMEOUT: Duration = Duration::from_secs(120);
const ARCHIVE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFilesParams {
    /// Directory, project-relative (`Resources`) or absolute (`/Projects/<project>/Resources`)
    pub path: String,
    /// Descend into sub-directories
    pub recursive: Option<bool>,
    /// Maximum number of entries (default 100, max 1000)
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PathParams {
    /// Dataset path
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TransferParams {
    /// Source path
    pub source_path: String,
    /// Destination path
    pub destination_path: String,
    /// Replace an existing destination
    pub overwrite: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadContentParams {
    /// File path
    pub path: String,
    /// Maximum bytes to read (default 65536)
    pub max_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UploadParams {
    /// Local file to upload
    pub local_path: String,
    /// Dataset directory to upload into
    pub upload_path: String,
    /// Replace an existing file with the same name
    pub overwrite: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DownloadParams {
    /// Dataset file to download
    pub path: String,
    /// Local destination; defaults to the file name in the working directory
    pub local_path: Option<String>,
    /// Replace an existing local file
    pub overwrite: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ArchiveParams {
    /// Path to archive or extract
    pub path: String,
    /// Destination directory; defaults to alongside the source
    pub destination_path: Option<String>,
}

#[tool_router(router = datasets_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(
        description = "List files and directories under a dataset path, optionally recursively."
    )]
    async fn list_files(
        &self,
        params: Parameters<ListFilesParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(list_files_impl(&self.client, params.0).await)
    }

    #[tool(description = "Check whether a file or directory exists in the project's datasets.")]
    async fn check_exists(
        &self,
        params: Parameters<PathParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(check_exists_impl(&self.client, params.0).await)
    }

    #[tool(description = "Create a directory (and missing parents) in the project's datasets.")]
    async fn create_directory(
        &self,
        params: Parameters<PathParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let path = params.0.path;
        Ok(match self.client.create_directory(&path).await {
            Ok(_) => json_result(&json!({ "path": path, "status": "created" })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Remove a file or directory (recursively) from the project's datasets.")]
    async fn remove_file(
        &self,
        params: Parameters<PathParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let path = params.0.path;
        Ok(match self.client.remove_path(&path).await {
            Ok(_) => json_result(&json!({ "path": path, "status": "removed" })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Move a file or directory to a new path.")]
    async fn move_file(
        &self,
        params: Parameters<TransferParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(transfer_impl(&self.client, "move", params.0).await)
    }

    #[tool(description = "Copy a file or directory to a new path.")]
    async fn copy_file(
        &self,
        params: Parameters<TransferParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(transfer_impl(&self.client, "copy", params.0).await)
    }

    #[tool(description = "Read the content of a dataset file as text, truncated to max_bytes.")]
    async fn read_content(
        &self,
        params: Parameters<ReadContentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(read_content_impl(&self.client, params.0).await)
    }

    #[tool(description = "Upload a local file into a dataset directory.")]
    async fn upload_file(
        &self,
        params: Parameters<UploadParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(upload_file_impl(&self.client, params.0).await)
    }

    #[tool(description = "Download a dataset file to the local file system.")]
    async fn download_file(
        &self,
        params: Parameters<DownloadParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(download_file_impl(&self.client, params.0).await)
    }

    #[tool(
        description = "Compress a file or directory into a zip archive and wait for the archive."
    )]
    async fn zip_file(
        &self,
        params: Parameters<ArchiveParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(archive_impl(&self.client, "zip", params.0, ARCHIVE_POLL_INTERVAL).await)
    }

    #[tool(description = "Extract a zip archive and wait for the extraction to finish.")]
    async fn unzip_file(
        &self,
        params: Parameters<ArchiveParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(archive_impl(&self.client, "unzip", params.0, ARCHIVE_POLL_INTERVAL).await)
    }
}

async fn list_files_impl(client: &HopsworksClient, params: ListFilesParams) -> CallToolResult {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let listing = if params.recursive.unwrap_or(false) {
        client.list_recursive(&params.path, limit).await
    } else {
        client.list_directory(&params.path, limit).await
    };
    match listing {
        Ok((entries, truncated)) => json_result(&json!({
            "path": params.path,
            "count": entries.len(),
            "truncated": truncated,
            "files": entries,
        })),
        Err(e) => e.into_tool_result(),
    }
}

async fn check_exists_impl(client: &HopsworksClient, params: PathParams) -> CallToolResult {
    from_result(
        client
            .path_exists(&params.path)
            .await
            .map(|exists| json!({ "path": params.path, "exists": exists })),
    )
}

/// Clear `destination` when overwriting, refuse when it exists otherwise.
async fn prepare_destination(
    client: &HopsworksClient,
    destination: &str,
    overwrite: bool,
) -> Result<(), HopsworksError> {
    if !client.path_exists(destination).await? {
        return Ok(());
    }
    if !overwrite {
        return Err(HopsworksError::InvalidArgument(format!(
            "{} already exists; pass overwrite=true to replace it",
            destination
        )));
    }
    client.remove_path(destination).await?;
    Ok(())
}

async fn transfer_impl(
    client: &HopsworksClient,
    action: &str,
    params: TransferParams,
) -> CallToolResult {
    let result = async {
        prepare_destination(
            client,
            &params.destination_path,
            params.overwrite.unwrap_or(false),
        )
        .await?;
        client
            .transfer_path(action, &params.source_path, &params.destination_path)
            .await
    }
    .await;
    match result {
        Ok(_) => json_result(&json!({
            "source_path": params.source_path,
            "destination_path": params.destination_path,
            "status": if action == "move" { "moved" } else { "copied" },
        })),
        Err(e) => e.into_tool_result(),
    }
}

async fn read_content_impl(client: &HopsworksClient, params: ReadContentParams) -> CallToolResult {
    let max_bytes = params.max_bytes.unwrap_or(DEFAULT_READ_BYTES).max(1);
    match client.read_file(&params.path, max_bytes).await {
        Ok((data, truncated)) => json_result(&json!({
            "path": params.path,
            "bytes": data.len(),
            "truncated": truncated,
            "content": String::from_utf8_lossy(&data),
        })),
        Err(e) => e.into_tool_result(),
    }
}

async fn upload_file_impl(client: &HopsworksClient, params: UploadParams) -> CallToolResult {
    let local = PathBuf::from(&params.local_path);
    if !local.is_file() {
        return error_text(format!("Local file not found: {}", params.local_path));
    }
    let file_name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let target = format!("{}/{}", params.upload_path.trim_end_matches('/'), file_name);

    let result = async {
        prepare_destination(client, &target, params.overwrite.unwrap_or(false)).await?;
        client.upload_file(&local, &params.upload_path).await
    }
    .await;
    match result {
        Ok(remote) => json_result(&json!({
            "local_path": params.local_path,
            "remote_path": remote,
            "status": "uploaded",
        })),
        Err(e) => e.into_tool_result(),
    }
}

async fn download_file_impl(client: &HopsworksClient, params: DownloadParams) -> CallToolResult {
    let local = match &params.local_path {
        Some(p) => PathBuf::from(p),
        None => {
            let name = params.path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
            if name.is_empty() {
                return error_text(format!("Cannot derive a file name from {}", params.path));
            }
            PathBuf::from(name)
        }
    };
    if local.exists() && !params.overwrite.unwrap_or(false) {
        return error_text(format!(
            "{} already exists; pass overwrite=true to replace it",
            local.display()
        ));
    }
    match client.download_to(&params.path, &local).await {
        Ok(bytes) => json_result(&json!({
            "path": params.path,
            "local_path": local.display().to_string(),
            "bytes": bytes,
            "status": "downloaded",
        })),
        Err(e) => e.into_tool_result(),
    }
}

/// Start a zip or unzip and wait for it. A wait that runs out reports
/// `in_progress`; the archive keeps going in Hopsworks.
async fn archive_impl(
    client: &HopsworksClient,
    action: &str,
    params: ArchiveParams,
    interval: Duration,
) -> CallToolResult {
    let destination = params.destination_path.as_deref();
    let result = async {
        client.archive_path(action, &params.path, destination).await?;
        if action == "zip" {
            client
                .await_zip(&params.path, destination, ARCHIVE_TIMEOUT, interval)
                .await
        } else {
            client
                .await_unzip(&params.path, ARCHIVE_TIMEOUT, interval)
                .await
        }
    }
    .await;
    match result {
        Ok(output) => json_result(&json!({
            "path": params.path,
            "destination_path": output,
            "status": if action == "zip" { "zipped" } else { "unzipped" },
        })),
        Err(HopsworksError::Timeout(_)) => json_result(&json!({
            "path": params.path,
            "destination_path": params.destination_path,
            "status": "in_progress",
        })),
        Err(e) => e.into_tool_result(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{result_json, MockHopsworks};
    use serde_json::Value;

    #[tokio::test]
    async fn copy_refuses_existing_destination() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "project/119/dataset/Resources/b.csv", 200, json!({}))
            .await;
        let client = mock.client().await;

        let result = transfer_impl(
            &client,
            "copy",
            TransferParams {
                source_path: "Resources/a.csv".into(),
                destination_path: "Resources/b.csv".into(),
                overwrite: None,
            },
        )
        .await;
        assert_eq!(result.is_error, Some(true));
        assert!(mock
            .requests_to("POST", "project/119/dataset/Resources/a.csv")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn move_with_overwrite_removes_destination_first() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "project/119/dataset/Resources/b.csv", 200, json!({}))
            .await;
        mock.on("DELETE", "project/119/dataset/Resources/b.csv", 204, Value::Null)
            .await;
        mock.on("POST", "project/119/dataset/Resources/a.csv", 204, Value::Null)
            .await;
        let client = mock.client().await;

        let result = transfer_impl(
            &client,
            "move",
            TransferParams {
                source_path: "Resources/a.csv".into(),
                destination_path: "Resources/b.csv".into(),
                overwrite: Some(true),
            },
        )
        .await;
        assert_eq!(result_json(&result)["status"], "moved");

        let methods: Vec<String> = mock.requests().await.into_iter().map(|r| r.method).collect();
        assert_eq!(methods, vec!["GET", "DELETE", "POST"]);
    }

    #[tokio::test]
    async fn check_exists_false_on_404() {
        let mock = MockHopsworks::start().await;
        let client = mock.client().await;
        let value = result_json(
            &check_exists_impl(&client, PathParams { path: "Resources/none".into() }).await,
        );
        assert_eq!(value["exists"], false);
    }

    #[tokio::test]
    async fn list_files_clamps_limit() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/dataset/Resources",
            200,
            json!({"count": 0, "items": []}),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(
            &list_files_impl(
                &client,
                ListFilesParams {
                    path: "Resources".into(),
                    recursive: None,
                    limit: Some(5000),
                },
            )
            .await,
        );
        assert_eq!(value["count"], 0);
        let req = &mock.requests().await[0];
        assert_eq!(req.query_param("limit").as_deref(), Some("500"));
    }

    #[tokio::test]
    async fn download_refuses_to_clobber_local_file() {
        let mock = MockHopsworks::start().await;
        let client = mock.client().await;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.csv");
        std::fs::write(&local, "old").unwrap();

        let result = download_file_impl(
            &client,
            DownloadParams {
                path: "Resources/a.csv".into(),
                local_path: Some(local.display().to_string()),
                overwrite: None,
            },
        )
        .await;
        assert_eq!(result.is_error, Some(true));
        assert!(mock.requests().await.is_empty());
    }

    #[tokio::test]
    async fn download_writes_file() {
        let mock = MockHopsworks::start().await;
        mock.on_text(
            "GET",
            "project/119/dataset/download/with_auth/Resources/a.csv",
            200,
            "id\n1\n",
        )
        .await;
        let client = mock.client().await;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.csv");

        let value = result_json(
            &download_file_impl(
                &client,
                DownloadParams {
                    path: "Resources/a.csv".into(),
                    local_path: Some(local.display().to_string()),
                    overwrite: None,
                },
            )
            .await,
        );
        assert_eq!(value["bytes"], 5);
        assert_eq!(std::fs::read_to_string(&local).unwrap(), "id\n1\n");
    }

    #[tokio::test]
    async fn list_files_reports_exact_fit_as_complete() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/dataset/Resources",
            200,
            json!({"count": 2, "items": [
                {"attributes": {"path": "/Projects/demo/Resources/a.csv", "name": "a.csv"}},
                {"attributes": {"path": "/Projects/demo/Resources/b.csv", "name": "b.csv"}}
            ]}),
        )
        .await;
        let client = mock.client().await;

        let list = |limit| ListFilesParams {
            path: "Resources".into(),
            recursive: None,
            limit: Some(limit),
        };
        let value = result_json(&list_files_impl(&client, list(2)).await);
        assert_eq!(value["count"], 2);
        assert_eq!(value["truncated"], false);

        let value = result_json(&list_files_impl(&client, list(1)).await);
        assert_eq!(value["count"], 1);
        assert_eq!(value["truncated"], true);
    }

    #[tokio::test]
    async fn zip_waits_for_archive() {
        let mock = MockHopsworks::start().await;
        mock.on("POST", "project/119/dataset/Resources/data", 204, Value::Null)
            .await;
        mock.on_sequence(
            "GET",
            "project/119/dataset/Resources/data.zip",
            vec![(404, json!({})), (404, json!({})), (200, json!({"attributes": {}}))],
        )
        .await;
        let client = mock.client().await;

        let value = result_json(
            &archive_impl(
                &client,
                "zip",
                ArchiveParams {
                    path: "Resources/data".into(),
                    destination_path: None,
                },
                Duration::from_millis(1),
            )
            .await,
        );
        assert_eq!(value["status"], "zipped");
        assert_eq!(value["destination_path"], "Resources/data.zip");

        let post = &mock
            .requests_to("POST", "project/119/dataset/Resources/data")
            .await[0];
        assert_eq!(post.query_param("action").as_deref(), Some("zip"));
        assert_eq!(
            mock.requests_to("GET", "project/119/dataset/Resources/data.zip")
                .await
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn unzip_reports_extracted_directory() {
        let mock = MockHopsworks::start().await;
        mock.on("POST", "project/119/dataset/Resources/data.zip", 204, Value::Null)
            .await;
        mock.on(
            "GET",
            "project/119/dataset/Resources/data.zip",
            200,
            json!({"attributes": {"zipState": "NONE"}}),
        )
        .await;
        mock.on("GET", "project/119/dataset/Resources/data", 200, json!({"attributes": {}}))
            .await;
        let client = mock.client().await;

        let value = result_json(
            &archive_impl(
                &client,
                "unzip",
                ArchiveParams {
                    path: "Resources/data.zip".into(),
                    destination_path: None,
                },
                Duration::from_millis(1),
            )
            .await,
        );
        assert_eq!(value["status"], "unzipped");
        assert_eq!(value["destination_path"], "Resources/data");
    }

    #[tokio::test]
    async fn upload_missing_local_file() {
        let mock = MockHopsworks::start().await;
        let client = mock.client().await;
        let result = upload_file_impl(
            &client,
            UploadParams {
                local_path: "/definitely/not/here.csv".into(),
                upload_path: "Resources".into(),
                overwrite: None,
            },
        )
        .await;
        assert_eq!(result.is_error, Some(true));
    }
}
