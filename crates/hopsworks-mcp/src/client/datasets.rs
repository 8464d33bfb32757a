//! Dataset (HopsFS file system) operations.

use super::{encode_path, items, poll_until, ApiRequest, HopsworksClient, ProjectRef};
use crate::error::HopsworksError;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Chunk size of the flow upload protocol.
pub(crate) const UPLOAD_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Entries fetched per listing page.
const LISTING_PAGE: usize = 500;

/// One file or directory returned by a listing.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DatasetEntry {
    pub path: String,
    pub name: String,
    pub dir: bool,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modification_time: Option<String>,
}

impl DatasetEntry {
    fn from_value(value: &Value) -> Option<Self> {
        let attrs = value.get("attributes").unwrap_or(value);
        Some(Self {
            path: attrs["path"].as_str()?.to_string(),
            name: attrs["name"].as_str().unwrap_or_default().to_string(),
            dir: attrs["dir"].as_bool().unwrap_or(false),
            size: attrs["size"].as_u64().unwrap_or(0),
            modification_time: attrs["modificationTime"]
                .as_str()
                .map(str::to_string)
                .or_else(|| attrs["modificationTime"].as_i64().map(|t| t.to_string())),
        })
    }
}

/// Normalise a user path into the form the dataset endpoints expect.
///
/// Paths inside the current project become project-relative
/// (`/Projects/demo/Resources/a.csv` → `Resources/a.csv`); paths of other
/// projects stay absolute. Leading `./` and surrounding slashes are removed.
pub fn normalize_dataset_path(project: &str, path: &str) -> String {
    let trimmed = path.trim();
    let prefix = format!("/Projects/{}/", project);
    let relative = trimmed
        .strip_prefix(&prefix)
        .or_else(|| trimmed.strip_prefix(&prefix[1..]))
        .unwrap_or(trimmed);
    if relative == format!("/Projects/{}", project) {
        return String::new();
    }
    if relative.starts_with("/Projects/") {
        return relative.trim_end_matches('/').to_string();
    }
    relative
        .trim_start_matches("./")
        .trim_matches('/')
        .to_string()
}

/// Absolute HopsFS path of a project-relative path.
pub fn absolute_dataset_path(project: &str, path: &str) -> String {
    let normalized = normalize_dataset_path(project, path);
    if normalized.starts_with("/Projects/") {
        normalized
    } else {
        format!("/Projects/{}/{}", project, normalized)
    }
}

impl HopsworksClient {
    async fn dataset_path(&self, path: &str) -> Result<(ProjectRef, String), HopsworksError> {
        let project = self.project().await?;
        let normalized = normalize_dataset_path(&project.name, path);
        if normalized.is_empty() {
            return Err(HopsworksError::InvalidArgument(
                "path must name a dataset inside the project".into(),
            ));
        }
        let endpoint = format!("project/{}/dataset/{}", project.id, encode_path(&normalized));
        Ok((project, endpoint))
    }

    /// Metadata of a file or directory.
    pub async fn stat_path(&self, path: &str) -> Result<Value, HopsworksError> {
        let (_, endpoint) = self.dataset_path(path).await?;
        self.execute(ApiRequest::get(endpoint).query("action", "stat"))
            .await
    }

    pub async fn path_exists(&self, path: &str) -> Result<bool, HopsworksError> {
        match self.stat_path(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// One directory level, following pagination up to `limit` entries.
    /// The flag is set when the directory holds more than `limit` entries.
    pub async fn list_directory(
        &self,
        path: &str,
        limit: usize,
    ) -> Result<(Vec<DatasetEntry>, bool), HopsworksError> {
        let (_, endpoint) = self.dataset_path(path).await?;
        let mut entries = Vec::new();
        let mut offset = 0;
        loop {
            // One entry past the limit tells a full listing from a cut one.
            let page_size = LISTING_PAGE.min(limit + 1 - entries.len());
            let page = self
                .execute(
                    ApiRequest::get(endpoint.clone())
                        .query("action", "listing")
                        .query("expand", "inodes")
                        .query("offset", offset)
                        .query("limit", page_size)
                        .query("sort_by", "ID:asc"),
                )
                .await?;
            let batch = items(&page);
            let fetched = batch.len();
            entries.extend(batch.iter().filter_map(DatasetEntry::from_value));
            offset += fetched;

            let total = page["count"].as_u64().map(|c| c as usize);
            let exhausted =
                fetched == 0 || fetched < page_size || total.is_some_and(|t| offset >= t);
            if exhausted || entries.len() > limit {
                break;
            }
        }
        let truncated = entries.len() > limit;
        entries.truncate(limit);
        Ok((entries, truncated))
    }

    /// Walk a directory tree breadth-first, stopping at `limit` entries.
    /// The flag is set when entries were left out.
    pub async fn list_recursive(
        &self,
        path: &str,
        limit: usize,
    ) -> Result<(Vec<DatasetEntry>, bool), HopsworksError> {
        let project = self.project().await?;
        let mut pending = VecDeque::from(vec![path.to_string()]);
        let mut entries = Vec::new();
        while let Some(dir) = pending.pop_front() {
            let (batch, truncated) = self.list_directory(&dir, limit - entries.len()).await?;
            for entry in batch {
                if entry.dir {
                    pending.push_back(normalize_dataset_path(&project.name, &entry.path));
                }
                entries.push(entry);
            }
            if truncated {
                return Ok((entries, true));
            }
            if entries.len() >= limit {
                // Full; any entry in an unvisited directory is left out.
                for dir in pending {
                    let (more, _) = self.list_directory(&dir, 1).await?;
                    if !more.is_empty() {
                        return Ok((entries, true));
                    }
                }
                return Ok((entries, false));
            }
        }
        Ok((entries, false))
    }

    pub async fn create_directory(&self, path: &str) -> Result<Value, HopsworksError> {
        let (_, endpoint) = self.dataset_path(path).await?;
        self.execute(
            ApiRequest::post(endpoint)
                .query("action", "create")
                .query("searchable", "true")
                .query("generate_readme", "false")
                .query("type", "DATASET"),
        )
        .await
    }

    pub async fn remove_path(&self, path: &str) -> Result<Value, HopsworksError> {
        let (_, endpoint) = self.dataset_path(path).await?;
        self.execute(ApiRequest::delete(endpoint)).await
    }

    /// `action` is `copy` or `move`.
    pub async fn transfer_path(
        &self,
        action: &str,
        source: &str,
        destination: &str,
    ) -> Result<Value, HopsworksError> {
        let (project, endpoint) = self.dataset_path(source).await?;
        let destination = absolute_dataset_path(&project.name, destination);
        self.execute(
            ApiRequest::post(endpoint)
                .query("action", action)
                .query("destination_path", destination),
        )
        .await
    }

    /// `action` is `zip` or `unzip`.
    pub async fn archive_path(
        &self,
        action: &str,
        path: &str,
        destination: Option<&str>,
    ) -> Result<Value, HopsworksError> {
        let (project, endpoint) = self.dataset_path(path).await?;
        let destination = destination.map(|d| absolute_dataset_path(&project.name, d));
        self.execute(
            ApiRequest::post(endpoint)
                .query("action", action)
                .query_opt("destination_path", destination),
        )
        .await
    }

    /// Archive state of a path; `NONE` when no zip or unzip is running.
    pub async fn zip_state(&self, path: &str) -> Result<String, HopsworksError> {
        let stat = self.stat_path(path).await?;
        let attrs = stat.get("attributes").unwrap_or(&stat);
        Ok(attrs["zipState"].as_str().unwrap_or("NONE").to_string())
    }

    /// Wait for a zip of `path` to produce its archive. Returns the archive
    /// path.
    pub async fn await_zip(
        &self,
        path: &str,
        destination: Option<&str>,
        timeout: Duration,
        interval: Duration,
    ) -> Result<String, HopsworksError> {
        let archive = zip_archive_path(path, destination);
        let archive = archive.as_str();
        poll_until("zip", timeout, interval, || async move {
            Ok(self.path_exists(archive).await?.then(|| archive.to_string()))
        })
        .await
    }

    /// Wait for an unzip of `path` to finish. Returns the extracted
    /// directory.
    pub async fn await_unzip(
        &self,
        path: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<String, HopsworksError> {
        let trimmed = path.trim_end_matches('/');
        let extracted = trimmed.strip_suffix(".zip").unwrap_or(trimmed);
        poll_until("unzip", timeout, interval, || async move {
            if self.zip_state(path).await? != "NONE" {
                return Ok(None);
            }
            Ok(self.path_exists(extracted).await?.then(|| extracted.to_string()))
        })
        .await
    }

    fn download_request(project: &ProjectRef, path: &str) -> ApiRequest {
        ApiRequest::get(format!(
            "project/{}/dataset/download/with_auth/{}",
            project.id,
            encode_path(&normalize_dataset_path(&project.name, path))
        ))
        .query("type", "DATASET")
    }

    /// Read up to `max_bytes` of a file. Returns the bytes and whether the
    /// file was longer.
    pub async fn read_file(
        &self,
        path: &str,
        max_bytes: usize,
    ) -> Result<(Vec<u8>, bool), HopsworksError> {
        let project = self.project().await?;
        let mut resp = self
            .execute_raw(Self::download_request(&project, path))
            .await?;
        let mut data = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            data.extend_from_slice(&chunk);
            if data.len() > max_bytes {
                data.truncate(max_bytes);
                return Ok((data, true));
            }
        }
        Ok((data, false))
    }

    /// Stream a file to `local_path`. Returns the number of bytes written.
    pub async fn download_to(&self, path: &str, local_path: &Path) -> Result<u64, HopsworksError> {
        let project = self.project().await?;
        let mut resp = self
            .execute_raw(Self::download_request(&project, path))
            .await?;
        let mut file = tokio::fs::File::create(local_path).await?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    /// Upload `local_path` into the directory `upload_dir` with the flow
    /// chunk protocol used by the Hopsworks UI and SDK.
    pub async fn upload_file(
        &self,
        local_path: &Path,
        upload_dir: &str,
    ) -> Result<String, HopsworksError> {
        self.upload_in_chunks(local_path, upload_dir, UPLOAD_CHUNK_SIZE)
            .await
    }

    /// Upload reading one chunk of `chunk_size` bytes at a time.
    pub(crate) async fn upload_in_chunks(
        &self,
        local_path: &Path,
        upload_dir: &str,
        chunk_size: usize,
    ) -> Result<String, HopsworksError> {
        let project = self.project().await?;
        let dir = normalize_dataset_path(&project.name, upload_dir);
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                HopsworksError::InvalidArgument(format!(
                    "{} does not name a file",
                    local_path.display()
                ))
            })?
            .to_string();

        let mut file = tokio::fs::File::open(local_path).await?;
        let total_size = file.metadata().await?.len();
        let chunk_len = chunk_size.max(1) as u64;
        let total_chunks = total_size.div_ceil(chunk_len).max(1);
        let identifier = format!("{}_{}", total_size, file_name);
        let endpoint = format!("project/{}/dataset/upload/{}", project.id, encode_path(&dir));

        for index in 0..total_chunks {
            let start = index * chunk_len;
            let current = chunk_len.min(total_size - start);
            let mut chunk = vec![0u8; current as usize];
            file.read_exact(&mut chunk).await?;

            let part = reqwest::multipart::Part::bytes(chunk)
                .file_name(file_name.clone())
                .mime_str("application/octet-stream")
                .map_err(|e| HopsworksError::Other(e.to_string()))?;
            let form = reqwest::multipart::Form::new()
                .text("templateId", "-1")
                .text("flowChunkNumber", (index + 1).to_string())
                .text("flowChunkSize", chunk_len.to_string())
                .text("flowCurrentChunkSize", current.to_string())
                .text("flowTotalSize", total_size.to_string())
                .text("flowIdentifier", identifier.clone())
                .text("flowFilename", file_name.clone())
                .text("flowRelativePath", file_name.clone())
                .text("flowTotalChunks", total_chunks.to_string())
                .part("file", part);

            tracing::debug!(file = %file_name, chunk = index + 1, total_chunks, "Uploading chunk");
            self.execute(ApiRequest::post(endpoint.clone()).multipart(form))
                .await?;
        }

        Ok(if dir.is_empty() {
            file_name
        } else {
            format!("{}/{}", dir, file_name)
        })
    }
}

/// Where a zip of `path` lands: next to it, or inside `destination`.
pub(crate) fn zip_archive_path(path: &str, destination: Option<&str>) -> String {
    let source = path.trim_end_matches('/');
    match destination {
        Some(dir) => {
            let name = source.rsplit('/').next().unwrap_or(source);
            format!("{}/{}.zip", dir.trim_end_matches('/'), name)
        }
        None => format!("{}.zip", source),
    }
}
