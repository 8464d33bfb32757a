//! Git providers, cloned repositories and git commands.
//!
//! Repository commands run asynchronously on the cluster: every call returns
//! a git execution which is polled until it settles.

use super::datasets::absolute_dataset_path;
use super::{items, poll_until, segment, ApiRequest, HopsworksClient};
use crate::error::HopsworksError;
use serde_json::{json, Value};
use std::time::Duration;

pub const GIT_PROVIDERS: &[&str] = &["GitHub", "GitLab", "BitBucket"];

const GIT_TERMINAL_STATES: &[&str] = &[
    "SUCCESS",
    "FAILED",
    "KILLED",
    "TIMEDOUT",
    "CANCELLED",
    "INITIALIZATION_FAILED",
];

/// How long a git command may take before the wait gives up.
pub const GIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// A command on a cloned repository.
#[derive(Debug, Clone, PartialEq)]
pub enum GitCommand {
    Checkout { branch: String, create: bool },
    Commit { message: String, all: bool, files: Vec<String> },
    Push { remote: String, branch: String, force: bool },
    Pull { remote: String, branch: String, force: bool },
    Status,
}

impl GitCommand {
    fn action(&self) -> &'static str {
        match self {
            GitCommand::Checkout { .. } => "checkout",
            GitCommand::Commit { .. } => "commit",
            GitCommand::Push { .. } => "push",
            GitCommand::Pull { .. } => "pull",
            GitCommand::Status => "status",
        }
    }

    fn body(&self) -> Value {
        match self {
            GitCommand::Checkout { branch, create } => json!({
                "type": "checkoutCommandConfiguration",
                "branchName": branch,
                "createBranch": create,
            }),
            GitCommand::Commit { message, all, files } => json!({
                "type": "commitCommandConfiguration",
                "message": message,
                "all": all,
                "files": files,
            }),
            GitCommand::Push { remote, branch, force } => json!({
                "type": "pushCommandConfiguration",
                "remoteName": remote,
                "branchName": branch,
                "force": force,
            }),
            GitCommand::Pull { remote, branch, force } => json!({
                "type": "pullCommandConfiguration",
                "remoteName": remote,
                "branchName": branch,
                "force": force,
            }),
            GitCommand::Status => json!({ "type": "statusCommandConfiguration" }),
        }
    }
}

pub fn is_git_terminal_state(state: &str) -> bool {
    GIT_TERMINAL_STATES.contains(&state.to_ascii_uppercase().as_str())
}

/// Pick the repository called `name`, disambiguated by `path` when several
/// clones share the name.
pub(crate) fn select_repo(
    repos: Vec<Value>,
    project: &str,
    name: &str,
    path: Option<&str>,
) -> Result<Option<Value>, HopsworksError> {
    let mut matches: Vec<Value> = repos.into_iter().filter(|r| r["name"] == name).collect();
    if let Some(path) = path {
        let wanted = absolute_dataset_path(project, path);
        matches.retain(|r| {
            r["path"]
                .as_str()
                .is_some_and(|p| absolute_dataset_path(project, p) == wanted)
        });
    }
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        _ => {
            let paths: Vec<&str> = matches.iter().filter_map(|r| r["path"].as_str()).collect();
            Err(HopsworksError::InvalidArgument(format!(
                "several repositories are named {}; pass one of these paths: {}",
                name,
                paths.join(", ")
            )))
        }
    }
}

impl HopsworksClient {
    // ─── Providers (per user) ────────────────────────────────────────

    pub async fn list_git_providers(&self) -> Result<Vec<Value>, HopsworksError> {
        let resp = self.get("users/git/provider").await?;
        Ok(items(&resp))
    }

    pub async fn set_git_provider(
        &self,
        provider: &str,
        username: &str,
        token: &str,
    ) -> Result<Value, HopsworksError> {
        self.execute(ApiRequest::post("users/git/provider").json(json!({
            "gitProvider": provider,
            "username": username,
            "token": token,
        })))
        .await
    }

    pub async fn delete_git_provider(&self, provider: &str) -> Result<Value, HopsworksError> {
        self.delete(format!("users/git/provider/{}", segment(provider))).await
    }

    // ─── Repositories ────────────────────────────────────────────────

    async fn git_path(&self, suffix: &str) -> Result<String, HopsworksError> {
        let project = self.project().await?;
        Ok(format!("project/{}/git/{}", project.id, suffix))
    }

    pub async fn list_repos(&self) -> Result<Vec<Value>, HopsworksError> {
        let path = self.git_path("repositories").await?;
        let resp = self
            .execute(ApiRequest::get(path).query("expand", "creator"))
            .await?;
        Ok(items(&resp))
    }

    /// `None` when no repository matches.
    pub async fn find_repo(
        &self,
        name: &str,
        path: Option<&str>,
    ) -> Result<Option<Value>, HopsworksError> {
        let project = self.project().await?;
        let repos = self.list_repos().await?;
        select_repo(repos, &project.name, name, path)
    }

    /// Clone a repository into a project directory and wait for the clone.
    pub async fn clone_repo(
        &self,
        url: &str,
        path: &str,
        provider: Option<&str>,
        branch: Option<&str>,
        interval: Duration,
    ) -> Result<Value, HopsworksError> {
        let project = self.project().await?;
        let request_path = self.git_path("clone").await?;
        let execution = self
            .execute(
                ApiRequest::post(request_path)
                    .query("expand", "repository")
                    .json(json!({
                        "url": url,
                        "path": absolute_dataset_path(&project.name, path),
                        "provider": provider,
                        "branch": branch,
                    })),
            )
            .await?;
        let repo_id = execution["repository"]["id"].as_i64().ok_or_else(|| {
            HopsworksError::Other(format!("clone returned no repository: {}", execution))
        })?;
        self.await_git_execution(repo_id, &execution, interval).await?;
        self.get(self.git_path(&format!("repository/{}", repo_id)).await?)
            .await
    }

    /// Run a command on a repository and wait until it settles. A failed
    /// command is an error carrying the command output.
    pub async fn run_git_command(
        &self,
        repo_id: i64,
        command: &GitCommand,
        interval: Duration,
    ) -> Result<Value, HopsworksError> {
        let path = self.git_path(&format!("repository/{}", repo_id)).await?;
        let execution = self
            .execute(
                ApiRequest::post(path)
                    .query("action", command.action())
                    .query("expand", "repository")
                    .json(command.body()),
            )
            .await?;
        tracing::debug!(repo = repo_id, action = command.action(), "Started git command");
        self.await_git_execution(repo_id, &execution, interval).await
    }

    async fn await_git_execution(
        &self,
        repo_id: i64,
        execution: &Value,
        interval: Duration,
    ) -> Result<Value, HopsworksError> {
        let id = execution["id"]
            .as_i64()
            .ok_or_else(|| {
                HopsworksError::Other(format!("git execution without id: {}", execution))
            })?;
        let path = self
            .git_path(&format!("repository/{}/execution/{}", repo_id, id))
            .await?;
        let done = poll_until(
            &format!("git execution {}", id),
            GIT_COMMAND_TIMEOUT,
            interval,
            || {
                let path = path.clone();
                async move {
                    let execution = self.get(path).await?;
                    let state = execution["state"].as_str().unwrap_or_default();
                    Ok(is_git_terminal_state(state).then_some(execution))
                }
            },
        )
        .await?;
        if !done["state"]
            .as_str()
            .is_some_and(|s| s.eq_ignore_ascii_case("SUCCESS"))
        {
            return Err(HopsworksError::Other(format!(
                "git command ended in state {}: {}",
                done["state"].as_str().unwrap_or("unknown"),
                done["commandResultMessage"].as_str().unwrap_or_default()
            )));
        }
        Ok(done)
    }

    pub async fn add_remote(
        &self,
        repo_id: i64,
        name: &str,
        url: &str,
    ) -> Result<Value, HopsworksError> {
        let path = self.git_path(&format!("repository/{}/remote", repo_id)).await?;
        self.execute(
            ApiRequest::post(path)
                .query("action", "add")
                .query("name", name)
                .query("url", url),
        )
        .await
    }

    pub async fn list_remotes(&self, repo_id: i64) -> Result<Vec<Value>, HopsworksError> {
        let path = self.git_path(&format!("repository/{}/remote", repo_id)).await?;
        Ok(items(&self.get(path).await?))
    }
}

/// Files listed by a finished `status` command.
///
/// The command result message is a JSON document `{"status": [...]}`; an
/// unparsable message means a clean tree.
pub fn parse_status_files(execution: &Value) -> Vec<Value> {
    execution["commandResultMessage"]
        .as_str()
        .and_then(|m| serde_json::from_str::<Value>(m).ok())
        .and_then(|v| v["status"].as_array().cloned())
        .unwrap_or_default()
}
