//! Git providers and repositories cloned into the project.

use super::{format_millis, json_result};
use crate::client::{parse_status_files, GitCommand, HopsworksClient, GIT_PROVIDERS};
use crate::server::HopsworksMcpServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const GIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetProviderParams {
    /// GitHub, GitLab or BitBucket
    pub provider: String,
    /// Username on the provider
    pub username: String,
    /// Personal access token
    pub token: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProviderParams {
    /// GitHub, GitLab or BitBucket
    pub provider: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CloneRepoParams {
    /// Repository URL
    pub url: String,
    /// Project directory to clone into, e.g. `Jupyter`
    pub path: String,
    /// GitHub, GitLab or BitBucket (needed for private repositories)
    pub provider: Option<String>,
    /// Branch to check out after cloning
    pub branch: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RepoParams {
    /// Repository name
    pub name: String,
    /// Repository path, required when several repositories share the name
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CheckoutParams {
    /// Repository name
    pub repo_name: String,
    /// Branch to check out
    pub branch: String,
    /// Create the branch first
    pub create: Option<bool>,
    /// Repository path, required when several repositories share the name
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CommitParams {
    /// Repository name
    pub repo_name: String,
    /// Commit message
    pub message: String,
    /// Stage every modified and deleted file (default true)
    pub all_changes: Option<bool>,
    /// New files to add to the commit
    pub files: Option<Vec<String>>,
    /// Repository path, required when several repositories share the name
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SyncParams {
    /// Repository name
    pub repo_name: String,
    /// Branch to push or pull
    pub branch: String,
    /// Remote name (default `origin`)
    pub remote: Option<String>,
    /// Overwrite diverging history
    pub force: Option<bool>,
    /// Repository path, required when several repositories share the name
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RepoNameParams {
    /// Repository name
    pub repo_name: String,
    /// Repository path, required when several repositories share the name
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddRemoteParams {
    /// Repository name
    pub repo_name: String,
    /// Name of the new remote
    pub remote_name: String,
    /// Remote URL
    pub url: String,
    /// Repository path, required when several repositories share the name
    pub path: Option<String>,
}

#[tool_router(router = git_router, vis = "pub(crate)")]
impl HopsworksMcpServer {
    #[tool(description = "List the git providers configured for the current user.")]
    async fn list_git_providers(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(match self.client.list_git_providers().await {
            Ok(providers) => {
                let providers: Vec<Value> = providers
                    .iter()
                    .map(|p| json!({ "provider": p["gitProvider"], "username": p["username"] }))
                    .collect();
                json_result(&json!({ "count": providers.len(), "providers": providers }))
            }
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Store credentials for a git provider (GitHub, GitLab or BitBucket).")]
    async fn set_git_provider(
        &self,
        params: Parameters<SetProviderParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let Some(provider) = canonical_provider(&p.provider) else {
            return Ok(invalid_provider(&p.provider));
        };
        Ok(
            match self
                .client
                .set_git_provider(provider, &p.username, &p.token)
                .await
            {
                Ok(_) => json_result(&json!({
                    "provider": provider,
                    "username": p.username,
                    "status": "configured",
                })),
                Err(e) => e.into_tool_result(),
            },
        )
    }

    #[tool(description = "Remove the stored credentials of a git provider.")]
    async fn delete_git_provider(
        &self,
        params: Parameters<ProviderParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(delete_provider_impl(&self.client, &params.0.provider).await)
    }

    #[tool(description = "Clone a git repository into a project directory.")]
    async fn clone_repo(
        &self,
        params: Parameters<CloneRepoParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(clone_repo_impl(&self.client, params.0, GIT_POLL_INTERVAL).await)
    }

    #[tool(description = "List the git repositories cloned in the current project.")]
    async fn list_repos(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(match self.client.list_repos().await {
            Ok(repos) => {
                let repos: Vec<Value> = repos.iter().map(repo_summary).collect();
                json_result(&json!({ "count": repos.len(), "repositories": repos }))
            }
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Get a cloned repository by name.")]
    async fn get_repo(
        &self,
        params: Parameters<RepoParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(match self.client.find_repo(&p.name, p.path.as_deref()).await {
            Ok(Some(repo)) => {
                let mut summary = repo_summary(&repo);
                summary["exists"] = json!(true);
                json_result(&summary)
            }
            Ok(None) => json_result(&json!({ "name": p.name, "exists": false })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "Check out a branch of a repository, optionally creating it.")]
    async fn checkout_branch(
        &self,
        params: Parameters<CheckoutParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let command = GitCommand::Checkout {
            branch: p.branch.clone(),
            create: p.create.unwrap_or(false),
        };
        Ok(repo_command_impl(
            &self.client,
            &p.repo_name,
            p.path.as_deref(),
            command,
            true,
            GIT_POLL_INTERVAL,
        )
        .await)
    }

    #[tool(description = "Commit changes in a repository.")]
    async fn commit(
        &self,
        params: Parameters<CommitParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let command = GitCommand::Commit {
            message: p.message,
            all: p.all_changes.unwrap_or(true),
            files: p.files.unwrap_or_default(),
        };
        Ok(repo_command_impl(
            &self.client,
            &p.repo_name,
            p.path.as_deref(),
            command,
            true,
            GIT_POLL_INTERVAL,
        )
        .await)
    }

    #[tool(description = "Push a branch of a repository to a remote.")]
    async fn push(
        &self,
        params: Parameters<SyncParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let command = GitCommand::Push {
            remote: p.remote.unwrap_or_else(|| "origin".into()),
            branch: p.branch,
            force: p.force.unwrap_or(false),
        };
        Ok(repo_command_impl(
            &self.client,
            &p.repo_name,
            p.path.as_deref(),
            command,
            true,
            GIT_POLL_INTERVAL,
        )
        .await)
    }

    #[tool(description = "Pull a branch of a repository from a remote.")]
    async fn pull(
        &self,
        params: Parameters<SyncParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let command = GitCommand::Pull {
            remote: p.remote.unwrap_or_else(|| "origin".into()),
            branch: p.branch,
            force: p.force.unwrap_or(false),
        };
        Ok(repo_command_impl(
            &self.client,
            &p.repo_name,
            p.path.as_deref(),
            command,
            false,
            GIT_POLL_INTERVAL,
        )
        .await)
    }

    #[tool(description = "Show the working tree status of a repository.")]
    async fn git_status(
        &self,
        params: Parameters<RepoNameParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        Ok(repo_command_impl(
            &self.client,
            &p.repo_name,
            p.path.as_deref(),
            GitCommand::Status,
            false,
            GIT_POLL_INTERVAL,
        )
        .await)
    }

    #[tool(description = "Add a remote to a repository.")]
    async fn add_remote(
        &self,
        params: Parameters<AddRemoteParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let repo = match resolve_repo(&self.client, &p.repo_name, p.path.as_deref()).await {
            Ok(repo) => repo,
            Err(result) => return Ok(result),
        };
        let repo_id = repo["id"].as_i64().unwrap_or_default();
        Ok(match self.client.add_remote(repo_id, &p.remote_name, &p.url).await {
            Ok(_) => json_result(&json!({
                "repository": p.repo_name,
                "remote": p.remote_name,
                "url": p.url,
                "status": "added",
            })),
            Err(e) => e.into_tool_result(),
        })
    }

    #[tool(description = "List the remotes of a repository.")]
    async fn list_remotes(
        &self,
        params: Parameters<RepoNameParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let repo = match resolve_repo(&self.client, &p.repo_name, p.path.as_deref()).await {
            Ok(repo) => repo,
            Err(result) => return Ok(result),
        };
        let repo_id = repo["id"].as_i64().unwrap_or_default();
        Ok(match self.client.list_remotes(repo_id).await {
            Ok(remotes) => {
                let remotes: Vec<Value> = remotes
                    .iter()
                    .map(|r| json!({ "name": r["remoteName"], "url": r["url"] }))
                    .collect();
                json_result(&json!({ "repository": p.repo_name, "remotes": remotes }))
            }
            Err(e) => e.into_tool_result(),
        })
    }
}

/// Provider names are matched case-insensitively.
fn canonical_provider(name: &str) -> Option<&'static str> {
    GIT_PROVIDERS
        .iter()
        .copied()
        .find(|p| p.eq_ignore_ascii_case(name))
}

fn invalid_provider(name: &str) -> CallToolResult {
    json_result(&json!({
        "provider": name,
        "status": "invalid_provider",
        "message": format!("provider must be one of: {}", GIT_PROVIDERS.join(", ")),
    }))
}

fn repo_summary(repo: &Value) -> Value {
    json!({
        "id": repo["id"],
        "name": repo["name"],
        "path": repo["path"],
        "provider": repo["provider"],
        "current_branch": repo["currentBranch"],
        "current_commit": repo["currentCommit"]["commitHash"],
        "creator": repo["creator"]["email"],
        "read_only": repo["readOnly"].as_bool().unwrap_or(false),
        "last_updated": format_millis(&repo["currentCommit"]["time"]),
    })
}

/// The repository, or the tool result to return instead.
async fn resolve_repo(
    client: &HopsworksClient,
    name: &str,
    path: Option<&str>,
) -> Result<Value, CallToolResult> {
    match client.find_repo(name, path).await {
        Ok(Some(repo)) => Ok(repo),
        Ok(None) => Err(json_result(&json!({
            "repository": name,
            "status": "repository_not_found",
        }))),
        Err(e) => Err(e.into_tool_result()),
    }
}

async fn delete_provider_impl(client: &HopsworksClient, provider: &str) -> CallToolResult {
    let Some(provider) = canonical_provider(provider) else {
        return invalid_provider(provider);
    };
    let result = async {
        let configured = client
            .list_git_providers()
            .await?
            .iter()
            .any(|p| p["gitProvider"] == provider);
        if !configured {
            return Ok(false);
        }
        client.delete_git_provider(provider).await?;
        Ok::<_, crate::error::HopsworksError>(true)
    }
    .await;
    match result {
        Ok(true) => json_result(&json!({ "provider": provider, "status": "deleted" })),
        Ok(false) => json_result(&json!({ "provider": provider, "status": "not_found" })),
        Err(e) => e.into_tool_result(),
    }
}

async fn clone_repo_impl(
    client: &HopsworksClient,
    params: CloneRepoParams,
    interval: Duration,
) -> CallToolResult {
    let provider = match params.provider.as_deref() {
        Some(name) => match canonical_provider(name) {
            Some(p) => Some(p),
            None => return invalid_provider(name),
        },
        None => None,
    };
    match client
        .clone_repo(
            &params.url,
            &params.path,
            provider,
            params.branch.as_deref(),
            interval,
        )
        .await
    {
        Ok(repo) => {
            tracing::info!(url = %params.url, path = %params.path, "Cloned repository");
            let mut summary = repo_summary(&repo);
            summary["status"] = json!("cloned");
            json_result(&summary)
        }
        Err(e) => e.into_tool_result(),
    }
}

/// Run a command against a named repository. Commands that change the
/// repository are refused on read-only clones.
async fn repo_command_impl(
    client: &HopsworksClient,
    repo_name: &str,
    path: Option<&str>,
    command: GitCommand,
    writes: bool,
    interval: Duration,
) -> CallToolResult {
    let repo = match resolve_repo(client, repo_name, path).await {
        Ok(repo) => repo,
        Err(result) => return result,
    };
    if writes && repo["readOnly"].as_bool().unwrap_or(false) {
        return json_result(&json!({
            "repository": repo_name,
            "status": "read_only_repository",
        }));
    }
    let Some(repo_id) = repo["id"].as_i64() else {
        return super::error_text(format!("Repository without id: {}", repo));
    };
    let execution = match client.run_git_command(repo_id, &command, interval).await {
        Ok(e) => e,
        Err(e) => return e.into_tool_result(),
    };
    let updated = &execution["repository"];
    let mut result = json!({
        "repository": repo_name,
        "current_branch": updated["currentBranch"],
        "message": execution["commandResultMessage"],
    });
    match &command {
        GitCommand::Checkout { branch, .. } => {
            result["branch"] = json!(branch);
            result["status"] = json!("checked_out");
        }
        GitCommand::Commit { .. } => {
            result["commit"] = updated["currentCommit"]["commitHash"].clone();
            result["status"] = json!("committed");
        }
        GitCommand::Push { remote, branch, .. } => {
            result["remote"] = json!(remote);
            result["branch"] = json!(branch);
            result["status"] = json!("pushed");
        }
        GitCommand::Pull { remote, branch, .. } => {
            result["remote"] = json!(remote);
            result["branch"] = json!(branch);
            result["status"] = json!("pulled");
        }
        GitCommand::Status => {
            let files: Vec<Value> = parse_status_files(&execution)
                .iter()
                .map(|f| json!({ "file": f["filePath"], "status": f["status"] }))
                .collect();
            result["commit"] = updated["currentCommit"]["commitHash"].clone();
            result["files"] = json!(files);
            result["message"] = Value::Null;
        }
    }
    json_result(&result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{result_json, MockHopsworks};

    #[test]
    fn providers_are_case_insensitive() {
        assert_eq!(canonical_provider("github"), Some("GitHub"));
        assert_eq!(canonical_provider("BITBUCKET"), Some("BitBucket"));
        assert_eq!(canonical_provider("gitea"), None);
    }

    #[tokio::test]
    async fn clone_rejects_unknown_provider() {
        let mock = MockHopsworks::start().await;
        let client = mock.client().await;
        let value = result_json(
            &clone_repo_impl(
                &client,
                CloneRepoParams {
                    url: "https://example.com/r.git".into(),
                    path: "Jupyter".into(),
                    provider: Some("gitea".into()),
                    branch: None,
                },
                Duration::from_millis(1),
            )
            .await,
        );
        assert_eq!(value["status"], "invalid_provider");
        assert!(mock.requests().await.is_empty());
    }

    #[tokio::test]
    async fn clone_waits_and_returns_repo() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "POST",
            "project/119/git/clone",
            200,
            json!({"id": 1, "state": "RUNNING", "repository": {"id": 4}}),
        )
        .await;
        mock.on(
            "GET",
            "project/119/git/repository/4/execution/1",
            200,
            json!({"id": 1, "state": "SUCCESS"}),
        )
        .await;
        mock.on(
            "GET",
            "project/119/git/repository/4",
            200,
            json!({
                "id": 4,
                "name": "r",
                "path": "/Projects/demo/Jupyter/r",
                "currentBranch": "main"
            }),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(
            &clone_repo_impl(
                &client,
                CloneRepoParams {
                    url: "https://github.com/o/r.git".into(),
                    path: "Jupyter".into(),
                    provider: Some("github".into()),
                    branch: None,
                },
                Duration::from_millis(1),
            )
            .await,
        );
        assert_eq!(value["status"], "cloned");
        assert_eq!(value["current_branch"], "main");
        let sent = mock.requests_to("POST", "project/119/git/clone").await[0].json();
        assert_eq!(sent["path"], "/Projects/demo/Jupyter");
        assert_eq!(sent["provider"], "GitHub");
    }

    #[tokio::test]
    async fn read_only_repo_refuses_commit() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/git/repositories",
            200,
            json!({"items": [
                {"id": 4, "name": "r", "path": "/Projects/demo/Jupyter/r", "readOnly": true}
            ]}),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(
            &repo_command_impl(
                &client,
                "r",
                None,
                GitCommand::Commit {
                    message: "wip".into(),
                    all: true,
                    files: Vec::new(),
                },
                true,
                Duration::from_millis(1),
            )
            .await,
        );
        assert_eq!(value["status"], "read_only_repository");
    }

    #[tokio::test]
    async fn unknown_repo() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "project/119/git/repositories", 200, json!({"count": 0}))
            .await;
        let client = mock.client().await;
        let value = result_json(
            &repo_command_impl(
                &client,
                "r",
                None,
                GitCommand::Status,
                false,
                Duration::from_millis(1),
            )
            .await,
        );
        assert_eq!(value["status"], "repository_not_found");
    }

    #[tokio::test]
    async fn status_lists_changed_files() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/git/repositories",
            200,
            json!({"items": [{"id": 4, "name": "r", "path": "/Projects/demo/Jupyter/r"}]}),
        )
        .await;
        mock.on("POST", "project/119/git/repository/4", 200, json!({"id": 2}))
            .await;
        mock.on(
            "GET",
            "project/119/git/repository/4/execution/2",
            200,
            json!({
                "id": 2,
                "state": "SUCCESS",
                "commandResultMessage":
                    "{\"status\": [{\"filePath\": \"train.py\", \"status\": \"MODIFIED\"}]}",
                "repository": {"currentBranch": "main", "currentCommit": {"commitHash": "abc123"}},
            }),
        )
        .await;
        let client = mock.client().await;

        let value = result_json(
            &repo_command_impl(
                &client,
                "r",
                None,
                GitCommand::Status,
                false,
                Duration::from_millis(1),
            )
            .await,
        );
        assert_eq!(value["files"][0]["file"], "train.py");
        assert_eq!(value["commit"], "abc123");
    }

    #[tokio::test]
    async fn deleting_unconfigured_provider() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "users/git/provider", 200, json!({"items": []}))
            .await;
        let client = mock.client().await;
        let value = result_json(&delete_provider_impl(&client, "GitLab").await);
        assert_eq!(value["status"], "not_found");
    }
}
