//! Python environments and the libraries installed in them.
//!
//! Environment changes are queued as commands; a change is complete when no
//! command of the environment is still NEW or ONGOING.

use super::datasets::absolute_dataset_path;
use super::{items, poll_until, segment, ApiRequest, HopsworksClient};
use crate::error::HopsworksError;
use serde_json::{json, Value};
use std::time::Duration;

/// How a library is installed into an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageSource {
    RequirementsTxt,
    Wheel,
}

impl PackageSource {
    fn as_str(self) -> &'static str {
        match self {
            PackageSource::RequirementsTxt => "REQUIREMENTS_TXT",
            PackageSource::Wheel => "WHEEL",
        }
    }
}

fn is_pending(command: &Value) -> bool {
    matches!(command["status"].as_str(), Some("NEW") | Some("ONGOING"))
}

impl HopsworksClient {
    async fn environments_path(&self, suffix: &str) -> Result<String, HopsworksError> {
        let project = self.project().await?;
        Ok(if suffix.is_empty() {
            format!("project/{}/python/environments", project.id)
        } else {
            format!("project/{}/python/environments/{}", project.id, suffix)
        })
    }

    pub async fn list_environments(&self) -> Result<Vec<Value>, HopsworksError> {
        let path = self.environments_path("").await?;
        Ok(items(&self.get(path).await?))
    }

    pub async fn get_environment(&self, name: &str) -> Result<Value, HopsworksError> {
        let path = self.environments_path(&segment(name)).await?;
        self.get(path).await
    }

    /// `None` when the environment does not exist.
    pub async fn find_environment(&self, name: &str) -> Result<Option<Value>, HopsworksError> {
        match self.get_environment(name).await {
            Ok(env) => Ok(Some(env)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_environment(
        &self,
        name: &str,
        base_environment: Option<&str>,
        description: Option<&str>,
    ) -> Result<Value, HopsworksError> {
        let path = self.environments_path(&segment(name)).await?;
        self.execute(ApiRequest::post(path).json(json!({
            "name": name,
            "baseEnvironmentName": base_environment,
            "description": description,
        })))
        .await
    }

    pub async fn delete_environment(&self, name: &str) -> Result<Value, HopsworksError> {
        let path = self.environments_path(&segment(name)).await?;
        self.delete(path).await
    }

    pub async fn environment_commands(&self, name: &str) -> Result<Vec<Value>, HopsworksError> {
        let path = self.environments_path(&format!("{}/commands", segment(name))).await?;
        Ok(items(&self.get(path).await?))
    }

    /// Wait until the environment's command queue drains. Commands that
    /// ended FAILED are reported as an error.
    pub async fn await_environment(
        &self,
        name: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), HopsworksError> {
        let commands = poll_until(
            &format!("environment {}", name),
            timeout,
            interval,
            || async move {
                let commands = self.environment_commands(name).await?;
                let pending = commands.iter().filter(|c| is_pending(c)).count();
                tracing::debug!(environment = %name, pending, "Polled environment commands");
                Ok((pending == 0).then_some(commands))
            },
        )
        .await?;
        let failed: Vec<String> = commands
            .iter()
            .filter(|c| c["status"] == "FAILED")
            .map(|c| {
                format!(
                    "{} {}: {}",
                    c["op"].as_str().unwrap_or("command"),
                    c["library"].as_str().unwrap_or_default(),
                    c["errorMessage"].as_str().unwrap_or("failed")
                )
            })
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(HopsworksError::Other(format!(
                "environment {}: {}",
                name,
                failed.join("; ")
            )))
        }
    }

    pub async fn list_libraries(&self, environment: &str) -> Result<Vec<Value>, HopsworksError> {
        let path = self
            .environments_path(&format!("{}/libraries", segment(environment)))
            .await?;
        Ok(items(&self.get(path).await?))
    }

    /// Install a requirements file or wheel stored in the project. The
    /// library takes the file name.
    pub async fn install_library(
        &self,
        environment: &str,
        dataset_path: &str,
        source: PackageSource,
    ) -> Result<Value, HopsworksError> {
        let project = self.project().await?;
        let absolute = absolute_dataset_path(&project.name, dataset_path);
        let library = absolute
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                HopsworksError::InvalidArgument(format!("{} does not name a file", dataset_path))
            })?
            .to_string();
        let path = self
            .environments_path(&format!(
                "{}/libraries/{}",
                segment(environment),
                segment(&library)
            ))
            .await?;
        self.execute(ApiRequest::post(path).json(json!({
            "packageSource": source.as_str(),
            "dependencyUrl": absolute,
        })))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHopsworks;

    #[tokio::test]
    async fn waits_for_queue_to_drain() {
        let mock = MockHopsworks::start().await;
        mock.on_sequence(
            "GET",
            "project/119/python/environments/ml/commands",
            vec![
                (200, json!({"items": [{"status": "ONGOING", "op": "CREATE"}]})),
                (200, json!({"items": [{"status": "DONE", "op": "CREATE"}]})),
            ],
        )
        .await;
        let client = mock.client().await;
        client
            .await_environment("ml", Duration::from_secs(5), Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(
            mock.requests_to("GET", "project/119/python/environments/ml/commands")
                .await
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn failed_command_is_reported() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/python/environments/ml/commands",
            200,
            json!({"items": [{
                "status": "FAILED",
                "op": "INSTALL",
                "library": "torch",
                "errorMessage": "no space left"
            }]}),
        )
        .await;
        let client = mock.client().await;
        let err = client
            .await_environment("ml", Duration::from_secs(5), Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no space left"));
    }

    #[tokio::test]
    async fn wheel_install_uses_file_name() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "POST",
            "project/119/python/environments/ml/libraries/pkg-1.0-py3-none-any.whl",
            200,
            json!({"library": "pkg"}),
        )
        .await;
        let client = mock.client().await;

        client
            .install_library("ml", "Resources/pkg-1.0-py3-none-any.whl", PackageSource::Wheel)
            .await
            .unwrap();
        let sent = mock
            .requests_to(
                "POST",
                "project/119/python/environments/ml/libraries/pkg-1.0-py3-none-any.whl",
            )
            .await[0]
            .json();
        assert_eq!(sent["packageSource"], "WHEEL");
        assert_eq!(sent["dependencyUrl"], "/Projects/demo/Resources/pkg-1.0-py3-none-any.whl");
    }
}
