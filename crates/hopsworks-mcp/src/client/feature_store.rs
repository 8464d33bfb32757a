//! Feature store, feature group, feature view and training dataset calls.

use super::{items, segment, ApiRequest, HopsworksClient, ProjectRef};
use crate::error::HopsworksError;
use serde_json::{json, Value};

/// Name of a project's default feature store.
pub fn default_feature_store_name(project: &str) -> String {
    format!("{}_featurestore", project.to_lowercase())
}

/// A resolved feature store: everything needed to address its children.
#[derive(Debug, Clone)]
pub struct FeatureStoreRef {
    pub project: ProjectRef,
    pub id: i64,
    pub name: String,
}

impl FeatureStoreRef {
    pub(crate) fn path(&self, suffix: &str) -> String {
        format!(
            "project/{}/featurestores/{}/{}",
            self.project.id, self.id, suffix
        )
    }
}

impl HopsworksClient {
    pub async fn get_feature_store(&self, name: Option<&str>) -> Result<Value, HopsworksError> {
        let project = self.project().await?;
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| default_feature_store_name(&project.name));
        self.get(format!("project/{}/featurestores/{}", project.id, segment(&name)))
            .await
    }

    pub async fn list_feature_stores(&self) -> Result<Value, HopsworksError> {
        let project = self.project().await?;
        self.get(format!("project/{}/featurestores", project.id))
            .await
    }

    pub async fn feature_store_ref(
        &self,
        name: Option<&str>,
    ) -> Result<FeatureStoreRef, HopsworksError> {
        let project = self.project().await?;
        let fs = self.get_feature_store(name).await?;
        let id = fs["featurestoreId"].as_i64().ok_or_else(|| {
            HopsworksError::Other(format!("feature store without id: {}", fs))
        })?;
        Ok(FeatureStoreRef {
            project,
            id,
            name: fs["featurestoreName"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        })
    }

    pub async fn list_transformation_functions(
        &self,
        fs: &FeatureStoreRef,
    ) -> Result<Value, HopsworksError> {
        self.get(fs.path("transformationfunctions")).await
    }

    /// Versions of a named transformation function, or only `version`.
    pub async fn get_transformation_functions(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: Option<i64>,
    ) -> Result<Vec<Value>, HopsworksError> {
        let resp = self
            .execute(
                ApiRequest::get(fs.path("transformationfunctions"))
                    .query("name", name)
                    .query_opt("version", version),
            )
            .await?;
        Ok(items(&resp))
    }

    pub async fn create_transformation_function(
        &self,
        fs: &FeatureStoreRef,
        body: Value,
    ) -> Result<Value, HopsworksError> {
        self.execute(ApiRequest::post(fs.path("transformationfunctions")).json(body))
            .await
    }

    pub async fn delete_transformation_function(
        &self,
        fs: &FeatureStoreRef,
        id: i64,
    ) -> Result<Value, HopsworksError> {
        self.delete(fs.path(&format!("transformationfunctions/{}", id)))
            .await
    }

    pub async fn get_storage_connector(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
    ) -> Result<Value, HopsworksError> {
        self.get(fs.path(&format!("storageconnectors/{}", segment(name))))
            .await
    }

    // ─── Feature groups ──────────────────────────────────────────────

    pub async fn list_feature_groups(
        &self,
        fs: &FeatureStoreRef,
    ) -> Result<Vec<Value>, HopsworksError> {
        Ok(items(&self.get(fs.path("featuregroups")).await?))
    }

    /// All versions of a feature group, or only `version` when given.
    pub async fn get_feature_group_versions(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: Option<i64>,
    ) -> Result<Vec<Value>, HopsworksError> {
        let resp = self
            .execute(
                ApiRequest::get(fs.path(&format!("featuregroups/{}", segment(name))))
                    .query_opt("version", version),
            )
            .await?;
        Ok(items(&resp))
    }

    /// One version of a feature group; the latest when `version` is `None`.
    pub async fn get_feature_group(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: Option<i64>,
    ) -> Result<Value, HopsworksError> {
        self.get_feature_group_versions(fs, name, version)
            .await?
            .into_iter()
            .max_by_key(|fg| fg["version"].as_i64().unwrap_or(0))
            .ok_or_else(|| {
                HopsworksError::NotFound(match version {
                    Some(v) => format!("feature group {} version {}", name, v),
                    None => format!("feature group {}", name),
                })
            })
    }

    pub async fn get_feature_group_by_id(
        &self,
        fs: &FeatureStoreRef,
        id: i64,
    ) -> Result<Value, HopsworksError> {
        self.get(fs.path(&format!("featuregroups/{}", id))).await
    }

    /// Latest existing version of a feature group, `None` when there is none.
    pub async fn latest_feature_group_version(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
    ) -> Result<Option<i64>, HopsworksError> {
        match self.get_feature_group_versions(fs, name, None).await {
            Ok(versions) => Ok(versions.iter().filter_map(|fg| fg["version"].as_i64()).max()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_feature_group(
        &self,
        fs: &FeatureStoreRef,
        body: Value,
    ) -> Result<Value, HopsworksError> {
        self.execute(ApiRequest::post(fs.path("featuregroups")).json(body))
            .await
    }

    /// Save the metadata (descriptions) of an existing feature group.
    pub async fn update_feature_group_metadata(
        &self,
        fs: &FeatureStoreRef,
        feature_group: Value,
    ) -> Result<Value, HopsworksError> {
        let id = feature_group["id"]
            .as_i64()
            .ok_or_else(|| HopsworksError::Other("feature group without id".into()))?;
        self.execute(
            ApiRequest::put(fs.path(&format!("featuregroups/{}", id)))
                .query("updateMetadata", "true")
                .json(feature_group),
        )
        .await
    }

    pub async fn delete_feature_group(
        &self,
        fs: &FeatureStoreRef,
        id: i64,
    ) -> Result<Value, HopsworksError> {
        self.delete(fs.path(&format!("featuregroups/{}", id))).await
    }

    pub async fn preview_feature_group(
        &self,
        fs: &FeatureStoreRef,
        id: i64,
        online: bool,
        limit: usize,
    ) -> Result<Value, HopsworksError> {
        self.execute(
            ApiRequest::get(fs.path(&format!("featuregroups/{}/preview", id)))
                .query("storage", if online { "online" } else { "offline" })
                .query("limit", limit),
        )
        .await
    }

    /// Most recent statistics commit of a feature group.
    pub async fn feature_group_statistics(
        &self,
        fs: &FeatureStoreRef,
        id: i64,
    ) -> Result<Value, HopsworksError> {
        self.execute(
            ApiRequest::get(fs.path(&format!("featuregroups/{}/statistics", id)))
                .query("fields", "content")
                .query("sort_by", "commit_time:desc")
                .query("offset", 0)
                .query("limit", 1),
        )
        .await
    }

    /// Turn a query description into offline and online SQL.
    pub async fn construct_query(&self, query: Value) -> Result<Value, HopsworksError> {
        let project = self.project().await?;
        self.execute(
            ApiRequest::post(format!("project/{}/featurestores/query", project.id)).json(query),
        )
        .await
    }

    // ─── Feature views ───────────────────────────────────────────────

    pub async fn list_feature_views(
        &self,
        fs: &FeatureStoreRef,
    ) -> Result<Vec<Value>, HopsworksError> {
        Ok(items(&self.get(fs.path("featureview")).await?))
    }

    /// One version of a feature view; the latest when `version` is `None`.
    pub async fn get_feature_view(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: Option<i64>,
    ) -> Result<Value, HopsworksError> {
        match version {
            Some(v) => {
                self.execute(
                    ApiRequest::get(
                        fs.path(&format!("featureview/{}/version/{}", segment(name), v)),
                    )
                        .query("expand", "features"),
                )
                .await
            }
            None => {
                let all = self
                    .execute(
                        ApiRequest::get(fs.path(&format!("featureview/{}", segment(name))))
                            .query("expand", "features"),
                    )
                    .await?;
                items(&all)
                    .into_iter()
                    .max_by_key(|fv| fv["version"].as_i64().unwrap_or(0))
                    .ok_or_else(|| HopsworksError::NotFound(format!("feature view {}", name)))
            }
        }
    }

    pub async fn create_feature_view(
        &self,
        fs: &FeatureStoreRef,
        body: Value,
    ) -> Result<Value, HopsworksError> {
        self.execute(ApiRequest::post(fs.path("featureview")).json(body))
            .await
    }

    pub async fn update_feature_view(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: i64,
        body: Value,
    ) -> Result<Value, HopsworksError> {
        self.execute(
            ApiRequest::put(fs.path(&format!("featureview/{}/version/{}", segment(name), version)))
                .json(body),
        )
        .await
    }

    pub async fn delete_feature_view(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: i64,
    ) -> Result<Value, HopsworksError> {
        self.delete(fs.path(&format!("featureview/{}/version/{}", segment(name), version)))
            .await
    }

    /// Query description of a feature view's batch data between two epoch
    /// millisecond bounds.
    pub async fn feature_view_batch_query(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: i64,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Value, HopsworksError> {
        self.execute(
            ApiRequest::get(fs.path(&format!(
                "featureview/{}/version/{}/query/batch",
                segment(name),
                version
            )))
            .query_opt("start_time", start_time)
            .query_opt("end_time", end_time)
            .query("with_label", "false")
            .query("with_primary_keys", "false")
            .query("with_event_time", "false"),
        )
        .await
    }

    // ─── Training datasets ───────────────────────────────────────────

    pub async fn list_training_datasets(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: i64,
    ) -> Result<Vec<Value>, HopsworksError> {
        let resp = self
            .get(fs.path(&format!(
                "featureview/{}/version/{}/trainingdatasets",
                segment(name),
                version
            )))
            .await?;
        Ok(items(&resp))
    }

    /// Register training dataset metadata, then launch the job that writes it.
    /// Returns the training dataset and the launched job.
    pub async fn create_training_dataset(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: i64,
        body: Value,
    ) -> Result<(Value, Value), HopsworksError> {
        let base = format!(
            "featureview/{}/version/{}/trainingdatasets",
            segment(name),
            version
        );
        let td = self
            .execute(ApiRequest::post(fs.path(&base)).json(body))
            .await?;
        let td_version = td["version"]
            .as_i64()
            .ok_or_else(|| {
                HopsworksError::Other(format!("training dataset without version: {}", td))
            })?;
        let job = self
            .execute(
                ApiRequest::post(fs.path(&format!("{}/version/{}/compute", base, td_version)))
                    .json(json!({ "overwrite": false })),
            )
            .await?;
        Ok((td, job))
    }

    pub async fn get_training_dataset(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: i64,
        td_version: i64,
    ) -> Result<Value, HopsworksError> {
        self.get(fs.path(&training_dataset_path(name, version, td_version)))
            .await
    }

    /// Most recent statistics of a training dataset.
    pub async fn training_dataset_statistics(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: i64,
        td_version: i64,
    ) -> Result<Value, HopsworksError> {
        let base = training_dataset_path(name, version, td_version);
        self.execute(
            ApiRequest::get(fs.path(&format!("{}/statistics", base)))
                .query("fields", "content")
                .query("sort_by", "computation_time:desc")
                .query("offset", 0)
                .query("limit", 1),
        )
        .await
    }

    /// Launch the job that computes training dataset statistics.
    pub async fn compute_training_dataset_statistics(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: i64,
        td_version: i64,
    ) -> Result<Value, HopsworksError> {
        let base = training_dataset_path(name, version, td_version);
        self.execute(ApiRequest::post(fs.path(&format!("{}/statistics/compute", base))))
            .await
    }

    pub async fn delete_training_dataset(
        &self,
        fs: &FeatureStoreRef,
        name: &str,
        version: i64,
        td_version: i64,
    ) -> Result<Value, HopsworksError> {
        self.delete(fs.path(&training_dataset_path(name, version, td_version)))
            .await
    }
}

fn training_dataset_path(name: &str, version: i64, td_version: i64) -> String {
    format!(
        "featureview/{}/version/{}/trainingdatasets/version/{}",
        segment(name),
        version,
        td_version
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHopsworks;

    const FS: &str = "project/119/featurestores/67";

    async fn fs_mock() -> MockHopsworks {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/119/featurestores/demo_featurestore",
            200,
            json!({"featurestoreId": 67, "featurestoreName": "demo_featurestore"}),
        )
        .await;
        mock
    }

    #[test]
    fn default_store_name_is_lowercase() {
        assert_eq!(default_feature_store_name("Fraud"), "fraud_featurestore");
    }

    #[tokio::test]
    async fn resolves_default_feature_store() {
        let mock = fs_mock().await;
        let client = mock.client().await;
        let fs = client.feature_store_ref(None).await.unwrap();
        assert_eq!(fs.id, 67);
        assert_eq!(fs.path("featuregroups"), format!("{}/featuregroups", FS));
    }

    #[tokio::test]
    async fn latest_feature_group_version() {
        let mock = fs_mock().await;
        mock.on(
            "GET",
            &format!("{}/featuregroups/sales", FS),
            200,
            json!([{"id": 1, "version": 1}, {"id": 2, "version": 3}, {"id": 3, "version": 2}]),
        )
        .await;
        let client = mock.client().await;
        let fs = client.feature_store_ref(None).await.unwrap();

        let fg = client.get_feature_group(&fs, "sales", None).await.unwrap();
        assert_eq!(fg["id"], 2);
        assert_eq!(
            client.latest_feature_group_version(&fs, "sales").await.unwrap(),
            Some(3)
        );
        assert_eq!(
            client.latest_feature_group_version(&fs, "missing").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn training_dataset_is_created_then_computed() {
        let mock = fs_mock().await;
        let base = format!("{}/featureview/churn/version/1/trainingdatasets", FS);
        mock.on("POST", &base, 201, json!({"id": 9, "version": 2}))
            .await;
        mock.on(
            "POST",
            &format!("{}/version/2/compute", base),
            200,
            json!({"name": "churn_1_2_create_fv_td", "id": 77}),
        )
        .await;
        let client = mock.client().await;
        let fs = client.feature_store_ref(None).await.unwrap();

        let (td, job) = client
            .create_training_dataset(&fs, "churn", 1, json!({"description": "x"}))
            .await
            .unwrap();
        assert_eq!(td["version"], 2);
        assert_eq!(job["id"], 77);
    }

    #[tokio::test]
    async fn transformation_function_lookup_filters_by_name() {
        let mock = fs_mock().await;
        mock.on(
            "GET",
            &format!("{}/transformationfunctions", FS),
            200,
            json!({"count": 1, "items": [{"id": 4, "version": 2}]}),
        )
        .await;
        let client = mock.client().await;
        let fs = client.feature_store_ref(None).await.unwrap();

        let found = client
            .get_transformation_functions(&fs, "scale", Some(2))
            .await
            .unwrap();
        assert_eq!(found[0]["id"], 4);
        let req = &mock
            .requests_to("GET", &format!("{}/transformationfunctions", FS))
            .await[0];
        assert_eq!(req.query_param("name").as_deref(), Some("scale"));
        assert_eq!(req.query_param("version").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn training_dataset_statistics_compute_launches_job() {
        let mock = fs_mock().await;
        let path = format!(
            "{}/featureview/churn/version/1/trainingdatasets/version/3/statistics/compute",
            FS
        );
        mock.on("POST", &path, 200, json!({"name": "churn_1_3_compute_stats", "id": 8}))
            .await;
        let client = mock.client().await;
        let fs = client.feature_store_ref(None).await.unwrap();

        let job = client
            .compute_training_dataset_statistics(&fs, "churn", 1, 3)
            .await
            .unwrap();
        assert_eq!(job["id"], 8);
        assert_eq!(mock.requests_to("POST", &path).await.len(), 1);
    }
}
