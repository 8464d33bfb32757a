//! Expectation suites and validation reports of feature groups.
//!
//! Hopsworks stores Great Expectations configuration as JSON; the `kwargs`
//! and `meta` fields of expectations travel as JSON-encoded strings.

use super::{items, ApiRequest, HopsworksClient};
use crate::client::FeatureStoreRef;
use crate::error::HopsworksError;
use serde_json::Value;

fn suite_path(fs: &FeatureStoreRef, fg_id: i64, suffix: &str) -> String {
    fs.path(&format!("featuregroups/{}/expectationsuite{}", fg_id, suffix))
}

impl HopsworksClient {
    /// The expectation suite attached to a feature group, `None` when the
    /// feature group has none.
    pub async fn get_expectation_suite(
        &self,
        fs: &FeatureStoreRef,
        fg_id: i64,
    ) -> Result<Option<Value>, HopsworksError> {
        match self.get(suite_path(fs, fg_id, "")).await {
            Ok(suite) if suite["id"].is_i64() => Ok(Some(suite)),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Attach a suite to a feature group, replacing any existing one.
    pub async fn attach_expectation_suite(
        &self,
        fs: &FeatureStoreRef,
        fg_id: i64,
        suite: Value,
    ) -> Result<Value, HopsworksError> {
        self.execute(ApiRequest::put(suite_path(fs, fg_id, "")).json(suite))
            .await
    }

    pub async fn add_expectation(
        &self,
        fs: &FeatureStoreRef,
        fg_id: i64,
        suite_id: i64,
        expectation: Value,
    ) -> Result<Value, HopsworksError> {
        self.execute(
            ApiRequest::post(suite_path(fs, fg_id, &format!("/{}/expectations", suite_id)))
                .json(expectation),
        )
        .await
    }

    pub async fn delete_expectation(
        &self,
        fs: &FeatureStoreRef,
        fg_id: i64,
        suite_id: i64,
        expectation_id: i64,
    ) -> Result<Value, HopsworksError> {
        self.delete(suite_path(
            fs,
            fg_id,
            &format!("/{}/expectations/{}", suite_id, expectation_id),
        ))
        .await
    }

    /// Validation reports of a feature group, newest first.
    pub async fn validation_reports(
        &self,
        fs: &FeatureStoreRef,
        fg_id: i64,
        limit: usize,
    ) -> Result<Vec<Value>, HopsworksError> {
        let resp = self
            .execute(
                ApiRequest::get(fs.path(&format!("featuregroups/{}/validationreport", fg_id)))
                    .query("fields", "content")
                    .query("sort_by", "validation_time:desc")
                    .query("offset", 0)
                    .query("limit", limit),
            )
            .await?;
        Ok(items(&resp))
    }
}
