//! HTTP client for the Hopsworks REST API.
//!
//! One [`HopsworksClient`] is shared by every tool. It owns the `reqwest`
//! client and the current [`Connection`] (endpoint, API key, project). The
//! domain sub-modules add `impl HopsworksClient` blocks with one method per
//! REST operation.

mod datasets;
mod environments;
mod feature_store;
mod flink;
mod git;
mod jobs;
mod kafka;
mod models;
mod opensearch;
mod projects;
mod secrets;
mod validation;

pub use datasets::{absolute_dataset_path, normalize_dataset_path, DatasetEntry};
pub use environments::PackageSource;
pub use feature_store::{default_feature_store_name, FeatureStoreRef};
pub use git::{parse_status_files, GitCommand, GIT_PROVIDERS};
pub use jobs::{is_terminal_state, JOB_TYPES, TERMINAL_STATES};
pub use opensearch::project_index;

use crate::config::Config;
use crate::error::{error_message, HopsworksError};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Host used when none is configured (Hopsworks serverless).
pub const DEFAULT_HOST: &str = "c.app.hopsworks.ai";
/// Default HTTPS port.
pub const DEFAULT_PORT: u16 = 443;

/// Where a Hopsworks instance can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse a host setting.
    ///
    /// Accepts a bare host (`my.hopsworks.ai`), `host:port`, or a full URL
    /// (`https://my.hopsworks.ai:8181`, `http://127.0.0.1:9000`). An explicit
    /// port always wins over `default_port`. An empty host selects
    /// [`DEFAULT_HOST`].
    pub fn parse(host: &str, default_port: u16) -> Result<Self, HopsworksError> {
        let host = host.trim().trim_end_matches('/');
        if host.is_empty() {
            return Ok(Self {
                scheme: "https".into(),
                host: DEFAULT_HOST.into(),
                port: default_port,
            });
        }

        if host.contains("://") {
            let url = Url::parse(host).map_err(|e| {
                HopsworksError::InvalidArgument(format!("invalid host URL {:?}: {}", host, e))
            })?;
            let name = url
                .host_str()
                .ok_or_else(|| HopsworksError::InvalidArgument(format!("no host in {:?}", host)))?;
            let port = match url.port() {
                Some(p) => p,
                None if url.scheme() == "https" => default_port,
                None => url.port_or_known_default().unwrap_or(default_port),
            };
            return Ok(Self {
                scheme: url.scheme().to_string(),
                host: name.to_string(),
                port,
            });
        }

        if let Some((name, port)) = host.rsplit_once(':') {
            if let Ok(port) = port.parse::<u16>() {
                return Ok(Self {
                    scheme: "https".into(),
                    host: name.to_string(),
                    port,
                });
            }
        }

        Ok(Self {
            scheme: "https".into(),
            host: host.to_string(),
            port: default_port,
        })
    }

    /// `scheme://host:port`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// The project all project-scoped tools operate on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRef {
    pub id: i64,
    pub name: String,
}

impl ProjectRef {
    /// Read a project out of any of the shapes Hopsworks returns:
    /// `{projectId, projectName}`, `{id, name}` or `{project: {id, name}}`.
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(inner) = value.get("project").filter(|v| v.is_object()) {
            return Self::from_value(inner);
        }
        let id = value["projectId"].as_i64().or_else(|| value["id"].as_i64())?;
        let name = value["projectName"]
            .as_str()
            .or_else(|| value["name"].as_str())?;
        Some(Self {
            id,
            name: name.to_string(),
        })
    }
}

/// Endpoint, credentials and selected project.
#[derive(Debug, Clone)]
pub struct Connection {
    pub endpoint: Endpoint,
    api_key: Option<SecretString>,
    pub project: Option<ProjectRef>,
}

impl Connection {
    pub fn new(endpoint: Endpoint, api_key: Option<String>) -> Self {
        Self {
            endpoint,
            api_key: api_key.map(SecretString::from),
            project: None,
        }
    }

    /// Build the start-up connection from configuration.
    pub fn from_config(config: &Config) -> Result<Self, HopsworksError> {
        let endpoint = Endpoint::parse(
            config.hopsworks.host.as_deref().unwrap_or(""),
            config.hopsworks.port,
        )?;
        let api_key = config
            .resolve_api_key()
            .map_err(|e| HopsworksError::InvalidArgument(e.to_string()))?;
        Ok(Self::new(endpoint, api_key))
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Transport settings for the underlying HTTP client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub hostname_verification: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            hostname_verification: false,
        }
    }
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.http.connect_timeout_secs),
            request_timeout: Duration::from_secs(config.http.request_timeout_secs),
            hostname_verification: config.hopsworks.hostname_verification,
        }
    }
}

/// Arguments of a login. Unset fields keep the current connection's values.
#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub project: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
enum Root {
    Api,
    FlinkMaster(String),
}

enum Body {
    Empty,
    Json(Value),
    Text(String),
    Multipart(reqwest::multipart::Form),
}

/// One REST call, relative to `/hopsworks-api/api`.
pub(crate) struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Body,
    root: Root,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: Body::Empty,
            root: Root::Api,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_opt<T: ToString>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Body::Json(body);
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Body::Text(body.into());
        self
    }

    pub fn multipart(mut self, form: reqwest::multipart::Form) -> Self {
        self.body = Body::Multipart(form);
        self
    }

    /// Address the Flink REST master of a running cluster instead of the API.
    pub fn flink_master(mut self, app_id: &str) -> Self {
        self.root = Root::FlinkMaster(app_id.to_string());
        self
    }
}

/// Shared HTTP client for the Hopsworks REST API.
#[derive(Clone)]
pub struct HopsworksClient {
    http: reqwest::Client,
    connection: Arc<RwLock<Connection>>,
}

impl HopsworksClient {
    pub fn new(connection: Connection, options: &ClientOptions) -> Result<Self, HopsworksError> {
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .danger_accept_invalid_certs(!options.hostname_verification)
            .build()
            .map_err(|e| HopsworksError::Other(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            connection: Arc::new(RwLock::new(connection)),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, HopsworksError> {
        Self::new(
            Connection::from_config(config)?,
            &ClientOptions::from_config(config),
        )
    }

    /// Snapshot of the current connection.
    pub async fn connection(&self) -> Connection {
        self.connection.read().await.clone()
    }

    /// The current project, or [`HopsworksError::NotConnected`].
    pub async fn project(&self) -> Result<ProjectRef, HopsworksError> {
        self.connection
            .read()
            .await
            .project
            .clone()
            .ok_or(HopsworksError::NotConnected)
    }

    /// Select a project without resolving it against the server.
    pub async fn use_project(&self, project: ProjectRef) {
        self.connection.write().await.project = Some(project);
    }

    /// Connect to a Hopsworks instance and select a project.
    ///
    /// The new connection is only stored once the project resolved; a failed
    /// login leaves the previous connection untouched.
    pub async fn login(&self, request: LoginRequest) -> Result<ProjectRef, HopsworksError> {
        let current = self.connection().await;
        let endpoint = match (&request.host, request.port) {
            (Some(host), port) => Endpoint::parse(host, port.unwrap_or(DEFAULT_PORT))?,
            (None, Some(port)) => Endpoint {
                port,
                ..current.endpoint.clone()
            },
            (None, None) => current.endpoint.clone(),
        };
        let api_key = request
            .api_key
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from)
            .or(current.api_key);

        let mut candidate = Connection {
            endpoint,
            api_key,
            project: None,
        };

        let project = match request.project.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => self.resolve_project(&candidate, name).await?,
            _ => self.first_project(&candidate).await?,
        };

        tracing::info!(
            host = %candidate.endpoint.host,
            port = candidate.endpoint.port,
            project = %project.name,
            project_id = project.id,
            "Logged in to Hopsworks"
        );

        candidate.project = Some(project.clone());
        *self.connection.write().await = candidate;
        Ok(project)
    }

    async fn resolve_project(
        &self,
        connection: &Connection,
        name: &str,
    ) -> Result<ProjectRef, HopsworksError> {
        let info = self
            .execute_with(
                connection,
                ApiRequest::get(format!("project/getProjectInfo/{}", segment(name))),
            )
            .await?;
        ProjectRef::from_value(&info).ok_or_else(|| {
            HopsworksError::Other(format!("unexpected project info for {}: {}", name, info))
        })
    }

    async fn first_project(&self, connection: &Connection) -> Result<ProjectRef, HopsworksError> {
        let projects = self
            .execute_with(connection, ApiRequest::get("project"))
            .await?;
        items(&projects)
            .iter()
            .find_map(ProjectRef::from_value)
            .ok_or_else(|| HopsworksError::NotFound("no accessible projects".into()))
    }

    // ─── Transport ───────────────────────────────────────────────────

    pub(crate) async fn get(&self, path: impl Into<String>) -> Result<Value, HopsworksError> {
        self.execute(ApiRequest::get(path)).await
    }

    pub(crate) async fn delete(&self, path: impl Into<String>) -> Result<Value, HopsworksError> {
        self.execute(ApiRequest::delete(path)).await
    }

    /// Send a request and decode the JSON body (`null` for an empty body).
    pub(crate) async fn execute(&self, request: ApiRequest) -> Result<Value, HopsworksError> {
        let connection = self.connection().await;
        self.execute_with(&connection, request).await
    }

    /// Send a request and return the body as text.
    pub(crate) async fn execute_text(&self, request: ApiRequest) -> Result<String, HopsworksError> {
        let connection = self.connection().await;
        let resp = self.send(&connection, request).await?;
        Ok(resp.text().await?)
    }

    /// Send a request and hand back the raw response for streaming.
    pub(crate) async fn execute_raw(
        &self,
        request: ApiRequest,
    ) -> Result<reqwest::Response, HopsworksError> {
        let connection = self.connection().await;
        self.send(&connection, request).await
    }

    async fn execute_with(
        &self,
        connection: &Connection,
        request: ApiRequest,
    ) -> Result<Value, HopsworksError> {
        let resp = self.send(connection, request).await?;
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| HopsworksError::Other(format!("invalid JSON from Hopsworks: {}", e)))
    }

    async fn send(
        &self,
        connection: &Connection,
        request: ApiRequest,
    ) -> Result<reqwest::Response, HopsworksError> {
        let url = build_url(&connection.endpoint, &request.root, &request.path)?;
        tracing::debug!(method = %request.method, url = %url, "Hopsworks request");

        let mut req = self.http.request(request.method, url.clone());
        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        if let Some(key) = &connection.api_key {
            req = req.header(AUTHORIZATION, format!("ApiKey {}", key.expose_secret()));
        }
        req = match request.body {
            Body::Empty => req,
            Body::Json(v) => req.json(&v),
            Body::Text(t) => req.header(CONTENT_TYPE, "text/plain").body(t),
            Body::Multipart(form) => req.multipart(form),
        };

        let resp = req.send().await.map_err(|e| HopsworksError::Unreachable {
            url: url.to_string(),
            source: e,
        })?;
        check_response(resp).await
    }
}

async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, HopsworksError> {
    let status = resp.status().as_u16();
    if (200..=299).contains(&status) {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(match status {
        401 => HopsworksError::Unauthorized,
        403 => HopsworksError::Forbidden(error_message(&body, "Forbidden")),
        404 => HopsworksError::NotFound(error_message(&body, "Not found")),
        400 => HopsworksError::BadRequest(error_message(&body, "Bad request")),
        _ => HopsworksError::ApiError {
            status,
            message: error_message(&body, "no response body"),
        },
    })
}

fn build_url(endpoint: &Endpoint, root: &Root, path: &str) -> Result<Url, HopsworksError> {
    let mut url = Url::parse(&endpoint.base_url())
        .map_err(|e| HopsworksError::InvalidArgument(format!("invalid endpoint: {}", e)))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| HopsworksError::InvalidArgument("endpoint cannot be a base".into()))?;
        segments.pop_if_empty();
        match root {
            Root::Api => {
                segments.extend(["hopsworks-api", "api"]);
            }
            Root::FlinkMaster(app_id) => {
                segments.extend(["hopsworks-api", "flinkmaster", app_id.as_str()]);
            }
        }
        for raw in path.split('/').filter(|s| !s.is_empty()) {
            let decoded = urlencoding::decode(raw).map_err(|e| {
                HopsworksError::InvalidArgument(format!("invalid path segment {:?}: {}", raw, e))
            })?;
            segments.push(&decoded);
        }
    }
    Ok(url)
}

/// One REST path segment. Reserved characters in `value` (including `/`)
/// are percent-encoded so the value stays a single segment.
pub(crate) fn segment(value: &str) -> Cow<'_, str> {
    urlencoding::encode(value)
}

/// A `/`-separated path with every segment encoded on its own.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/').map(segment).collect::<Vec<_>>().join("/")
}

/// The list inside a Hopsworks collection response.
///
/// Collections come back either as a bare array or as `{"items": [...],
/// "count": n}`; an empty collection may omit `items` entirely.
pub(crate) fn items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(arr) => arr.clone(),
        Value::Object(obj) => obj
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Re-run `check` every `interval` until it yields a value or `timeout` passes.
pub(crate) async fn poll_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<T, HopsworksError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, HopsworksError>>,
{
    // A timeout too large to represent never expires.
    let deadline = tokio::time::Instant::now().checked_add(timeout);
    loop {
        if let Some(value) = check().await? {
            return Ok(value);
        }
        let pause = match deadline {
            Some(deadline) => {
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    return Err(HopsworksError::Timeout(format!(
                        "{} did not complete within {}s",
                        what,
                        timeout.as_secs()
                    )));
                }
                interval.min(deadline - now)
            }
            None => interval,
        };
        tokio::time::sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHopsworks;
    use serde_json::json;

    #[test]
    fn endpoint_bare_host() {
        let ep = Endpoint::parse("my.hopsworks.ai", 443).unwrap();
        assert_eq!(ep.scheme, "https");
        assert_eq!(ep.host, "my.hopsworks.ai");
        assert_eq!(ep.port, 443);
        assert_eq!(ep.base_url(), "https://my.hopsworks.ai:443");
    }

    #[test]
    fn endpoint_host_with_port() {
        let ep = Endpoint::parse("10.0.0.5:8181", 443).unwrap();
        assert_eq!(ep.host, "10.0.0.5");
        assert_eq!(ep.port, 8181);
    }

    #[test]
    fn endpoint_full_urls() {
        let ep = Endpoint::parse("https://c.app.hopsworks.ai/", 443).unwrap();
        assert_eq!(ep.host, "c.app.hopsworks.ai");
        assert_eq!(ep.port, 443);

        let ep = Endpoint::parse("https://h.example.com:8181", 443).unwrap();
        assert_eq!(ep.port, 8181);

        let ep = Endpoint::parse("http://127.0.0.1:9000", 443).unwrap();
        assert_eq!(ep.scheme, "http");
        assert_eq!(ep.port, 9000);

        let ep = Endpoint::parse("http://localhost", 443).unwrap();
        assert_eq!(ep.port, 80);
    }

    #[test]
    fn endpoint_empty_host_is_serverless() {
        let ep = Endpoint::parse("  ", 443).unwrap();
        assert_eq!(ep.host, DEFAULT_HOST);
    }

    #[test]
    fn endpoint_invalid_url() {
        assert!(matches!(
            Endpoint::parse("https://", 443),
            Err(HopsworksError::InvalidArgument(_))
        ));
    }

    #[test]
    fn build_url_encodes_segments() {
        let ep = Endpoint::parse("http://127.0.0.1:9000", 443).unwrap();
        let url = build_url(&ep, &Root::Api, "project/1/dataset/Resources/my file.csv").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/hopsworks-api/api/project/1/dataset/Resources/my%20file.csv"
        );

        let url = build_url(&ep, &Root::FlinkMaster("application_1_2".into()), "jobs/overview")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/hopsworks-api/flinkmaster/application_1_2/jobs/overview"
        );
    }

    #[test]
    fn encoded_segment_stays_one_segment() {
        let ep = Endpoint::parse("http://127.0.0.1:9000", 443).unwrap();
        let path = format!("project/1/jobs/{}/executions", segment("etl/daily"));
        let url = build_url(&ep, &Root::Api, &path).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/hopsworks-api/api/project/1/jobs/etl%2Fdaily/executions"
        );

        let path = format!("project/1/dataset/{}", encode_path("Resources/100%/a b.csv"));
        let url = build_url(&ep, &Root::Api, &path).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/hopsworks-api/api/project/1/dataset/Resources/100%25/a%20b.csv"
        );
    }

    #[test]
    fn project_ref_shapes() {
        let a = ProjectRef::from_value(&json!({"projectId": 7, "projectName": "demo"})).unwrap();
        let b = ProjectRef::from_value(&json!({"id": 7, "name": "demo"})).unwrap();
        let c = ProjectRef::from_value(&json!({"project": {"id": 7, "name": "demo"}})).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(ProjectRef::from_value(&json!({"name": "no-id"})).is_none());
    }

    #[test]
    fn items_shapes() {
        assert_eq!(items(&json!([1, 2])).len(), 2);
        assert_eq!(items(&json!({"items": [1], "count": 1})).len(), 1);
        assert!(items(&json!({"count": 0})).is_empty());
        assert!(items(&Value::Null).is_empty());
    }

    #[tokio::test]
    async fn sends_api_key_header() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "project/119/jobs", 200, json!({"items": [], "count": 0}))
            .await;
        let client = mock.client().await;

        client.get("project/119/jobs").await.unwrap();

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].authorization.as_deref(), Some("ApiKey test-key"));
    }

    #[tokio::test]
    async fn maps_status_codes() {
        let mock = MockHopsworks::start().await;
        mock.on("GET", "a", 401, json!({})).await;
        mock.on("GET", "b", 404, json!({"errorMsg": "Job not found"}))
            .await;
        mock.on("GET", "c", 400, json!({"usrMsg": "bad cron"})).await;
        mock.on("GET", "d", 403, json!({"errorMsg": "role"})).await;
        mock.on("GET", "e", 500, json!({"errorMsg": "boom"})).await;
        let client = mock.client().await;

        assert!(matches!(client.get("a").await, Err(HopsworksError::Unauthorized)));
        assert!(matches!(
            client.get("b").await,
            Err(HopsworksError::NotFound(m)) if m == "Job not found"
        ));
        assert!(matches!(
            client.get("c").await,
            Err(HopsworksError::BadRequest(m)) if m == "bad cron"
        ));
        assert!(matches!(client.get("d").await, Err(HopsworksError::Forbidden(_))));
        assert!(matches!(
            client.get("e").await,
            Err(HopsworksError::ApiError { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn empty_body_is_null() {
        let mock = MockHopsworks::start().await;
        mock.on_text("DELETE", "project/119/jobs/etl", 204, "").await;
        let client = mock.client().await;
        assert_eq!(client.delete("project/119/jobs/etl").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn unreachable_host() {
        let connection = Connection::new(
            Endpoint::parse("http://127.0.0.1:1", 443).unwrap(),
            None,
        );
        let client = HopsworksClient::new(connection, &ClientOptions::default()).unwrap();
        let err = client.get("project").await.unwrap_err();
        assert!(matches!(err, HopsworksError::Unreachable { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn login_resolves_named_project() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project/getProjectInfo/fraud",
            200,
            json!({"projectId": 42, "projectName": "fraud"}),
        )
        .await;
        let client = mock.disconnected_client().await;

        let project = client
            .login(LoginRequest {
                project: Some("fraud".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(project, ProjectRef { id: 42, name: "fraud".into() });
        assert_eq!(client.project().await.unwrap().id, 42);
    }

    #[tokio::test]
    async fn login_without_project_picks_first() {
        let mock = MockHopsworks::start().await;
        mock.on(
            "GET",
            "project",
            200,
            json!([
                {"project": {"id": 5, "name": "first"}, "teamRole": "Data owner"},
                {"project": {"id": 6, "name": "second"}, "teamRole": "Data scientist"}
            ]),
        )
        .await;
        let client = mock.disconnected_client().await;

        let project = client.login(LoginRequest::default()).await.unwrap();
        assert_eq!(project.name, "first");
    }

    #[tokio::test]
    async fn failed_login_keeps_previous_connection() {
        let mock = MockHopsworks::start().await;
        let client = mock.client().await;
        let before = client.project().await.unwrap();

        let err = client
            .login(LoginRequest {
                project: Some("missing".into()),
                api_key: Some("other-key".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(client.project().await.unwrap(), before);

        client.get("project/119").await.ok();
        let last = mock.requests().await.pop().unwrap();
        assert_eq!(last.authorization.as_deref(), Some("ApiKey test-key"));
    }

    #[tokio::test]
    async fn project_required() {
        let mock = MockHopsworks::start().await;
        let client = mock.disconnected_client().await;
        assert!(matches!(
            client.project().await,
            Err(HopsworksError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn poll_until_returns_value() {
        let mut calls = 0;
        let value = poll_until(
            "countdown",
            Duration::from_secs(5),
            Duration::from_millis(1),
            || {
                calls += 1;
                let done = calls >= 3;
                async move { Ok(done.then_some("done")) }
            },
        )
        .await
        .unwrap();
        assert_eq!(value, "done");
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn poll_until_times_out() {
        let result: Result<(), _> = poll_until(
            "never",
            Duration::from_millis(20),
            Duration::from_millis(5),
            || async { Ok(None) },
        )
        .await;
        assert!(matches!(result, Err(HopsworksError::Timeout(m)) if m.contains("never")));
    }

    #[tokio::test]
    async fn poll_until_accepts_unbounded_timeout() {
        let mut calls = 0;
        let value = tokio::spawn(async move {
            poll_until(
                "countdown",
                Duration::MAX,
                Duration::from_millis(1),
                || {
                    calls += 1;
                    let done = calls >= 2;
                    async move { Ok(done.then_some(calls)) }
                },
            )
            .await
        })
        .await
        .expect("poll task must not panic")
        .unwrap();
        assert_eq!(value, 2);
    }
}
