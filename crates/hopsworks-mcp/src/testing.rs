//! In-process mock of the Hopsworks REST API for unit tests.
//!
//! Routes are matched on method and path (relative to `/hopsworks-api/api/`,
//! or to `/hopsworks-api/` for Flink master routes). Every request is
//! recorded so tests can assert on what was sent. Unmatched requests get a
//! Hopsworks-style 404.

use crate::client::{ClientOptions, Connection, Endpoint, HopsworksClient, ProjectRef};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use warp::Filter;

/// A request received by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub body: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }

    pub fn query_param(&self, key: &str) -> Option<String> {
        let url = reqwest::Url::parse(&format!("http://mock/?{}", self.query)).ok()?;
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

struct MockRoute {
    method: String,
    path: String,
    /// Served in order; the last response repeats.
    responses: VecDeque<(u16, String)>,
}

#[derive(Default)]
struct MockState {
    routes: Vec<MockRoute>,
    requests: Vec<RecordedRequest>,
}

#[derive(Clone)]
pub struct MockHopsworks {
    pub base_url: String,
    state: Arc<Mutex<MockState>>,
}

impl MockHopsworks {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(MockState::default()));
        let filter_state = state.clone();

        let routes = warp::method()
            .and(warp::path::full())
            .and(
                warp::query::raw()
                    .or(warp::any().map(String::new))
                    .unify(),
            )
            .and(warp::header::optional::<String>("authorization"))
            .and(warp::header::optional::<String>("content-type"))
            .and(warp::body::bytes())
            .and(warp::any().map(move || filter_state.clone()))
            .and_then(handle);

        let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    /// Register a JSON response. Later registrations win.
    pub async fn on(&self, method: &str, path: &str, status: u16, body: Value) {
        self.on_sequence(method, path, vec![(status, body)]).await;
    }

    /// Register a plain-text response.
    pub async fn on_text(&self, method: &str, path: &str, status: u16, body: &str) {
        let mut state = self.state.lock().await;
        state.routes.push(MockRoute {
            method: method.to_string(),
            path: path.trim_matches('/').to_string(),
            responses: VecDeque::from(vec![(status, body.to_string())]),
        });
    }

    /// Register responses served one per request; the last one repeats.
    pub async fn on_sequence(&self, method: &str, path: &str, responses: Vec<(u16, Value)>) {
        let mut state = self.state.lock().await;
        state.routes.push(MockRoute {
            method: method.to_string(),
            path: path.trim_matches('/').to_string(),
            responses: responses
                .into_iter()
                .map(|(s, v)| (s, v.to_string()))
                .collect(),
        });
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.requests.clone()
    }

    /// Requests matching a method and path.
    pub async fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .await
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    /// A client logged in to project 119 ("demo") with API key `test-key`.
    pub async fn client(&self) -> HopsworksClient {
        let client = self.disconnected_client().await;
        client
            .use_project(ProjectRef {
                id: 119,
                name: "demo".into(),
            })
            .await;
        client
    }

    /// A client with credentials but no project selected.
    pub async fn disconnected_client(&self) -> HopsworksClient {
        let endpoint = Endpoint::parse(&self.base_url, 443).unwrap();
        let connection = Connection::new(endpoint, Some("test-key".into()));
        HopsworksClient::new(connection, &ClientOptions::default()).unwrap()
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle(
    method: warp::http::Method,
    path: warp::path::FullPath,
    query: String,
    authorization: Option<String>,
    content_type: Option<String>,
    body: warp::hyper::body::Bytes,
    state: Arc<Mutex<MockState>>,
) -> Result<warp::http::Response<String>, warp::Rejection> {
    let full = path.as_str();
    let relative = full
        .strip_prefix("/hopsworks-api/api/")
        .or_else(|| full.strip_prefix("/hopsworks-api/"))
        .unwrap_or(full)
        .trim_matches('/')
        .to_string();

    let mut state = state.lock().await;
    state.requests.push(RecordedRequest {
        method: method.as_str().to_string(),
        path: relative.clone(),
        query,
        body: String::from_utf8_lossy(&body).into_owned(),
        authorization,
        content_type,
    });

    let route = state
        .routes
        .iter_mut()
        .rev()
        .find(|r| r.method == method.as_str() && r.path == relative);

    let (status, body) = match route {
        Some(route) => {
            if route.responses.len() > 1 {
                route.responses.pop_front().unwrap_or((500, String::new()))
            } else {
                route
                    .responses
                    .front()
                    .cloned()
                    .unwrap_or((500, String::new()))
            }
        }
        None => (
            404,
            serde_json::json!({
                "errorCode": 0,
                "errorMsg": format!("no mock route for {} {}", method, relative),
            })
            .to_string(),
        ),
    };

    Ok(warp::http::Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(body)
        .unwrap())
}

/// The text of the first content item of a tool result.
pub fn result_text(result: &rmcp::model::CallToolResult) -> String {
    result.content[0]
        .as_text()
        .map(|t| t.text.clone())
        .unwrap_or_default()
}

/// The first content item of a successful tool result, parsed as JSON.
pub fn result_json(result: &rmcp::model::CallToolResult) -> Value {
    assert_ne!(
        result.is_error,
        Some(true),
        "tool failed: {}",
        result_text(result)
    );
    serde_json::from_str(&result_text(result)).unwrap_or(Value::Null)
}
