//! Error types for the Hopsworks MCP server.

use rmcp::model::{CallToolResult, Content};

#[derive(Debug, thiserror::Error)]
pub enum HopsworksError {
    #[error("Cannot reach Hopsworks at {url}: {source}")]
    Unreachable { url: String, source: reqwest::Error },

    #[error("Authentication failed (HTTP 401). Check your API key.")]
    Unauthorized,

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Hopsworks error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Not connected to a Hopsworks project. Call the `login` tool first.")]
    NotConnected,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl HopsworksError {
    pub fn into_tool_result(self) -> CallToolResult {
        CallToolResult::error(vec![Content::text(self.to_string())])
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HopsworksError::NotFound(_))
    }
}

impl From<reqwest::Error> for HopsworksError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            HopsworksError::Unreachable {
                url: err
                    .url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "unknown".into()),
                source: err,
            }
        } else {
            HopsworksError::Other(err.to_string())
        }
    }
}

impl From<std::io::Error> for HopsworksError {
    fn from(err: std::io::Error) -> Self {
        HopsworksError::Io(err.to_string())
    }
}

/// Pull the human-readable message out of a Hopsworks REST error body.
///
/// Hopsworks answers failures with `{"errorCode", "errorMsg", "usrMsg"}`; the
/// user message is the most specific, so it wins when present.
pub(crate) fn error_message(body: &str, fallback: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        ["usrMsg", "errorMsg", "error", "message"]
            .iter()
            .filter_map(|k| v[*k].as_str())
            .find(|s| !s.is_empty())
            .map(str::to_string)
    });
    match from_json {
        Some(msg) => msg,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => fallback.to_string(),
    }
}
