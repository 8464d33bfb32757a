//! Registration of the server in a Claude Desktop configuration file.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One `mcpServers` entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServerEntry {
    #[serde(skip)]
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("Failed to access {0}: {1}")]
    Io(PathBuf, String),

    #[error("{0} is not valid JSON: {1}")]
    InvalidJson(PathBuf, String),

    #[error("{0} does not contain a JSON object; refusing to overwrite it")]
    NotAnObject(PathBuf),
}

/// `<config dir>/Claude/claude_desktop_config.json`
pub fn default_claude_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("Claude").join("claude_desktop_config.json"))
}

/// Insert or replace `mcpServers.<name>` in the config at `path`, keeping
/// every other key. The file and its parent directories are created when
/// missing.
pub fn install_server(path: &Path, entry: &ServerEntry) -> Result<(), InstallError> {
    let io_err = |e: std::io::Error| InstallError::Io(path.to_path_buf(), e.to_string());

    let mut root = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(io_err)?;
        if content.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(&content)
                .map_err(|e| InstallError::InvalidJson(path.to_path_buf(), e.to_string()))?
        }
    } else {
        Value::Object(Map::new())
    };

    let Some(object) = root.as_object_mut() else {
        return Err(InstallError::NotAnObject(path.to_path_buf()));
    };
    let servers = object
        .entry("mcpServers")
        .or_insert_with(|| Value::Object(Map::new()));
    if !servers.is_object() {
        *servers = Value::Object(Map::new());
    }
    let entry_value = serde_json::to_value(entry)
        .map_err(|e| InstallError::InvalidJson(path.to_path_buf(), e.to_string()))?;
    if let Some(servers) = servers.as_object_mut() {
        servers.insert(entry.name.clone(), entry_value);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let rendered = serde_json::to_string_pretty(&root)
        .map_err(|e| InstallError::InvalidJson(path.to_path_buf(), e.to_string()))?;
    std::fs::write(path, rendered + "\n").map_err(io_err)?;
    Ok(())
}
