//! Configuration for the Hopsworks MCP server
//!
//! Settings are layered: a YAML or TOML file, then environment variables,
//! then command-line flags. Every environment setting is read from its
//! `HOPSWORKS_MCP_` name first and from the bare `HOPSWORKS_` name second,
//! so the variables used in a Claude Desktop `env` block work unchanged.
//!
//! # Example TOML configuration:
//! ```toml
//! [hopsworks]
//! host = "c.app.hopsworks.ai"
//! port = 443
//! project = "fraud_detection"
//! api_key_file = "/home/me/.hopsworks/api_key"
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Hopsworks connection settings
    pub hopsworks: HopsworksConfig,

    /// HTTP client settings
    pub http: HttpConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Hopsworks connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HopsworksConfig {
    /// Host name or URL of the Hopsworks instance
    pub host: Option<String>,

    /// HTTPS port
    pub port: u16,

    /// Project to open at login
    pub project: Option<String>,

    /// API key value
    pub api_key: Option<String>,

    /// File holding the API key (used when `api_key` is unset)
    pub api_key_file: Option<PathBuf>,

    /// Verify the TLS certificate host name
    pub hostname_verification: bool,
}

impl Default for HopsworksConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 443,
            project: None,
            api_key: None,
            api_key_file: None,
            hostname_verification: false,
        }
    }
}

/// HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file (YAML or TOML, auto-detected by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "toml" => Self::from_toml(&content),
            _ => Self::from_yaml(&content).or_else(|_| Self::from_toml(&content)),
        }
    }

    /// Load the default config file if one exists, otherwise return defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/hopsworks-mcp/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("hopsworks-mcp").join("config.toml"))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Overlay environment variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |suffix: &str| {
            lookup(&format!("HOPSWORKS_MCP_{}", suffix))
                .or_else(|| lookup(&format!("HOPSWORKS_{}", suffix)))
                .filter(|v| !v.trim().is_empty())
        };

        if let Some(host) = read("HOST") {
            self.hopsworks.host = Some(host);
        }
        if let Some(port) = read("PORT") {
            self.hopsworks.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".into(), port.clone()))?;
        }
        if let Some(project) = read("PROJECT") {
            self.hopsworks.project = Some(project);
        }
        if let Some(key) = read("API_KEY") {
            self.hopsworks.api_key = Some(key);
        }
        if let Some(file) = read("API_KEY_FILE") {
            self.hopsworks.api_key_file = Some(PathBuf::from(file));
        }
        if let Some(flag) = read("HOSTNAME_VERIFICATION") {
            self.hopsworks.hostname_verification = parse_bool(&flag).ok_or_else(|| {
                ConfigError::InvalidValue("HOSTNAME_VERIFICATION".into(), flag.clone())
            })?;
        }
        Ok(())
    }

    /// Overlay the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// The API key: inline value first, then the key file.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(key) = &self.hopsworks.api_key {
            return Ok(Some(key.trim().to_string()));
        }
        match &self.hopsworks.api_key_file {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::IoError(path.clone(), e.to_string()))?;
                let key = content.trim();
                Ok((!key.is_empty()).then(|| key.to_string()))
            }
            None => Ok(None),
        }
    }

    /// Create an example configuration
    pub fn example() -> Self {
        Self {
            hopsworks: HopsworksConfig {
                host: Some("c.app.hopsworks.ai".to_string()),
                port: 443,
                project: Some("my_project".to_string()),
                api_key: None,
                api_key_file: Some(PathBuf::from("~/.hopsworks/api_key")),
                hostname_verification: false,
            },
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Generate example YAML configuration
    pub fn example_yaml() -> String {
        serde_yaml::to_string(&Self::example()).unwrap_or_default()
    }

    /// Generate example TOML configuration
    pub fn example_toml() -> String {
        toml::to_string_pretty(&Self::example()).unwrap_or_default()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    IoError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid value for {0}: {1:?}")]
    InvalidValue(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.hopsworks.port, 443);
        assert!(!config.hopsworks.hostname_verification);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.http.request_timeout_secs, 60);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
hopsworks:
  host: my.hopsworks.local
  port: 8181
  project: demo
logging:
  format: json
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.hopsworks.host.as_deref(), Some("my.hopsworks.local"));
        assert_eq!(config.hopsworks.port, 8181);
        assert_eq!(config.hopsworks.project.as_deref(), Some("demo"));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml = r#"
[hopsworks]
host = "my.hopsworks.local"
api_key = "abc"
hostname_verification = true

[http]
connect_timeout_secs = 3
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.hopsworks.api_key.as_deref(), Some("abc"));
        assert!(config.hopsworks.hostname_verification);
        assert_eq!(config.http.connect_timeout_secs, 3);
        assert_eq!(config.http.request_timeout_secs, 60);
    }

    #[test]
    fn test_env_prefixed_name_wins() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("HOPSWORKS_MCP_HOST", "prefixed.example.com"),
                ("HOPSWORKS_HOST", "bare.example.com"),
                ("HOPSWORKS_API_KEY", "secret"),
                ("HOPSWORKS_MCP_PORT", "8181"),
            ]))
            .unwrap();
        assert_eq!(config.hopsworks.host.as_deref(), Some("prefixed.example.com"));
        assert_eq!(config.hopsworks.api_key.as_deref(), Some("secret"));
        assert_eq!(config.hopsworks.port, 8181);
    }

    #[test]
    fn test_env_empty_values_ignored() {
        let mut config = Config::from_toml("[hopsworks]\nproject = \"kept\"").unwrap();
        config
            .apply_env(env(&[("HOPSWORKS_PROJECT", "  ")]))
            .unwrap();
        assert_eq!(config.hopsworks.project.as_deref(), Some("kept"));
    }

    #[test]
    fn test_env_invalid_port() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("HOPSWORKS_PORT", "https")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref k, _) if k == "PORT"));
    }

    #[test]
    fn test_env_hostname_verification() {
        let mut config = Config::default();
        config
            .apply_env(env(&[("HOPSWORKS_MCP_HOSTNAME_VERIFICATION", "yes")]))
            .unwrap();
        assert!(config.hopsworks.hostname_verification);
        assert!(config
            .apply_env(env(&[("HOPSWORKS_HOSTNAME_VERIFICATION", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_api_key_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_key");
        std::fs::write(&path, "  from-file\n").unwrap();

        let mut config = Config::default();
        config.hopsworks.api_key_file = Some(path);
        assert_eq!(config.resolve_api_key().unwrap().as_deref(), Some("from-file"));

        config.hopsworks.api_key = Some("inline".into());
        assert_eq!(config.resolve_api_key().unwrap().as_deref(), Some("inline"));
    }

    #[test]
    fn test_api_key_missing_file() {
        let mut config = Config::default();
        config.hopsworks.api_key_file = Some(PathBuf::from("/definitely/not/here"));
        assert!(matches!(
            config.resolve_api_key(),
            Err(ConfigError::IoError(_, _))
        ));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("config.yaml");
        std::fs::write(&yaml_path, "hopsworks:\n  project: from_yaml\n").unwrap();
        let config = Config::load(&yaml_path).unwrap();
        assert_eq!(config.hopsworks.project.as_deref(), Some("from_yaml"));

        let toml_path = dir.path().join("config.toml");
        std::fs::write(&toml_path, "[hopsworks]\nproject = \"from_toml\"\n").unwrap();
        let config = Config::load(&toml_path).unwrap();
        assert_eq!(config.hopsworks.project.as_deref(), Some("from_toml"));
    }

    #[test]
    fn test_example_round_trips() {
        let toml = Config::example_toml();
        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(parsed.hopsworks.project.as_deref(), Some("my_project"));

        let yaml = Config::example_yaml();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.hopsworks.host.as_deref(), Some("c.app.hopsworks.ai"));
    }
}
