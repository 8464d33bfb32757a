//! Hopsworks MCP Server binary.
//!
//! Exposes a Hopsworks cluster to AI agents via the Model Context Protocol
//! over stdio (Claude Desktop, Cursor, etc.).

use anyhow::Context;
use clap::{Parser, Subcommand};
use hopsworks_mcp::client::{LoginRequest, DEFAULT_PORT};
use hopsworks_mcp::install::{default_claude_config_path, install_server, ServerEntry};
use hopsworks_mcp::{Config, HopsworksClient, HopsworksMcpServer};
use rmcp::ServiceExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "hopsworks-mcp",
    version,
    about = "MCP server for the Hopsworks feature store and ML platform"
)]
struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(long, global = true, env = "HOPSWORKS_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Hopsworks host or URL
    #[arg(long, global = true, env = "HOPSWORKS_HOST")]
    host: Option<String>,

    /// Hopsworks port
    #[arg(long, global = true, env = "HOPSWORKS_PORT")]
    port: Option<u16>,

    /// Project to select at start-up
    #[arg(long, global = true, env = "HOPSWORKS_PROJECT")]
    project: Option<String>,

    /// Hopsworks API key
    #[arg(long, global = true, env = "HOPSWORKS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "HOPSWORKS_MCP_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "text" or "json"
    #[arg(long, global = true, env = "HOPSWORKS_MCP_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve MCP over stdio (default)
    Run,

    /// Serve with debug logging
    Dev,

    /// Register the server in the Claude Desktop configuration
    Install {
        /// Name of the entry under `mcpServers`
        #[arg(long, default_value = "hopsworks")]
        name: String,

        /// Claude Desktop config file (defaults to the platform location)
        #[arg(long)]
        claude_config: Option<PathBuf>,

        /// Command Claude Desktop should run (defaults to this executable)
        #[arg(long)]
        command: Option<String>,
    },

    /// Print an example configuration file
    PrintConfig {
        /// Output format: "toml" or "yaml"
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

impl Cli {
    /// Config file, then environment, then command-line flags.
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::load_default()?,
        };
        config.apply_process_env()?;
        if let Some(host) = &self.host {
            config.hopsworks.host = Some(host.clone());
        }
        if let Some(port) = self.port {
            config.hopsworks.port = port;
        }
        if let Some(project) = &self.project {
            config.hopsworks.project = Some(project.clone());
        }
        if let Some(key) = &self.api_key {
            config.hopsworks.api_key = Some(key.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
        Ok(config)
    }
}

fn init_logging(level: &str, format: &str) {
    // Logging goes to stderr (stdout reserved for MCP in stdio mode)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("hopsworks_mcp={}", level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("json") {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        host = config.hopsworks.host.as_deref().unwrap_or(""),
        port = config.hopsworks.port,
        project = config.hopsworks.project.as_deref().unwrap_or(""),
        "Starting Hopsworks MCP server"
    );

    let client = HopsworksClient::from_config(&config)?;
    if client.connection().await.has_api_key() {
        let login = LoginRequest {
            project: config.hopsworks.project.clone(),
            ..LoginRequest::default()
        };
        if let Err(e) = client.login(login).await {
            tracing::warn!(
                error = %e,
                "Initial login failed; tools will report the error until `login` succeeds"
            );
        }
    }

    let server = HopsworksMcpServer::new(client);
    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .inspect_err(|e| {
            tracing::error!("Failed to start MCP server: {}", e);
        })?;
    service.waiting().await?;
    Ok(())
}

fn install(
    config: &Config,
    name: String,
    claude_config: Option<PathBuf>,
    command: Option<String>,
) -> anyhow::Result<()> {
    let path = match claude_config {
        Some(path) => path,
        None => default_claude_config_path()
            .context("cannot determine the Claude Desktop config directory; pass --claude-config")?,
    };
    let command = match command {
        Some(command) => command,
        None => std::env::current_exe()
            .context("cannot determine the path of this executable; pass --command")?
            .to_string_lossy()
            .into_owned(),
    };

    let mut env = BTreeMap::new();
    if let Some(host) = &config.hopsworks.host {
        env.insert("HOPSWORKS_HOST".to_string(), host.clone());
    }
    if config.hopsworks.port != DEFAULT_PORT {
        env.insert("HOPSWORKS_PORT".to_string(), config.hopsworks.port.to_string());
    }
    if let Some(project) = &config.hopsworks.project {
        env.insert("HOPSWORKS_PROJECT".to_string(), project.clone());
    }
    if let Some(key) = config.resolve_api_key()? {
        env.insert("HOPSWORKS_API_KEY".to_string(), key);
    }

    let entry = ServerEntry {
        name,
        command,
        args: vec!["run".to_string()],
        env,
    };
    install_server(&path, &entry)?;
    eprintln!(
        "Installed MCP server '{}' in {}. Restart Claude Desktop to pick it up.",
        entry.name,
        path.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = cli.load_config()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            init_logging(&config.logging.level, &config.logging.format);
            serve(config).await
        }
        Command::Dev => {
            config.logging.level = "debug".to_string();
            init_logging(&config.logging.level, &config.logging.format);
            serve(config).await
        }
        Command::Install {
            name,
            claude_config,
            command,
        } => install(&config, name, claude_config, command),
        Command::PrintConfig { format } => {
            match format.to_lowercase().as_str() {
                "toml" => print!("{}", Config::example_toml()),
                "yaml" | "yml" => print!("{}", Config::example_yaml()),
                other => anyhow::bail!("Unsupported format: {}. Use 'toml' or 'yaml'.", other),
            }
            Ok(())
        }
    }
}
