//! Configuration management for the Marvel MCP server.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mcp::server::ServerOptions;
use crate::VERSION;

/// Command-line arguments for the Marvel MCP server.
///
/// Every setting is optional here so that a value from `--config` is only
/// replaced by flags the user actually passed.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "marvel-mcp")]
#[command(author = "Marvel MCP Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MCP capability server for the Marvel catalog")]
pub struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "MARVEL_MCP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the catalog files
    #[arg(long, env = "MARVEL_MCP_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// SQLite database (defaults to <data-dir>/marvel_data.db)
    #[arg(long, env = "MARVEL_MCP_DATABASE")]
    pub database: Option<PathBuf>,

    /// Transport mode: stdio or http
    #[arg(short, long, env = "MARVEL_MCP_TRANSPORT")]
    pub transport: Option<Transport>,

    /// HTTP bind address
    #[arg(long, env = "MARVEL_MCP_HOST")]
    pub host: Option<String>,

    /// HTTP port (only for http transport)
    #[arg(short, long, env = "MARVEL_MCP_PORT")]
    pub port: Option<u16>,

    /// Admin listener port (stdio transport only)
    #[arg(long, env = "MARVEL_MCP_ADMIN_PORT")]
    pub admin_port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long, env = "MARVEL_MCP_DEBUG")]
    pub debug: bool,

    /// Log as JSON lines
    #[arg(long, env = "MARVEL_MCP_LOG_JSON")]
    pub log_json: bool,

    /// Enable Prometheus metrics
    #[arg(long, env = "MARVEL_MCP_METRICS")]
    pub metrics: bool,

    /// Queue depth of each session channel
    #[arg(long, env = "MARVEL_MCP_CHANNEL_CAPACITY")]
    pub channel_capacity: Option<usize>,

    /// Ceiling on delivering one outbound message (ms)
    #[arg(long, env = "MARVEL_MCP_SEND_TIMEOUT_MS")]
    pub send_timeout_ms: Option<u64>,

    /// Ceiling on one tool invocation (seconds)
    #[arg(long, env = "MARVEL_MCP_TOOL_TIMEOUT_SECS")]
    pub tool_timeout_secs: Option<u64>,

    /// Pause between combat rounds (ms)
    #[arg(long, env = "MARVEL_MCP_COMBAT_ROUND_DELAY_MS")]
    pub combat_round_delay_ms: Option<u64>,

    /// Server name reported to clients
    #[arg(long, env = "MARVEL_MCP_SERVER_NAME")]
    pub server_name: Option<String>,
}

/// Transport mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Http,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Catalog directory
    pub data_dir: PathBuf,
    /// SQLite database; `None` means `data_dir/marvel_data.db`
    pub database: Option<PathBuf>,
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub admin_port: Option<u16>,
    pub debug: bool,
    pub log_json: bool,
    pub metrics: bool,
    pub channel_capacity: usize,
    pub send_timeout_ms: u64,
    pub tool_timeout_secs: u64,
    pub combat_round_delay_ms: u64,
    pub server_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database: None,
            transport: Transport::Stdio,
            host: "127.0.0.1".to_string(),
            port: 8004,
            admin_port: None,
            debug: false,
            log_json: false,
            metrics: false,
            channel_capacity: 100,
            send_timeout_ms: 5000,
            tool_timeout_secs: 120,
            combat_round_delay_ms: 2000,
            server_name: "marvel-mcp".to_string(),
        }
    }
}

impl Config {
    /// Load a YAML configuration file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Build the effective configuration: file (if any), then flags.
    pub fn load(args: Args) -> Result<Self> {
        let base = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.merge(args);
        config.validate()?;
        Ok(config)
    }

    fn merge(mut self, args: Args) -> Self {
        if let Some(data_dir) = args.data_dir {
            self.data_dir = data_dir;
        }
        if args.database.is_some() {
            self.database = args.database;
        }
        if let Some(transport) = args.transport {
            self.transport = transport;
        }
        if let Some(host) = args.host {
            self.host = host;
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if args.admin_port.is_some() {
            self.admin_port = args.admin_port;
        }
        self.debug |= args.debug;
        self.log_json |= args.log_json;
        self.metrics |= args.metrics;
        if let Some(capacity) = args.channel_capacity {
            self.channel_capacity = capacity;
        }
        if let Some(ms) = args.send_timeout_ms {
            self.send_timeout_ms = ms;
        }
        if let Some(secs) = args.tool_timeout_secs {
            self.tool_timeout_secs = secs;
        }
        if let Some(ms) = args.combat_round_delay_ms {
            self.combat_round_delay_ms = ms;
        }
        if let Some(name) = args.server_name {
            self.server_name = name;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity must be at least 1".to_string()));
        }
        if self.send_timeout_ms == 0 {
            return Err(Error::Config("send_timeout_ms must be positive".to_string()));
        }
        if self.tool_timeout_secs == 0 {
            return Err(Error::Config("tool_timeout_secs must be positive".to_string()));
        }
        if self.server_name.trim().is_empty() {
            return Err(Error::Config("server_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join("marvel_data.db"))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn combat_round_delay(&self) -> Duration {
        Duration::from_millis(self.combat_round_delay_ms)
    }

    /// Bind address of the HTTP transport.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            name: self.server_name.clone(),
            version: VERSION.to_string(),
            tool_timeout: self.tool_timeout(),
            channel_capacity: self.channel_capacity,
            send_timeout: self.send_timeout(),
        }
    }
}
