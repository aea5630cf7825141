//! Configuration for precast-live, read from `.precast/live.toml`.
//!
//! Settings are layered file → environment → CLI:
//! - `PRECAST_LIVE_URL` overrides `[client] url`
//! - `PRECAST_LIVE_PORT` overrides `[server] port`
//! - `PRECAST_LIVE_LOG` overrides `[logging] level`
//!
//! # Configuration File Format
//!
//! ```toml
//! [reconnect]
//! initial_delay_ms = 1000
//! max_backoff_ms = 30000
//!
//! [server]
//! host = "127.0.0.1"
//! port = 4180
//! ping_interval_secs = 30
//! pong_timeout_secs = 60
//! broadcast_capacity = 256
//! dev = false
//!
//! [client]
//! url = "http://127.0.0.1:4180"
//! subscribe_timeout_ms = 10000
//!
//! [logging]
//! level = "info"
//! json = false
//! directory = "/var/log/precast-live"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::subscription::ReconnectOptions;

/// Directory holding the config file, relative to the project directory.
pub const CONFIG_DIR: &str = ".precast";
/// Config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "live.toml";

/// Backoff bounds for reconnecting subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectSection {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ReconnectSection {
    pub fn to_options(&self) -> ReconnectOptions {
        ReconnectOptions {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Change-feed server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How often to ping WebSocket clients
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// How long a client may go without answering a ping
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
    /// Per-topic broadcast buffer
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Permissive CORS for local frontends
    #[serde(default)]
    pub dev: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4180
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_pong_timeout_secs() -> u64 {
    60
}

fn default_broadcast_capacity() -> usize {
    256
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
            broadcast_capacity: default_broadcast_capacity(),
            dev: false,
        }
    }
}

/// Settings for clients of a remote change-feed server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_url")]
    pub url: String,
    /// How long to wait for the server's subscribe acknowledgement
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,
}

fn default_url() -> String {
    "http://127.0.0.1:4180".to_string()
}

fn default_subscribe_timeout_ms() -> u64 {
    10_000
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            subscribe_timeout_ms: default_subscribe_timeout_ms(),
        }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rotated log files here
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            directory: None,
        }
    }
}

/// The complete live.toml configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveToml {
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl LiveToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse live.toml")
    }

    /// Defaults when `path` does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize live.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.reconnect.max_backoff_ms == 0 {
            warnings.push("reconnect.max_backoff_ms is 0: retries will spin without delay".to_string());
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_backoff_ms {
            warnings.push(format!(
                "reconnect.initial_delay_ms ({}) exceeds max_backoff_ms ({}); the cap will be used",
                self.reconnect.initial_delay_ms, self.reconnect.max_backoff_ms
            ));
        }
        if self.server.pong_timeout_secs <= self.server.ping_interval_secs {
            warnings.push(format!(
                "server.pong_timeout_secs ({}) should exceed ping_interval_secs ({})",
                self.server.pong_timeout_secs, self.server.ping_interval_secs
            ));
        }
        if self.server.broadcast_capacity == 0 {
            warnings.push("server.broadcast_capacity is 0; 1 will be used".to_string());
        }
        if !self.client.url.starts_with("http://") && !self.client.url.starts_with("https://") {
            warnings.push(format!(
                "client.url '{}' should start with http:// or https://",
                self.client.url
            ));
        }
        if self.client.subscribe_timeout_ms == 0 {
            warnings.push("client.subscribe_timeout_ms is 0: every subscribe will time out".to_string());
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!("Invalid logging.level '{}'", self.logging.level));
        }

        warnings
    }
}

/// Effective configuration for one invocation.
///
/// It merges settings from:
/// 1. live.toml file
/// 2. Environment variables
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Path of the config file (it may not exist)
    pub path: PathBuf,
    /// Parsed file contents, or defaults
    pub toml: LiveToml,
    /// CLI override for the server port
    pub cli_port: Option<u16>,
    /// CLI override for the client URL
    pub cli_url: Option<String>,
    /// CLI override: debug logging
    pub verbose: bool,
}

impl LiveConfig {
    /// Default config file location for a project directory.
    pub fn default_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load from `path`, falling back to defaults when it does not exist.
    pub fn load(path: PathBuf) -> Result<Self> {
        let toml = LiveToml::load_or_default(&path)?;
        Ok(Self {
            path,
            toml,
            cli_port: None,
            cli_url: None,
            verbose: false,
        })
    }

    pub fn with_cli_args(mut self, port: Option<u16>, url: Option<String>, verbose: bool) -> Self {
        self.cli_port = port;
        self.cli_url = url;
        self.verbose = verbose;
        self
    }

    /// Server port (CLI → env → file).
    pub fn port(&self) -> u16 {
        self.cli_port
            .or_else(|| {
                std::env::var("PRECAST_LIVE_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
            })
            .unwrap_or(self.toml.server.port)
    }

    /// Change-feed base URL (CLI → env → file).
    pub fn url(&self) -> String {
        self.cli_url
            .clone()
            .or_else(|| std::env::var("PRECAST_LIVE_URL").ok())
            .unwrap_or_else(|| self.toml.client.url.clone())
    }

    /// Log filter directive (verbose → env → file).
    pub fn log_level(&self) -> String {
        if self.verbose {
            return "debug".to_string();
        }
        std::env::var("PRECAST_LIVE_LOG").unwrap_or_else(|_| self.toml.logging.level.clone())
    }

    pub fn reconnect_options(&self) -> ReconnectOptions {
        self.toml.reconnect.to_options()
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.toml.client.subscribe_timeout_ms)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
