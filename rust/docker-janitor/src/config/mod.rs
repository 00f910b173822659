//! Configuration management for docker-janitor.
//!
//! Sources are layered in this order, later ones winning:
//!
//! 1. Built-in defaults
//! 2. `config/docker-janitor.{toml,yaml,json}` (optional)
//! 3. The file passed with `--config`
//! 4. `JANITOR__SECTION__KEY` environment variables
//!
//! The oracle bearer token is read from `JANITOR_ORACLE_TOKEN` only, so it
//! never has to be written to a file.
//!
//! ```rust,ignore
//! use docker_janitor::config::{ConfigValidator, JanitorConfig};
//!
//! let config = JanitorConfig::load(None)?;
//! ConfigValidator::validate(&config)?;
//! ```

pub mod error;
pub mod validator;

pub use error::{ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable holding the oracle bearer token.
pub const ORACLE_TOKEN_ENV: &str = "JANITOR_ORACLE_TOKEN";

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JanitorConfig {
    /// Worker pool.
    #[serde(default)]
    pub launcher: LauncherConfig,
    /// Container runtime client.
    #[serde(default)]
    pub docker: DockerConfig,
    /// Ownership oracle client.
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Abandoned resource cleaner.
    #[serde(default)]
    pub cleaner: CleanerConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl JanitorConfig {
    /// Load and validate configuration.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = Self::load_unchecked(path)?;

        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked(path: Option<&Path>) -> anyhow::Result<Self> {
        // Load .env file if present
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "Failed to read .env file");
            }
        }

        let mut builder = config::Config::builder().add_source(
            config::File::with_name("config/docker-janitor").required(false),
        );
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("JANITOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut janitor_config: JanitorConfig = settings.try_deserialize()?;

        if let Ok(token) = std::env::var(ORACLE_TOKEN_ENV) {
            if !token.is_empty() {
                janitor_config.oracle.token = Some(token);
            }
        }

        Ok(janitor_config)
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Number of runtime worker threads.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_worker_threads() -> usize {
    4
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
        }
    }
}

/// Docker CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Path or name of the docker binary.
    #[serde(default = "default_docker_binary")]
    pub binary: String,
    /// Daemon socket passed as `-H`.
    #[serde(default)]
    pub host: Option<String>,
    /// Upper bound for a single docker command, in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_command_timeout() -> u64 {
    60
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
            host: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Ownership oracle configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Workspace master API root.
    #[serde(default = "default_oracle_url")]
    pub base_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
    /// Bearer token, from `JANITOR_ORACLE_TOKEN`.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

fn default_oracle_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_oracle_timeout() -> u64 {
    10
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_oracle_url(),
            timeout_secs: default_oracle_timeout(),
            token: None,
        }
    }
}

impl std::fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleConfig")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Abandoned resource cleaner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanerConfig {
    /// Whether the cleaner is scheduled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cron schedule. When unset the cleaner runs with a fixed delay.
    #[serde(default)]
    pub cron: Option<String>,
    /// Delay between the end of one run and the start of the next, in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Delay before the first fixed-delay run, in seconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    /// Log abandoned resources without touching them.
    #[serde(default)]
    pub dry_run: bool,
    /// Server-side name filter for the network listing. Empty lists all.
    #[serde(default = "default_network_name_filter")]
    pub network_name_filter: String,
    /// Groups of network names that are never removed.
    #[serde(default)]
    pub additional_networks: Vec<Vec<String>>,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    3600
}

fn default_initial_delay() -> u64 {
    60
}

fn default_network_name_filter() -> String {
    "workspace".to_string()
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: None,
            interval_secs: default_interval(),
            initial_delay_secs: default_initial_delay(),
            dry_run: false,
            network_name_filter: default_network_name_filter(),
            additional_networks: Vec::new(),
        }
    }
}

impl CleanerConfig {
    /// Fixed-delay gap between runs.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Delay before the first run.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
