//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Shared primitives and utilities for the update agent."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{serde_as, DeserializeAs, DurationSecondsWithFrac, PickFirst, SerializeAs};
use tracing::debug;

use crate::logging::LogFormat;

/// Bound on each send and each receive when a module does not configure one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_state_directory() -> PathBuf {
    PathBuf::from("/var/lib/r-ota/state")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Duration written as a string such as `"10m"`, `"1h 30m"` or `"500ms"`.
pub struct DurationString;

impl SerializeAs<Duration> for DurationString {
    fn serialize_as<S: Serializer>(
        source: &Duration,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*source))
    }
}

impl<'de> DeserializeAs<'de, Duration> for DurationString {
    fn deserialize_as<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

/// Problems with a single module's configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required setting was absent or empty.
    #[error("missing required module setting `{0}`")]
    Missing(&'static str),
    /// The timeout would make every channel wait expire immediately.
    #[error("module timeout must be greater than zero")]
    ZeroTimeout,
    /// The raw configuration could not be parsed.
    #[error("malformed module configuration: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Settings of one update module, immutable once the module is built.
///
/// Keys use the host's camelCase names; snake_case aliases are accepted so the
/// same table reads naturally in TOML.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    /// Queue the agent writes commands to.
    #[serde(default, alias = "send_queue_name")]
    pub send_queue_name: String,
    /// Queue the agent reads statuses from.
    #[serde(default, alias = "receive_queue_name")]
    pub receive_queue_name: String,
    /// Where the decompressed image is staged for the OTA master.
    #[serde(default, alias = "target_file")]
    pub target_file: PathBuf,
    /// Bound on each send and each receive: seconds as a number, or a duration string.
    #[serde(default = "default_timeout")]
    #[serde_as(as = "PickFirst<(DurationSecondsWithFrac<f64>, DurationString)>")]
    pub timeout: Duration,
}

impl ModuleConfig {
    /// Build a configuration with the default timeout.
    pub fn new(
        send_queue_name: impl Into<String>,
        receive_queue_name: impl Into<String>,
        target_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            send_queue_name: send_queue_name.into(),
            receive_queue_name: receive_queue_name.into(),
            target_file: target_file.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the channel timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Parse and validate the raw JSON the host hands to a module.
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let config: ModuleConfig = serde_json::from_slice(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every required setting is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_queue_name.trim().is_empty() {
            return Err(ConfigError::Missing("sendQueueName"));
        }
        if self.receive_queue_name.trim().is_empty() {
            return Err(ConfigError::Missing("receiveQueueName"));
        }
        if self.target_file.as_os_str().is_empty() {
            return Err(ConfigError::Missing("targetFile"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

/// Configuration file of the agent CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub modules: IndexMap<String, ModuleConfig>,
}

/// Metadata describing where an [`AgentConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAgentConfig {
    pub config: AgentConfig,
    pub source: PathBuf,
}

impl AgentConfig {
    pub const ENV_CONFIG_PATH: &str = "R_OTA_CONFIG";

    /// Load configuration from disk, respecting the `R_OTA_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAgentConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAgentConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAgentConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Parse and validate a specific file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AgentConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Retrieve a module configuration by identifier.
    pub fn module(&self, id: &str) -> Option<&ModuleConfig> {
        self.modules.get(id)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.modules.is_empty() {
            return Err(anyhow!("configuration must declare at least one module"));
        }
        for (id, module) in &self.modules {
            if id.trim().is_empty() {
                return Err(anyhow!("module identifiers cannot be empty"));
            }
            module
                .validate()
                .with_context(|| format!("module '{id}' is misconfigured"))?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AgentConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AgentConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one state file per module.
    #[serde(default = "default_state_directory")]
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_state_directory(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Print the Prometheus text exposition after each CLI command.
    #[serde(default)]
    pub dump: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
