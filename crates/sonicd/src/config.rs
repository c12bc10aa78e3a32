//! Configuration file parsing and structures.
//!
//! sonicd uses TOML for declarative configuration. Each configured valve lives under
//! `[integrations.watergate.<name>]`; `sonicd setup` appends new entries to the same file.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

pub use crate::integrations::watergate::WatergateConfig;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"sonicd::api" = "debug"`
    #[serde(default)]
    pub overrides: BTreeMap<String, LogLevel>,
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8565
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,

    /// Address to bind, e.g. "127.0.0.1" or "0.0.0.0"
    #[serde(default = "default_api_listen")]
    pub listen: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
            port: default_api_port(),
        }
    }
}

/// Integration configuration container
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct IntegrationsConfig {
    /// Watergate Sonic valves
    /// Key = entry name, used in entity ids
    #[serde(default)]
    pub watergate: BTreeMap<String, WatergateConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, device) in &self.integrations.watergate {
            if name.is_empty() {
                return Err(ConfigError::Validation(
                    "watergate entry name must not be empty".to_string(),
                ));
            }
            device.validate().map_err(|reason| {
                ConfigError::Validation(format!("integrations.watergate.{}: {}", name, reason))
            })?;
        }
        Ok(())
    }

    /// Append a new valve entry to the configuration file at `path`
    ///
    /// The file is edited as a plain TOML table so sections and keys sonicd does not know
    /// about survive. A missing file is created.
    pub fn add_watergate_device(
        path: impl AsRef<Path>,
        name: &str,
        device: &WatergateConfig,
    ) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let mut document = match std::fs::read_to_string(path) {
            Ok(contents) => contents.parse::<toml::Table>()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => return Err(ConfigError::Io(path.to_path_buf(), e)),
        };

        let integrations = table_entry(&mut document, "integrations")?;
        let watergate = table_entry(integrations, "watergate")?;
        if watergate.contains_key(name) {
            return Err(ConfigError::Validation(format!(
                "a watergate device named {} is already configured",
                name
            )));
        }
        watergate.insert(name.to_string(), toml::Value::try_from(device)?);

        let contents = toml::to_string(&document)?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }
}

fn table_entry<'a>(
    table: &'a mut toml::Table,
    key: &str,
) -> Result<&'a mut toml::Table, ConfigError> {
    table
        .entry(key)
        .or_insert_with(|| toml::Value::Table(toml::Table::new()))
        .as_table_mut()
        .ok_or_else(|| ConfigError::Validation(format!("{} is not a table", key)))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to write TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}
