//! Configuration management

use clap::Args;
use config::{
    builder::DefaultState, Config as ConfigBuilder, ConfigBuilder as Builder,
    ConfigError as BuilderError, Environment, File,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::plugin::types::Repository;

/// User agent sent by the host HTTP client and injected into image requests
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Mobile Safari/537.36";

/// Cover shown when a source provides none
pub const DEFAULT_COVER: &str = "https://placehold.co/300x450/png?text=No+Cover";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid plugin configuration: {0}")]
    InvalidPlugin(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidStorage(String),

    #[error("Invalid network configuration: {0}")]
    InvalidNetwork(String),

    #[error("Invalid search configuration: {0}")]
    InvalidSearch(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid repository configuration: {0}")]
    InvalidRepository(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub plugins: PluginConfig,
    pub storage: StorageConfig,
    pub network: NetworkConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults()?;

        if let Some(config_path) = &overrides.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Example: FOLIO_SEARCH__CONCURRENCY=4
        builder = builder.add_source(
            Environment::with_prefix("FOLIO")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(plugin_dir) = &overrides.plugin_dir {
            builder = builder.set_override("plugins.plugin_dir", plugin_dir.display().to_string())?;
        }
        if let Some(data_dir) = &overrides.data_dir {
            builder = builder.set_override("storage.data_dir", data_dir.display().to_string())?;
        }
        if let Some(concurrency) = overrides.concurrency {
            builder = builder.set_override("search.concurrency", concurrency as u64)?;
        }
        if let Some(log_level) = &overrides.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<Builder<DefaultState>, ConfigError> {
        Ok(ConfigBuilder::builder()
            .set_default("plugins.plugin_dir", "./data/plugins")?
            .set_default("plugins.user_agent", DEFAULT_USER_AGENT)?
            .set_default("plugins.default_cover", DEFAULT_COVER)?
            .set_default("storage.data_dir", "./data")?
            .set_default("network.request_timeout", 30)?
            .set_default("network.connect_timeout", 10)?
            .set_default("search.concurrency", 1)?
            .set_default("search.focus_poll_interval_ms", 100)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "text")?
            .set_default("logging.output", "stderr")?
            .set_default("repositories", Vec::<String>::new())?)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plugins.validate()?;
        self.storage.validate()?;
        self.network.validate()?;
        self.search.validate()?;
        self.logging.validate()?;
        for repository in &self.repositories {
            if url::Url::parse(&repository.url).is_err() {
                return Err(ConfigError::InvalidRepository(format!(
                    "repository {} has an invalid url: {}",
                    repository.id, repository.url
                )));
            }
        }
        Ok(())
    }
}

/// Command-line arguments that override configuration values
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigOverrides {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding installed plugin sources
    #[arg(long, value_name = "DIR", global = true)]
    pub plugin_dir: Option<PathBuf>,

    /// Directory holding plugin key/value storage
    #[arg(long, value_name = "DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Number of sources searched at the same time
    #[arg(long, value_name = "N", global = true)]
    pub concurrency: Option<usize>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    pub plugin_dir: PathBuf,
    pub user_agent: String,
    pub default_cover: String,
}

impl PluginConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidPlugin("plugin_dir cannot be empty".to_string()));
        }

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::InvalidPlugin("user_agent cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidStorage("data_dir cannot be empty".to_string()));
        }
        Ok(())
    }

    /// File backing the durable plugin key/value store
    pub fn plugin_storage_file(&self) -> PathBuf {
        self.data_dir.join("plugin-storage.json")
    }

    /// File backing the plugin local store
    pub fn plugin_local_storage_file(&self) -> PathBuf {
        self.data_dir.join("plugin-local-storage.json")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub request_timeout: u64, // seconds
    pub connect_timeout: u64, // seconds
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidNetwork("request_timeout must be greater than 0".to_string()));
        }

        if self.connect_timeout == 0 {
            return Err(ConfigError::InvalidNetwork("connect_timeout must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub concurrency: usize,
    pub focus_poll_interval_ms: u64,
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidSearch("concurrency must be greater than 0".to_string()));
        }

        if self.focus_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidSearch(
                "focus_poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn focus_poll_interval(&self) -> Duration {
        Duration::from_millis(self.focus_poll_interval_ms)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            focus_poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "stderr", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        Ok(())
    }
}
