use std::fs::{read_to_string, write};
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, trace};

use crate::civitai::politeness::PolitenessConfig;

pub(crate) mod directory;
pub(crate) mod settings;

/// Name of the configuration file.
pub(crate) const CONFIG_NAME: &str = "config.toml";

/// Listing endpoint used when the config does not name one.
pub(crate) const DEFAULT_BASE_URL: &str = "https://civitai.com/api/v1/images";

#[derive(Error, Debug)]
pub(crate) enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub(crate) type ConfigResult<T> = Result<T, ConfigError>;

/// How the remote catalog is reached.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub(crate) struct ApiConfig {
    /// Listing endpoint for images.
    pub(crate) base_url: String,
    /// Whole-request timeout in seconds.
    pub(crate) timeout_secs: u64,
    pub(crate) connect_timeout_secs: u64,
    /// Retries for timeouts and connection failures. Zero disables retrying.
    pub(crate) max_retries: usize,
    pub(crate) retry_base_delay_ms: u64,
    pub(crate) user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 60,
            connect_timeout_secs: 15,
            max_retries: 0,
            retry_base_delay_ms: 2000,
            user_agent: format!("civitai_downloader/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub(crate) struct LoggingConfig {
    pub(crate) log_level: String,
    pub(crate) log_directory: String,
    pub(crate) log_to_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_directory: "logs".to_string(),
            log_to_file: true,
        }
    }
}

/// Config that is used to do general setup.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) api: ApiConfig,
    pub(crate) politeness: PolitenessConfig,
    pub(crate) logging: LoggingConfig,
}

impl Config {
    /// Loads the config at `path`, writing the defaults there first if it is missing.
    pub(crate) fn load_or_create(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            trace!("{}: does not exist!", path.display());
            let config = Config::default();
            write(path, toml::to_string_pretty(&config)?)?;
            info!("Created default config file at {}", path.display());
            return Ok(config);
        }

        Self::parse(&read_to_string(path)?)
    }

    pub(crate) fn parse(contents: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url must not be empty".to_string()));
        }
        if self.api.timeout_secs == 0 {
            return Err(ConfigError::Invalid("api.timeout_secs must be at least 1".to_string()));
        }
        self.politeness.validate().map_err(ConfigError::Invalid)
    }
}
