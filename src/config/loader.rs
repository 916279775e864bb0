//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered in order:
//! built-in defaults, `retail-core.toml`, `environments/<env>.toml`, then
//! `RETAIL_CORE__SECTION__KEY` environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::CoordinationConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_CONFIG_FILE: &str = "retail-core.toml";
const ENV_PREFIX: &str = "RETAIL_CORE";

pub struct ConfigManager {
    config: CoordinationConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::build_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = environment,
            transaction_timeout_seconds = config.transactions.timeout_seconds,
            sweep_interval_seconds = config.consistency.sweep_interval_seconds,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, e.g. one assembled in tests
    pub fn from_config(config: CoordinationConfig, environment: &str) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        })
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect the current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("RETAIL_CORE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("RETAIL_CORE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn build_config(config_directory: &Path, environment: &str) -> ConfigResult<CoordinationConfig> {
        let defaults = ::config::Config::try_from(&CoordinationConfig::default())
            .map_err(|e| ConfigurationError::load_failed("defaults", e))?;

        let base_path = config_directory.join(BASE_CONFIG_FILE);
        let env_path = config_directory
            .join("environments")
            .join(format!("{environment}.toml"));

        let settings = ::config::Config::builder()
            .add_source(defaults)
            .add_source(::config::File::from(base_path.as_path()).required(false))
            .add_source(::config::File::from(env_path.as_path()).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                ConfigurationError::load_failed(config_directory.display().to_string(), e)
            })?;

        settings
            .try_deserialize::<CoordinationConfig>()
            .map_err(|e| ConfigurationError::load_failed(config_directory.display().to_string(), e))
    }
}
