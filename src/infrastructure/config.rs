//! Configuration loading with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Default lane name cannot be empty")]
    EmptyDefaultLane,

    #[error("Invalid lane '{0}': {1}")]
    InvalidLane(String, String),

    #[error("Invalid memory config: {0}")]
    InvalidMemory(String),

    #[error("Invalid saga config: {0}")]
    InvalidSaga(String),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .cascade/config.yaml (project config)
    /// 3. .cascade/local.yaml (local overrides, optional)
    /// 4. Environment variables (CASCADE_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".cascade/config.yaml"))
            .merge(Yaml::file(".cascade/local.yaml"))
            .merge(Env::prefixed("CASCADE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file (env overrides still apply).
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("CASCADE_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Reload on top of the current config. Failures are reported but the
    /// caller keeps the previous config; a bad reload is never fatal.
    pub fn reload(current: &Config) -> Config {
        match Self::load() {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "config reload failed; keeping previous config");
                current.clone()
            }
        }
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.engine.default_lane.is_empty() {
            return Err(ConfigError::EmptyDefaultLane);
        }
        for lane in &config.lanes {
            lane.validate()
                .map_err(|e| ConfigError::InvalidLane(lane.name.clone(), e))?;
        }

        if config.memory.vector_dimension == 0 {
            return Err(ConfigError::InvalidMemory(
                "vector_dimension must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&config.memory.forget_threshold) {
            return Err(ConfigError::InvalidMemory(
                "forget_threshold must be within [0, 1]".into(),
            ));
        }
        if config.memory.default_stability_hours <= 0.0 {
            return Err(ConfigError::InvalidMemory(
                "default_stability_hours must be positive".into(),
            ));
        }

        if config.saga.compensation.factor < 1.0 {
            return Err(ConfigError::InvalidSaga(
                "compensation backoff factor must be >= 1".into(),
            ));
        }
        if config.saga.compensation.initial > config.saga.compensation.max {
            return Err(ConfigError::InvalidSaga(
                "compensation initial backoff exceeds the cap".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbose".into();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_empty_database_path_rejected() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));
    }

    #[test]
    fn test_bad_lane_rejected() {
        let mut config = Config::default();
        config
            .lanes
            .push(crate::domain::models::LaneConfig::new("broken", 4, 0));
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLane(_, _))
        ));
    }

    #[test]
    fn test_bad_backoff_rejected() {
        let mut config = Config::default();
        config.saga.compensation.initial = std::time::Duration::from_secs(60);
        config.saga.compensation.max = std::time::Duration::from_secs(1);
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidSaga(_))
        ));
    }
}
