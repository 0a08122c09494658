//! Hierarchical configuration loading, grounded on the teacher's
//! `ConfigLoader` (`figment`-based, project-local `.fleetd/` directory,
//! `FLEETD_*` env override taking highest precedence).

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use super::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid max_workers: {0}, must be between 1 and 1000")]
    InvalidMaxWorkers(usize),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("soft_limit ({0}) must not exceed hard_limit ({1})")]
    SoftLimitExceedsHard(usize, usize),

    #[error("database path cannot be empty")]
    EmptyDatabasePath,

    #[error("failed to load configuration: {0}")]
    Extraction(#[from] figment::Error),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.fleetd/config.yaml` (project config)
    /// 3. `.fleetd/local.yaml` (optional local overrides)
    /// 4. `FLEETD_*` environment variables (highest)
    pub fn load() -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".fleetd/config.yaml"))
            .merge(Yaml::file(".fleetd/local.yaml"))
            .merge(Env::prefixed("FLEETD_").split("__"))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_workers == 0 || config.max_workers > 1000 {
            return Err(ConfigError::InvalidMaxWorkers(config.max_workers));
        }
        if !matches!(config.logging.level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if config.spawn_controller.soft_limit > config.spawn_controller.hard_limit {
            return Err(ConfigError::SoftLimitExceedsHard(
                config.spawn_controller.soft_limit,
                config.spawn_controller.hard_limit,
            ));
        }
        if config.database.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        Ok(())
    }
}
