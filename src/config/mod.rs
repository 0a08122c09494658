//! Configuration: tuning constants plus the subset exposed through the
//! hierarchically-merged `Config` struct (`config::loader::ConfigLoader`).

pub mod loader;
pub mod tuning;

pub use loader::{ConfigError, ConfigLoader};

use serde::{Deserialize, Serialize};

/// Top-level configuration for the fleet coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Maximum number of non-dismissed workers the supervisor will admit.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Base URL handed to every spawned worker as `CLAUDE_FLEET_URL`
    /// (spec.md §6) so it can call back into this coordinator.
    #[serde(default = "default_fleet_url")]
    pub fleet_url: String,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub spawn_controller: SpawnControllerConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,
}

const fn default_max_workers() -> usize {
    5
}

fn default_fleet_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            fleet_url: default_fleet_url(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            spawn_controller: SpawnControllerConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".fleetd/fleetd.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SpawnControllerConfig {
    #[serde(default = "tuning::default_soft_limit")]
    pub soft_limit: usize,

    #[serde(default = "tuning::default_hard_limit")]
    pub hard_limit: usize,

    #[serde(default = "tuning::default_max_depth")]
    pub max_depth: u32,

    #[serde(default = "tuning::default_process_interval_ms")]
    pub process_interval_ms: u64,
}

impl Default for SpawnControllerConfig {
    fn default() -> Self {
        Self {
            soft_limit: tuning::default_soft_limit(),
            hard_limit: tuning::default_hard_limit(),
            max_depth: tuning::default_max_depth(),
            process_interval_ms: tuning::default_process_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkflowConfig {
    #[serde(default = "tuning::default_process_interval_ms")]
    pub process_interval_ms: u64,

    #[serde(default = "tuning::default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            process_interval_ms: tuning::default_process_interval_ms(),
            max_concurrent_steps: tuning::default_max_concurrent_steps(),
        }
    }
}
