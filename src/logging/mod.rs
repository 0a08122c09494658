//! Tracing-based logging setup, grounded on the teacher's `LoggerImpl`
//! (env-filter plus an optional rolling file appender), trimmed of the
//! dashboard-oriented secret-scrubbing layer since the core has no
//! user-facing log sinks of its own.

use std::io;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Holds the non-blocking writer guard alive for the lifetime of the process.
pub struct LoggerGuard {
    _guard: Option<WorkerGuard>,
}

/// Initializes the global tracing subscriber from `config`. Must be called
/// at most once per process.
pub fn init(config: &LoggingConfig) -> anyhow::Result<LoggerGuard> {
    let env_filter = EnvFilter::builder().with_default_directive(parse_level(&config.level)?.into()).from_env_lossy();

    if let Some(log_dir) = &config.log_dir {
        let file_appender = rolling::daily(log_dir, "fleetd.log");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true)
            .with_filter(env_filter.clone());

        let stdout_layer = stdout_layer(config, env_filter);

        tracing_subscriber::registry().with(file_layer).with(stdout_layer).init();

        Ok(LoggerGuard { _guard: Some(guard) })
    } else {
        tracing_subscriber::registry().with(stdout_layer(config, env_filter)).init();
        Ok(LoggerGuard { _guard: None })
    }
}

fn stdout_layer(
    config: &LoggingConfig,
    filter: EnvFilter,
) -> Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync> {
    if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stdout)
            .with_target(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_target(true)
            .with_filter(filter)
            .boxed()
    }
}

fn parse_level(level: &str) -> anyhow::Result<tracing::Level> {
    level
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid log level: {level}"))
}
