//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level.

use anyhow::{anyhow, bail, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => bail!("unknown log format '{}' (expected pretty, json or compact)", other),
        }
    }
}

impl LogTarget {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(LogTarget::Stdout),
            "stderr" => Ok(LogTarget::Stderr),
            other => bail!("unknown log target '{}' (expected stdout or stderr)", other),
        }
    }
}

fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|e| anyhow!("invalid log level '{}': {}", level, e)),
    }
}

/// Install the global subscriber. Call once, before the pool is built.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let format = LogFormat::parse(&config.format)?;
    let target = LogTarget::parse(&config.target)?;
    let filter = env_filter(&config.level)?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match (format, target) {
        (LogFormat::Pretty, LogTarget::Stdout) => builder.pretty().with_writer(std::io::stdout).try_init(),
        (LogFormat::Pretty, LogTarget::Stderr) => builder.pretty().with_writer(std::io::stderr).try_init(),
        (LogFormat::Json, LogTarget::Stdout) => builder.json().with_writer(std::io::stdout).try_init(),
        (LogFormat::Json, LogTarget::Stderr) => builder.json().with_writer(std::io::stderr).try_init(),
        (LogFormat::Compact, LogTarget::Stdout) => builder.compact().with_writer(std::io::stdout).try_init(),
        (LogFormat::Compact, LogTarget::Stderr) => builder.compact().with_writer(std::io::stderr).try_init(),
    };

    result.map_err(|err| anyhow!(err))
}
