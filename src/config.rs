use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::db::connection_manager::PostgresConnectionConfig;
use crate::db::pool::PoolError;

/// Main configuration structure for the student registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
}

/// PostgreSQL connection parameters
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

/// Connection pool sizing and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: u32,
    /// How long a lease waits for a free connection
    pub connection_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub test_on_check_out: bool,
    /// Deadline for a whole operation, lease wait included
    pub operation_timeout_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub target: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 0,
            connection_timeout_secs: 30,
            idle_timeout_secs: 10,
            max_lifetime_secs: 1800,
            test_on_check_out: true,
            operation_timeout_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(), // pretty, json, compact
            target: "stderr".to_string(), // stdout, stderr
        }
    }
}

impl DatabaseConfig {
    pub fn to_connection_config(&self) -> PostgresConnectionConfig {
        PostgresConnectionConfig::new(
            self.host.clone(),
            self.port,
            self.database.clone(),
            self.user.clone(),
            self.password.clone(),
        )
    }
}

impl PoolConfig {
    /// Reject settings bb8 would panic on or that can never be satisfied
    pub fn validate(&self) -> std::result::Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Configuration("max_size must be greater than zero".to_string()));
        }
        if self.min_idle > self.max_size {
            return Err(PoolError::Configuration(format!(
                "min_idle ({}) cannot exceed max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        if self.connection_timeout_secs == 0 {
            return Err(PoolError::Configuration(
                "connection_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.operation_timeout_secs == Some(0) {
            return Err(PoolError::Configuration(
                "operation_timeout_secs must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. config.toml file (if exists)
    /// 3. Environment variables (REGISTRY_<SECTION>__<KEY>)
    /// 4. DB_* environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_dir(&std::env::current_dir()?)
    }

    /// Load configuration from a specific directory
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        let config_file = dir.join("config.toml");
        if config_file.exists() {
            builder = builder.add_source(File::from(config_file));
        }

        builder = builder.add_source(
            Environment::with_prefix("REGISTRY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut result = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize::<Config>()
            .context("Failed to deserialize configuration")?;

        result.merge_env_vars()?;

        Ok(result)
    }

    /// Create a new Config for testing
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            database: DatabaseConfig {
                host: "127.0.0.1".to_string(),
                port: 5432,
                database: "school_test".to_string(),
                user: "test".to_string(),
                password: "test".to_string(),
            },
            pool: PoolConfig {
                max_size: 5,
                connection_timeout_secs: 5,
                operation_timeout_secs: Some(10),
                ..PoolConfig::default()
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
                target: "stdout".to_string(),
            },
        }
    }

    /// Apply the plain DB_* variables
    fn merge_env_vars(&mut self) -> Result<()> {
        if let Ok(user) = std::env::var("DB_USER") {
            self.database.user = user;
        }
        if let Ok(host) = std::env::var("DB_HOST") {
            self.database.host = host;
        }
        if let Ok(database) = std::env::var("DB_DATABASE") {
            self.database.database = database;
        }
        if let Ok(password) = std::env::var("DB_PASSWORD") {
            self.database.password = password;
        }
        if let Ok(port) = std::env::var("DB_PORT") {
            self.database.port = port
                .trim()
                .parse()
                .with_context(|| format!("DB_PORT '{}' is not a valid port", port))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::write;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "DB_USER",
        "DB_HOST",
        "DB_DATABASE",
        "DB_PASSWORD",
        "DB_PORT",
        "REGISTRY_DATABASE__HOST",
        "REGISTRY_DATABASE__USER",
        "REGISTRY_POOL__MAX_SIZE",
        "REGISTRY_LOGGING__LEVEL",
    ];

    // Helper to create isolated environment for testing
    fn with_isolated_env<T>(f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let saved: Vec<(&str, Option<String>)> =
            ENV_KEYS.iter().map(|k| (*k, env::var(k).ok())).collect();

        unsafe {
            for key in ENV_KEYS {
                env::remove_var(key);
            }
        }

        let result = f();

        unsafe {
            for (key, value) in saved {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }

        result
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.pool.max_size, 10);
        assert_eq!(config.pool.min_idle, 0);
        assert_eq!(config.pool.idle_timeout_secs, 10);
        assert!(config.pool.test_on_check_out);
        assert_eq!(config.pool.operation_timeout(), None);
        assert_eq!(config.logging.level, "info");
        assert!(config.pool.validate().is_ok());
    }

    #[test]
    fn test_config_for_testing() {
        let config = Config::for_testing();

        assert_eq!(config.database.database, "school_test");
        assert_eq!(config.pool.max_size, 5);
        assert_eq!(config.pool.operation_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_pool_config_validation() {
        let zero = PoolConfig { max_size: 0, ..PoolConfig::default() };
        assert!(zero.validate().is_err());

        let idle = PoolConfig { max_size: 2, min_idle: 3, ..PoolConfig::default() };
        assert!(idle.validate().is_err());

        let timeout = PoolConfig { connection_timeout_secs: 0, ..PoolConfig::default() };
        assert!(timeout.validate().is_err());

        let deadline = PoolConfig { operation_timeout_secs: Some(0), ..PoolConfig::default() };
        assert!(deadline.validate().is_err());
    }

    #[test]
    fn test_debug_output_redacts_password() {
        let mut config = Config::default();
        config.database.password = "hunter2".to_string();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_load_from_toml_file() -> Result<()> {
        with_isolated_env(|| -> Result<()> {
            let temp_dir = TempDir::new()?;
            let config_content = r#"
[database]
host = "db.internal"
port = 6543
database = "school"
user = "registrar"
password = "filepass"

[pool]
max_size = 4
operation_timeout_secs = 15

[logging]
format = "json"
"#;
            write(temp_dir.path().join("config.toml"), config_content)?;

            let config = Config::load_from_dir(temp_dir.path())?;

            assert_eq!(config.database.host, "db.internal");
            assert_eq!(config.database.port, 6543);
            assert_eq!(config.database.user, "registrar");
            assert_eq!(config.pool.max_size, 4);
            assert_eq!(config.pool.operation_timeout_secs, Some(15));
            // Unset keys keep their defaults
            assert_eq!(config.pool.connection_timeout_secs, 30);
            assert_eq!(config.logging.format, "json");
            assert_eq!(config.logging.level, "info");

            Ok(())
        })
    }

    #[test]
    fn test_db_env_vars_override_file() -> Result<()> {
        with_isolated_env(|| -> Result<()> {
            let temp_dir = TempDir::new()?;
            write(
                temp_dir.path().join("config.toml"),
                "[database]\nhost = \"file-host\"\nuser = \"fileuser\"\n",
            )?;

            unsafe {
                env::set_var("DB_USER", "envuser");
                env::set_var("DB_PASSWORD", "envpass");
                env::set_var("DB_DATABASE", "school");
                env::set_var("DB_PORT", "15432");
            }

            let config = Config::load_from_dir(temp_dir.path())?;

            assert_eq!(config.database.user, "envuser");
            assert_eq!(config.database.password, "envpass");
            assert_eq!(config.database.database, "school");
            assert_eq!(config.database.port, 15432);
            // File value preserved where no env var exists
            assert_eq!(config.database.host, "file-host");

            Ok(())
        })
    }

    #[test]
    fn test_structured_env_vars() -> Result<()> {
        with_isolated_env(|| -> Result<()> {
            let temp_dir = TempDir::new()?;
            unsafe {
                env::set_var("REGISTRY_DATABASE__HOST", "structured-host");
                env::set_var("REGISTRY_POOL__MAX_SIZE", "3");
            }

            let config = Config::load_from_dir(temp_dir.path())?;

            assert_eq!(config.database.host, "structured-host");
            assert_eq!(config.pool.max_size, 3);

            Ok(())
        })
    }

    #[test]
    fn test_invalid_db_port_is_an_error() {
        with_isolated_env(|| {
            let temp_dir = TempDir::new().unwrap();
            unsafe {
                env::set_var("DB_PORT", "not-a-port");
            }
            assert!(Config::load_from_dir(temp_dir.path()).is_err());
        })
    }

    #[test]
    fn test_load_no_config_file() -> Result<()> {
        with_isolated_env(|| -> Result<()> {
            let temp_dir = TempDir::new()?;

            let config = Config::load_from_dir(temp_dir.path())?;

            assert_eq!(config.database.host, "localhost");
            assert_eq!(config.pool.max_size, 10);

            Ok(())
        })
    }
}
