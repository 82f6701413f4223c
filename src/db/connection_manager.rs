//! PostgreSQL connection manager for bb8 pool
//!
//! Implements the bb8::ManageConnection trait so the pool can open,
//! validate and discard `tokio_postgres` clients.

use crate::db::statement::{Statement, StatementCanceller, StatementError, StatementExecutor};
use crate::models::Student;
use async_trait::async_trait;
use bb8::ManageConnection;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_postgres::types::ToSql;
use tokio_postgres::{CancelToken, Client, NoTls, Row};
use tracing::{debug, error, warn};

/// Errors that can occur during connection management
#[derive(Error, Debug)]
pub enum ConnectionManagerError {
    #[error("Failed to create PostgreSQL connection: {0}")]
    ConnectionCreation(#[from] tokio_postgres::Error),

    #[error("Connection validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database unreachable: {0}")]
    Unreachable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Configuration for the PostgreSQL connection manager
#[derive(Clone)]
pub struct PostgresConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub connection_timeout_secs: u64,
}

impl PostgresConnectionConfig {
    pub fn new(
        host: String,
        port: u16,
        database: String,
        user: String,
        password: String,
    ) -> Self {
        Self {
            host,
            port,
            database,
            user,
            password,
            connection_timeout_secs: 30,
        }
    }

    /// Set connect timeout in seconds
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.connection_timeout_secs = timeout_secs;
        self
    }
}

// Keeps the password out of logs
impl fmt::Debug for PostgresConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .finish()
    }
}

/// Connection manager for PostgreSQL that implements bb8::ManageConnection
///
/// Each connection is a `tokio_postgres::Client` whose background
/// connection task is spawned onto the current runtime.
#[derive(Debug, Clone)]
pub struct PostgresConnectionManager {
    config: PostgresConnectionConfig,
}

impl PostgresConnectionManager {
    pub fn new(config: PostgresConnectionConfig) -> Self {
        debug!("Creating PostgreSQL connection manager for {}:{}", config.host, config.port);
        Self { config }
    }

    fn build_pg_config(&self) -> Result<tokio_postgres::Config, ConnectionManagerError> {
        if self.config.host.trim().is_empty() {
            return Err(ConnectionManagerError::Configuration("host cannot be empty".to_string()));
        }
        if self.config.database.trim().is_empty() {
            return Err(ConnectionManagerError::Configuration("database cannot be empty".to_string()));
        }

        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.config.host)
            .port(self.config.port)
            .dbname(&self.config.database)
            .user(&self.config.user)
            .application_name("student_registry");
        if !self.config.password.is_empty() {
            pg.password(&self.config.password);
        }
        if self.config.connection_timeout_secs > 0 {
            pg.connect_timeout(Duration::from_secs(self.config.connection_timeout_secs));
        }
        Ok(pg)
    }
}

#[async_trait]
impl ManageConnection for PostgresConnectionManager {
    type Connection = Client;
    type Error = ConnectionManagerError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        debug!("Creating new PostgreSQL connection");

        let pg = self.build_pg_config()?;
        let (client, connection) = pg.connect(NoTls).await.map_err(|e| {
            error!("Failed to create PostgreSQL connection: {}", e);
            ConnectionManagerError::ConnectionCreation(e)
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("PostgreSQL connection task ended with error: {}", e);
            }
        });

        debug!("Successfully created PostgreSQL connection");
        Ok(client)
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await.map(|_| ()).map_err(|e| {
            warn!("Connection validation failed: {}", e);
            ConnectionManagerError::ValidationFailed(e.to_string())
        })
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_closed()
    }
}

impl fmt::Display for PostgresConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PostgresConnectionManager(host={}, port={}, database={})",
            self.config.host, self.config.port, self.config.database
        )
    }
}

type Param<'a> = &'a (dyn ToSql + Sync);

/// Bind values for a statement, in placeholder order.
fn bind_params(statement: &Statement) -> Vec<Param<'_>> {
    match statement {
        Statement::ListAll => Vec::new(),
        Statement::Insert(student) => vec![
            &student.first_name as Param<'_>,
            &student.last_name as Param<'_>,
            &student.email as Param<'_>,
            &student.enrollment_date as Param<'_>,
        ],
        Statement::UpdateEmail(update) => vec![
            &update.new_email as Param<'_>,
            update.student_id.as_i32() as Param<'_>,
        ],
        Statement::Delete(student_id) => vec![student_id.as_i32() as Param<'_>],
    }
}

fn student_from_row(row: &Row) -> Result<Student, StatementError> {
    let decode = |e: tokio_postgres::Error| StatementError::Decode(e.to_string());
    Ok(Student {
        student_id: row.try_get("student_id").map_err(decode)?,
        first_name: row.try_get("first_name").map_err(decode)?,
        last_name: row.try_get("last_name").map_err(decode)?,
        email: row.try_get("email").map_err(decode)?,
        enrollment_date: row.try_get("enrollment_date").map_err(decode)?,
    })
}

fn classify(e: tokio_postgres::Error) -> StatementError {
    let Some(db_error) = e.as_db_error() else {
        if e.is_closed() {
            return StatementError::ConnectionLost(e.to_string());
        }
        return StatementError::Client(e.to_string());
    };

    let code = db_error.code().code().to_string();
    let message = match db_error.detail() {
        Some(detail) if !detail.trim().is_empty() => {
            format!("{} (detail: {})", db_error.message(), detail)
        }
        _ => db_error.message().to_string(),
    };

    if code == "23505" {
        StatementError::UniqueViolation {
            constraint: db_error.constraint().unwrap_or("unknown").to_string(),
            message,
        }
    } else {
        StatementError::Rejected { code, message }
    }
}

#[async_trait]
impl StatementExecutor for Client {
    async fn query_students(&mut self, statement: &Statement) -> Result<Vec<Student>, StatementError> {
        let rows = self
            .query(statement.sql(), &bind_params(statement))
            .await
            .map_err(classify)?;
        rows.iter().map(student_from_row).collect()
    }

    async fn execute_statement(&mut self, statement: &Statement) -> Result<u64, StatementError> {
        self.execute(statement.sql(), &bind_params(statement))
            .await
            .map_err(classify)
    }

    fn canceller(&self) -> Box<dyn StatementCanceller> {
        Box::new(PostgresCanceller(self.cancel_token()))
    }
}

/// Sends a CancelRequest on a side connection to the server
struct PostgresCanceller(CancelToken);

#[async_trait]
impl StatementCanceller for PostgresCanceller {
    async fn cancel(&self) -> Result<(), StatementError> {
        self.0.cancel_query(NoTls).await.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailUpdate, NewStudent, StudentId};

    fn local_config() -> PostgresConnectionConfig {
        PostgresConnectionConfig::new(
            "localhost".to_string(),
            5432,
            "school".to_string(),
            "postgres".to_string(),
            "s3cret".to_string(),
        )
    }

    #[test]
    fn test_connection_config_creation() {
        let config = local_config();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "school");
        assert_eq!(config.connection_timeout_secs, 30);
        assert_eq!(config.with_timeout(5).connection_timeout_secs, 5);
    }

    #[test]
    fn test_config_debug_redacts_password() {
        let rendered = format!("{:?}", local_config());
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_connection_manager_display() {
        let manager = PostgresConnectionManager::new(local_config());
        let shown = manager.to_string();
        assert!(shown.contains("localhost"));
        assert!(shown.contains("school"));
        assert!(!shown.contains("s3cret"));
    }

    #[test]
    fn test_pg_config_rejects_empty_host() {
        let mut config = local_config();
        config.host = "  ".to_string();
        let manager = PostgresConnectionManager::new(config);
        assert!(matches!(
            manager.build_pg_config(),
            Err(ConnectionManagerError::Configuration(_))
        ));
    }

    #[test]
    fn test_bind_params_match_placeholders() {
        let insert = Statement::Insert(
            NewStudent::new("Ada", "Lovelace", "ada@example.com", "2024-01-01").unwrap(),
        );
        assert_eq!(bind_params(&insert).len(), 4);

        let update = Statement::UpdateEmail(
            EmailUpdate::new(StudentId::new(7).unwrap(), "new@example.com").unwrap(),
        );
        assert_eq!(bind_params(&update).len(), 2);

        assert_eq!(bind_params(&Statement::Delete(StudentId::new(7).unwrap())).len(), 1);
        assert!(bind_params(&Statement::ListAll).is_empty());
    }

    #[tokio::test]
    #[ignore] // Only run with --ignored flag when PostgreSQL is available
    async fn test_connection_manager_with_real_postgres() {
        if std::env::var("DB_HOST").is_err() {
            return;
        }

        let config = PostgresConnectionConfig::new(
            std::env::var("DB_HOST").unwrap(),
            std::env::var("DB_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(5432),
            std::env::var("DB_DATABASE").unwrap_or_else(|_| "postgres".to_string()),
            std::env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            std::env::var("DB_PASSWORD").unwrap_or_default(),
        );
        let manager = PostgresConnectionManager::new(config);

        let mut connection = manager.connect().await.unwrap();
        assert!(manager.is_valid(&mut connection).await.is_ok());
        assert!(!manager.has_broken(&mut connection));
    }
}
