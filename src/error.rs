use crate::db::pool::PoolError;
use crate::db::statement::StatementError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    // The pool could not hand out a connection
    #[error("Connection error: {0}")]
    Connectivity(#[from] PoolError),

    // The engine rejected or failed to run the statement
    #[error("Statement error: {0}")]
    Statement(#[from] StatementError),

    #[error("Operation '{operation}' exceeded its deadline of {deadline:?}")]
    DeadlineExceeded {
        operation: &'static str,
        deadline: Duration,
    },

    // Request construction errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RegistryError {
    /// True when the failure came from reaching the database rather than
    /// from the statement itself.
    pub fn is_connectivity(&self) -> bool {
        match self {
            RegistryError::Connectivity(_) | RegistryError::DeadlineExceeded { .. } => true,
            RegistryError::Statement(e) => e.is_connection_lost(),
            _ => false,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, RegistryError::Statement(StatementError::UniqueViolation { .. }))
    }
}
