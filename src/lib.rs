pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod models;

pub use config::{Config, DatabaseConfig, LoggingConfig, PoolConfig};
pub use db::{ConnectionPool, PoolError, PoolStats, StatementError};
pub use error::{RegistryError, Result};
pub use gateway::{PgStudentGateway, StudentGateway};
pub use models::{EmailUpdate, MutationOutcome, NewStudent, Student, StudentId};
