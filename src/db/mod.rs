//! Database connection pooling module
//!
//! Connection managers for bb8 (PostgreSQL and an in-memory engine), the
//! pool wrapper with scoped leases, and the statement executor seam.

pub mod connection_manager;
pub mod memory;
pub mod pool;
pub mod statement;

pub use connection_manager::{ConnectionManagerError, PostgresConnectionConfig, PostgresConnectionManager};
pub use memory::{MemoryConnectionManager, MemoryEngine};
pub use pool::{ConnectionPool, Lease, PoolError, PoolStats};
pub use statement::{Statement, StatementError, StatementExecutor};
