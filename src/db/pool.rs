//! Connection pool wrapper
//!
//! Provides a small interface over the bb8 pool: a scoped `Lease` that
//! goes back to the pool when dropped, plus lease counters for monitoring.

use crate::config::PoolConfig;
use crate::db::connection_manager::{
    ConnectionManagerError, PostgresConnectionConfig, PostgresConnectionManager,
};
use bb8::{ManageConnection, Pool, PooledConnection};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Errors that can occur with the connection pool
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Failed to create connection pool: {0}")]
    PoolCreation(#[from] ConnectionManagerError),

    #[error("Failed to get connection from pool: {0}")]
    GetConnection(String),

    #[error("Timeout waiting for connection")]
    Timeout,

    #[error("Pool configuration error: {0}")]
    Configuration(String),
}

/// Connection pool statistics for monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct PoolStats {
    /// Current number of connections in pool
    pub size: u32,
    /// Number of idle connections
    pub idle_connections: u32,
    /// Number of leased connections
    pub active_connections: u32,
    /// Pool configuration max size
    pub max_size: u32,
    /// Successful leases since the pool was built
    pub leases: u64,
    /// Leases handed back to the pool
    pub releases: u64,
    /// Lease attempts that ended in an error
    pub lease_failures: u64,
}

impl PoolStats {
    pub fn outstanding_leases(&self) -> u64 {
        self.leases.saturating_sub(self.releases)
    }
}

#[derive(Debug, Default)]
struct LeaseCounters {
    leased: AtomicU64,
    released: AtomicU64,
    failed: AtomicU64,
}

/// Capacity-bounded pool of database connections
///
/// Not `Clone`: the pool is built once and torn down once through `close`.
/// Share it behind an `Arc` for concurrent callers.
pub struct ConnectionPool<M: ManageConnection> {
    pool: Pool<M>,
    config: PoolConfig,
    counters: LeaseCounters,
}

impl<M: ManageConnection> fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("pool", &"bb8::Pool<..>")
            .field("config", &self.config)
            .field("counters", &self.counters)
            .finish()
    }
}

impl ConnectionPool<PostgresConnectionManager> {
    /// Build a pool of PostgreSQL connections
    #[instrument(skip(pg_config, pool_config), fields(host = %pg_config.host, database = %pg_config.database))]
    pub async fn postgres(
        pg_config: PostgresConnectionConfig,
        pool_config: PoolConfig,
    ) -> Result<Self, PoolError> {
        let manager = PostgresConnectionManager::new(
            pg_config.with_timeout(pool_config.connection_timeout_secs),
        );
        Self::new(manager, pool_config).await
    }
}

impl<M> ConnectionPool<M>
where
    M: ManageConnection<Error = ConnectionManagerError>,
{
    /// Create a new connection pool over the given manager
    #[instrument(skip(manager, pool_config))]
    pub async fn new(manager: M, pool_config: PoolConfig) -> Result<Self, PoolError> {
        pool_config.validate()?;

        info!(
            "Creating connection pool with max_size: {}, min_idle: {}",
            pool_config.max_size, pool_config.min_idle
        );

        // Without retries a failed connect reaches the waiting caller as
        // `RunError::User` instead of being swallowed into a timeout.
        let pool = Pool::builder()
            .retry_connection(false)
            .max_size(pool_config.max_size)
            .min_idle(Some(pool_config.min_idle))
            .connection_timeout(Duration::from_secs(pool_config.connection_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(pool_config.idle_timeout_secs)))
            .max_lifetime(Some(Duration::from_secs(pool_config.max_lifetime_secs)))
            .test_on_check_out(pool_config.test_on_check_out)
            .build(manager)
            .await
            .map_err(|e| {
                error!("Failed to create connection pool: {}", e);
                PoolError::PoolCreation(e)
            })?;

        info!("Successfully created connection pool");

        Ok(Self {
            pool,
            config: pool_config,
            counters: LeaseCounters::default(),
        })
    }

    /// Lease a connection from the pool
    ///
    /// Waits for a free slot up to the configured connection timeout. The
    /// connection returns to the pool when the `Lease` is dropped.
    #[instrument(skip(self))]
    pub async fn lease(&self) -> Result<Lease<'_, M>, PoolError> {
        debug!("Acquiring connection from pool");

        match self.pool.get().await {
            Ok(conn) => {
                let lease_id = self.counters.leased.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(lease_id, "Successfully acquired connection from pool");
                Ok(Lease {
                    conn,
                    counters: &self.counters,
                    lease_id,
                })
            }
            Err(bb8::RunError::User(e)) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                error!("Connection manager error: {}", e);
                Err(PoolError::GetConnection(e.to_string()))
            }
            Err(bb8::RunError::TimedOut) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!("Connection pool timeout - consider increasing pool size or timeout");
                Err(PoolError::Timeout)
            }
        }
    }

    /// Check if the pool can hand out a working connection
    ///
    /// With `test_on_check_out` enabled the lease itself runs the
    /// manager's validation query.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> bool {
        debug!("Performing connection pool health check");

        match self.lease().await {
            Ok(_lease) => {
                debug!("Connection pool health check passed");
                true
            }
            Err(e) => {
                warn!("Connection pool health check failed: {}", e);
                false
            }
        }
    }
}

impl<M: ManageConnection> ConnectionPool<M> {
    /// Get connection pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.pool.state();

        PoolStats {
            size: state.connections,
            idle_connections: state.idle_connections,
            active_connections: state.connections.saturating_sub(state.idle_connections),
            max_size: self.config.max_size,
            leases: self.counters.leased.load(Ordering::SeqCst),
            releases: self.counters.released.load(Ordering::SeqCst),
            lease_failures: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Graceful shutdown
    ///
    /// Consumes the pool so it can only be torn down once. Idle
    /// connections close immediately; leased ones close as they return.
    #[instrument(skip(self))]
    pub async fn close(self) {
        let stats = self.stats();
        info!(
            leases = stats.leases,
            releases = stats.releases,
            lease_failures = stats.lease_failures,
            "Shutting down connection pool"
        );
        if stats.outstanding_leases() > 0 {
            warn!("Closing pool with {} outstanding leases", stats.outstanding_leases());
        }

        drop(self.pool);

        info!("Connection pool shutdown complete");
    }
}

/// Exclusive hold on one pooled connection
///
/// Dereferences to the underlying connection. Dropping the lease returns
/// the connection to the pool, whatever path the caller took.
pub struct Lease<'a, M: ManageConnection> {
    conn: PooledConnection<'a, M>,
    counters: &'a LeaseCounters,
    lease_id: u64,
}

impl<M: ManageConnection> Lease<'_, M> {
    pub fn id(&self) -> u64 {
        self.lease_id
    }
}

impl<M: ManageConnection> Deref for Lease<'_, M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<M: ManageConnection> DerefMut for Lease<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl<M: ManageConnection> Drop for Lease<'_, M> {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        debug!(lease_id = self.lease_id, "Released connection back to pool");
    }
}
