//! CRUD operations on the `students` table
//!
//! Every operation follows the same cycle: lease a connection, run one
//! parameterized statement, drop the lease, log the outcome. Failures are
//! logged and returned; nothing here retries or panics.

use crate::db::connection_manager::{ConnectionManagerError, PostgresConnectionManager};
use crate::db::pool::{ConnectionPool, PoolStats};
use crate::db::statement::{Statement, StatementCanceller, StatementExecutor};
use crate::models::{EmailUpdate, MutationOutcome, NewStudent, Student, StudentId};
use crate::{RegistryError, Result};
use bb8::ManageConnection;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Gateway over PostgreSQL
pub type PgStudentGateway = StudentGateway<PostgresConnectionManager>;

/// Entry point for the five student operations
pub struct StudentGateway<M: ManageConnection> {
    pool: ConnectionPool<M>,
    deadline: Option<Duration>,
}

impl<M: ManageConnection> std::fmt::Debug for StudentGateway<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudentGateway")
            .field("pool", &self.pool)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl<M> StudentGateway<M>
where
    M: ManageConnection<Error = ConnectionManagerError>,
    M::Connection: StatementExecutor,
{
    /// Wrap a pool. The deadline comes from the pool's
    /// `operation_timeout_secs`, if set.
    pub fn new(pool: ConnectionPool<M>) -> Self {
        let deadline = pool.config().operation_timeout();
        Self { pool, deadline }
    }

    /// Override the per-operation deadline
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn pool(&self) -> &ConnectionPool<M> {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Lease and immediately release a connection
    #[instrument(skip(self))]
    pub async fn verify_connectivity(&self) -> Result<()> {
        self.bounded("verify_connectivity", &InFlight::default(), async {
            let _lease = self.pool.lease().await?;
            Ok(())
        })
        .await
        .map(|()| info!("Successfully connected to PostgreSQL!"))
        .map_err(|e| report("verify_connectivity", e))
    }

    /// All rows of `students`, in the engine's order
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<Student>> {
        let in_flight = InFlight::default();
        self.bounded("list_all", &in_flight, async {
            let mut lease = self.pool.lease().await?;
            in_flight.arm(&*lease);
            Ok(lease.query_students(&Statement::ListAll).await?)
        })
        .await
        .map(|students| {
            info!(count = students.len(), "Fetched all students");
            students
        })
        .map_err(|e| report("list_all", e))
    }

    #[instrument(skip(self, student), fields(email = %student.email))]
    pub async fn insert(&self, student: NewStudent) -> Result<()> {
        let statement = Statement::Insert(student);
        let in_flight = InFlight::default();
        self.bounded("insert", &in_flight, async {
            let mut lease = self.pool.lease().await?;
            in_flight.arm(&*lease);
            lease.execute_statement(&statement).await?;
            Ok(())
        })
        .await
        .map(|()| info!("Student added successfully"))
        .map_err(|e| report("insert", e))
    }

    #[instrument(skip(self, update), fields(student_id = %update.student_id))]
    pub async fn update_email(&self, update: EmailUpdate) -> Result<MutationOutcome> {
        let student_id = update.student_id;
        let statement = Statement::UpdateEmail(update);
        let outcome = self
            .mutate("update_email", &statement)
            .await
            .map_err(|e| report("update_email", e))?;

        if outcome.is_applied() {
            info!("Successfully updated email for student ID: {}", student_id);
        } else {
            info!("No student found with ID: {}", student_id);
        }
        Ok(outcome)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, student_id: StudentId) -> Result<MutationOutcome> {
        let statement = Statement::Delete(student_id);
        let outcome = self
            .mutate("delete", &statement)
            .await
            .map_err(|e| report("delete", e))?;

        if outcome.is_applied() {
            info!("Successfully deleted student ID: {}", student_id);
        } else {
            info!("No student found with ID: {}", student_id);
        }
        Ok(outcome)
    }

    /// Tear the pool down. Consumes the gateway.
    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn mutate(&self, operation: &'static str, statement: &Statement) -> Result<MutationOutcome> {
        let in_flight = InFlight::default();
        self.bounded(operation, &in_flight, async {
            let mut lease = self.pool.lease().await?;
            in_flight.arm(&*lease);
            let affected = lease.execute_statement(statement).await?;
            Ok(MutationOutcome::from_affected(affected))
        })
        .await
    }

    // The lease lives inside `work`, so an expired deadline drops it and
    // the connection goes back to the pool. Any statement already sent is
    // cancelled on the engine before the error is returned.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        in_flight: &InFlight,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let Some(deadline) = self.deadline else {
            return work.await;
        };
        match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => {
                in_flight.cancel(operation).await;
                Err(RegistryError::DeadlineExceeded { operation, deadline })
            }
        }
    }
}

/// Cancel handle for the statement an operation has sent, if any
#[derive(Default)]
struct InFlight(OnceLock<Box<dyn StatementCanceller>>);

impl InFlight {
    fn arm<C: StatementExecutor + ?Sized>(&self, conn: &C) {
        let _ = self.0.set(conn.canceller());
    }

    async fn cancel(&self, operation: &'static str) {
        let Some(canceller) = self.0.get() else {
            return;
        };
        match canceller.cancel().await {
            Ok(()) => warn!(operation, "Cancelled statement after deadline"),
            Err(e) => error!(operation, "Failed to cancel statement: {}", e),
        }
    }
}

fn report(operation: &'static str, e: RegistryError) -> RegistryError {
    if e.is_connectivity() {
        error!(operation, "Error connecting: {}", e);
    } else {
        error!(operation, "Error executing query: {}", e);
    }
    e
}
