//! The statements the registry runs and the executor seam between the
//! gateway and a concrete database connection.

use crate::models::{EmailUpdate, NewStudent, Student, StudentId};
use async_trait::async_trait;
use thiserror::Error;

pub const SELECT_ALL_STUDENTS: &str = "SELECT * FROM students";
pub const INSERT_STUDENT: &str =
    "INSERT INTO students (first_name, last_name, email, enrollment_date) VALUES ($1, $2, $3, $4)";
pub const UPDATE_STUDENT_EMAIL: &str = "UPDATE students SET email = $1 WHERE student_id = $2";
pub const DELETE_STUDENT: &str = "DELETE FROM students WHERE student_id = $1";

/// Errors raised by the engine while running a statement
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatementError {
    #[error("Unique constraint '{constraint}' violated: {message}")]
    UniqueViolation { constraint: String, message: String },

    #[error("Statement rejected (SQLSTATE {code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Connection lost while running statement: {0}")]
    ConnectionLost(String),

    #[error("Client-side statement failure: {0}")]
    Client(String),

    #[error("Failed to decode row: {0}")]
    Decode(String),
}

impl StatementError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, StatementError::ConnectionLost(_))
    }
}

/// One parameterized statement against the `students` table.
///
/// The SQL text is fixed per variant; caller values travel only as bound
/// parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    ListAll,
    Insert(NewStudent),
    UpdateEmail(EmailUpdate),
    Delete(StudentId),
}

impl Statement {
    pub fn sql(&self) -> &'static str {
        match self {
            Statement::ListAll => SELECT_ALL_STUDENTS,
            Statement::Insert(_) => INSERT_STUDENT,
            Statement::UpdateEmail(_) => UPDATE_STUDENT_EMAIL,
            Statement::Delete(_) => DELETE_STUDENT,
        }
    }
}

/// Runs statements on a leased connection.
///
/// Implemented by every connection type the pool can hand out.
#[async_trait]
pub trait StatementExecutor: Send {
    /// Run a row-returning statement
    async fn query_students(&mut self, statement: &Statement) -> Result<Vec<Student>, StatementError>;

    /// Run a mutating statement and return the affected-row count
    async fn execute_statement(&mut self, statement: &Statement) -> Result<u64, StatementError>;

    /// Handle that can abort whatever statement this connection is running.
    ///
    /// Taken before the statement starts; dropping the statement's future
    /// alone does not stop the engine from finishing it.
    fn canceller(&self) -> Box<dyn StatementCanceller>;
}

/// Out-of-band cancellation of an in-flight statement
#[async_trait]
pub trait StatementCanceller: Send + Sync {
    /// Ask the engine to abort the running statement. A no-op if the
    /// connection is idle.
    async fn cancel(&self) -> Result<(), StatementError>;
}
