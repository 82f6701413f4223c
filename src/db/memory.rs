//! In-process `students` table behind a bb8 connection manager
//!
//! Honours the same statement contract as PostgreSQL: server-assigned ids,
//! a unique email constraint and affected-row counts. The engine can be
//! made unreachable or slow to exercise the pool's failure paths.
//!
//! Like a real server, a statement keeps running once submitted even if
//! the client stops waiting for it. Only a cancel stops it from committing.

use crate::db::connection_manager::ConnectionManagerError;
use crate::db::statement::{Statement, StatementCanceller, StatementError, StatementExecutor};
use crate::models::Student;
use async_trait::async_trait;
use bb8::ManageConnection;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const EMAIL_CONSTRAINT: &str = "students_email_key";

#[derive(Debug, Default)]
struct Table {
    next_id: i32,
    rows: Vec<Student>,
}

#[derive(Debug)]
struct EngineState {
    table: Mutex<Table>,
    reachable: AtomicBool,
    latency_ms: AtomicU64,
    commit_delay_ms: AtomicU64,
    connections_opened: AtomicU64,
}

/// Shared handle to the in-memory database
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    state: Arc<EngineState>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(EngineState {
                table: Mutex::new(Table {
                    next_id: 1,
                    rows: Vec::new(),
                }),
                reachable: AtomicBool::new(true),
                latency_ms: AtomicU64::new(0),
                commit_delay_ms: AtomicU64::new(0),
                connections_opened: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate the engine going away (or coming back)
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay applied to every statement before it touches the table
    pub fn set_latency(&self, latency: Duration) {
        self.state
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay between a statement's work being done and it committing.
    /// The table stays locked meanwhile, as with a held row lock.
    pub fn set_commit_delay(&self, delay: Duration) {
        self.state
            .commit_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn connections_opened(&self) -> u64 {
        self.state.connections_opened.load(Ordering::SeqCst)
    }

    /// Copy of the table contents, bypassing the pool
    pub async fn snapshot(&self) -> Vec<Student> {
        self.state.table.lock().await.rows.clone()
    }

    fn is_reachable(&self) -> bool {
        self.state.reachable.load(Ordering::SeqCst)
    }

    async fn run(&self, statement: &Statement, cancel: &CancelState) -> Result<(Vec<Student>, u64), StatementError> {
        sleep_ms(self.state.latency_ms.load(Ordering::SeqCst)).await;
        if !self.is_reachable() {
            return Err(StatementError::ConnectionLost("engine unreachable".to_string()));
        }

        let mut table = self.state.table.lock().await;
        let mut rows = table.rows.clone();
        let mut next_id = table.next_id;
        let result = match statement {
            Statement::ListAll => {
                let count = rows.len() as u64;
                (rows.clone(), count)
            }
            Statement::Insert(new) => {
                if rows.iter().any(|row| row.email == new.email) {
                    return Err(unique_violation(&new.email));
                }
                rows.push(Student {
                    student_id: next_id,
                    first_name: new.first_name.clone(),
                    last_name: new.last_name.clone(),
                    email: new.email.clone(),
                    enrollment_date: new.enrollment_date,
                });
                next_id += 1;
                (Vec::new(), 1)
            }
            Statement::UpdateEmail(update) => {
                let target = update.student_id.get();
                if rows
                    .iter()
                    .any(|row| row.email == update.new_email && row.student_id != target)
                {
                    return Err(unique_violation(&update.new_email));
                }
                let mut affected = 0;
                for row in rows.iter_mut().filter(|row| row.student_id == target) {
                    row.email = update.new_email.clone();
                    affected += 1;
                }
                (Vec::new(), affected)
            }
            Statement::Delete(student_id) => {
                let before = rows.len();
                rows.retain(|row| row.student_id != student_id.get());
                (Vec::new(), (before - rows.len()) as u64)
            }
        };

        sleep_ms(self.state.commit_delay_ms.load(Ordering::SeqCst)).await;
        if cancel.is_cancelled() {
            debug!("In-memory statement cancelled before commit");
            return Err(query_canceled());
        }

        table.rows = rows;
        table.next_id = next_id;
        Ok(result)
    }
}

async fn sleep_ms(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

fn query_canceled() -> StatementError {
    StatementError::Rejected {
        code: "57014".to_string(),
        message: "canceling statement due to user request".to_string(),
    }
}

/// Cancel bookkeeping for one session. A cancel only hits statements that
/// were already running when it arrived.
#[derive(Debug, Clone, Default)]
struct CancelState {
    generation: Arc<AtomicU64>,
    started_at: u64,
}

impl CancelState {
    fn begin(&self) -> Self {
        Self {
            generation: Arc::clone(&self.generation),
            started_at: self.generation.load(Ordering::SeqCst),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.generation.load(Ordering::SeqCst) != self.started_at
    }
}

struct MemoryCanceller {
    generation: Arc<AtomicU64>,
}

#[async_trait]
impl StatementCanceller for MemoryCanceller {
    async fn cancel(&self) -> Result<(), StatementError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn unique_violation(email: &str) -> StatementError {
    StatementError::UniqueViolation {
        constraint: EMAIL_CONSTRAINT.to_string(),
        message: format!("duplicate key value violates unique constraint: (email)=({})", email),
    }
}

/// A session against the in-memory engine
#[derive(Debug)]
pub struct MemoryConnection {
    engine: MemoryEngine,
    session_id: u64,
    cancel: CancelState,
}

impl MemoryConnection {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    // The statement runs on its own task, so dropping the caller's future
    // leaves it running just as a server would.
    async fn submit(&self, statement: &Statement) -> Result<(Vec<Student>, u64), StatementError> {
        let engine = self.engine.clone();
        let statement = statement.clone();
        let cancel = self.cancel.begin();
        tokio::spawn(async move { engine.run(&statement, &cancel).await })
            .await
            .map_err(|e| StatementError::ConnectionLost(e.to_string()))?
    }
}

#[async_trait]
impl StatementExecutor for MemoryConnection {
    async fn query_students(&mut self, statement: &Statement) -> Result<Vec<Student>, StatementError> {
        self.submit(statement).await.map(|(rows, _)| rows)
    }

    async fn execute_statement(&mut self, statement: &Statement) -> Result<u64, StatementError> {
        self.submit(statement).await.map(|(_, affected)| affected)
    }

    fn canceller(&self) -> Box<dyn StatementCanceller> {
        Box::new(MemoryCanceller {
            generation: Arc::clone(&self.cancel.generation),
        })
    }
}

/// bb8 manager handing out sessions on a shared `MemoryEngine`
#[derive(Debug, Clone, Default)]
pub struct MemoryConnectionManager {
    engine: MemoryEngine,
}

impl MemoryConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(engine: MemoryEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> MemoryEngine {
        self.engine.clone()
    }
}

#[async_trait]
impl ManageConnection for MemoryConnectionManager {
    type Connection = MemoryConnection;
    type Error = ConnectionManagerError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        if !self.engine.is_reachable() {
            return Err(ConnectionManagerError::Unreachable(
                "in-memory engine is offline".to_string(),
            ));
        }
        let session_id = self
            .engine
            .state
            .connections_opened
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        debug!(session_id, "Opened in-memory session");
        Ok(MemoryConnection {
            engine: self.engine.clone(),
            session_id,
            cancel: CancelState::default(),
        })
    }

    async fn is_valid(&self, _conn: &mut Self::Connection) -> Result<(), Self::Error> {
        if self.engine.is_reachable() {
            Ok(())
        } else {
            Err(ConnectionManagerError::ValidationFailed(
                "in-memory engine is offline".to_string(),
            ))
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        !self.engine.is_reachable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailUpdate, NewStudent, StudentId};

    fn insert(email: &str) -> Statement {
        Statement::Insert(NewStudent::new("Grace", "Hopper", email, "2024-03-01").unwrap())
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let manager = MemoryConnectionManager::new();
        let mut conn = manager.connect().await.unwrap();

        assert_eq!(conn.execute_statement(&insert("a@example.com")).await.unwrap(), 1);
        assert_eq!(conn.execute_statement(&insert("b@example.com")).await.unwrap(), 1);

        let rows = conn.query_students(&Statement::ListAll).await.unwrap();
        let ids: Vec<i32> = rows.iter().map(|r| r.student_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_update_to_taken_email_is_rejected() {
        let manager = MemoryConnectionManager::new();
        let mut conn = manager.connect().await.unwrap();
        conn.execute_statement(&insert("a@example.com")).await.unwrap();
        conn.execute_statement(&insert("b@example.com")).await.unwrap();

        let clash = Statement::UpdateEmail(
            EmailUpdate::new(StudentId::new(2).unwrap(), "a@example.com").unwrap(),
        );
        let err = conn.execute_statement(&clash).await.unwrap_err();
        assert!(matches!(err, StatementError::UniqueViolation { .. }));

        // Rewriting a row's own email is not a conflict
        let same = Statement::UpdateEmail(
            EmailUpdate::new(StudentId::new(1).unwrap(), "a@example.com").unwrap(),
        );
        assert_eq!(conn.execute_statement(&same).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_engine_refuses_connections() {
        let manager = MemoryConnectionManager::new();
        let mut conn = manager.connect().await.unwrap();

        manager.engine().set_reachable(false);
        assert!(manager.connect().await.is_err());
        assert!(manager.is_valid(&mut conn).await.is_err());
        assert!(manager.has_broken(&mut conn));

        let err = conn.query_students(&Statement::ListAll).await.unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_sessions_share_one_table() {
        let engine = MemoryEngine::new();
        let manager = MemoryConnectionManager::with_engine(engine.clone());
        let mut first = manager.connect().await.unwrap();
        let mut second = manager.connect().await.unwrap();
        assert_ne!(first.session_id(), second.session_id());

        first.execute_statement(&insert("shared@example.com")).await.unwrap();
        assert_eq!(second.query_students(&Statement::ListAll).await.unwrap().len(), 1);
        assert_eq!(engine.snapshot().await.len(), 1);
        assert_eq!(engine.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_statement_still_commits() {
        let manager = MemoryConnectionManager::new();
        let engine = manager.engine();
        let mut conn = manager.connect().await.unwrap();
        engine.set_commit_delay(Duration::from_millis(100));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            conn.execute_statement(&insert("late@example.com")),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_running_statement() {
        let manager = MemoryConnectionManager::new();
        let engine = manager.engine();
        let mut conn = manager.connect().await.unwrap();
        engine.set_commit_delay(Duration::from_millis(200));

        let canceller = conn.canceller();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            conn.execute_statement(&insert("late@example.com")),
        )
        .await;
        assert!(abandoned.is_err());
        canceller.cancel().await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(engine.snapshot().await.is_empty());

        // A cancel only reaches statements already running
        engine.set_commit_delay(Duration::ZERO);
        assert_eq!(conn.execute_statement(&insert("next@example.com")).await.unwrap(), 1);
    }
}
