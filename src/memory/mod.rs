// ============================================================================
// In-Memory Messaging Client
// ============================================================================
//
// A broker-less implementation of the messaging client traits. Every
// operation is written to a shared journal and each handle can be told to
// fail specific operations, which makes commit and shutdown ordering
// observable without a real broker.
//
// ============================================================================

pub mod journal;

pub use journal::{Journal, JournalEntry, Operation};

use crate::connection::{
    Connection, ConnectionFactory, Session, SharedConnection, close_quietly, stop_quietly,
};
use crate::core::{MqError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

/// Per-handle failure switches
#[derive(Debug, Default)]
struct FailureSwitches {
    commit: AtomicBool,
    rollback: AtomicBool,
    stop: AtomicBool,
    close: AtomicBool,
}

impl FailureSwitches {
    fn should_fail(&self, operation: Operation) -> bool {
        let flag = match operation {
            Operation::Commit => &self.commit,
            Operation::Rollback => &self.rollback,
            Operation::Stop => &self.stop,
            Operation::Close => &self.close,
            Operation::Create | Operation::Start => return false,
        };
        flag.load(Ordering::SeqCst)
    }
}

/// Connection factory backed by nothing but memory
///
/// # Examples
///
/// ```
/// use rustmemomq::memory::MemoryConnectionFactory;
///
/// let factory = MemoryConnectionFactory::new();
/// let connection = factory.open_connection().unwrap();
/// let session = connection.open_session(true).unwrap();
/// assert!(session.id().starts_with(connection.client_id()));
/// ```
#[derive(Debug, Clone)]
pub struct MemoryConnectionFactory {
    journal: Journal,
    stop_on_release: bool,
    strict_release: bool,
}

impl Default for MemoryConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnectionFactory {
    pub fn new() -> Self {
        Self {
            journal: Journal::new(),
            stop_on_release: false,
            strict_release: false,
        }
    }

    /// Report started connections as needing a stop before close
    pub fn stop_on_release(mut self, enabled: bool) -> Self {
        self.stop_on_release = enabled;
        self
    }

    /// Propagate close failures from `release_connection` instead of logging them
    pub fn strict_release(mut self, enabled: bool) -> Self {
        self.strict_release = enabled;
        self
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Open a connection and keep its concrete type
    pub fn open_connection(&self) -> Result<Arc<MemoryConnection>> {
        let client_id = format!("conn-{}", Uuid::new_v4().simple());
        self.journal.record(&client_id, Operation::Create, true)?;
        Ok(Arc::new(MemoryConnection {
            client_id,
            journal: self.journal.clone(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            next_session: AtomicU64::new(1),
            failures: FailureSwitches::default(),
        }))
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn create_connection(&self) -> Result<SharedConnection> {
        let connection: SharedConnection = self.open_connection()?;
        Ok(connection)
    }

    fn should_stop(&self, _connection: &dyn Connection) -> bool {
        self.stop_on_release
    }

    async fn release_connection(&self, connection: &SharedConnection, started: bool) -> Result<()> {
        if started && self.should_stop(connection.as_ref()) {
            stop_quietly(connection).await;
        }
        if self.strict_release {
            return connection.close().await;
        }
        close_quietly(connection).await;
        Ok(())
    }
}

/// In-memory connection
#[derive(Debug)]
pub struct MemoryConnection {
    client_id: String,
    journal: Journal,
    started: AtomicBool,
    closed: AtomicBool,
    next_session: AtomicU64,
    failures: FailureSwitches,
}

impl MemoryConnection {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_on_stop(&self, fail: bool) {
        self.failures.stop.store(fail, Ordering::SeqCst);
    }

    pub fn fail_on_close(&self, fail: bool) {
        self.failures.close.store(fail, Ordering::SeqCst);
    }

    /// Open a session on this connection
    pub fn open_session(&self, transacted: bool) -> Result<Arc<MemorySession>> {
        self.ensure_open()?;
        let number = self.next_session.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}/session-{}", self.client_id, number);
        self.journal.record(&id, Operation::Create, true)?;
        Ok(Arc::new(MemorySession {
            id,
            transacted,
            journal: self.journal.clone(),
            closed: AtomicBool::new(false),
            pending: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            failures: FailureSwitches::default(),
        }))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(MqError::Messaging(format!(
                "Connection '{}' is closed",
                self.client_id
            )));
        }
        Ok(())
    }

    fn attempt(&self, operation: Operation) -> Result<()> {
        if self.failures.should_fail(operation) {
            self.journal.record(&self.client_id, operation, false)?;
            return Err(MqError::Messaging(format!(
                "{} failed on connection '{}'",
                operation, self.client_id
            )));
        }
        self.journal.record(&self.client_id, operation, true)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn start(&self) -> Result<()> {
        self.ensure_open()?;
        self.attempt(Operation::Start)?;
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.ensure_open()?;
        self.attempt(Operation::Stop)?;
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.attempt(Operation::Close)?;
        self.started.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory session
///
/// Tracks a pending-work counter so that commits and rollbacks have a
/// visible effect.
#[derive(Debug)]
pub struct MemorySession {
    id: String,
    transacted: bool,
    journal: Journal,
    closed: AtomicBool,
    pending: AtomicU64,
    committed: AtomicU64,
    failures: FailureSwitches,
}

impl MemorySession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Record one unit of work, e.g. a sent message
    pub fn send(&self) -> Result<()> {
        self.ensure_open()?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn fail_on_commit(&self, fail: bool) {
        self.failures.commit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_on_rollback(&self, fail: bool) {
        self.failures.rollback.store(fail, Ordering::SeqCst);
    }

    pub fn fail_on_close(&self, fail: bool) {
        self.failures.close.store(fail, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(MqError::Messaging(format!("Session '{}' is closed", self.id)));
        }
        Ok(())
    }

    fn attempt(&self, operation: Operation) -> Result<()> {
        if self.failures.should_fail(operation) {
            self.journal.record(&self.id, operation, false)?;
            return Err(MqError::Messaging(format!(
                "{} failed on session '{}'",
                operation, self.id
            )));
        }
        self.journal.record(&self.id, operation, true)
    }
}

#[async_trait]
impl Session for MemorySession {
    fn transacted(&self) -> bool {
        self.transacted
    }

    async fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        self.attempt(Operation::Commit)?;
        let pending = self.pending.swap(0, Ordering::SeqCst);
        self.committed.fetch_add(pending, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        self.attempt(Operation::Rollback)?;
        self.pending.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.attempt(Operation::Close)?;
        self.pending.store(0, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
