// ============================================================================
// Messaging Resource Holder
// ============================================================================
//
// Tracks the connections and sessions opened for one unit of work.
//
// Sessions are grouped by the connection that created them. Commit is
// fail-fast across sessions. Close is two-phase: every session is closed
// first (failures logged and suppressed), then every connection is released
// with the final-release flag set.
//
// Membership is by handle identity (`ResourceKey`), not by value.
//
// ============================================================================

use super::config::HolderConfig;
use super::state::HolderState;
use super::support::HolderSupport;
use crate::connection::{
    Connection, ConnectionFactory, ResourceKey, Session, SharedConnection, SharedSession,
    release_connection,
};
use crate::core::{MqError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{Level, event};

/// Connections and sessions bound to one unit of work
///
/// A transaction manager creates one holder per scope, registers resources
/// as they are opened, calls [`commit_all`](Self::commit_all) on success and
/// always calls [`close_all`](Self::close_all) when the scope ends.
///
/// # Thread Safety
/// A holder has exactly one owner. Mutating operations take `&mut self`.
///
/// # Examples
///
/// ```
/// # use rustmemomq::{MessagingResourceHolder, SharedConnection};
/// # use rustmemomq::memory::MemoryConnectionFactory;
/// # #[tokio::main]
/// # async fn main() -> rustmemomq::Result<()> {
/// let factory = MemoryConnectionFactory::new();
/// let connection = factory.open_connection()?;
/// let session = connection.open_session(true)?;
///
/// let mut holder = MessagingResourceHolder::new();
/// let shared: SharedConnection = connection.clone();
/// holder.add_connection(shared.clone())?;
/// holder.add_session_with(session.clone(), Some(&shared))?;
///
/// holder.commit_all().await?;
/// holder.close_all().await?;
/// assert!(session.is_closed());
/// assert!(connection.is_closed());
/// # Ok(())
/// # }
/// ```
pub struct MessagingResourceHolder {
    connections: Vec<SharedConnection>,
    connection_keys: HashSet<ResourceKey>,
    sessions: Vec<SharedSession>,
    session_keys: HashSet<ResourceKey>,
    /// Connection -> indices into `sessions`
    sessions_by_connection: HashMap<ResourceKey, Vec<usize>>,
    connection_factory: Option<Weak<dyn ConnectionFactory>>,
    frozen: bool,
    state: HolderState,
    /// Connections already released by `close_all`
    released: usize,
    support: HolderSupport,
}

impl Default for MessagingResourceHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagingResourceHolder {
    /// Create a holder that is open for resources to be added
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
            connection_keys: HashSet::new(),
            sessions: Vec::new(),
            session_keys: HashSet::new(),
            sessions_by_connection: HashMap::new(),
            connection_factory: None,
            frozen: false,
            state: HolderState::Open,
            released: 0,
            support: HolderSupport::new(),
        }
    }

    /// Create an empty holder with the defaults from `config`
    pub fn from_config(config: &HolderConfig) -> Result<Self> {
        config.validate()?;
        let mut holder = Self::new();
        if let Some(timeout) = config.default_timeout {
            holder.support.set_timeout(timeout)?;
        }
        holder
            .support
            .set_synchronized_with_transaction(config.synchronized_with_transaction);
        Ok(holder)
    }

    /// Create a frozen holder for the given connection and session
    pub fn with_resources(connection: SharedConnection, session: SharedSession) -> Self {
        let mut holder = Self::new();
        holder.register_connection(connection.clone());
        holder.register_session(session, Some(&connection));
        holder.frozen = true;
        holder
    }

    /// Create a frozen holder that releases its connection through `factory`
    ///
    /// Only a weak reference to the factory is kept. The caller must keep the
    /// factory alive until `close_all`; otherwise connections are only closed
    /// and the factory's release policy (e.g. stopping) is skipped.
    pub fn with_factory(
        factory: &Arc<dyn ConnectionFactory>,
        connection: SharedConnection,
        session: SharedSession,
    ) -> Self {
        let mut holder = Self::with_resources(connection, session);
        holder.connection_factory = Some(Arc::downgrade(factory));
        holder
    }

    /// Whether the holder was created pre-populated and refuses new resources
    pub fn frozen(&self) -> bool {
        self.frozen
    }

    pub fn state(&self) -> HolderState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub fn support(&self) -> &HolderSupport {
        &self.support
    }

    pub fn support_mut(&mut self) -> &mut HolderSupport {
        &mut self.support
    }

    /// Factory used when releasing connections, if it is still alive
    pub fn connection_factory(&self) -> Option<Arc<dyn ConnectionFactory>> {
        self.connection_factory.as_ref().and_then(Weak::upgrade)
    }

    /// Register a connection
    ///
    /// Registering the same handle twice is a no-op.
    ///
    /// # Errors
    /// `IllegalState` if the holder is frozen or closed.
    pub fn add_connection(&mut self, connection: SharedConnection) -> Result<()> {
        self.ensure_accepting("connection")?;
        self.register_connection(connection);
        Ok(())
    }

    /// Register a session that is not tied to a tracked connection
    pub fn add_session(&mut self, session: SharedSession) -> Result<()> {
        self.add_session_with(session, None)
    }

    /// Register a session, grouping it under `connection` when given
    ///
    /// The first registration of a session wins: registering it again is a
    /// no-op, even with a different connection.
    ///
    /// # Errors
    /// `IllegalState` if the holder is frozen or closed.
    pub fn add_session_with(
        &mut self,
        session: SharedSession,
        connection: Option<&SharedConnection>,
    ) -> Result<()> {
        self.ensure_accepting("session")?;
        self.register_session(session, connection);
        Ok(())
    }

    fn ensure_accepting(&self, resource: &str) -> Result<()> {
        if !self.state.is_open() {
            return Err(MqError::IllegalState(format!(
                "Cannot add {} because the resource holder is {}",
                resource, self.state
            )));
        }
        if self.frozen {
            return Err(MqError::IllegalState(format!(
                "Cannot add {} because the resource holder is frozen",
                resource
            )));
        }
        Ok(())
    }

    fn register_connection(&mut self, connection: SharedConnection) {
        if self.connection_keys.insert(ResourceKey::of(&connection)) {
            self.connections.push(connection);
        }
    }

    fn register_session(&mut self, session: SharedSession, connection: Option<&SharedConnection>) {
        if !self.session_keys.insert(ResourceKey::of(&session)) {
            return;
        }
        let index = self.sessions.len();
        self.sessions.push(session);
        if let Some(connection) = connection {
            self.sessions_by_connection
                .entry(ResourceKey::of(connection))
                .or_default()
                .push(index);
        }
    }

    /// First registered connection
    pub fn connection(&self) -> Option<&SharedConnection> {
        self.connections.first()
    }

    /// First registered connection accepted by `predicate`
    pub fn connection_matching<P>(&self, predicate: P) -> Option<&SharedConnection>
    where
        P: Fn(&dyn Connection) -> bool,
    {
        self.connections
            .iter()
            .find(|&connection| predicate(connection.as_ref()))
    }

    /// First registered session
    pub fn session(&self) -> Option<&SharedSession> {
        self.sessions.first()
    }

    /// First registered session accepted by `predicate`
    pub fn session_matching<P>(&self, predicate: P) -> Option<&SharedSession>
    where
        P: Fn(&dyn Session) -> bool,
    {
        self.sessions.iter().find(|&session| predicate(session.as_ref()))
    }

    /// First session created under `connection` accepted by `predicate`
    ///
    /// Returns `None` when no session was grouped under `connection`.
    pub fn session_matching_on<P>(
        &self,
        predicate: P,
        connection: &SharedConnection,
    ) -> Option<&SharedSession>
    where
        P: Fn(&dyn Session) -> bool,
    {
        self.sessions_for(connection)
            .into_iter()
            .find(|&session| predicate(session.as_ref()))
    }

    /// Sessions grouped under `connection`, in registration order
    pub fn sessions_for(&self, connection: &SharedConnection) -> Vec<&SharedSession> {
        self.sessions_by_connection
            .get(&ResourceKey::of(connection))
            .map(|indices| indices.iter().map(|&index| &self.sessions[index]).collect())
            .unwrap_or_default()
    }

    pub fn contains_session(&self, session: &SharedSession) -> bool {
        self.session_keys.contains(&ResourceKey::of(session))
    }

    pub fn contains_connection(&self, connection: &SharedConnection) -> bool {
        self.connection_keys.contains(&ResourceKey::of(connection))
    }

    pub fn connections(&self) -> &[SharedConnection] {
        &self.connections
    }

    pub fn sessions(&self) -> &[SharedSession] {
        &self.sessions
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty() && self.sessions.is_empty()
    }

    /// Commit every session in registration order
    ///
    /// # Errors
    /// The first commit failure is returned as is and the sessions after it
    /// are left uncommitted. `IllegalState` once `close_all` has started.
    pub async fn commit_all(&self) -> Result<()> {
        if !self.state.is_open() {
            return Err(MqError::IllegalState(format!(
                "Cannot commit because the resource holder is {}",
                self.state
            )));
        }

        for (index, session) in self.sessions.iter().enumerate() {
            if let Err(err) = session.commit().await {
                event!(
                    Level::DEBUG,
                    session = index,
                    remaining = self.sessions.len() - index - 1,
                    error = %err,
                    "session commit failed"
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// Close all sessions, then release all connections
    ///
    /// Session close failures are logged and suppressed so that every
    /// session gets its close attempt. Connections are released only after
    /// all sessions were handled. Calling this again after success is a no-op.
    ///
    /// # Errors
    /// Only failures of the connection release are returned. The holder then
    /// stays [`HolderState::Closing`]; calling `close_all` again retries the
    /// release from the connection that failed without closing sessions twice.
    pub async fn close_all(&mut self) -> Result<()> {
        match self.state {
            HolderState::Closed => {
                event!(Level::DEBUG, "resource holder already closed");
                return Ok(());
            }
            HolderState::Open => {
                self.state = HolderState::Closing;
                self.close_sessions().await;
            }
            HolderState::Closing => {}
        }

        let factory = self.connection_factory();
        if factory.is_none() && self.connection_factory.is_some() {
            event!(
                Level::DEBUG,
                "connection factory was dropped before close; releasing connections without it"
            );
        }

        while self.released < self.connections.len() {
            let connection = &self.connections[self.released];
            if let Err(err) = release_connection(connection, factory.as_deref(), true).await {
                event!(
                    Level::WARN,
                    connection = self.released,
                    unreleased = self.connections.len() - self.released,
                    error = %err,
                    "connection release failed; resource holder left closing"
                );
                return Err(err);
            }
            self.released += 1;
        }

        self.state = HolderState::Closed;
        event!(
            Level::DEBUG,
            sessions = self.sessions.len(),
            connections = self.connections.len(),
            "resource holder closed"
        );
        Ok(())
    }

    async fn close_sessions(&self) {
        let mut suppressed: Vec<(usize, MqError)> = Vec::new();
        for (index, session) in self.sessions.iter().enumerate() {
            if let Err(err) = session.close().await {
                event!(
                    Level::DEBUG,
                    session = index,
                    error = %err,
                    "could not close messaging session after transaction"
                );
                suppressed.push((index, err));
            }
        }
        if !suppressed.is_empty() {
            event!(
                Level::DEBUG,
                suppressed = suppressed.len(),
                "session close failures suppressed"
            );
        }
    }
}

impl std::fmt::Debug for MessagingResourceHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingResourceHolder")
            .field("connections", &self.connections.len())
            .field("sessions", &self.sessions.len())
            .field("frozen", &self.frozen)
            .field("state", &self.state)
            .field("support", &self.support)
            .finish()
    }
}

impl Drop for MessagingResourceHolder {
    fn drop(&mut self) {
        // close_all is async and cannot run here
        if !self.state.is_closed() && !self.is_empty() {
            event!(
                Level::WARN,
                connections = self.connections.len(),
                sessions = self.sessions.len(),
                "resource holder dropped without close_all; resources were not released"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnection, MemoryConnectionFactory, MemorySession, Operation};

    fn open(factory: &MemoryConnectionFactory) -> (Arc<MemoryConnection>, SharedConnection) {
        let conn = factory.open_connection().unwrap();
        let shared: SharedConnection = conn.clone();
        (conn, shared)
    }

    fn session(conn: &MemoryConnection) -> (Arc<MemorySession>, SharedSession) {
        let session = conn.open_session(true).unwrap();
        let shared: SharedSession = session.clone();
        (session, shared)
    }

    #[test]
    fn test_new_holder_is_empty() {
        let holder = MessagingResourceHolder::new();
        assert!(holder.is_empty());
        assert!(!holder.frozen());
        assert!(holder.connection().is_none());
        assert!(holder.session().is_none());
        assert_eq!(holder.state(), HolderState::Open);
    }

    #[test]
    fn test_pre_bound_holder_is_frozen() {
        let factory = MemoryConnectionFactory::new();
        let (conn, shared_conn) = open(&factory);
        let (_, shared_session) = session(&conn);

        let mut holder =
            MessagingResourceHolder::with_resources(shared_conn.clone(), shared_session.clone());

        assert!(holder.frozen());
        assert_eq!(holder.connection_count(), 1);
        assert_eq!(holder.session_count(), 1);
        assert!(holder.contains_session(&shared_session));
        assert_eq!(holder.sessions_for(&shared_conn).len(), 1);

        let (_, other) = session(&conn);
        assert!(matches!(holder.add_session(other), Err(MqError::IllegalState(_))));
        assert!(matches!(
            holder.add_connection(shared_conn.clone()),
            Err(MqError::IllegalState(_))
        ));
        assert_eq!(holder.session_count(), 1);
        assert_eq!(holder.connection_count(), 1);
    }

    #[test]
    fn test_add_connection_is_idempotent() {
        let factory = MemoryConnectionFactory::new();
        let (_, shared) = open(&factory);
        let mut holder = MessagingResourceHolder::new();

        holder.add_connection(shared.clone()).unwrap();
        holder.add_connection(shared.clone()).unwrap();

        assert_eq!(holder.connection_count(), 1);
        assert!(holder.contains_connection(&shared));
        assert!(holder.sessions_for(&shared).is_empty());
    }

    #[test]
    fn test_first_session_registration_wins() {
        let factory = MemoryConnectionFactory::new();
        let (conn_a, shared_a) = open(&factory);
        let (_, shared_b) = open(&factory);
        let (_, s) = session(&conn_a);
        let mut holder = MessagingResourceHolder::new();

        holder.add_session_with(s.clone(), Some(&shared_a)).unwrap();
        holder.add_session_with(s.clone(), Some(&shared_b)).unwrap();
        holder.add_session(s.clone()).unwrap();

        assert_eq!(holder.session_count(), 1);
        assert_eq!(holder.sessions_for(&shared_a).len(), 1);
        assert!(holder.sessions_for(&shared_b).is_empty());
    }

    #[test]
    fn test_session_without_connection_is_ungrouped() {
        let factory = MemoryConnectionFactory::new();
        let (conn, shared_conn) = open(&factory);
        let (_, s) = session(&conn);
        let mut holder = MessagingResourceHolder::new();

        holder.add_session(s.clone()).unwrap();

        assert!(holder.contains_session(&s));
        assert!(holder.sessions_for(&shared_conn).is_empty());
        assert!(holder.session_matching_on(|_| true, &shared_conn).is_none());
    }

    #[test]
    fn test_predicate_lookups() {
        let factory = MemoryConnectionFactory::new();
        let (conn_a, shared_a) = open(&factory);
        let (conn_b, shared_b) = open(&factory);
        let plain: SharedSession = conn_a.open_session(false).unwrap();
        let (_, transacted_a) = session(&conn_a);
        let (_, transacted_b) = session(&conn_b);

        let mut holder = MessagingResourceHolder::new();
        holder.add_connection(shared_a.clone()).unwrap();
        holder.add_connection(shared_b.clone()).unwrap();
        holder.add_session_with(plain.clone(), Some(&shared_a)).unwrap();
        holder.add_session_with(transacted_a.clone(), Some(&shared_a)).unwrap();
        holder.add_session_with(transacted_b.clone(), Some(&shared_b)).unwrap();

        let first = holder.session_matching(|s| s.transacted()).unwrap();
        assert_eq!(ResourceKey::of(first), ResourceKey::of(&transacted_a));

        let on_b = holder.session_matching_on(|s| s.transacted(), &shared_b).unwrap();
        assert_eq!(ResourceKey::of(on_b), ResourceKey::of(&transacted_b));

        assert!(holder.session_matching_on(|s| !s.transacted(), &shared_b).is_none());

        let wanted = conn_b.client_id().to_string();
        let found = holder.connection_matching(|c| c.client_id() == wanted).unwrap();
        assert_eq!(ResourceKey::of(found), ResourceKey::of(&shared_b));
        assert!(holder.connection_matching(|c| c.client_id() == "missing").is_none());
    }

    #[test]
    fn test_first_lookups_follow_registration_order() {
        let factory = MemoryConnectionFactory::new();
        let (conn, shared_a) = open(&factory);
        let (_, shared_b) = open(&factory);
        let (_, s1) = session(&conn);
        let (_, s2) = session(&conn);

        let mut holder = MessagingResourceHolder::new();
        holder.add_connection(shared_b.clone()).unwrap();
        holder.add_connection(shared_a.clone()).unwrap();
        holder.add_session(s2.clone()).unwrap();
        holder.add_session(s1.clone()).unwrap();

        assert_eq!(ResourceKey::of(holder.connection().unwrap()), ResourceKey::of(&shared_b));
        assert_eq!(ResourceKey::of(holder.session().unwrap()), ResourceKey::of(&s2));
    }

    #[test]
    fn test_from_config_applies_defaults() {
        let config = HolderConfig::new()
            .default_timeout(std::time::Duration::from_secs(30))
            .synchronized_with_transaction(true);

        let holder = MessagingResourceHolder::from_config(&config).unwrap();
        assert!(holder.support().has_timeout());
        assert!(holder.support().is_synchronized_with_transaction());
        assert!(!holder.frozen());
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let config = HolderConfig::new().default_timeout(std::time::Duration::ZERO);
        assert!(matches!(
            MessagingResourceHolder::from_config(&config),
            Err(MqError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_factory_reference_is_weak() {
        let memory = MemoryConnectionFactory::new();
        let (conn, shared_conn) = open(&memory);
        let (_, s) = session(&conn);
        let factory: Arc<dyn ConnectionFactory> = Arc::new(memory.clone());

        let holder = MessagingResourceHolder::with_factory(&factory, shared_conn, s);
        assert!(holder.connection_factory().is_some());

        drop(factory);
        assert!(holder.connection_factory().is_none());
    }

    #[tokio::test]
    async fn test_close_all_then_reject_everything() {
        let factory = MemoryConnectionFactory::new();
        let (conn, shared_conn) = open(&factory);
        let (_, s) = session(&conn);

        let mut holder = MessagingResourceHolder::new();
        holder.add_connection(shared_conn.clone()).unwrap();
        holder.add_session_with(s.clone(), Some(&shared_conn)).unwrap();
        holder.close_all().await.unwrap();

        assert!(holder.is_closed());
        assert!(matches!(holder.add_session(s.clone()), Err(MqError::IllegalState(_))));
        assert!(matches!(
            holder.add_connection(shared_conn.clone()),
            Err(MqError::IllegalState(_))
        ));
        assert!(matches!(holder.commit_all().await, Err(MqError::IllegalState(_))));

        // still remembers what it held
        assert!(holder.contains_session(&s));
    }

    #[tokio::test]
    async fn test_close_all_twice_is_noop() {
        let factory = MemoryConnectionFactory::new();
        let (conn, shared_conn) = open(&factory);
        let (_, s) = session(&conn);

        let mut holder = MessagingResourceHolder::with_resources(shared_conn, s);
        holder.close_all().await.unwrap();
        let recorded = factory.journal().len();

        holder.close_all().await.unwrap();
        assert_eq!(factory.journal().len(), recorded);
    }

    #[tokio::test]
    async fn test_empty_holder_commit_and_close() {
        let mut holder = MessagingResourceHolder::new();
        assert!(holder.commit_all().await.is_ok());
        assert!(holder.close_all().await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_release_leaves_holder_closing() {
        let memory = MemoryConnectionFactory::new().strict_release(true);
        let (conn, shared_conn) = open(&memory);
        let (session, shared_session) = session(&conn);
        conn.fail_on_close(true);
        let factory: Arc<dyn ConnectionFactory> = Arc::new(memory.clone());

        let mut holder = MessagingResourceHolder::with_factory(&factory, shared_conn, shared_session);
        assert!(holder.close_all().await.is_err());

        assert_eq!(holder.state(), HolderState::Closing);
        assert!(!holder.is_closed());
        assert!(session.is_closed());
        assert!(matches!(holder.commit_all().await, Err(MqError::IllegalState(_))));

        conn.fail_on_close(false);
        holder.close_all().await.unwrap();

        assert!(holder.is_closed());
        assert!(conn.is_closed());
        // sessions are closed once, connection close attempted twice
        assert_eq!(memory.journal().operations_on(session.id()), vec![Operation::Create, Operation::Close]);
        assert_eq!(
            memory.journal().operations_on(conn.client_id()),
            vec![Operation::Create, Operation::Close, Operation::Close]
        );
    }

    #[tokio::test]
    async fn test_release_retry_resumes_at_failed_connection() {
        let memory = MemoryConnectionFactory::new().strict_release(true);
        let (first, shared_first) = open(&memory);
        let (second, shared_second) = open(&memory);
        let (third, shared_third) = open(&memory);
        second.fail_on_close(true);
        let factory: Arc<dyn ConnectionFactory> = Arc::new(memory.clone());

        let mut holder = MessagingResourceHolder::new();
        holder.add_connection(shared_first).unwrap();
        holder.add_connection(shared_second).unwrap();
        holder.add_connection(shared_third).unwrap();
        holder.connection_factory = Some(Arc::downgrade(&factory));

        assert!(holder.close_all().await.is_err());
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(!third.is_closed());

        second.fail_on_close(false);
        holder.close_all().await.unwrap();

        let releases = memory.journal().resources_with(Operation::Close);
        assert_eq!(
            releases,
            vec![
                first.client_id().to_string(),
                second.client_id().to_string(),
                second.client_id().to_string(),
                third.client_id().to_string(),
            ]
        );
    }
}
