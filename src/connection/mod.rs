pub mod release;

use crate::core::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub use release::{close_quietly, release_connection, stop_quietly};

/// Shared handle to a messaging connection
pub type SharedConnection = Arc<dyn Connection>;

/// Shared handle to a messaging session
pub type SharedSession = Arc<dyn Session>;

/// A unit of work scoped to a connection
///
/// Messages are sent and received through a session. Transacted sessions
/// group their work until `commit` or `rollback` is called.
#[async_trait]
pub trait Session: Send + Sync {
    /// Whether the session groups its work into local transactions
    fn transacted(&self) -> bool;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// An open link to the messaging system
#[async_trait]
pub trait Connection: Send + Sync {
    fn client_id(&self) -> &str;

    /// Start delivery of incoming messages
    async fn start(&self) -> Result<()>;

    /// Temporarily stop delivery of incoming messages
    async fn stop(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates connections and governs how they are released
///
/// Factories that hand out shared connections override `should_stop` and
/// `release_connection` to keep the connection alive between units of work.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create_connection(&self) -> Result<SharedConnection>;

    /// Whether a started connection from this factory has to be stopped
    /// before it is closed
    fn should_stop(&self, _connection: &dyn Connection) -> bool {
        false
    }

    /// Release a connection obtained from this factory
    ///
    /// The default policy stops the connection when `started` is set and
    /// `should_stop` agrees, then closes it. Stop and close failures are
    /// logged and ignored.
    async fn release_connection(&self, connection: &SharedConnection, started: bool) -> Result<()> {
        if started && self.should_stop(connection.as_ref()) {
            stop_quietly(connection).await;
        }
        close_quietly(connection).await;
        Ok(())
    }
}

/// Identity of a shared handle
///
/// Two handles have the same key only when they point at the same
/// allocation, so structurally equal resources stay distinct. A key is
/// stable for as long as some `Arc` keeps the allocation alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey(usize);

impl ResourceKey {
    pub fn of<T: ?Sized>(handle: &Arc<T>) -> Self {
        ResourceKey(Arc::as_ptr(handle) as *const () as usize)
    }
}
