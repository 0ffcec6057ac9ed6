// ============================================================================
// RustMemoMQ Library
// ============================================================================
//
// Transactional resource holder for messaging connections and sessions.
//
// A transaction manager binds one `MessagingResourceHolder` to each unit of
// work, registers the connections and sessions it opens, commits them
// together and releases them when the scope ends.
//
// ============================================================================

pub mod core;
pub mod connection;
pub mod transaction;
pub mod memory;

// Re-export main types for convenience
pub use crate::core::{MqError, Result};
pub use connection::{
    Connection, ConnectionFactory, ResourceKey, Session, SharedConnection, SharedSession,
    release_connection,
};
pub use transaction::{HolderConfig, HolderState, HolderSupport, MessagingResourceHolder};
