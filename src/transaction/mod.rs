// ============================================================================
// Transactional Resource Holding
// ============================================================================
//
// Per-scope containers that a transaction manager binds to a unit of work:
// - MessagingResourceHolder: connections and sessions, commit and close
// - HolderSupport: synchronization flag, rollback-only, deadline, references
// - HolderConfig: defaults for holders created by a manager
//
// ============================================================================

pub mod config;
pub mod holder;
pub mod state;
pub mod support;

pub use config::HolderConfig;
pub use holder::MessagingResourceHolder;
pub use state::HolderState;
pub use support::HolderSupport;
