//! Adapters implementing the domain ports.

pub mod broadcast;
pub mod sqlite;

pub use broadcast::ChannelBroadcaster;
pub use sqlite::{SqliteMemoryStore, SqliteSagaStore, SqliteWorkflowStore};
