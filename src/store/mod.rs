//! Persistence layer — devices, flows, conversations, stage configs, locks.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryBackend;
pub use model::{Conversation, Device, ProcessingLock, StageConfig, StoredFlow};
pub use traits::Database;
