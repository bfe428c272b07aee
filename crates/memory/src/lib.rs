//! Persistent project memory: fingerprints, report history and fix attempts.

mod error;
mod file_store;
mod lock;
mod memory_store;
mod record;
mod store;

pub use error::{MemoryError, Result};
pub use file_store::FileMemoryStore;
pub use memory_store::InMemoryStore;
pub use record::{MemoryRecord, RecordSummary, HISTORY_LIMIT, RECORD_SCHEMA_VERSION};
pub use store::{MemoryStore, RecordUpdate};
