//! Shared coordination state for the message pipeline: the per-session lock,
//! the processing flag and the pending queue.
//!
//! Two backends implement every store trait. [`SqliteStore`] keeps state in a
//! database file that any number of consumer processes can open;
//! [`MemoryStore`] keeps it in process and suits a single consumer or tests.

pub mod db;
pub mod error;
pub mod flag;
pub mod lock;
pub mod memory;
pub mod queue;
pub mod sqlite;

pub use error::{LockError, StoreError};
pub use flag::ProcessingFlagStore;
pub use lock::{LockManager, LockStore};
pub use memory::MemoryStore;
pub use queue::{PendingQueueStore, QueueDetails, QueueLimits, WaitingUser};
pub use sqlite::SqliteStore;
