use thiserror::Error;

/// Failures of the shared store itself (not of the data in it).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A value could not be encoded for storage.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A thread panicked while holding the connection.
    #[error("store connection poisoned")]
    Poisoned,
}

/// Why a scoped lock acquisition did not run its critical section.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another caller holds a live lease on the session.
    #[error("session {session_id} is locked by {holder}")]
    Held { session_id: String, holder: String },

    /// The store could not be reached to acquire the lease.
    #[error("lock store failure: {0}")]
    Store(#[from] StoreError),
}

impl LockError {
    /// Contention is an expected outcome, not a fault.
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::Held { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
