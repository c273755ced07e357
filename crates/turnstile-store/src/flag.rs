//! Advisory "session is busy" marker.
//!
//! Cheaper than a lock attempt and used only to route new arrivals straight
//! to the pending queue. Correctness never depends on it; the lock does that.

use async_trait::async_trait;
use turnstile_core::SessionId;

use crate::error::Result;

#[async_trait]
pub trait ProcessingFlagStore: Send + Sync {
    /// Mark the session busy. Flags self-expire after the store's TTL.
    async fn start_processing(&self, session: &SessionId) -> Result<()>;

    /// Clear the mark. Idempotent.
    async fn finish_processing(&self, session: &SessionId) -> Result<()>;

    async fn is_processing(&self, session: &SessionId) -> Result<bool>;
}
