use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use turnstile_stream::{codec::inbound_from_entry, EntryHandler, StreamEntry};

use crate::processor::{log_outcome, QueueProcessor};

/// Bridges the stream consumer to the queue processor.
pub struct DispatchHandler {
    processor: Arc<QueueProcessor>,
}

impl DispatchHandler {
    pub fn new(processor: Arc<QueueProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl EntryHandler for DispatchHandler {
    async fn handle(&self, entry: StreamEntry) {
        let msg = match inbound_from_entry(&entry) {
            Ok(msg) => msg,
            Err(e) => {
                // Acknowledged by the consumer like any other entry.
                warn!(entry = entry.id, error = %e, "skipping malformed inbound entry");
                return;
            }
        };
        let outcome = self.processor.dispatch(&msg).await;
        log_outcome(&msg.session_id, &outcome);
    }
}
