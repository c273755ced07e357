use async_trait::async_trait;
use turnstile_core::{PendingMessage, SessionId};

use crate::error::ExecError;

/// A bot's command logic, plugged into the queue processor.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Whether `content` must run under the session lock. Read-only commands
    /// (help text, queue listings) can skip it and answer immediately.
    fn requires_serialization(&self, content: &str) -> bool {
        let _ = content;
        true
    }

    /// Run one command. `Ok(None)` means there is nothing to reply.
    async fn execute(
        &self,
        session: &SessionId,
        msg: &PendingMessage,
    ) -> Result<Option<String>, ExecError>;
}
