use serde::{Deserialize, Serialize};
use std::fmt;

/// Chat room / conversation identifier. The unit of serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A command read from the inbound log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub session_id: SessionId,
    pub user_id: String,
    pub content: String,
    /// Reply thread on platforms that have them.
    pub thread_id: Option<String>,
    /// Human-readable sender name, if the transport supplied one.
    pub sender: Option<String>,
}

impl InboundMessage {
    /// Name to show other users ("alice is currently playing").
    pub fn display_name(&self) -> &str {
        self.sender.as_deref().unwrap_or(&self.user_id)
    }

    /// Snapshot this message for the pending queue.
    pub fn to_pending(&self, enqueued_at_ms: i64) -> PendingMessage {
        PendingMessage {
            user_id: self.user_id.clone(),
            content: self.content.clone(),
            thread_id: self.thread_id.clone(),
            sender: self.sender.clone(),
            enqueued_at_ms,
        }
    }
}

/// A message waiting in a session's pending queue.
///
/// Also the unit handed to a command executor, whether it came straight from
/// the log or out of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub user_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Unix epoch milliseconds.
    pub enqueued_at_ms: i64,
}

impl PendingMessage {
    pub fn display_name(&self) -> &str {
        self.sender.as_deref().unwrap_or(&self.user_id)
    }

    /// Structural check applied when an entry is read back from a store.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.user_id.trim().is_empty() {
            return Err("empty user_id".to_string());
        }
        if self.content.trim().is_empty() {
            return Err("empty content".to_string());
        }
        if self.enqueued_at_ms < 0 {
            return Err(format!("negative enqueue time: {}", self.enqueued_at_ms));
        }
        Ok(())
    }
}

/// What an outbound message means to the client rendering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundKind {
    /// Progress or intermediate chunk; more output follows.
    Waiting,
    /// Last message of a reply.
    Final,
    Error,
}

impl OutboundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundKind::Waiting => "waiting",
            OutboundKind::Final => "final",
            OutboundKind::Error => "error",
        }
    }
}

impl fmt::Display for OutboundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutboundKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(OutboundKind::Waiting),
            "final" => Ok(OutboundKind::Final),
            "error" => Ok(OutboundKind::Error),
            other => Err(format!("unknown outbound kind: {}", other)),
        }
    }
}

/// A reply bound for the outbound log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub session_id: SessionId,
    pub thread_id: Option<String>,
    pub kind: OutboundKind,
    pub text: String,
}

impl OutboundMessage {
    pub fn new(
        session_id: SessionId,
        thread_id: Option<String>,
        kind: OutboundKind,
        text: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            thread_id,
            kind,
            text: text.into(),
        }
    }

    pub fn waiting(session_id: &SessionId, thread_id: Option<&str>, text: impl Into<String>) -> Self {
        Self::new(
            session_id.clone(),
            thread_id.map(String::from),
            OutboundKind::Waiting,
            text,
        )
    }

    pub fn final_text(session_id: &SessionId, thread_id: Option<&str>, text: impl Into<String>) -> Self {
        Self::new(
            session_id.clone(),
            thread_id.map(String::from),
            OutboundKind::Final,
            text,
        )
    }

    pub fn error(session_id: &SessionId, thread_id: Option<&str>, text: impl Into<String>) -> Self {
        Self::new(
            session_id.clone(),
            thread_id.map(String::from),
            OutboundKind::Error,
            text,
        )
    }
}

/// Outcome of adding a message to a session's pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueResult {
    /// Appended; `position` is 1-based.
    Success { position: usize },
    /// The same user already has an entry waiting. Nothing changed.
    Duplicate,
    /// The queue is at capacity. Nothing changed.
    Full,
}

/// Outcome of taking the oldest message off a session's pending queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DequeueResult {
    Empty,
    /// A corrupt entry was removed and skipped; the caller should try again.
    Exhausted,
    Success(PendingMessage),
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
