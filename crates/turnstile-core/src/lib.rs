//! `turnstile-core` - shared configuration, error and message types.

pub mod config;
pub mod error;
pub mod types;

pub use config::TurnstileConfig;
pub use error::{Result, TurnstileError};
pub use types::{
    now_millis, DequeueResult, EnqueueResult, InboundMessage, OutboundKind, OutboundMessage,
    PendingMessage, SessionId,
};
