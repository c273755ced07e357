//! `turnstile-dispatch` - the per-session serialized processing core.
//!
//! [`QueueProcessor`] decides for every inbound message whether it runs now
//! (under the session lock) or waits in the pending queue, runs the bot's
//! [`CommandExecutor`] with a deadline, and drains the queue afterwards.
//! [`Notifier`] turns each outcome into a user-facing reply.

pub mod chunk;
pub mod error;
pub mod executor;
pub mod handler;
pub mod notifier;
pub mod processor;

pub use error::{DomainError, ExecError};
pub use executor::CommandExecutor;
pub use handler::DispatchHandler;
pub use notifier::Notifier;
pub use processor::{DispatchOutcome, DrainReport, ProcessorSettings, QueueProcessor};
