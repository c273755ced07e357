//! `turnstile-stream` - SQLite-backed append-only streams with consumer groups.
//!
//! # Overview
//!
//! Bots read commands from an inbound stream and write replies to an outbound
//! stream. Any number of consumer processes can share a group; each entry is
//! delivered to one of them and stays pending until acknowledged.
//!
//! | Piece                | Role                                              |
//! |----------------------|---------------------------------------------------|
//! | [`SqliteStreamLog`]  | Storage: append, groups, pending list, ack, trim   |
//! | [`StreamConsumer`]   | Group reader fanning entries out to a handler      |
//! | [`OutboundPublisher`]| Reply writer with length cap                      |
//! | [`codec`]            | Field layout of inbound and outbound entries       |

pub mod codec;
pub mod consumer;
pub mod db;
pub mod error;
pub mod log;
pub mod publisher;
pub mod types;

pub use consumer::{ConsumerOptions, EntryHandler, StreamConsumer};
pub use error::{Result, StreamError};
pub use log::{SqliteStreamLog, StreamLog};
pub use publisher::{OutboundPublisher, OutboundSink};
pub use types::{EntryId, Fields, StartFrom, StreamEntry};
