//! Field layout of inbound and outbound entries.
//!
//! Inbound: `chat_id`, `user_id`, `content`, optional `thread_id` and
//! `sender`. Outbound: `chat_id`, `thread_id`, `kind`, `text`. An optional
//! field that is absent or empty decodes to `None`.

use turnstile_core::{InboundMessage, OutboundKind, OutboundMessage, SessionId};

use crate::error::{Result, StreamError};
use crate::types::{Fields, StreamEntry};

pub const CHAT_ID: &str = "chat_id";
pub const USER_ID: &str = "user_id";
pub const CONTENT: &str = "content";
pub const THREAD_ID: &str = "thread_id";
pub const SENDER: &str = "sender";
pub const KIND: &str = "kind";
pub const TEXT: &str = "text";

pub fn inbound_to_fields(msg: &InboundMessage) -> Fields {
    let mut fields = Fields::new();
    fields.insert(CHAT_ID.into(), msg.session_id.to_string());
    fields.insert(USER_ID.into(), msg.user_id.clone());
    fields.insert(CONTENT.into(), msg.content.clone());
    if let Some(thread) = &msg.thread_id {
        fields.insert(THREAD_ID.into(), thread.clone());
    }
    if let Some(sender) = &msg.sender {
        fields.insert(SENDER.into(), sender.clone());
    }
    fields
}

pub fn inbound_from_entry(entry: &StreamEntry) -> Result<InboundMessage> {
    Ok(InboundMessage {
        session_id: SessionId::from(required(entry, CHAT_ID)?),
        user_id: required(entry, USER_ID)?.to_string(),
        content: required(entry, CONTENT)?.to_string(),
        thread_id: optional(entry, THREAD_ID),
        sender: optional(entry, SENDER),
    })
}

pub fn outbound_to_fields(msg: &OutboundMessage) -> Fields {
    let mut fields = Fields::new();
    fields.insert(CHAT_ID.into(), msg.session_id.to_string());
    fields.insert(
        THREAD_ID.into(),
        msg.thread_id.clone().unwrap_or_default(),
    );
    fields.insert(KIND.into(), msg.kind.as_str().into());
    fields.insert(TEXT.into(), msg.text.clone());
    fields
}

pub fn outbound_from_entry(entry: &StreamEntry) -> Result<OutboundMessage> {
    let kind: OutboundKind = required(entry, KIND)?
        .parse()
        .map_err(|reason| malformed(entry, reason))?;
    Ok(OutboundMessage {
        session_id: SessionId::from(required(entry, CHAT_ID)?),
        thread_id: optional(entry, THREAD_ID),
        kind,
        text: entry.field(TEXT).unwrap_or_default().to_string(),
    })
}

fn required<'a>(entry: &'a StreamEntry, name: &str) -> Result<&'a str> {
    match entry.field(name) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        Some(_) => Err(malformed(entry, format!("empty {name}"))),
        None => Err(malformed(entry, format!("missing {name}"))),
    }
}

fn optional(entry: &StreamEntry, name: &str) -> Option<String> {
    entry
        .field(name)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn malformed(entry: &StreamEntry, reason: String) -> StreamError {
    StreamError::Malformed {
        id: entry.id,
        reason,
    }
}
