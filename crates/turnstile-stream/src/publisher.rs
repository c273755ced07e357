use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use turnstile_core::{config::StreamConfig, OutboundMessage};

use crate::codec::outbound_to_fields;
use crate::error::Result;
use crate::log::StreamLog;

/// Destination for replies.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn publish(&self, msg: &OutboundMessage) -> Result<()>;
}

/// Appends replies to the outbound stream, trimming it as it grows.
pub struct OutboundPublisher {
    log: Arc<dyn StreamLog>,
    stream: String,
    max_len: usize,
}

impl OutboundPublisher {
    pub fn new(log: Arc<dyn StreamLog>, stream: impl Into<String>, max_len: usize) -> Self {
        Self {
            log,
            stream: stream.into(),
            max_len,
        }
    }

    pub fn from_config(log: Arc<dyn StreamLog>, config: &StreamConfig) -> Self {
        Self::new(log, config.outbound.clone(), config.outbound_max_len)
    }
}

#[async_trait]
impl OutboundSink for OutboundPublisher {
    async fn publish(&self, msg: &OutboundMessage) -> Result<()> {
        let id = self
            .log
            .append(&self.stream, &outbound_to_fields(msg), Some(self.max_len))
            .await?;
        debug!(session = %msg.session_id, kind = %msg.kind, entry = id, "reply published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use turnstile_core::SessionId;

    use super::*;
    use crate::codec::outbound_from_entry;
    use crate::log::SqliteStreamLog;

    #[tokio::test]
    async fn published_replies_read_back_newest_first() {
        let log = Arc::new(SqliteStreamLog::new(Connection::open_in_memory().unwrap()).unwrap());
        let out = OutboundPublisher::new(log.clone(), "out", 2);
        let chat = SessionId::from("room");

        out.publish(&OutboundMessage::waiting(&chat, Some("t"), "one")).await.unwrap();
        out.publish(&OutboundMessage::waiting(&chat, Some("t"), "two")).await.unwrap();
        out.publish(&OutboundMessage::final_text(&chat, Some("t"), "three")).await.unwrap();

        let texts: Vec<String> = log
            .latest("out", 10)
            .await
            .unwrap()
            .iter()
            .map(|e| outbound_from_entry(e).unwrap().text)
            .collect();
        assert_eq!(texts, ["three", "two"]);
    }
}
