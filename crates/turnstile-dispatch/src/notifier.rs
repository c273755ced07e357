//! User-facing texts for every pipeline outcome. Pure: no I/O, no logging.

use turnstile_core::{config::Locale, EnqueueResult, OutboundMessage, SessionId};

use crate::chunk::reply_messages;
use crate::error::ExecError;

#[derive(Debug, Clone, Copy, Default)]
pub struct Notifier {
    locale: Locale,
}

impl Notifier {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// Reply to an enqueue attempt. `holder` names whoever owns the session
    /// lock when the message was queued because of contention.
    pub fn enqueued(
        &self,
        session: &SessionId,
        thread_id: Option<&str>,
        result: EnqueueResult,
        holder: Option<&str>,
    ) -> OutboundMessage {
        match result {
            EnqueueResult::Success { position } => {
                OutboundMessage::waiting(session, thread_id, self.queued_text(position, holder))
            }
            EnqueueResult::Duplicate => {
                OutboundMessage::error(session, thread_id, self.duplicate_text())
            }
            EnqueueResult::Full => OutboundMessage::error(session, thread_id, self.full_text()),
        }
    }

    /// A drained message lost the lock race and could not be put back.
    pub fn requeue_failed(&self, session: &SessionId, thread_id: Option<&str>) -> OutboundMessage {
        let text = match self.locale {
            Locale::En => {
                "Your message could not be processed because the queue is full. Please send it again later."
            }
            Locale::Ko => "대기열이 가득 차서 메시지를 처리하지 못했습니다. 나중에 다시 보내 주세요.",
        };
        OutboundMessage::error(session, thread_id, text)
    }

    pub fn exec_failed(
        &self,
        session: &SessionId,
        thread_id: Option<&str>,
        err: &ExecError,
    ) -> OutboundMessage {
        let text = match err {
            ExecError::Timeout { .. } => self.timeout_text().to_string(),
            ExecError::Domain(domain) => domain.message.clone(),
            ExecError::Store(_) => self.unavailable_text().to_string(),
            ExecError::Internal(_) => self.internal_text().to_string(),
        };
        OutboundMessage::error(session, thread_id, text)
    }

    /// The coordination store itself failed before the command could run.
    pub fn store_failed(&self, session: &SessionId, thread_id: Option<&str>) -> OutboundMessage {
        OutboundMessage::error(session, thread_id, self.unavailable_text())
    }

    /// A successful reply, split to `limit` characters per message.
    pub fn reply(
        &self,
        session: &SessionId,
        thread_id: Option<&str>,
        text: &str,
        limit: usize,
    ) -> Vec<OutboundMessage> {
        reply_messages(session, thread_id, text, limit)
    }

    fn queued_text(&self, position: usize, holder: Option<&str>) -> String {
        match (self.locale, holder) {
            (Locale::En, Some(holder)) => format!(
                "{holder} is playing right now. Your message is queued at position {position}."
            ),
            (Locale::En, None) => format!("Your message is queued at position {position}."),
            (Locale::Ko, Some(holder)) => format!(
                "{holder}님이 진행 중입니다. 메시지가 대기열 {position}번째에 추가되었습니다."
            ),
            (Locale::Ko, None) => format!("메시지가 대기열 {position}번째에 추가되었습니다."),
        }
    }

    fn duplicate_text(&self) -> &'static str {
        match self.locale {
            Locale::En => "You already have a pending message. Please wait until it is processed.",
            Locale::Ko => "이미 대기 중인 메시지가 있습니다. 처리될 때까지 기다려 주세요.",
        }
    }

    fn full_text(&self) -> &'static str {
        match self.locale {
            Locale::En => "The queue is full. Please try again later.",
            Locale::Ko => "대기열이 가득 찼습니다. 잠시 후 다시 시도해 주세요.",
        }
    }

    fn timeout_text(&self) -> &'static str {
        match self.locale {
            Locale::En => "The operation timed out. Please try again.",
            Locale::Ko => "요청 시간이 초과되었습니다. 다시 시도해 주세요.",
        }
    }

    fn unavailable_text(&self) -> &'static str {
        match self.locale {
            Locale::En => "The service is temporarily unavailable. Please try again shortly.",
            Locale::Ko => "일시적으로 서비스를 이용할 수 없습니다. 잠시 후 다시 시도해 주세요.",
        }
    }

    fn internal_text(&self) -> &'static str {
        match self.locale {
            Locale::En => "Something went wrong while processing your message.",
            Locale::Ko => "메시지를 처리하는 중 오류가 발생했습니다.",
        }
    }
}
