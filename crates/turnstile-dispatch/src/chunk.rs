//! Splitting long replies into platform-sized messages.
//!
//! Lengths are counted in characters, so multi-byte text is never cut inside
//! a code point. When a split falls inside a fenced code block, the fence is
//! closed at the end of the chunk and re-opened at the start of the next one.

use turnstile_core::{OutboundMessage, SessionId};

/// Smallest limit the splitter honours; anything lower is raised to this.
pub const MIN_LIMIT: usize = 16;

const FENCE: &str = "```";
/// `"\n```"` appended to close a fence at a chunk boundary.
const FENCE_CLOSE_LEN: usize = 4;

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into chunks of at most `limit` characters, preferring line
/// boundaries and keeping code fences balanced.
pub fn split_chunks(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(MIN_LIMIT);
    if char_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    let mut fence_lang: Option<String> = None;

    for line in text.split('\n') {
        let line_len = char_len(line);
        let cost = if current.is_empty() {
            line_len
        } else {
            1 + line_len
        };
        let reserve = if fence_lang.is_some() {
            FENCE_CLOSE_LEN
        } else {
            0
        };

        if !current.is_empty() && current_len + cost + reserve > limit {
            if fence_lang.is_some() {
                current.push('\n');
                current.push_str(FENCE);
            }
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
            if let Some(lang) = &fence_lang {
                current.push_str(FENCE);
                current.push_str(lang);
                current_len = FENCE.len() + char_len(lang);
            }
        }

        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;

        if let Some(after) = line.trim_start().strip_prefix(FENCE) {
            fence_lang = match fence_lang {
                Some(_) => None,
                None => Some(after.trim().to_string()),
            };
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    // A single line longer than the limit still needs cutting.
    let mut result = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        if char_len(&chunk) <= limit {
            result.push(chunk);
        } else {
            force_split(&chunk, limit, &mut result);
        }
    }
    result
}

fn force_split(chunk: &str, limit: usize, out: &mut Vec<String>) {
    let mut remaining = chunk;
    while char_len(remaining) > limit {
        let hard = remaining
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let head = &remaining[..hard];
        let split_at = head
            .rfind('\n')
            .or_else(|| head.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(hard);
        out.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }
    if !remaining.is_empty() {
        out.push(remaining.to_string());
    }
}

/// Turn a reply into outbound messages: every chunk but the last is
/// `Waiting`, the last is `Final`. Blank replies produce nothing.
pub fn reply_messages(
    session: &SessionId,
    thread_id: Option<&str>,
    text: &str,
    limit: usize,
) -> Vec<OutboundMessage> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let chunks = split_chunks(text, limit);
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            if i == last {
                OutboundMessage::final_text(session, thread_id, chunk)
            } else {
                OutboundMessage::waiting(session, thread_id, chunk)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use turnstile_core::OutboundKind;

    use super::*;

    const LIMIT: usize = 100;

    #[test]
    fn short_text_is_single_chunk() {
        assert_eq!(split_chunks("Hello, world!", LIMIT), vec!["Hello, world!"]);
    }

    #[test]
    fn exactly_limit_is_single_chunk() {
        let text = "a".repeat(LIMIT);
        assert_eq!(split_chunks(&text, LIMIT).len(), 1);
    }

    #[test]
    fn over_limit_splits_on_newline() {
        let line = "a".repeat(60);
        let text = format!("{line}\n{line}\n{line}");
        let chunks = split_chunks(&text, LIMIT);
        assert_eq!(chunks, vec![line.clone(), line.clone(), line]);
    }

    #[test]
    fn long_single_line_force_splits() {
        let text = "x".repeat(250);
        let chunks = split_chunks(&text, LIMIT);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| char_len(c) <= LIMIT));
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let text = "가".repeat(250);
        let chunks = split_chunks(&text, LIMIT);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| char_len(c) <= LIMIT));
    }

    #[test]
    fn code_fence_reopened_with_language() {
        let mut text = String::from("Intro.\n```rust\n");
        for i in 0..20 {
            text.push_str(&format!("let v{i:02} = {i};\n"));
        }
        text.push_str("```\nAfter fence.");

        let chunks = split_chunks(&text, LIMIT);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| char_len(c) <= LIMIT));
        assert!(chunks[0].ends_with("\n```"));
        assert!(chunks[1].starts_with("```rust\n"));
    }

    #[test]
    fn tiny_limit_is_raised() {
        let chunks = split_chunks(&"b".repeat(40), 1);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| char_len(c) <= MIN_LIMIT));
    }

    #[test]
    fn reply_marks_only_last_chunk_final() {
        let chat = SessionId::from("room");
        let line = "z".repeat(60);
        let msgs = reply_messages(&chat, Some("t1"), &format!("{line}\n{line}\n{line}"), LIMIT);
        let kinds: Vec<_> = msgs.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            [OutboundKind::Waiting, OutboundKind::Waiting, OutboundKind::Final]
        );
        assert!(msgs.iter().all(|m| m.thread_id.as_deref() == Some("t1")));
        assert!(reply_messages(&chat, None, "  \n ", LIMIT).is_empty());
    }
}
