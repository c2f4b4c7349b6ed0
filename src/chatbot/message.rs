//! Inbound message model and outbound text chunking.

/// Telegram rejects messages over 4096 chars; leave headroom.
pub const TELEGRAM_CHUNK_CHARS: usize = 4000;

/// What the user sent.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundContent {
    Text(String),
    /// Voice note or audio file, transcribed before it enters the pipeline.
    Voice { file_id: String },
    /// Document or photo upload.
    Upload { file_name: String },
}

/// A message from Telegram, stripped down to what the engine needs.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: InboundContent,
}

impl InboundMessage {
    #[cfg(test)]
    pub fn text(message_id: i64, chat_id: i64, user_id: i64, text: impl Into<String>) -> Self {
        Self {
            message_id,
            chat_id,
            user_id,
            username: String::new(),
            content: InboundContent::Text(text.into()),
        }
    }

    /// Redelivery key. Message ids are only unique within a chat.
    pub fn dedup_key(&self) -> (i64, i64) {
        (self.chat_id, self.message_id)
    }
}

/// First `max_chars` chars for log lines.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut preview: String = text.chars().take(max_chars).collect();
    if text.chars().nth(max_chars).is_some() {
        preview.push('…');
    }
    preview
}

/// Split `text` into pieces of at most `max_chars` chars.
///
/// Boundaries are fixed multiples of `max_chars`, counted in chars, so a
/// multi-byte codepoint is never cut. Empty input yields no chunks.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for c in text.chars() {
        if count == max_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(c);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
