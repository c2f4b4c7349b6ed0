//! Telegram client using teloxide.

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile};
use tracing::{info, warn};

/// Outbound side of the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send one plain-text message. Callers chunk long text first.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), String>;

    /// Send a voice note (OGG Opus bytes).
    async fn send_voice(&self, chat_id: i64, audio: Vec<u8>, caption: Option<&str>) -> Result<(), String>;

    /// Fetch a file the user sent.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, String>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), String> {
        // Plain text, no parse mode.
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })
    }

    async fn send_voice(&self, chat_id: i64, audio: Vec<u8>, caption: Option<&str>) -> Result<(), String> {
        info!("🔊 Sending voice to chat {} ({} bytes)", chat_id, audio.len());

        let input_file = InputFile::memory(audio).file_name("voice.ogg");
        let mut request = self.bot.send_voice(ChatId(chat_id), input_file);

        if let Some(cap) = caption {
            request = request.caption(cap);
        }

        request.await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to send voice: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, String> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| format!("Failed to get file info: {e}"))?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| format!("Failed to download file: {e}"))?;

        info!("📥 Downloaded file ({} bytes)", data.len());
        Ok(data)
    }
}
