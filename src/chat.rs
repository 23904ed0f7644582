use crate::probe::ClipProbe;
use async_trait::async_trait;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId, ParseMode};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("chat api error: {0}")]
pub struct ChatError(pub String);

/// Everything the relay needs from the chat platform. The orchestrator and
/// the reporter are written against this trait so tests can record calls
/// instead of talking to Telegram.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Sends an HTML-formatted message; returns the new message id.
    async fn send_text(
        &self,
        chat: i64,
        reply_to: Option<i32>,
        text: &str,
        silent: bool,
    ) -> Result<i32, ChatError>;

    async fn edit_text(&self, chat: i64, message: i32, text: &str) -> Result<(), ChatError>;

    async fn delete_message(&self, chat: i64, message: i32) -> Result<(), ChatError>;

    async fn send_video(
        &self,
        chat: i64,
        path: &Path,
        caption: &str,
        probe: Option<ClipProbe>,
    ) -> Result<(), ChatError>;

    async fn send_audio(
        &self,
        chat: i64,
        path: &Path,
        caption: &str,
        duration: Option<u32>,
        title: Option<&str>,
    ) -> Result<(), ChatError>;

    async fn send_document(
        &self,
        chat: i64,
        path: &Path,
        caption: &str,
        file_name: &str,
    ) -> Result<(), ChatError>;
}

pub struct TelegramChat {
    bot: Bot,
}

impl TelegramChat {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn api_err(e: teloxide::RequestError) -> ChatError {
    ChatError(e.to_string())
}

#[async_trait]
impl ChatSink for TelegramChat {
    async fn send_text(
        &self,
        chat: i64,
        reply_to: Option<i32>,
        text: &str,
        silent: bool,
    ) -> Result<i32, ChatError> {
        let mut request = self
            .bot
            .send_message(ChatId(chat), text)
            .parse_mode(ParseMode::Html)
            .disable_notification(silent);
        if let Some(id) = reply_to {
            request = request.reply_to_message_id(MessageId(id));
        }
        let message = request.await.map_err(api_err)?;
        Ok(message.id.0)
    }

    async fn edit_text(&self, chat: i64, message: i32, text: &str) -> Result<(), ChatError> {
        self.bot
            .edit_message_text(ChatId(chat), MessageId(message), text)
            .await
            .map_err(api_err)?;
        Ok(())
    }

    async fn delete_message(&self, chat: i64, message: i32) -> Result<(), ChatError> {
        self.bot
            .delete_message(ChatId(chat), MessageId(message))
            .await
            .map_err(api_err)?;
        Ok(())
    }

    async fn send_video(
        &self,
        chat: i64,
        path: &Path,
        caption: &str,
        probe: Option<ClipProbe>,
    ) -> Result<(), ChatError> {
        let mut request = self
            .bot
            .send_video(ChatId(chat), InputFile::file(path.to_path_buf()))
            .caption(caption.to_string())
            .parse_mode(ParseMode::Html)
            .supports_streaming(true);
        if let Some(probe) = probe {
            request = request
                .width(probe.width)
                .height(probe.height)
                .duration(probe.duration);
        }
        request.await.map_err(api_err)?;
        Ok(())
    }

    async fn send_audio(
        &self,
        chat: i64,
        path: &Path,
        caption: &str,
        duration: Option<u32>,
        title: Option<&str>,
    ) -> Result<(), ChatError> {
        let mut request = self
            .bot
            .send_audio(ChatId(chat), InputFile::file(path.to_path_buf()))
            .caption(caption.to_string())
            .parse_mode(ParseMode::Html);
        if let Some(duration) = duration {
            request = request.duration(duration);
        }
        if let Some(title) = title {
            request = request.title(title.to_string());
        }
        request.await.map_err(api_err)?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat: i64,
        path: &Path,
        caption: &str,
        file_name: &str,
    ) -> Result<(), ChatError> {
        let input = InputFile::file(path.to_path_buf()).file_name(file_name.to_string());
        self.bot
            .send_document(ChatId(chat), input)
            .caption(caption.to_string())
            .parse_mode(ParseMode::Html)
            .await
            .map_err(api_err)?;
        Ok(())
    }
}
