//! Silent lifecycle announcements to the allowed chats.

use crate::chat::ChatSink;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Notices {
    chat: Arc<dyn ChatSink>,
    chats: Vec<i64>,
    enabled: bool,
}

impl Notices {
    pub fn new(chat: Arc<dyn ChatSink>, chats: Vec<i64>, enabled: bool) -> Self {
        Self { chat, chats, enabled }
    }

    pub async fn startup(&self) {
        self.broadcast("🚀 Bot is up and watching for links").await;
    }

    pub async fn shutdown(&self) {
        self.broadcast("🛠 Bot is going down for maintenance").await;
    }

    /// One silent message per chat; a chat that rejects the bot must not
    /// block the announcement to the others.
    async fn broadcast(&self, text: &str) {
        if !self.enabled {
            return;
        }
        let sends = self.chats.iter().map(|&chat_id| {
            let chat = Arc::clone(&self.chat);
            async move {
                if let Err(e) = chat.send_text(chat_id, None, text, true).await {
                    warn!(chat = chat_id, error = %e, "lifecycle notice not delivered");
                }
            }
        });
        futures::future::join_all(sends).await;
        info!(chats = self.chats.len(), "lifecycle notice broadcast");
    }
}
