use crate::chat::ChatSink;
use crate::runner::ToolRunner;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Out-of-band error reporting. Implementations are best-effort by contract:
/// a failure to deliver a report is logged and swallowed, never propagated
/// back into the request that triggered it.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, summary: &str, details: &str, platform: &str);
}

/// Ships reports to the admin chat as a document with the full diagnostic
/// text attached, including the most recent tool stderr.
pub struct TelegramReporter {
    chat: Arc<dyn ChatSink>,
    admin_chat: Option<i64>,
    runner: ToolRunner,
    work_dir: PathBuf,
}

impl TelegramReporter {
    pub fn new(
        chat: Arc<dyn ChatSink>,
        admin_chat: Option<i64>,
        runner: ToolRunner,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            chat,
            admin_chat,
            runner,
            work_dir,
        }
    }

    async fn deliver(&self, summary: &str, details: &str, platform: &str) -> Result<(), String> {
        let admin_chat = match self.admin_chat {
            Some(id) => id,
            None => return Ok(()),
        };

        let timestamp = chrono::Local::now().format("%d.%m.%Y %H:%M:%S").to_string();
        let last_stderr = self.runner.last_stderr().await;
        let body = build_report_body(&timestamp, platform, summary, details, &last_stderr);

        let caption = format!(
            "🚨 <b>Bot error</b>\n\n📅 Time: {timestamp}\n🎬 Platform: {platform}\n❌ Error: {summary}\n\nFull details in the attached file."
        );

        let file_name = format!(
            "error_{}_{}.txt",
            platform.to_lowercase().replace(' ', "-"),
            timestamp.replace(':', "-").replace(' ', "_")
        );
        let path = self.work_dir.join(&file_name);
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| format!("write report file: {e}"))?;

        let result = self
            .chat
            .send_document(admin_chat, &path, &caption, &file_name)
            .await
            .map_err(|e| e.to_string());

        let _ = tokio::fs::remove_file(&path).await;
        result?;

        info!(admin_chat, "error report delivered");
        Ok(())
    }
}

#[async_trait]
impl Reporter for TelegramReporter {
    async fn report(&self, summary: &str, details: &str, platform: &str) {
        if let Err(e) = self.deliver(summary, details, platform).await {
            warn!(error = %e, "failed to deliver error report");
        }
    }
}

fn build_report_body(
    timestamp: &str,
    platform: &str,
    summary: &str,
    details: &str,
    last_stderr: &str,
) -> String {
    let rule = "=".repeat(50);
    let mut body = format!(
        "Bot error report\n{rule}\nTime: {timestamp}\nPlatform: {platform}\nSummary: {summary}\n{rule}\n\nDETAILS:\n{}\n{details}\n",
        "-".repeat(50)
    );
    if !last_stderr.trim().is_empty() {
        body.push_str(&format!(
            "\n{rule}\nLAST TOOL STDERR:\n{}\n{last_stderr}\n",
            "-".repeat(50)
        ));
    }
    body
}
