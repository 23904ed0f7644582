//! Message orchestration: one recognized link in, one chat interaction out.
//!
//! The relay owns the lifecycle of an exchange: status message, scratch
//! workspace, strategy dispatch, upload, and the reply policy for each
//! outcome. The workspace is a drop guard, so scratch files disappear on
//! every path out of a handler, including panics and upload errors.

use crate::audio;
use crate::chat::ChatSink;
use crate::error::FetchError;
use crate::fetch::{self, FetchContext, Outcome};
use crate::links::{resolve_short, Platform, RecognizedLink};
use crate::probe::{audio_probe, clip_probe, AudioProbe};
use crate::report::Reporter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// The fields of an incoming message the relay actually needs.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub chat_id: i64,
    pub message_id: i32,
    pub user_id: u64,
    pub user_name: String,
}

pub struct Relay {
    chat: Arc<dyn ChatSink>,
    ctx: FetchContext,
    reporter: Arc<dyn Reporter>,
    work_dir: PathBuf,
    ffprobe: String,
    size_limit: u64,
    allowed_chats: Vec<i64>,
}

impl Relay {
    pub fn new(
        chat: Arc<dyn ChatSink>,
        ctx: FetchContext,
        reporter: Arc<dyn Reporter>,
        work_dir: PathBuf,
        ffprobe: String,
        size_limit: u64,
        allowed_chats: Vec<i64>,
    ) -> Self {
        Self {
            chat,
            ctx,
            reporter,
            work_dir,
            ffprobe,
            size_limit,
            allowed_chats,
        }
    }

    pub fn is_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats.contains(&chat_id)
    }

    /// Full exchange for a recognized video link.
    pub async fn handle_link(&self, msg: &Incoming, link: RecognizedLink) {
        info!(chat = msg.chat_id, url = %link.url, platform = %link.platform, "handling link");

        let status = match self
            .chat
            .send_text(msg.chat_id, Some(msg.message_id), "⏳ Fetching video...", true)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(chat = msg.chat_id, error = %e, "could not post status message");
                return;
            }
        };

        let workspace = match Workspace::create(self.work_dir.join(format!(
            "{}_{}_{}",
            link.platform.slug(),
            msg.chat_id,
            msg.message_id
        ))) {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, "could not create workspace");
                self.notice(msg.chat_id, status, "⚠️ Could not fetch this video").await;
                return;
            }
        };

        // Share-sheet TikTok links are opaque shorteners; expand first so
        // the tool sees the canonical URL.
        let url = match link.platform {
            Platform::TikTok => resolve_short(&link.url).await,
            _ => link.url.clone(),
        };

        let outcome = match link.platform {
            Platform::Instagram => fetch::fetch_instagram(&self.ctx, &url, workspace.path()).await,
            Platform::TikTok => fetch::fetch_tiktok(&self.ctx, &url, workspace.path()).await,
            Platform::YoutubeShorts => fetch::fetch_youtube(&self.ctx, &url, workspace.path()).await,
        };

        match outcome {
            Outcome::Video(path) => {
                self.deliver_video(msg, status, &url, link.platform, &path).await;
            }
            Outcome::NoMedia(reason) | Outcome::Declined(reason) => {
                self.notice(msg.chat_id, status, &format!("ℹ️ {reason}")).await;
            }
            Outcome::Failed => {
                self.notice(
                    msg.chat_id,
                    status,
                    "⚠️ Could not fetch this video, the admin has been notified",
                )
                .await;
                self.reporter
                    .report(
                        "all acquisition attempts failed",
                        &exchange_details(msg, &url),
                        &link.platform.to_string(),
                    )
                    .await;
            }
        }
    }

    async fn deliver_video(
        &self,
        msg: &Incoming,
        status: i32,
        url: &str,
        platform: Platform,
        path: &Path,
    ) {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size > self.size_limit {
            self.notice(msg.chat_id, status, &oversize_notice(size, self.size_limit))
                .await;
            return;
        }

        let probe = clip_probe(&self.ctx.runner, &self.ffprobe, path).await;
        let caption = sender_caption(msg.user_id, &msg.user_name);

        if let Err(e) = self.chat.send_video(msg.chat_id, path, &caption, probe).await {
            warn!(chat = msg.chat_id, error = %e, "video upload failed");
            self.notice(
                msg.chat_id,
                status,
                "⚠️ Could not send this video, the admin has been notified",
            )
            .await;
            self.reporter
                .report(
                    &format!("video upload failed: {e}"),
                    &exchange_details(msg, url),
                    &platform.to_string(),
                )
                .await;
            return;
        }

        info!(chat = msg.chat_id, size, "video delivered, tidying trigger messages");
        if let Err(e) = self.chat.delete_message(msg.chat_id, msg.message_id).await {
            warn!(chat = msg.chat_id, error = %e, "could not delete trigger message");
        }
        if let Err(e) = self.chat.delete_message(msg.chat_id, status).await {
            warn!(chat = msg.chat_id, error = %e, "could not delete status message");
        }
    }

    /// Full exchange for a /grabmp3 command.
    pub async fn handle_audio_command(&self, msg: &Incoming, text: &str) {
        let Some(url) = audio::command_url(text) else {
            self.reply(msg, "Usage: /grabmp3 <YouTube URL>").await;
            return;
        };
        if !audio::is_supported(&url) {
            self.reply(msg, "ℹ️ Only YouTube links are supported for audio extraction")
                .await;
            return;
        }

        info!(chat = msg.chat_id, url, "handling audio command");
        let status = match self
            .chat
            .send_text(msg.chat_id, Some(msg.message_id), "⏳ Extracting audio...", true)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(chat = msg.chat_id, error = %e, "could not post status message");
                return;
            }
        };

        let workspace = match Workspace::create(
            self.work_dir
                .join(format!("mp3_{}_{}", msg.chat_id, msg.message_id)),
        ) {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, "could not create workspace");
                self.notice(msg.chat_id, status, "⚠️ Could not extract the audio").await;
                return;
            }
        };

        let result = audio::grab_mp3(
            &self.ctx.runner,
            &self.ctx.ytdlp,
            &url,
            workspace.path(),
            self.size_limit,
        )
        .await;

        match result {
            Ok(path) => {
                let probe = audio_probe(&self.ctx.runner, &self.ffprobe, &path).await;
                let title = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string());
                let caption = audio_caption(msg, &url, probe.as_ref());
                let send = self
                    .chat
                    .send_audio(
                        msg.chat_id,
                        &path,
                        &caption,
                        probe.as_ref().map(|p| p.duration),
                        title.as_deref(),
                    )
                    .await;
                match send {
                    Ok(()) => {
                        if let Err(e) =
                            self.chat.delete_message(msg.chat_id, msg.message_id).await
                        {
                            warn!(chat = msg.chat_id, error = %e, "could not delete trigger message");
                        }
                        if let Err(e) = self.chat.delete_message(msg.chat_id, status).await {
                            warn!(chat = msg.chat_id, error = %e, "could not delete status message");
                        }
                    }
                    Err(e) => {
                        warn!(chat = msg.chat_id, error = %e, "audio upload failed");
                        self.notice(
                            msg.chat_id,
                            status,
                            "⚠️ Could not send the audio, the admin has been notified",
                        )
                        .await;
                        self.reporter
                            .report(
                                &format!("audio upload failed: {e}"),
                                &exchange_details(msg, &url),
                                "mp3",
                            )
                            .await;
                    }
                }
            }
            Err(FetchError::Oversize) => {
                self.notice(
                    msg.chat_id,
                    status,
                    &format!(
                        "ℹ️ The audio track exceeds the {} MB limit",
                        self.size_limit / (1024 * 1024)
                    ),
                )
                .await;
            }
            Err(e) => {
                warn!(chat = msg.chat_id, error = %e, "audio extraction failed");
                self.notice(
                    msg.chat_id,
                    status,
                    "⚠️ Could not extract the audio, the admin has been notified",
                )
                .await;
                self.reporter
                    .report(
                        &format!("audio extraction failed: {e}"),
                        &exchange_details(msg, &url),
                        "mp3",
                    )
                    .await;
            }
        }
    }

    /// Edits the status message in place; falls back to a fresh message if
    /// the edit is rejected.
    async fn notice(&self, chat_id: i64, status: i32, text: &str) {
        if let Err(e) = self.chat.edit_text(chat_id, status, text).await {
            warn!(chat = chat_id, error = %e, "could not edit status message");
            let _ = self.chat.send_text(chat_id, None, text, true).await;
        }
    }

    async fn reply(&self, msg: &Incoming, text: &str) {
        if let Err(e) = self
            .chat
            .send_text(msg.chat_id, Some(msg.message_id), text, true)
            .await
        {
            warn!(chat = msg.chat_id, error = %e, "could not send reply");
        }
    }
}

fn exchange_details(msg: &Incoming, url: &str) -> String {
    format!(
        "URL: {url}\nChat: {}\nMessage: {}\nUser: {} ({})",
        msg.chat_id, msg.message_id, msg.user_name, msg.user_id
    )
}

fn sender_caption(user_id: u64, user_name: &str) -> String {
    format!(
        "Sent by <a href=\"tg://user?id={user_id}\">{}</a>",
        escape_html(user_name)
    )
}

fn audio_caption(msg: &Incoming, url: &str, probe: Option<&AudioProbe>) -> String {
    let mut caption = sender_caption(msg.user_id, &msg.user_name);
    if let Some(probe) = probe {
        caption.push_str(&format!(
            "\n⏱ {}:{:02} | 💾 {:.1} MB",
            probe.duration / 60,
            probe.duration % 60,
            probe.size_mb
        ));
    }
    caption.push_str(&format!("\n🔗 <a href=\"{url}\">Source</a>"));
    caption
}

fn oversize_notice(size: u64, limit: u64) -> String {
    format!(
        "ℹ️ The video is too large to send ({} MB, over the {} MB limit)",
        size / (1024 * 1024),
        limit / (1024 * 1024)
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Per-exchange scratch directory, removed with everything in it on drop.
struct Workspace {
    path: PathBuf,
}

impl Workspace {
    fn create(path: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove workspace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn workspace_removes_itself_with_contents() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("insta_1_2");
        {
            let ws = Workspace::create(root.clone()).unwrap();
            std::fs::write(ws.path().join("clip.mp4"), b"x").unwrap();
            assert!(root.exists());
        }
        assert!(!root.exists());
    }

    #[test]
    fn caption_escapes_markup_in_names() {
        let caption = sender_caption(42, "Eve <script>");
        assert!(caption.contains("tg://user?id=42"));
        assert!(caption.contains("Eve &lt;script&gt;"));
        assert!(!caption.contains("<script>"));
    }

    #[test]
    fn audio_caption_carries_source_and_probe_details() {
        let msg = Incoming {
            chat_id: 1,
            message_id: 2,
            user_id: 3,
            user_name: "sam".into(),
        };
        let probe = AudioProbe {
            duration: 205,
            size_mb: 4.2,
        };
        let caption = audio_caption(&msg, "https://youtu.be/abc", Some(&probe));
        assert!(caption.contains("3:25"));
        assert!(caption.contains("4.2 MB"));
        assert!(caption.contains("https://youtu.be/abc"));

        let bare = audio_caption(&msg, "https://youtu.be/abc", None);
        assert!(bare.contains("https://youtu.be/abc"));
        assert!(!bare.contains("MB"));
    }

    #[test]
    fn oversize_notice_states_size_and_limit() {
        let notice = oversize_notice(60 * 1024 * 1024, 49 * 1024 * 1024);
        assert!(notice.contains("60 MB, over the 49 MB limit"));
    }

    #[test]
    fn exchange_details_carry_everything_the_admin_needs() {
        let msg = Incoming {
            chat_id: -100123,
            message_id: 55,
            user_id: 7,
            user_name: "sam".into(),
        };
        let details = exchange_details(&msg, "https://example.com/v");
        assert!(details.contains("https://example.com/v"));
        assert!(details.contains("-100123"));
        assert!(details.contains("55"));
        assert!(details.contains("sam (7)"));
    }
}

#[cfg(all(test, unix))]
mod exchange_tests {
    use super::*;
    use crate::chat::ChatError;
    use crate::cookies::CookiePool;
    use crate::probe::ClipProbe;
    use async_trait::async_trait;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct RecordingChat {
        events: Mutex<Vec<String>>,
        next_id: AtomicI32,
    }

    impl RecordingChat {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                next_id: AtomicI32::new(100),
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[async_trait]
    impl ChatSink for RecordingChat {
        async fn send_text(
            &self,
            _chat: i64,
            _reply_to: Option<i32>,
            text: &str,
            _silent: bool,
        ) -> Result<i32, ChatError> {
            self.push(format!("text:{text}"));
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn edit_text(&self, _chat: i64, _message: i32, text: &str) -> Result<(), ChatError> {
            self.push(format!("edit:{text}"));
            Ok(())
        }

        async fn delete_message(&self, _chat: i64, message: i32) -> Result<(), ChatError> {
            self.push(format!("delete:{message}"));
            Ok(())
        }

        async fn send_video(
            &self,
            _chat: i64,
            _path: &Path,
            caption: &str,
            _probe: Option<ClipProbe>,
        ) -> Result<(), ChatError> {
            self.push(format!("video:{caption}"));
            Ok(())
        }

        async fn send_audio(
            &self,
            _chat: i64,
            _path: &Path,
            caption: &str,
            _duration: Option<u32>,
            _title: Option<&str>,
        ) -> Result<(), ChatError> {
            self.push(format!("audio:{caption}"));
            Ok(())
        }

        async fn send_document(
            &self,
            _chat: i64,
            _path: &Path,
            _caption: &str,
            file_name: &str,
        ) -> Result<(), ChatError> {
            self.push(format!("document:{file_name}"));
            Ok(())
        }
    }

    struct RecordingReporter {
        platforms: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Reporter for RecordingReporter {
        async fn report(&self, _summary: &str, _details: &str, platform: &str) {
            self.platforms.lock().unwrap().push(platform.to_string());
        }
    }

    fn fake_tool(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().to_string()
    }

    fn relay_with(
        tool: String,
        chat: Arc<RecordingChat>,
        reporter: Arc<RecordingReporter>,
        dir: &Path,
    ) -> Relay {
        let cookie_dir = dir.join("cookies");
        std::fs::create_dir_all(&cookie_dir).unwrap();
        let reporter_dyn: Arc<dyn Reporter> = reporter;
        let ctx = FetchContext {
            runner: crate::runner::ToolRunner::new(),
            ytdlp: tool,
            size_limit: 49 * 1024 * 1024,
            insta_cookies: Arc::new(CookiePool::load(&cookie_dir, "cookies", "Instagram")),
            tiktok_cookies: Arc::new(CookiePool::load(&cookie_dir, "cookie_tiktok", "TikTok")),
            reporter: Arc::clone(&reporter_dyn),
        };
        Relay::new(
            chat,
            ctx,
            reporter_dyn,
            dir.join("work"),
            "ffprobe-not-installed".into(),
            49 * 1024 * 1024,
            vec![-1],
        )
    }

    #[tokio::test]
    async fn delivered_audio_removes_trigger_and_status_messages() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path().join("work").join("mp3_-1_7");
        let body = format!("printf abc > '{}/Track.mp3'", workspace.display());
        let tool = fake_tool(dir.path(), &body);

        let chat = Arc::new(RecordingChat::new());
        let reporter = Arc::new(RecordingReporter {
            platforms: Mutex::new(Vec::new()),
        });
        let relay = relay_with(tool, Arc::clone(&chat), reporter, dir.path());

        let msg = Incoming {
            chat_id: -1,
            message_id: 7,
            user_id: 3,
            user_name: "sam".into(),
        };
        relay
            .handle_audio_command(&msg, "/grabmp3 https://youtu.be/abc")
            .await;

        let events = chat.events();
        assert!(
            events.iter().any(|e| e.starts_with("audio:") && e.contains("https://youtu.be/abc")),
            "events: {events:?}"
        );
        // Trigger message first, then the status message it spawned.
        assert!(events.contains(&"delete:7".to_string()), "events: {events:?}");
        assert!(events.contains(&"delete:100".to_string()), "events: {events:?}");
    }

    #[tokio::test]
    async fn failed_exchange_reports_with_the_display_label() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(dir.path(), "exit 1");

        let chat = Arc::new(RecordingChat::new());
        let reporter = Arc::new(RecordingReporter {
            platforms: Mutex::new(Vec::new()),
        });
        let relay = relay_with(tool, Arc::clone(&chat), Arc::clone(&reporter), dir.path());

        let msg = Incoming {
            chat_id: -1,
            message_id: 9,
            user_id: 3,
            user_name: "sam".into(),
        };
        let link = RecognizedLink {
            platform: Platform::YoutubeShorts,
            url: "https://www.youtube.com/shorts/abc".into(),
        };
        relay.handle_link(&msg, link).await;

        assert_eq!(
            reporter.platforms.lock().unwrap().as_slice(),
            ["YouTube Shorts"]
        );
        let events = chat.events();
        assert!(
            events.iter().any(|e| e.starts_with("edit:") && e.contains("admin has been notified")),
            "events: {events:?}"
        );
    }
}
