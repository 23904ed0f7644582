//! Instagram strategy: cookie-mandatory, with a cheap content pre-check.
//!
//! Reels and posts hide everything behind authentication, so every attempt
//! runs under a rotated cookie jar. Before paying for a download the
//! strategy probes the post's metadata; a photo-only post is a terminal
//! mismatch, not a credential failure, and must not burn further cookies.

use super::{output_template, FetchContext, Outcome, DESKTOP_UA};
use crate::cookies::CookieFile;
use crate::error::FetchError;
use crate::formats::ClipInfo;
use crate::runner::ToolRunner;
use std::path::Path;
use tracing::{error, info, warn};

const NO_VIDEO_MARKER: &str = "No video formats found!";
const PHOTOS_ONLY: &str = "This post contains only photos, there is no video";

/// Preferred two-tier selector: capped 720p mp4, with progressively looser
/// fallbacks inside the same invocation.
const FORMAT_SELECTOR: &str = "best[height<=720][ext=mp4]/best[ext=mp4]/best[height<=720]/best";

const PROBE_TIMEOUT: u64 = 30;
const DOWNLOAD_TIMEOUT: u64 = 180;

pub async fn fetch(ctx: &FetchContext, url: &str, workspace: &Path) -> Outcome {
    info!(url, "starting instagram fetch");

    let runner = ctx.runner.clone();
    let tool = ctx.ytdlp.clone();
    let result = ctx
        .insta_cookies
        .try_each(ctx.reporter.as_ref(), url, |cookie| {
            let runner = runner.clone();
            let tool = tool.clone();
            let url = url.to_string();
            let workspace = workspace.to_path_buf();
            async move { grab_with_cookie(&runner, &tool, &cookie, &url, &workspace).await }
        })
        .await;

    match result {
        Ok(path) => {
            info!(url, path = %path.display(), "instagram video downloaded");
            Outcome::Video(path)
        }
        Err(FetchError::ContentMismatch(reason)) => {
            info!(url, "instagram post has no video");
            Outcome::NoMedia(reason)
        }
        Err(e) => {
            error!(url, error = %e, "instagram fetch failed");
            Outcome::Failed
        }
    }
}

async fn grab_with_cookie(
    runner: &ToolRunner,
    tool: &str,
    cookie: &CookieFile,
    url: &str,
    workspace: &Path,
) -> Result<std::path::PathBuf, FetchError> {
    info!(cookie = %cookie.name, "checking instagram post content");

    let probe_args: Vec<String> = vec![
        "--dump-json".into(),
        "--no-warnings".into(),
        "--playlist-items".into(),
        "1".into(),
        "--cookies".into(),
        cookie.path.to_string_lossy().to_string(),
        "--add-header".into(),
        format!("User-Agent: {DESKTOP_UA}"),
        url.into(),
    ];
    let (stdout, stderr) = runner.run(tool, &probe_args, PROBE_TIMEOUT, true).await?;

    // The extractor announces image-only posts on stderr even with exit 0.
    if stderr.contains(NO_VIDEO_MARKER) {
        return Err(FetchError::ContentMismatch(PHOTOS_ONLY.into()));
    }
    if stdout.trim().is_empty() {
        return Err(FetchError::Tool("empty metadata response".into()));
    }

    let info = ClipInfo::parse(&stdout)?;
    // Second, independent check on the structured metadata.
    if !info.has_video_format() && info.duration.unwrap_or(0.0) <= 0.0 {
        return Err(FetchError::ContentMismatch(PHOTOS_ONLY.into()));
    }

    info!("instagram post has video, downloading");
    runner
        .run(tool, &download_args(url, cookie, workspace, FORMAT_SELECTOR), DOWNLOAD_TIMEOUT, false)
        .await?;
    if let Some(path) = super::find_output(workspace, Some("mp4")) {
        return Ok(path);
    }

    // Plan B: any best available
    warn!("capped-quality download produced nothing, retrying with best");
    runner
        .run(tool, &download_args(url, cookie, workspace, "best"), DOWNLOAD_TIMEOUT, false)
        .await?;
    super::find_output(workspace, Some("mp4"))
        .ok_or_else(|| FetchError::Tool("no video file produced".into()))
}

fn download_args(url: &str, cookie: &CookieFile, workspace: &Path, selector: &str) -> Vec<String> {
    vec![
        url.into(),
        "--playlist-items".into(),
        "1".into(),
        "-f".into(),
        selector.into(),
        "-o".into(),
        output_template(workspace),
        "--no-warnings".into(),
        "--cookies".into(),
        cookie.path.to_string_lossy().to_string(),
        "--add-header".into(),
        format!("User-Agent: {DESKTOP_UA}"),
    ]
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cookies::CookiePool;
    use crate::report::Reporter;
    use async_trait::async_trait;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct CountingReporter(AtomicUsize);

    #[async_trait]
    impl Reporter for CountingReporter {
        async fn report(&self, _s: &str, _d: &str, _p: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Installs a fake yt-dlp that runs the given shell body.
    fn fake_tool(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().to_string()
    }

    fn context_with(tool: String, cookies: usize, reporter: Arc<CountingReporter>, dir: &Path) -> FetchContext {
        let cookie_dir = dir.join("cookies");
        std::fs::create_dir_all(&cookie_dir).unwrap();
        for i in 0..cookies {
            std::fs::write(cookie_dir.join(format!("cookies{i}.txt")), "#").unwrap();
        }
        FetchContext {
            runner: ToolRunner::new(),
            ytdlp: tool,
            size_limit: 49 * 1024 * 1024,
            insta_cookies: Arc::new(CookiePool::load(&cookie_dir, "cookies", "Instagram")),
            tiktok_cookies: Arc::new(CookiePool::load(&cookie_dir, "cookie_tiktok", "TikTok")),
            reporter,
        }
    }

    #[tokio::test]
    async fn photo_only_post_is_terminal_and_not_reported() {
        let dir = TempDir::new().unwrap();
        // Stderr marker on every call; a real run would stop at the probe.
        let tool = fake_tool(dir.path(), "echo 'No video formats found!' >&2");
        let reporter = Arc::new(CountingReporter(AtomicUsize::new(0)));
        let ctx = context_with(tool, 3, reporter.clone(), dir.path());

        let workspace = dir.path().join("ws");
        std::fs::create_dir_all(&workspace).unwrap();
        let outcome = fetch(&ctx, "https://www.instagram.com/reel/x/", &workspace).await;

        match outcome {
            Outcome::NoMedia(reason) => assert_eq!(reason, PHOTOS_ONLY),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(reporter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn metadata_without_video_or_duration_is_photo_only() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(
            dir.path(),
            r#"echo '{"duration": 0, "formats": [{"format_id":"a","ext":"jpg","vcodec":"none","acodec":"aac"}]}'"#,
        );
        let reporter = Arc::new(CountingReporter(AtomicUsize::new(0)));
        let ctx = context_with(tool, 2, reporter.clone(), dir.path());

        let workspace = dir.path().join("ws");
        std::fs::create_dir_all(&workspace).unwrap();
        let outcome = fetch(&ctx, "https://www.instagram.com/p/x/", &workspace).await;
        assert!(matches!(outcome, Outcome::NoMedia(_)));
        assert_eq!(reporter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn every_cookie_failing_reports_each_attempt_and_fails() {
        let dir = TempDir::new().unwrap();
        // Empty stdout: "empty metadata response" on every cookie.
        let tool = fake_tool(dir.path(), "true");
        let reporter = Arc::new(CountingReporter(AtomicUsize::new(0)));
        let ctx = context_with(tool, 3, reporter.clone(), dir.path());

        let workspace = dir.path().join("ws");
        std::fs::create_dir_all(&workspace).unwrap();
        let outcome = fetch(&ctx, "https://www.instagram.com/reel/x/", &workspace).await;
        assert!(matches!(outcome, Outcome::Failed));
        assert_eq!(reporter.0.load(Ordering::SeqCst), 3);
    }
}
