//! Audio extraction for the /grabmp3 command.
//!
//! Unlike the link watchers this path is explicit: the user asks for an
//! mp3 of a YouTube URL. The track keeps its own title as the file name so
//! the upload lands with sensible metadata.

use crate::error::FetchError;
use crate::runner::ToolRunner;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use regex::Regex;
use tracing::info;

const EXTRACT_TIMEOUT: u64 = 300;

static QUOTED_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(https?://[^"\s]+)""#).unwrap());
static SINGLE_QUOTED_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(https?://[^'\s]+)'").unwrap());
static BARE_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(https?://\S+)").unwrap());

/// Pulls the URL out of a `/grabmp3 <url>` command, tolerating quoting.
pub fn command_url(text: &str) -> Option<String> {
    let rest = text.strip_prefix("/grabmp3")?.trim();
    if rest.is_empty() {
        return None;
    }
    for pattern in [&*QUOTED_URL, &*SINGLE_QUOTED_URL, &*BARE_URL] {
        if let Some(caps) = pattern.captures(rest) {
            return Some(caps[1].to_string());
        }
    }
    None
}

/// Only plain YouTube watch pages, shorts and youtu.be links are accepted.
pub fn is_supported(url: &str) -> bool {
    url.contains("youtube.com/watch?v=")
        || url.contains("youtube.com/shorts/")
        || url.contains("youtu.be/")
}

/// Extracts the best-quality mp3 into `workspace` and returns its path.
pub async fn grab_mp3(
    runner: &ToolRunner,
    ytdlp: &str,
    url: &str,
    workspace: &Path,
    size_limit: u64,
) -> Result<PathBuf, FetchError> {
    info!(url, "extracting audio track");

    let args: Vec<String> = vec![
        url.into(),
        "--extract-audio".into(),
        "--audio-format".into(),
        "mp3".into(),
        "--audio-quality".into(),
        "0".into(),
        "--embed-metadata".into(),
        "--add-metadata".into(),
        "--playlist-items".into(),
        "1".into(),
        "-o".into(),
        workspace.join("%(title)s.%(ext)s").to_string_lossy().to_string(),
        "--no-warnings".into(),
    ];
    runner.run(ytdlp, &args, EXTRACT_TIMEOUT, false).await?;

    let path = find_mp3(workspace).ok_or_else(|| FetchError::Tool("no mp3 produced".into()))?;
    let size = std::fs::metadata(&path)?.len();
    if size > size_limit {
        let _ = std::fs::remove_file(&path);
        return Err(FetchError::Oversize);
    }
    info!(path = %path.display(), size, "audio track ready");
    Ok(path)
}

fn find_mp3(workspace: &Path) -> Option<PathBuf> {
    std::fs::read_dir(workspace)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|ext| ext == "mp3"))
}
