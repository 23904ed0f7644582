mod instagram;
mod tiktok;
mod youtube;

pub use instagram::fetch as fetch_instagram;
pub use tiktok::fetch as fetch_tiktok;
pub use youtube::fetch as fetch_youtube;

use crate::cookies::CookiePool;
use crate::report::Reporter;
use crate::runner::ToolRunner;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of one acquisition attempt, driving the user-facing reply and the
/// admin-reporting policy.
#[derive(Debug)]
pub enum Outcome {
    /// A media file within the size ceiling was produced.
    Video(PathBuf),
    /// The source has no video to fetch (photo-only post). Terminal, shown
    /// to the user, never escalated.
    NoMedia(String),
    /// A declared condition with specific user-facing text (size ceiling,
    /// missing cookies, plain download refusal). Not escalated.
    Declined(String),
    /// Mechanism failure after exhausting every credential and tier.
    /// Escalated to the admin channel.
    Failed,
}

/// Shared dependencies of every strategy, passed explicitly instead of
/// living in ambient globals.
#[derive(Clone)]
pub struct FetchContext {
    pub runner: ToolRunner,
    pub ytdlp: String,
    pub size_limit: u64,
    pub insta_cookies: Arc<CookiePool>,
    pub tiktok_cookies: Arc<CookiePool>,
    pub reporter: Arc<dyn Reporter>,
}

pub(crate) const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

/// Output template stem shared by the download commands; the extension is
/// filled in by the tool.
pub(crate) const OUTPUT_STEM: &str = "clip";

pub(crate) fn output_template(workspace: &Path) -> String {
    workspace
        .join(format!("{OUTPUT_STEM}.%(ext)s"))
        .to_string_lossy()
        .to_string()
}

/// First file the download materialized under the shared output stem, with
/// an optional extension constraint.
pub(crate) fn find_output(workspace: &Path, required_ext: Option<&str>) -> Option<PathBuf> {
    let entries = std::fs::read_dir(workspace).ok()?;
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_stem().map_or(false, |stem| stem == OUTPUT_STEM)
                && match required_ext {
                    Some(ext) => path.extension().map_or(false, |e| e == ext),
                    None => true,
                }
        })
        .collect();
    files.sort();
    files.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn finds_templated_output_with_and_without_ext_filter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("other.mp4"), b"x").unwrap();

        assert_eq!(
            find_output(dir.path(), Some("mp4")).unwrap(),
            dir.path().join("clip.mp4")
        );
        assert!(find_output(dir.path(), Some("webm")).is_none());
        assert!(find_output(dir.path(), None).is_some());
    }

    #[test]
    fn missing_output_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(find_output(dir.path(), None).is_none());
    }
}
