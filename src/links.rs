use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Instagram,
    TikTok,
    YoutubeShorts,
}

impl Platform {
    /// Short tag used in workspace directory names.
    pub fn slug(self) -> &'static str {
        match self {
            Platform::Instagram => "insta",
            Platform::TikTok => "tiktok",
            Platform::YoutubeShorts => "youtube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Instagram => "Instagram",
            Platform::TikTok => "TikTok",
            Platform::YoutubeShorts => "YouTube Shorts",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizedLink {
    pub platform: Platform,
    pub url: String,
}

static INSTAGRAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://www\.instagram\.com/(p|reel)/[a-zA-Z0-9_-]+/?").unwrap()
});

static TIKTOK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.|vm\.)?tiktok\.com/(@[\w\.-]+/video/\d+|[\w-]+)").unwrap()
});

static SHORTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?youtube\.com/shorts/[a-zA-Z0-9_-]+").unwrap()
});

/// Classifies message text into a known platform link. Pure function with a
/// fixed priority: Instagram, then TikTok, then YouTube Shorts; the first
/// match wins.
pub fn classify(text: &str) -> Option<RecognizedLink> {
    if let Some(m) = INSTAGRAM_RE.find(text) {
        return Some(RecognizedLink {
            platform: Platform::Instagram,
            url: m.as_str().to_string(),
        });
    }
    if let Some(m) = TIKTOK_RE.find(text) {
        return Some(RecognizedLink {
            platform: Platform::TikTok,
            url: m.as_str().to_string(),
        });
    }
    if let Some(m) = SHORTS_RE.find(text) {
        return Some(RecognizedLink {
            platform: Platform::YoutubeShorts,
            url: m.as_str().to_string(),
        });
    }
    None
}

/// Expands a `vm.tiktok.com` short link to its canonical form by following
/// redirects with one bounded HEAD request. Resolution failure is non-fatal:
/// the original URL is returned and processing continues.
pub async fn resolve_short(url: &str) -> String {
    let is_short = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == "vm.tiktok.com"))
        .unwrap_or(false);
    if !is_short {
        return url.to_string();
    }

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
    {
        Ok(client) => client,
        Err(_) => return url.to_string(),
    };

    match client.head(url).send().await {
        Ok(response) => response.url().to_string(),
        Err(e) => {
            warn!(url, error = %e, "short link resolution failed, using as-is");
            url.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_instagram_posts_and_reels() {
        let link = classify("look https://www.instagram.com/reel/Cxy_12-ab/ wow").unwrap();
        assert_eq!(link.platform, Platform::Instagram);
        assert_eq!(link.url, "https://www.instagram.com/reel/Cxy_12-ab/");

        let link = classify("https://www.instagram.com/p/ABC123/").unwrap();
        assert_eq!(link.platform, Platform::Instagram);
    }

    #[test]
    fn recognizes_tiktok_long_and_short_forms() {
        let link = classify("https://www.tiktok.com/@some.user/video/7123456789012345678").unwrap();
        assert_eq!(link.platform, Platform::TikTok);

        let link = classify("check https://vm.tiktok.com/ZMabcdef/").unwrap();
        assert_eq!(link.platform, Platform::TikTok);
        assert_eq!(link.url, "https://vm.tiktok.com/ZMabcdef");
    }

    #[test]
    fn recognizes_youtube_shorts() {
        let link = classify("https://youtube.com/shorts/dQw4w9WgXcQ").unwrap();
        assert_eq!(link.platform, Platform::YoutubeShorts);
    }

    #[test]
    fn instagram_wins_over_later_platforms() {
        let text = "https://www.tiktok.com/@u/video/1 https://www.instagram.com/p/xyz/";
        assert_eq!(classify(text).unwrap().platform, Platform::Instagram);
    }

    #[test]
    fn classification_is_idempotent() {
        let text = "https://www.youtube.com/shorts/abc_DEF-123";
        assert_eq!(classify(text), classify(text));
    }

    #[test]
    fn plain_text_yields_none() {
        assert!(classify("no links here, just chatter").is_none());
        assert!(classify("https://example.com/watch?v=abc").is_none());
    }

    #[tokio::test]
    async fn non_short_urls_skip_resolution() {
        let url = "https://www.tiktok.com/@u/video/123";
        assert_eq!(resolve_short(url).await, url);
    }
}
