use crate::error::FetchError;
use serde::Deserialize;
use std::collections::BTreeMap;

/// One downloadable encoding as reported by `yt-dlp --dump-json`.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
}

impl MediaFormat {
    pub fn has_video(&self) -> bool {
        matches!(self.vcodec.as_deref(), Some(codec) if codec != "none")
    }

    pub fn has_audio(&self) -> bool {
        matches!(self.acodec.as_deref(), Some(codec) if codec != "none")
    }

    /// Video and audio in one container; what can be delivered as-is.
    pub fn is_combined(&self) -> bool {
        self.has_video() && self.has_audio()
    }

    /// Declared byte size; `filesize_approx` stands in when the exact size
    /// is unknown.
    pub fn size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }

    fn is_mp4(&self) -> bool {
        self.ext.eq_ignore_ascii_case("mp4")
    }
}

/// The slice of a `--dump-json` document the strategies care about.
#[derive(Debug, Default, Deserialize)]
pub struct ClipInfo {
    #[serde(default)]
    pub formats: Vec<MediaFormat>,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl ClipInfo {
    /// Parses metadata stdout, discarding descriptors that carry neither a
    /// video nor an audio codec (those are storyboard/junk entries).
    pub fn parse(stdout: &str) -> Result<Self, FetchError> {
        let mut info: ClipInfo = serde_json::from_str(stdout)?;
        info.formats.retain(|f| f.has_video() || f.has_audio());
        Ok(info)
    }

    pub fn has_video_format(&self) -> bool {
        self.formats.iter().any(MediaFormat::has_video)
    }
}

/// Best combined format with a known size strictly under `limit`: maximum by
/// (height, bitrate). Formats without a declared size are not trusted here.
pub fn best_under_limit(formats: &[MediaFormat], limit: u64) -> Result<&MediaFormat, FetchError> {
    formats
        .iter()
        .filter(|f| f.is_combined())
        .filter(|f| f.size().map_or(false, |size| size < limit))
        .max_by(|a, b| {
            a.height
                .unwrap_or(0)
                .cmp(&b.height.unwrap_or(0))
                .then(a.tbr.unwrap_or(0.0).total_cmp(&b.tbr.unwrap_or(0.0)))
        })
        .ok_or(FetchError::NoSuitableFormat)
}

/// Combined formats in the order they should be attempted: resolutions at or
/// above 720p ascending (cheapest acceptable quality first), then everything
/// below 720p descending (least bad fallback first). Within one resolution,
/// mp4 beats other containers, then higher bitrate wins.
pub fn tiered_plan(formats: &[MediaFormat]) -> Vec<MediaFormat> {
    let mut groups: BTreeMap<u32, Vec<MediaFormat>> = BTreeMap::new();
    for format in formats.iter().filter(|f| f.is_combined()) {
        groups
            .entry(format.height.unwrap_or(0))
            .or_default()
            .push(format.clone());
    }

    // BTreeMap keys are already ascending
    let mut order: Vec<u32> = groups.keys().copied().filter(|&h| h >= 720).collect();
    let mut low: Vec<u32> = groups.keys().copied().filter(|&h| h < 720).collect();
    low.reverse();
    order.extend(low);

    let mut plan = Vec::new();
    for height in order {
        let mut group = groups.remove(&height).unwrap_or_default();
        group.sort_by(|a, b| {
            b.is_mp4()
                .cmp(&a.is_mp4())
                .then(b.tbr.unwrap_or(0.0).total_cmp(&a.tbr.unwrap_or(0.0)))
        });
        plan.extend(group);
    }
    plan
}

/// yt-dlp selector expressions tried after every concrete combined format
/// failed, in decreasing strictness. Selectors containing `+` ask yt-dlp to
/// download separate video/audio streams and merge them.
pub const SMART_SELECTORS: &[&str] = &[
    "bestvideo[height>=720]+bestaudio/best[height>=720]",
    "bestvideo+bestaudio/best",
    "bestvideo[height>=720][ext=mp4]+bestaudio[ext=m4a]/bestvideo[height>=720]+bestaudio",
    "bestvideo[ext=mp4]+bestaudio[ext=m4a]/bestvideo+bestaudio",
    "best[height>=720][ext=mp4]/best[ext=mp4]",
    "best[height>=720]/best",
];

/// Maximally permissive selectors, the very last tier.
pub const LAST_RESORT_SELECTORS: &[&str] = &["best", "worst"];

#[cfg(test)]
mod tests {
    use super::*;

    fn combined(id: &str, height: u32, size: Option<u64>, tbr: f64, ext: &str) -> MediaFormat {
        MediaFormat {
            format_id: id.into(),
            ext: ext.into(),
            vcodec: Some("h264".into()),
            acodec: Some("aac".into()),
            height: Some(height),
            tbr: Some(tbr),
            filesize: size,
            filesize_approx: None,
        }
    }

    const MB: u64 = 1024 * 1024;

    #[test]
    fn picks_largest_under_ceiling_never_over() {
        let formats = vec![
            combined("a", 480, Some(10 * MB), 500.0, "mp4"),
            combined("b", 720, Some(60 * MB), 900.0, "mp4"),
            combined("c", 360, Some(5 * MB), 300.0, "mp4"),
        ];
        let best = best_under_limit(&formats, 49 * MB).unwrap();
        assert_eq!(best.format_id, "a");
    }

    #[test]
    fn unknown_or_oversize_formats_yield_no_suitable_format() {
        let formats = vec![
            combined("big", 1080, Some(120 * MB), 2000.0, "mp4"),
            combined("unsized", 480, None, 500.0, "mp4"),
        ];
        assert!(matches!(
            best_under_limit(&formats, 49 * MB),
            Err(FetchError::NoSuitableFormat)
        ));
    }

    #[test]
    fn video_only_formats_are_not_candidates() {
        let mut silent = combined("v", 480, Some(MB), 500.0, "mp4");
        silent.acodec = Some("none".into());
        assert!(best_under_limit(&[silent], 49 * MB).is_err());
    }

    #[test]
    fn ties_break_on_bitrate() {
        let formats = vec![
            combined("slow", 480, Some(10 * MB), 400.0, "mp4"),
            combined("fast", 480, Some(12 * MB), 800.0, "mp4"),
        ];
        assert_eq!(best_under_limit(&formats, 49 * MB).unwrap().format_id, "fast");
    }

    #[test]
    fn tiered_prefers_lowest_good_resolution_first() {
        let formats = vec![
            combined("a", 1080, None, 2000.0, "mp4"),
            combined("b", 720, None, 1000.0, "mp4"),
            combined("c", 480, None, 600.0, "mp4"),
            combined("d", 360, None, 300.0, "mp4"),
        ];
        let plan = tiered_plan(&formats);
        let ids: Vec<&str> = plan.iter().map(|f| f.format_id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c", "d"]);
    }

    #[test]
    fn tiered_falls_back_to_best_low_resolution() {
        // Nothing reaches 720p: highest available goes first.
        let formats = vec![
            combined("low", 360, None, 300.0, "mp4"),
            combined("mid", 480, None, 600.0, "mp4"),
        ];
        let plan = tiered_plan(&formats);
        assert_eq!(plan[0].format_id, "mid");
        assert_eq!(plan[1].format_id, "low");
    }

    #[test]
    fn tiered_prefers_mp4_then_bitrate_within_a_resolution() {
        let formats = vec![
            combined("webm-hi", 720, None, 1500.0, "webm"),
            combined("mp4-lo", 720, None, 800.0, "mp4"),
            combined("mp4-hi", 720, None, 1200.0, "mp4"),
        ];
        let plan = tiered_plan(&formats);
        let ids: Vec<&str> = plan.iter().map(|f| f.format_id.as_str()).collect();
        assert_eq!(ids, ["mp4-hi", "mp4-lo", "webm-hi"]);
    }

    #[test]
    fn parse_discards_codecless_descriptors() {
        let json = r#"{
            "duration": 12.5,
            "formats": [
                {"format_id": "sb0", "ext": "mhtml", "vcodec": "none", "acodec": "none"},
                {"format_id": "v", "ext": "mp4", "vcodec": "h264", "acodec": "aac", "height": 720}
            ]
        }"#;
        let info = ClipInfo::parse(json).unwrap();
        assert_eq!(info.formats.len(), 1);
        assert_eq!(info.formats[0].format_id, "v");
        assert!(info.has_video_format());
        assert_eq!(info.duration, Some(12.5));
    }

    #[test]
    fn parse_accepts_missing_fields() {
        let info = ClipInfo::parse("{}").unwrap();
        assert!(info.formats.is_empty());
        assert!(!info.has_video_format());
    }
}
