use crate::runner::ToolRunner;
use std::path::Path;
use tracing::{info, warn};

/// Stream geometry for "smart" video delivery. Any probe failure degrades to
/// sending without enriched metadata, never to blocking the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipProbe {
    pub width: u32,
    pub height: u32,
    pub duration: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioProbe {
    pub duration: u32,
    pub size_mb: f64,
}

pub async fn clip_probe(runner: &ToolRunner, ffprobe: &str, path: &Path) -> Option<ClipProbe> {
    let args: Vec<String> = [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height,duration",
        "-of",
        "json",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain([path.to_string_lossy().to_string()])
    .collect();

    match runner.run(ffprobe, &args, 60, false).await {
        Ok((stdout, _)) => {
            let probe = parse_clip_probe(&stdout);
            if let Some(p) = probe {
                info!(width = p.width, height = p.height, duration = p.duration, "probed video");
            }
            probe
        }
        Err(e) => {
            warn!(error = %e, "ffprobe failed, sending without metadata");
            None
        }
    }
}

pub async fn audio_probe(runner: &ToolRunner, ffprobe: &str, path: &Path) -> Option<AudioProbe> {
    let args: Vec<String> = [
        "-v",
        "error",
        "-show_entries",
        "format=duration,size",
        "-of",
        "json",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain([path.to_string_lossy().to_string()])
    .collect();

    match runner.run(ffprobe, &args, 30, false).await {
        Ok((stdout, _)) => parse_audio_probe(&stdout),
        Err(e) => {
            warn!(error = %e, "ffprobe failed on audio file");
            None
        }
    }
}

fn parse_clip_probe(stdout: &str) -> Option<ClipProbe> {
    let value: serde_json::Value = serde_json::from_str(stdout).ok()?;
    let stream = value.get("streams")?.as_array()?.first()?;
    let width = stream.get("width")?.as_u64()? as u32;
    let height = stream.get("height")?.as_u64()? as u32;
    // ffprobe reports duration as a decimal string
    let duration = stream
        .get("duration")
        .and_then(|d| d.as_str())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0) as u32;
    Some(ClipProbe {
        width,
        height,
        duration,
    })
}

fn parse_audio_probe(stdout: &str) -> Option<AudioProbe> {
    let value: serde_json::Value = serde_json::from_str(stdout).ok()?;
    let format = value.get("format")?;
    let duration = format
        .get("duration")
        .and_then(|d| d.as_str())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0) as u32;
    let size = format
        .get("size")
        .and_then(|s| s.as_str())
        .and_then(|s| s.parse::<u64>().ok())?;
    Some(AudioProbe {
        duration,
        size_mb: (size as f64 / 1024.0 / 1024.0 * 10.0).round() / 10.0,
    })
}
