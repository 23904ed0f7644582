//! YouTube Shorts strategy: a three-stage descent through format tiers.
//!
//! Shorts metadata is reliable but the CDN is moody, so the strategy works
//! from an explicit plan built out of the declared formats, then falls back
//! to compound selector expressions, then to whatever the tool will give.
//! Every produced file is measured against the ceiling before it counts as
//! a success; an oversized artifact is deleted and the descent continues.

use super::{output_template, FetchContext, Outcome, DESKTOP_UA};
use crate::formats::{tiered_plan, ClipInfo, LAST_RESORT_SELECTORS, SMART_SELECTORS};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const METADATA_ATTEMPTS: u32 = 3;
const METADATA_TIMEOUT: u64 = 60;
const TIER_TIMEOUT: u64 = 120;
const SELECTOR_TIMEOUT: u64 = 180;
const LAST_RESORT_TIMEOUT: u64 = 120;

pub async fn fetch(ctx: &FetchContext, url: &str, workspace: &Path) -> Outcome {
    info!(url, "starting youtube fetch");

    let info = match probe_metadata(ctx, url).await {
        Some(info) => info,
        None => {
            error!(url, "youtube metadata unavailable after retries");
            return Outcome::Failed;
        }
    };

    // Stage 1: explicit format ids from the declared tiers.
    let plan = tiered_plan(&info.formats);
    info!(candidates = plan.len(), "built youtube format plan");
    for format in &plan {
        if format.size().map_or(false, |s| s > ctx.size_limit) {
            continue;
        }
        info!(format_id = %format.format_id, height = ?format.height, "trying planned format");
        if let Some(path) = attempt(ctx, url, workspace, &format.format_id, TIER_TIMEOUT, false).await {
            return Outcome::Video(path);
        }
    }

    // Stage 2: compound selectors, merged into mp4 where streams are split.
    for selector in SMART_SELECTORS {
        info!(selector, "trying selector expression");
        let merge = selector.contains('+');
        if let Some(path) = attempt(ctx, url, workspace, selector, SELECTOR_TIMEOUT, merge).await {
            return Outcome::Video(path);
        }
    }

    // Stage 3: take anything.
    for selector in LAST_RESORT_SELECTORS {
        warn!(selector, "falling back to last-resort selector");
        if let Some(path) = attempt(ctx, url, workspace, selector, LAST_RESORT_TIMEOUT, false).await {
            return Outcome::Video(path);
        }
    }

    error!(url, "every youtube format tier failed");
    Outcome::Failed
}

async fn probe_metadata(ctx: &FetchContext, url: &str) -> Option<ClipInfo> {
    let mut args = vec!["--dump-json".into(), "--no-warnings".into()];
    args.extend(header_args());
    args.push(url.into());

    for attempt in 1..=METADATA_ATTEMPTS {
        match ctx.runner.run(&ctx.ytdlp, &args, METADATA_TIMEOUT, true).await {
            Ok((stdout, _)) if !stdout.trim().is_empty() => match ClipInfo::parse(&stdout) {
                Ok(info) => return Some(info),
                Err(e) => warn!(attempt, error = %e, "youtube metadata did not parse"),
            },
            Ok(_) => warn!(attempt, "youtube metadata probe returned nothing"),
            Err(e) => warn!(attempt, error = %e, "youtube metadata probe failed"),
        }
    }
    None
}

/// One download attempt. Returns the produced file only if it exists and
/// fits under the ceiling; an oversized artifact is removed on the spot.
async fn attempt(
    ctx: &FetchContext,
    url: &str,
    workspace: &Path,
    selector: &str,
    timeout: u64,
    merge_mp4: bool,
) -> Option<PathBuf> {
    let mut args: Vec<String> = vec![
        "--rm-cache-dir".into(),
        "--force-ipv4".into(),
    ];
    args.extend(header_args());
    args.push("--http-chunk-size".into());
    args.push("10M".into());
    args.push(url.into());
    args.push("--playlist-items".into());
    args.push("1".into());
    args.push("-f".into());
    args.push(selector.into());
    if merge_mp4 {
        args.push("--merge-output-format".into());
        args.push("mp4".into());
    }
    args.push("-o".into());
    args.push(output_template(workspace));
    args.push("--no-warnings".into());

    match ctx.runner.run(&ctx.ytdlp, &args, timeout, false).await {
        Ok((_, stderr)) if stderr.contains("HTTP Error 403") => {
            warn!(selector, "got 403, moving to next candidate");
            return None;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(selector, error = %e, "download attempt failed");
            return None;
        }
    }

    let path = super::find_output(workspace, None)?;
    match std::fs::metadata(&path) {
        Ok(meta) if meta.len() > ctx.size_limit => {
            warn!(
                selector,
                size = meta.len(),
                "downloaded file exceeds ceiling, discarding"
            );
            let _ = std::fs::remove_file(&path);
            None
        }
        Ok(_) => Some(path),
        Err(e) => {
            warn!(selector, error = %e, "could not stat downloaded file");
            None
        }
    }
}

fn header_args() -> Vec<String> {
    vec![
        "--add-header".into(),
        format!("User-Agent: {DESKTOP_UA}"),
        "--add-header".into(),
        "Referer: https://www.youtube.com/".into(),
    ]
}
