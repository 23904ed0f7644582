//! TikTok strategy: anonymous metadata first, cookies only on demand.
//!
//! Most TikTok clips are public, so the first probe runs without
//! credentials. Only when the page answers with a login wall does the
//! strategy fall back to the rotated cookie pool, and a missing pool at
//! that point is a configuration gap worth telling the user about rather
//! than an anonymous failure.

use super::{output_template, FetchContext, Outcome};
use crate::cookies::CookieFile;
use crate::error::FetchError;
use crate::formats::{best_under_limit, ClipInfo};
use crate::runner::ToolRunner;
use std::path::Path;
use tracing::{error, info, warn};

/// Phrases the extractor surfaces when a clip sits behind a login wall.
const RESTRICTED_MARKERS: &[&str] = &[
    "This post may not be comfortable for some audiences",
    "Log in for access",
];

const PROBE_TIMEOUT: u64 = 60;
const DOWNLOAD_TIMEOUT: u64 = 120;

pub async fn fetch(ctx: &FetchContext, url: &str, workspace: &Path) -> Outcome {
    info!(url, "starting tiktok fetch");

    let probe_args: Vec<String> = vec!["--dump-json".into(), url.into()];
    let metadata = match ctx.runner.run(&ctx.ytdlp, &probe_args, PROBE_TIMEOUT, true).await {
        Ok((stdout, stderr)) if is_restricted(&stdout, &stderr) => {
            info!(url, "tiktok clip is restricted, switching to cookies");
            return fetch_restricted(ctx, url, workspace).await;
        }
        Ok((stdout, _)) => stdout,
        Err(e) => {
            warn!(url, error = %e, "tiktok metadata probe failed");
            return Outcome::Declined(format!("Download error: {e}"));
        }
    };

    match grab_public(ctx, url, workspace, &metadata).await {
        Ok(path) => {
            info!(url, path = %path.display(), "tiktok video downloaded");
            Outcome::Video(path)
        }
        Err(FetchError::NoSuitableFormat) => Outcome::Declined(format!(
            "No video format fits under {} MB",
            ctx.size_limit / (1024 * 1024)
        )),
        Err(e) => {
            warn!(url, error = %e, "tiktok download failed");
            Outcome::Declined(format!("Download error: {e}"))
        }
    }
}

fn is_restricted(stdout: &str, stderr: &str) -> bool {
    RESTRICTED_MARKERS
        .iter()
        .any(|m| stdout.contains(m) || stderr.contains(m))
}

/// Anonymous path: pick the largest combined format that still fits under
/// the ceiling and download exactly that format id.
async fn grab_public(
    ctx: &FetchContext,
    url: &str,
    workspace: &Path,
    metadata: &str,
) -> Result<std::path::PathBuf, FetchError> {
    let info = ClipInfo::parse(metadata)?;
    let chosen = best_under_limit(&info.formats, ctx.size_limit)?;
    info!(
        format_id = %chosen.format_id,
        height = ?chosen.height,
        "selected tiktok format"
    );

    let args: Vec<String> = vec![
        url.into(),
        "-f".into(),
        chosen.format_id.clone(),
        "-o".into(),
        output_template(workspace),
        "--no-warnings".into(),
    ];
    ctx.runner.run(&ctx.ytdlp, &args, DOWNLOAD_TIMEOUT, false).await?;

    super::find_output(workspace, None)
        .ok_or_else(|| FetchError::Tool("no video file produced".into()))
}

/// Login-walled path: rotate through the TikTok cookie pool. Hitting the
/// same wall under a cookie means that jar has gone stale.
async fn fetch_restricted(ctx: &FetchContext, url: &str, workspace: &Path) -> Outcome {
    if ctx.tiktok_cookies.is_empty() {
        return Outcome::Declined(
            "This clip requires a login, but no TikTok cookies are configured".into(),
        );
    }

    let runner = ctx.runner.clone();
    let tool = ctx.ytdlp.clone();
    let size_limit = ctx.size_limit;
    let result = ctx
        .tiktok_cookies
        .try_each(ctx.reporter.as_ref(), url, |cookie| {
            let runner = runner.clone();
            let tool = tool.clone();
            let url = url.to_string();
            let workspace = workspace.to_path_buf();
            async move {
                grab_with_cookie(&runner, &tool, &cookie, &url, &workspace, size_limit).await
            }
        })
        .await;

    match result {
        Ok(path) => {
            info!(url, path = %path.display(), "restricted tiktok video downloaded");
            Outcome::Video(path)
        }
        Err(e) => {
            error!(url, error = %e, "restricted tiktok fetch failed");
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
    size_limit: u64,
) -> Result<std::path::PathBuf, FetchError> {
    info!(cookie = %cookie.name, "probing restricted tiktok clip");

    // The wall may still be up under this cookie; re-check before paying
    // for a download.
    let probe_args: Vec<String> = vec![
        "--dump-json".into(),
        "--cookies".into(),
        cookie.path.to_string_lossy().to_string(),
        url.into(),
    ];
    let (stdout, stderr) = runner.run(tool, &probe_args, PROBE_TIMEOUT, true).await?;
    if is_restricted(&stdout, &stderr) {
        return Err(FetchError::Tool(format!("cookie {} is stale", cookie.name)));
    }

    let info = ClipInfo::parse(&stdout)?;
    let chosen = best_under_limit(&info.formats, size_limit)?;
    info!(
        cookie = %cookie.name,
        format_id = %chosen.format_id,
        height = ?chosen.height,
        "selected restricted tiktok format"
    );

    let args: Vec<String> = vec![
        url.into(),
        "--cookies".into(),
        cookie.path.to_string_lossy().to_string(),
        "-f".into(),
        chosen.format_id.clone(),
        "-o".into(),
        output_template(workspace),
        "--no-warnings".into(),
    ];
    runner.run(tool, &args, DOWNLOAD_TIMEOUT, false).await?;

    super::find_output(workspace, None)
        .ok_or_else(|| FetchError::Tool("no video file produced".into()))
}
