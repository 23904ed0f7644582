use crate::error::FetchError;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Runs external tools (yt-dlp, ffprobe) with a hard per-invocation timeout.
///
/// The tool's exit code is deliberately not used as the success signal:
/// yt-dlp sometimes exits 0 while reporting a partial failure on stderr, so
/// callers inspect the captured streams and the filesystem instead.
#[derive(Clone, Default)]
pub struct ToolRunner {
    // Most recent stderr from any invocation, kept for error reports. Shared
    // process-wide: concurrent requests may overwrite each other's text,
    // which is an accepted precision trade-off.
    last_stderr: Arc<Mutex<String>>,
}

impl ToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stderr of the most recent invocation, for attaching to error reports.
    pub async fn last_stderr(&self) -> String {
        self.last_stderr.lock().await.clone()
    }

    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout_secs: u64,
        quiet_stdout: bool,
    ) -> Result<(String, String), FetchError> {
        info!(command = %format!("{} {}", program, args.join(" ")), "running external tool");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // On timeout the output future is dropped, which drops the child;
        // kill_on_drop then terminates the process.
        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(program, timeout_secs, "tool timed out, killing");
                return Err(FetchError::Timeout(timeout_secs));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        *self.last_stderr.lock().await = stderr.clone();

        if !stdout.is_empty() && !quiet_stdout {
            info!("[{} stdout]\n{}", program, stdout.trim_end());
        }
        if !stderr.is_empty() {
            warn!("[{} stderr]\n{}", program, stderr.trim_end());
        }

        Ok((stdout, stderr))
    }
}
