use crate::error::FetchError;
use crate::report::Reporter;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// One opaque cookie jar on disk. Loaded once at startup, never mutated.
#[derive(Debug, Clone)]
pub struct CookieFile {
    pub path: PathBuf,
    pub name: String,
}

/// Ordered pool of cookie files for one platform, rotated round-robin.
///
/// The rotation cursor is process-wide and shared by concurrent requests on
/// purpose: it spreads load across accounts, at the cost of two simultaneous
/// requests possibly drawing overlapping cookies. That race is harmless
/// because exhaustion is retried per request, so no stronger guard is used.
pub struct CookiePool {
    files: Vec<CookieFile>,
    cursor: AtomicUsize,
    label: &'static str,
}

impl CookiePool {
    /// Scans `dir` for `<prefix>*.txt`, sorted by file name. An empty result
    /// is a valid "no credentials configured" state, not an error.
    pub fn load(dir: &Path, prefix: &str, label: &'static str) -> Self {
        let mut files = Vec::new();
        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if name.starts_with(prefix) && name.ends_with(".txt") {
                        files.push(CookieFile {
                            path: entry.path(),
                            name,
                        });
                    }
                }
                files.sort_by(|a, b| a.name.cmp(&b.name));
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cookies directory not readable");
            }
        }

        if files.is_empty() {
            warn!(label, dir = %dir.display(), prefix, "no cookie files found");
        } else {
            let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
            info!(label, count = files.len(), ?names, "loaded cookie files");
        }

        Self {
            files,
            cursor: AtomicUsize::new(0),
            label,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Advances the shared cursor and returns the cookie at the new position.
    /// The sequence is the sorted file listing, wrapping indefinitely.
    pub fn next(&self) -> Result<&CookieFile, FetchError> {
        if self.files.is_empty() {
            return Err(FetchError::NoCookies);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.files.len();
        let cookie = &self.files[index];
        info!(label = self.label, cookie = %cookie.name, "rotating to cookie");
        Ok(cookie)
    }

    /// Calls `op` once per distinct cookie, stopping at the first success.
    ///
    /// A terminal failure (content mismatch) aborts immediately without
    /// burning the remaining cookies. Every other per-attempt failure sends a
    /// best-effort side report and moves on; after the whole pool has been
    /// tried the last error is surfaced as `AllAttemptsFailed`.
    pub async fn try_each<T, F, Fut>(
        &self,
        reporter: &dyn Reporter,
        url: &str,
        mut op: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut(CookieFile) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        if self.files.is_empty() {
            return Err(FetchError::NoCookies);
        }

        let total = self.files.len();
        let mut last: Option<FetchError> = None;

        for attempt in 1..=total {
            let cookie = self.next()?.clone();
            info!(label = self.label, attempt, total, cookie = %cookie.name, "attempt");

            match op(cookie.clone()).await {
                Ok(value) => {
                    info!(label = self.label, cookie = %cookie.name, "attempt succeeded");
                    return Ok(value);
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    warn!(label = self.label, cookie = %cookie.name, error = %e, "attempt failed");
                    reporter
                        .report(
                            &format!(
                                "{}: cookie {} failed on attempt {attempt}/{total}",
                                self.label, cookie.name
                            ),
                            &format!(
                                "URL: {url}\nCookie file: {}\nAttempt: {attempt}/{total}\n\nError: {e}",
                                cookie.path.display()
                            ),
                            self.label,
                        )
                        .await;
                    last = Some(e);
                }
            }
        }

        Err(FetchError::AllAttemptsFailed {
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}
