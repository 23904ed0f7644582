use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("tool timed out after {0} seconds")]
    Timeout(u64),
    #[error("tool failed: {0}")]
    Tool(String),
    #[error("no cookie files available")]
    NoCookies,
    #[error("content mismatch: {0}")]
    ContentMismatch(String),
    #[error("no format fits under the size limit")]
    NoSuitableFormat,
    #[error("downloaded file exceeds the size limit")]
    Oversize,
    #[error("all attempts failed, last error: {last}")]
    AllAttemptsFailed { last: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FetchError {
    /// Terminal failures stop cookie rotation and tier fallback immediately:
    /// the source genuinely lacks the requested media, so retrying with a
    /// different credential or selector cannot change the answer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchError::ContentMismatch(_))
    }
}
