//! Error types for the admission engine

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("HTTP transport error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("carbon API returned status {0}")]
    UpstreamStatus(u16),

    #[error("carbon API rejected credentials")]
    AuthRejected,

    #[error("carbon region not found: {0}")]
    RegionNotFound(String),

    #[error("carbon API rate limit exceeded")]
    RateLimited,

    #[error("malformed carbon API response: {0}")]
    DecodeError(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("watch stream error: {0}")]
    WatchError(String),

    #[error("all retries failed: {0}")]
    RetriesExhausted(#[source] Box<Error>),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Whether another fetch attempt may succeed. Transport failures,
    /// 5xx responses, and 429s are worth retrying; auth, missing-region,
    /// and decode failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::HttpError(_) | Error::UpstreamStatus(_) | Error::RateLimited
        )
    }

    /// Short category label used for error-counter metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::HttpError(_) => "transport",
            Error::UpstreamStatus(_) => "upstream",
            Error::AuthRejected => "auth",
            Error::RegionNotFound(_) => "region",
            Error::RateLimited => "rate_limit",
            Error::DecodeError(_) => "decode",
            Error::DeadlineExceeded => "deadline",
            Error::ConfigError(_) => "config",
            Error::WatchError(_) => "watch",
            Error::RetriesExhausted(_) => "retries_exhausted",
            Error::IoError(_) => "io",
        }
    }
}
