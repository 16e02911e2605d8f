use thiserror::Error;

/// Failure reaching a source page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server responded with HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("could not decode response body: {0}")]
    Decode(#[from] std::io::Error),
}

/// Signal returned by a progress hook to stop the transfer in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

#[derive(Debug, Error)]
pub enum DelegateError {
    #[error("download cancelled by user")]
    Cancelled,
    #[error("yt-dlp is not installed. Install yt-dlp and restart the backend.")]
    NotInstalled,
    #[error("could not run yt-dlp: {0}")]
    Spawn(std::io::Error),
    #[error("{0}")]
    Failed(String),
}

/// What a finished transfer failed to produce for the requested output kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingOutput {
    Files,
    Media,
    Subtitles,
}

impl std::fmt::Display for MissingOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::Files => "no files produced",
            Self::Media => "no media produced",
            Self::Subtitles => "no subtitles produced",
        };
        f.write_str(message)
    }
}

/// Terminal failure of a download job. The `Display` text becomes the job's
/// status message.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("could not load page: {0}")]
    Fetch(#[from] FetchError),
    #[error("could not find a stream manifest in the page (the page structure may have changed)")]
    ExtractionNotFound,
    #[error("{0}")]
    Transfer(String),
    #[error("download cancelled by user")]
    Cancelled,
    #[error("could not package output: {0}")]
    Packaging(#[from] PackagingError),
    #[error("{0}")]
    NoOutput(MissingOutput),
}

impl From<DelegateError> for JobError {
    fn from(error: DelegateError) -> Self {
        match error {
            DelegateError::Cancelled => Self::Cancelled,
            other => Self::Transfer(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("packaging task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("subtitle request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("subtitle provider responded with HTTP {0}")]
    Status(reqwest::StatusCode),
}
