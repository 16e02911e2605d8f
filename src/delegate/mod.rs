//! The external extractor/downloader the orchestrator hands URLs to.

mod ytdlp;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{Cancelled, DelegateError};
use crate::fetch::HeaderPairs;
use crate::progress::ProgressEvent;

pub use ytdlp::{OutputLine, YtDlp, parse_output_line};

/// Called for every low-level progress event, inside the transfer loop.
/// Returning `Err(Cancelled)` stops the transfer.
pub type ProgressHook<'a> = dyn FnMut(&ProgressEvent) -> Result<(), Cancelled> + Send + 'a;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    pub format_selector: String,
    pub merge_container: String,
    /// Output template including the scratch directory,
    /// e.g. `/tmp/job/%(title)s.%(ext)s`.
    pub output_template: String,
    /// Empty when subtitles should not be written.
    pub subtitle_languages: Vec<String>,
    pub subtitle_format: Option<String>,
    pub http_headers: HeaderPairs,
    pub cookie_file: Option<PathBuf>,
}

/// Metadata the delegate reported while extracting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegateOutcome {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Downloads `url` (a page or a manifest) into the location named by
    /// `options.output_template`.
    async fn download(
        &self,
        url: &str,
        options: &DownloadOptions,
        hook: &mut ProgressHook<'_>,
    ) -> Result<DelegateOutcome, DelegateError>;
}
