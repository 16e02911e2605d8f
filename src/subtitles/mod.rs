//! Subtitle search and download across external subtitle sites.

mod opensubtitles;
mod subtitlecat;

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SubtitleError;

pub use opensubtitles::OpenSubtitles;
pub use subtitlecat::SubtitleCat;

pub const MAX_RESULTS_PER_PROVIDER: usize = 30;
const MAX_QUERY_CHARS: usize = 100;

static QUALITY_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(720p|1080p|2160p|4k|bluray|webrip|web-dl|hdtv)\s*").unwrap()
});
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\d{4}\s*").unwrap());
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[._-]+").unwrap());

/// The two subtitle languages supported end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubtitleLang {
    #[serde(rename = "zht")]
    Traditional,
    #[serde(rename = "zhs")]
    Simplified,
}

impl SubtitleLang {
    /// Anything that is not a simplified-Chinese code becomes traditional.
    pub fn coerce(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "zhs" | "zh-cn" | "zh_cn" => Self::Simplified,
            _ => Self::Traditional,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Traditional => "zht",
            Self::Simplified => "zhs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubtitleSource {
    #[serde(rename = "opensubtitles")]
    OpenSubtitles,
    #[serde(rename = "subtitlecat")]
    SubtitleCat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtitleCandidate {
    pub source: SubtitleSource,
    pub identifier: String,
    pub release_label: String,
    pub language: String,
    /// Opaque value handed back to [`SubtitleProvider::fetch`].
    pub locator: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleFile {
    pub bytes: Vec<u8>,
    pub filename: String,
}

#[async_trait]
pub trait SubtitleProvider: Send + Sync {
    fn source(&self) -> SubtitleSource;

    async fn search(
        &self,
        query: &str,
        lang: SubtitleLang,
    ) -> Result<Vec<SubtitleCandidate>, SubtitleError>;

    /// `Ok(None)` when the provider has nothing for `locator` in `lang`.
    async fn fetch(
        &self,
        locator: &str,
        lang: SubtitleLang,
    ) -> Result<Option<SubtitleFile>, SubtitleError>;
}

/// Guesses a search query from a video file name by dropping the extension,
/// years, and release tags.
pub fn query_from_filename(filename: &str) -> String {
    let filename = filename.trim();
    let stem = filename
        .rsplit_once('.')
        .map_or(filename, |(stem, _)| stem);

    // Tags go first: removing years first turns `1080p` into `p`.
    let without_tags = QUALITY_TAGS.replace_all(stem, " ");
    let without_years = YEAR.replace_all(&without_tags, " ");
    let spaced = SEPARATORS.replace_all(&without_years, " ");
    let query: String = spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_QUERY_CHARS)
        .collect();

    if query.is_empty() {
        filename.to_string()
    } else {
        query
    }
}

/// Last path segment of `url` without its query string.
pub(crate) fn filename_from_url(url: &str, fallback: &str) -> String {
    url.split('?')
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map_or_else(|| fallback.to_string(), ToString::to_string)
}

/// Queries every configured provider in order. Provider failures are logged
/// and contribute nothing.
#[derive(Clone, Default)]
pub struct SubtitleSearch {
    providers: Vec<Arc<dyn SubtitleProvider>>,
}

impl SubtitleSearch {
    pub fn new(providers: Vec<Arc<dyn SubtitleProvider>>) -> Self {
        Self { providers }
    }

    /// OpenSubtitles is only included when an API key is configured.
    pub fn with_defaults(client: reqwest::Client, opensubtitles_api_key: Option<String>) -> Self {
        let mut providers: Vec<Arc<dyn SubtitleProvider>> = Vec::new();
        match opensubtitles_api_key {
            Some(key) => providers.push(Arc::new(OpenSubtitles::new(client.clone(), key))),
            None => warn!("OPENSUBTITLES_API_KEY is not set, OpenSubtitles search is disabled"),
        }
        providers.push(Arc::new(SubtitleCat::new(client)));
        Self { providers }
    }

    pub async fn search(&self, query: &str, lang: &str) -> Vec<SubtitleCandidate> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let lang = SubtitleLang::coerce(lang);

        let mut combined = Vec::new();
        for provider in &self.providers {
            match provider.search(query, lang).await {
                Ok(found) => combined.extend(found),
                Err(error) => warn!("subtitle search on {:?} failed: {error}", provider.source()),
            }
        }
        combined
    }

    pub async fn fetch(
        &self,
        source: SubtitleSource,
        locator: &str,
        lang: &str,
    ) -> Option<SubtitleFile> {
        let lang = SubtitleLang::coerce(lang);
        let provider = self
            .providers
            .iter()
            .find(|provider| provider.source() == source)?;

        match provider.fetch(locator, lang).await {
            Ok(file) => file,
            Err(error) => {
                warn!("subtitle download from {:?} failed: {error}", source);
                None
            }
        }
    }
}
