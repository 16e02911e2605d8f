use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{
    MAX_RESULTS_PER_PROVIDER, SubtitleCandidate, SubtitleFile, SubtitleLang, SubtitleProvider,
    SubtitleSource, filename_from_url,
};
use crate::error::SubtitleError;

pub const OPENSUBTITLES_API_URL: &str = "https://api.opensubtitles.com/api/v1";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const SEARCH_TIMEOUT_SECONDS: u64 = 15;
const DOWNLOAD_TIMEOUT_SECONDS: u64 = 30;
const FALLBACK_FILENAME: &str = "subtitle.srt";
const OPENSUBTITLES_DOMAINS: [&str; 2] = ["opensubtitles.com", "opensubtitles.org"];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    attributes: Attributes,
}

#[derive(Debug, Default, Deserialize)]
struct Attributes {
    #[serde(default)]
    release: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    #[serde(default)]
    file_id: Option<u64>,
    #[serde(default)]
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadLink {
    #[serde(default)]
    link: Option<String>,
    #[serde(default, alias = "filename")]
    file_name: Option<String>,
}

/// OpenSubtitles REST client. Locators are either a numeric file id or a
/// direct download URL.
pub struct OpenSubtitles {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenSubtitles {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: OPENSUBTITLES_API_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn language_code(lang: SubtitleLang) -> &'static str {
        match lang {
            SubtitleLang::Traditional => "zh-tw",
            SubtitleLang::Simplified => "zh-cn",
        }
    }

    /// Direct-URL locators must point at OpenSubtitles itself or at the
    /// configured API host.
    fn is_allowed_locator(&self, locator: &str) -> bool {
        let Ok(parsed) = Url::parse(locator) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();

        let known_domain = OPENSUBTITLES_DOMAINS
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")));
        if known_domain {
            return true;
        }

        Url::parse(&self.base_url).is_ok_and(|base| {
            base.host_str() == Some(host.as_str())
                && base.port_or_known_default() == parsed.port_or_known_default()
        })
    }

    /// Plain GET of a subtitle file, without the API key.
    async fn download_bytes(&self, url: &str) -> Result<Option<Vec<u8>>, SubtitleError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "*/*")
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECONDS))
            .send()
            .await?;
        if !response.status().is_success() {
            debug!("subtitle download {url} answered {}", response.status());
            return Ok(None);
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }
}

#[async_trait]
impl SubtitleProvider for OpenSubtitles {
    fn source(&self) -> SubtitleSource {
        SubtitleSource::OpenSubtitles
    }

    async fn search(
        &self,
        query: &str,
        lang: SubtitleLang,
    ) -> Result<Vec<SubtitleCandidate>, SubtitleError> {
        let response = self
            .client
            .get(format!("{}/subtitles", self.base_url))
            .header("Api-Key", &self.api_key)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .query(&[("query", query), ("languages", Self::language_code(lang))])
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECONDS))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SubtitleError::Status(response.status()));
        }

        let body: SearchResponse = response.json().await?;
        let candidates = body
            .data
            .into_iter()
            .take(MAX_RESULTS_PER_PROVIDER)
            .filter_map(|item| {
                let file = item.attributes.files.first();
                let locator = file
                    .and_then(|file| file.file_id)
                    .map(|id| id.to_string())
                    .or_else(|| item.attributes.url.clone())?;
                let file_name = file
                    .and_then(|file| file.file_name.clone())
                    .unwrap_or_default();

                Some(SubtitleCandidate {
                    source: SubtitleSource::OpenSubtitles,
                    identifier: item.id.unwrap_or_else(|| locator.clone()),
                    release_label: item.attributes.release.unwrap_or_default(),
                    language: item.attributes.language.unwrap_or_default(),
                    locator,
                    file_name,
                })
            })
            .collect();

        Ok(candidates)
    }

    async fn fetch(
        &self,
        locator: &str,
        _lang: SubtitleLang,
    ) -> Result<Option<SubtitleFile>, SubtitleError> {
        let locator = locator.trim();

        if locator.starts_with("http://") || locator.starts_with("https://") {
            if !self.is_allowed_locator(locator) {
                warn!("refusing OpenSubtitles locator outside the OpenSubtitles hosts: {locator}");
                return Ok(None);
            }
            let bytes = self.download_bytes(locator).await?;
            return Ok(bytes.map(|bytes| SubtitleFile {
                bytes,
                filename: filename_from_url(locator, FALLBACK_FILENAME),
            }));
        }

        let Ok(file_id) = locator.parse::<u64>() else {
            return Ok(None);
        };

        let response = self
            .client
            .post(format!("{}/download", self.base_url))
            .header("Api-Key", &self.api_key)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "file_id": file_id }))
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECONDS))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SubtitleError::Status(response.status()));
        }

        let link: DownloadLink = response.json().await?;
        let Some(url) = link.link else {
            return Ok(None);
        };
        let filename = link
            .file_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| FALLBACK_FILENAME.to_string());

        let bytes = self.download_bytes(&url).await?;
        Ok(bytes.map(|bytes| SubtitleFile { bytes, filename }))
    }
}
