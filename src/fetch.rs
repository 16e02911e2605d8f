use std::io::Read;

use async_trait::async_trait;
use flate2::read::{GzDecoder, ZlibDecoder};
use reqwest::header::CONTENT_ENCODING;
use tokio::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;

pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
pub const PAGE_FETCH_TIMEOUT_SECONDS: u64 = 30;

/// Ordered `(name, value)` header pairs shared by the page fetcher and the
/// delegate.
pub type HeaderPairs = Vec<(String, String)>;

/// `scheme://host[:port]` of `url`, if it has one.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{}://{host}:{port}", parsed.scheme())),
        None => Some(format!("{}://{host}", parsed.scheme())),
    }
}

/// Full browser header set used to avoid 403s from sites that sniff clients.
pub fn browser_headers(url: &str) -> HeaderPairs {
    let origin = origin_of(url);
    let mut headers = vec![
        ("User-Agent", CHROME_USER_AGENT.to_string()),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8"
                .to_string(),
        ),
        ("Accept-Language", "en-US,en;q=0.9,zh-TW;q=0.8,zh;q=0.7".to_string()),
        ("Accept-Encoding", "gzip, deflate, br".to_string()),
        ("Sec-Fetch-Dest", "document".to_string()),
        ("Sec-Fetch-Mode", "navigate".to_string()),
        (
            "Sec-Fetch-Site",
            if origin.is_some() { "cross-site" } else { "none" }.to_string(),
        ),
        ("Sec-Fetch-User", "?1".to_string()),
        ("Upgrade-Insecure-Requests", "1".to_string()),
    ];

    if let Some(origin) = origin {
        headers.push(("Referer", format!("{origin}/")));
        headers.push(("Origin", origin));
    }

    headers
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<String, FetchError>;
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PAGE_FETCH_TIMEOUT_SECONDS))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageSource for HttpPageFetcher {
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<String, FetchError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let raw = response.bytes().await?;
        debug!("fetched {} bytes from {url} (encoding {:?})", raw.len(), encoding);

        let body = decode_body(&encoding, raw.to_vec())?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Undoes `Content-Encoding`. Brotli and deflate fall back to the raw bytes
/// when they cannot be decoded.
pub fn decode_body(encoding: &str, raw: Vec<u8>) -> Result<Vec<u8>, std::io::Error> {
    match encoding {
        "gzip" | "x-gzip" => {
            let mut decoded = Vec::new();
            GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
            Ok(decoded)
        }
        "deflate" => {
            let mut decoded = Vec::new();
            match ZlibDecoder::new(raw.as_slice()).read_to_end(&mut decoded) {
                Ok(_) => Ok(decoded),
                Err(error) => {
                    warn!("deflate decoding failed, using raw body: {error}");
                    Ok(raw)
                }
            }
        }
        "br" => Ok(decode_brotli(raw)),
        _ => Ok(raw),
    }
}

#[cfg(feature = "brotli")]
fn decode_brotli(raw: Vec<u8>) -> Vec<u8> {
    let mut decoded = Vec::new();
    match brotli::BrotliDecompress(&mut std::io::Cursor::new(&raw), &mut decoded) {
        Ok(()) => decoded,
        Err(error) => {
            warn!("brotli decoding failed, using raw body: {error}");
            raw
        }
    }
}

#[cfg(not(feature = "brotli"))]
fn decode_brotli(raw: Vec<u8>) -> Vec<u8> {
    warn!("brotli support is not compiled in, using raw body");
    raw
}
