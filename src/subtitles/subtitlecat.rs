use std::collections::HashSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::Duration;

use super::{
    MAX_RESULTS_PER_PROVIDER, SubtitleCandidate, SubtitleFile, SubtitleLang, SubtitleProvider,
    SubtitleSource, filename_from_url, query_from_filename,
};
use crate::error::SubtitleError;

pub const SUBTITLECAT_URL: &str = "https://www.subtitlecat.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; rv:109.0) Gecko/20100101 Firefox/115.0";
const SEARCH_TIMEOUT_SECONDS: u64 = 15;
const DOWNLOAD_TIMEOUT_SECONDS: u64 = 30;
const MAX_FILE_STEM_CHARS: usize = 80;

static RESULT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)href=["']?(?:https?://www\.subtitlecat\.com)?/?(subs/\d+/[^"'>\s]+\.html)["']?[^>]*>([^<]+)"#,
    )
    .unwrap()
});
static ABSOLUTE_SRT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"href=["']?(https?://[^"'\s>]+?-[a-zA-Z]{2}(?:-[a-zA-Z]{2})?\.srt)["']?"#).unwrap()
});
static RELATIVE_SRT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"href=["']?(/?subs/[^"'\s>]+?-[a-zA-Z]{2}(?:-[a-zA-Z]{2})?\.srt)["']?"#).unwrap()
});

/// Link texts on result pages that are buttons, not titles.
const NON_TITLE_TEXTS: [&str; 4] = ["download", "translate", "👍", "👎"];

/// Scrapes Subtitle Cat. Locators are subtitle page URLs; a fetch picks the
/// `.srt` link for the requested language and never another one.
pub struct SubtitleCat {
    client: reqwest::Client,
    base_url: String,
}

impl SubtitleCat {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: SUBTITLECAT_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_text(&self, url: &str) -> Result<Option<String>, SubtitleError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5")
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECONDS))
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        Ok(Some(response.text().await?))
    }

    fn absolute(&self, link: &str) -> String {
        if link.starts_with("http") {
            link.to_string()
        } else {
            format!("{}/{}", self.base_url, link.trim_start_matches('/'))
        }
    }

    /// Distinct `.srt` links on a subtitle page, in page order.
    fn srt_links(&self, html: &str) -> Vec<String> {
        let mut links: Vec<String> = ABSOLUTE_SRT_LINK
            .captures_iter(html)
            .map(|caps| caps[1].to_string())
            .collect();
        if links.is_empty() {
            links = RELATIVE_SRT_LINK
                .captures_iter(html)
                .map(|caps| self.absolute(&caps[1]))
                .collect();
        }

        let mut seen = HashSet::new();
        links.retain(|link| seen.insert(link.clone()));
        links
    }
}

fn language_suffixes(lang: SubtitleLang) -> &'static [&'static str] {
    match lang {
        SubtitleLang::Traditional => &["-zh-tw.srt", "-zht.srt", "-cht.srt"],
        SubtitleLang::Simplified => &["-zh-cn.srt", "-zhs.srt"],
    }
}

fn link_for_language(links: &[String], lang: SubtitleLang) -> Option<&String> {
    let suffixes = language_suffixes(lang);
    links.iter().find(|link| {
        let lower = link.to_ascii_lowercase();
        suffixes.iter().any(|suffix| lower.contains(suffix))
    })
}

fn is_title_text(title: &str) -> bool {
    let lower = title.to_lowercase();
    title.chars().count() >= 2
        && !NON_TITLE_TEXTS.contains(&lower.as_str())
        && !lower.contains("subtitlecat")
}

#[async_trait]
impl SubtitleProvider for SubtitleCat {
    fn source(&self) -> SubtitleSource {
        SubtitleSource::SubtitleCat
    }

    async fn search(
        &self,
        query: &str,
        _lang: SubtitleLang,
    ) -> Result<Vec<SubtitleCandidate>, SubtitleError> {
        let query = query_from_filename(query);
        let response = self
            .client
            .get(format!("{}/index.php", self.base_url))
            .header("User-Agent", USER_AGENT)
            .query(&[("search", query.as_str())])
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECONDS))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SubtitleError::Status(response.status()));
        }
        let html = response.text().await?;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for caps in RESULT_LINK.captures_iter(&html) {
            let path = caps[1].trim();
            let title = caps[2].split_whitespace().collect::<Vec<_>>().join(" ");
            if !is_title_text(&title) {
                continue;
            }
            let page_url = self.absolute(path);
            if !seen.insert(page_url.clone()) {
                continue;
            }

            let stem: String = title.chars().take(MAX_FILE_STEM_CHARS).collect();
            candidates.push(SubtitleCandidate {
                source: SubtitleSource::SubtitleCat,
                identifier: format!("subtitlecat-{path}"),
                release_label: title,
                language: "multi".to_string(),
                locator: page_url,
                file_name: format!("{stem}.srt"),
            });
            if candidates.len() >= MAX_RESULTS_PER_PROVIDER {
                break;
            }
        }

        Ok(candidates)
    }

    async fn fetch(
        &self,
        locator: &str,
        lang: SubtitleLang,
    ) -> Result<Option<SubtitleFile>, SubtitleError> {
        if !locator.starts_with(&self.base_url) {
            return Ok(None);
        }
        let Some(html) = self.get_text(locator).await? else {
            return Ok(None);
        };

        let links = self.srt_links(&html);
        let Some(download_url) = link_for_language(&links, lang) else {
            return Ok(None);
        };

        let response = self
            .client
            .get(download_url)
            .header("User-Agent", USER_AGENT)
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECONDS))
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        Ok(Some(SubtitleFile {
            bytes: response.bytes().await?.to_vec(),
            filename: filename_from_url(download_url, "subtitle.srt"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const SEARCH_PAGE: &str = r#"
        <table>
          <tr><td><a href="subs/422/NAAC-032.html">NAAC-032   Uncensored</a></td>
              <td><a href="subs/422/NAAC-032.html">download</a></td></tr>
          <tr><td><a href="/subs/423/NAAC-032-alt.html">NAAC-032 alt</a></td></tr>
          <tr><td><a href="subs/424/x.html">subtitlecat.com</a></td></tr>
        </table>"#;

    fn client_for(server: &MockServer) -> SubtitleCat {
        SubtitleCat::new(reqwest::Client::new()).with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_search_scrapes_titles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.php"))
            .and(query_param("search", "NAAC 032"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SEARCH_PAGE))
            .mount(&server)
            .await;

        let found = client_for(&server)
            .search("NAAC-032.mp4", SubtitleLang::Traditional)
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].release_label, "NAAC-032 Uncensored");
        assert_eq!(found[0].locator, format!("{}/subs/422/NAAC-032.html", server.uri()));
        assert_eq!(found[0].file_name, "NAAC-032 Uncensored.srt");
        assert_eq!(found[1].identifier, "subtitlecat-subs/423/NAAC-032-alt.html");
    }

    #[tokio::test]
    async fn test_fetch_picks_requested_language_only() {
        let server = MockServer::start().await;
        let page = format!(
            r#"<a href="{0}/subs/422/NAAC-032-en.srt">en</a>
               <a href="{0}/subs/422/NAAC-032-zh-CN.srt">zh-CN</a>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/subs/422/NAAC-032.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subs/422/NAAC-032-zh-CN.srt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1\n简体\n"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let locator = format!("{}/subs/422/NAAC-032.html", server.uri());

        let file = client
            .fetch(&locator, SubtitleLang::Simplified)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.filename, "NAAC-032-zh-CN.srt");
        assert_eq!(file.bytes, "1\n简体\n".as_bytes());

        let missing = client.fetch(&locator, SubtitleLang::Traditional).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_fetch_relative_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subs/9/page.html"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<a href="/subs/9/Clip-zh-TW.srt">tw</a>"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subs/9/Clip-zh-TW.srt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("tw"))
            .mount(&server)
            .await;

        let locator = format!("{}/subs/9/page.html", server.uri());
        let file = client_for(&server)
            .fetch(&locator, SubtitleLang::Traditional)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.bytes, b"tw");
    }

    #[tokio::test]
    async fn test_fetch_rejects_foreign_locator() {
        let server = MockServer::start().await;
        let file = client_for(&server)
            .fetch("https://elsewhere.test/subs/1/a.html", SubtitleLang::Traditional)
            .await
            .unwrap();
        assert!(file.is_none());
    }
}
