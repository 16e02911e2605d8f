//! Manifest extraction for MissAV pages.
//!
//! The site ships its player configuration as packed, minified script. The
//! layout has changed several times, so recovery is an ordered chain of
//! independent strategies; the first one that yields a URL wins.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::unpack::unpack;

static PACKED_EVAL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\}\s*\(\s*'((?:[^'\\]|\\.)*)',\s*\d+\s*,\s*\d+\s*,\s*'([^']+(?:\|[^']+)+)'\.split\s*\(\s*'\|'\s*\)",
    )
    .unwrap()
});
static PACKED_EVAL_COMPAT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"'((?:[^'\\]|\\.)*)';\s*,\s*\d+\s*,\s*\d+\s*,\s*'m3u8\|[^']*'\.split\s*\(\s*'\|'\s*\)",
    )
    .unwrap()
});
static COMPAT_DICTIONARY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"'(m3u8\|[^']+(?:\|[^']+)+)'\.split\s*\(\s*'\|'\s*\)").unwrap()
});
static UNPACKED_MANIFEST_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s'"<>]+\.m3u8"#).unwrap());
static DICTIONARY_ONLY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"'m3u8\|([^']+(?:\|[^']+)+)'\.split\s*\(\s*'\|'\s*\)").unwrap()
});
static BARE_MANIFEST_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>]+\.m3u8[^\s"'<>]*"#).unwrap());

const LEGACY_START: &str = "m3u8|";
const LEGACY_END: &str = "|playlist|source";

/// One way of recovering a manifest URL from page markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    PackedEval,
    DictionaryOnly,
    LegacyDelimited,
    GenericScan,
}

impl Strategy {
    /// Most specific first.
    pub const CHAIN: [Strategy; 4] = [
        Strategy::PackedEval,
        Strategy::DictionaryOnly,
        Strategy::LegacyDelimited,
        Strategy::GenericScan,
    ];

    pub fn run(self, markup: &str) -> Option<String> {
        match self {
            Strategy::PackedEval => from_packed_eval(markup),
            Strategy::DictionaryOnly => from_dictionary_only(markup),
            Strategy::LegacyDelimited => from_legacy_delimited(markup),
            Strategy::GenericScan => from_generic_scan(markup),
        }
    }
}

/// Runs the strategy chain and returns the first manifest URL found.
pub fn extract_manifest(markup: &str) -> Option<String> {
    Strategy::CHAIN.iter().find_map(|strategy| {
        let found = strategy.run(markup).filter(|url| !url.is_empty())?;
        debug!("manifest located by {:?} strategy", strategy);
        Some(found)
    })
}

fn from_packed_eval(markup: &str) -> Option<String> {
    let (packed, dictionary) = match PACKED_EVAL_REGEX.captures(markup) {
        Some(caps) => (caps[1].to_string(), caps[2].to_string()),
        None => packed_eval_compat(markup)?,
    };

    let unpacked = unpack(&packed, &dictionary);
    UNPACKED_MANIFEST_REGEX
        .find(&unpacked)
        .map(|found| found.as_str().to_string())
}

/// Older pages terminate the packed literal with `';` before the counters.
fn packed_eval_compat(markup: &str) -> Option<(String, String)> {
    let caps = PACKED_EVAL_COMPAT_REGEX.captures(markup)?;
    let start = caps.get(0)?.start();
    let packed = caps[1].to_string();

    let dictionary = COMPAT_DICTIONARY_REGEX.captures(&markup[start..])?[1].to_string();
    if !dictionary.contains("https") {
        return None;
    }

    Some((packed, dictionary))
}

fn from_dictionary_only(markup: &str) -> Option<String> {
    let caps = DICTIONARY_ONLY_REGEX.captures(markup)?;
    let joined = format!("m3u8|{}", &caps[1]);
    let parts: Vec<&str> = joined.split('|').collect();

    if !parts.contains(&"https") || !parts.contains(&"playlist") {
        return None;
    }

    let https_index = parts.iter().position(|part| *part == "https")?;
    let com_index = parts.iter().position(|part| *part == "com")?;
    if com_index >= https_index || https_index - com_index < 2 {
        return None;
    }

    let host = reversed_join(&parts[com_index..https_index], ".");
    if parts.len() < 6 {
        return None;
    }
    let path = reversed_join(&parts[1..6], "-");

    Some(format!("https://{host}/{path}/playlist.m3u8"))
}

fn from_legacy_delimited(markup: &str) -> Option<String> {
    let after_marker = &markup[markup.find(LEGACY_START)? + LEGACY_START.len()..];
    let chunk = &after_marker[..after_marker.find(LEGACY_END)?];
    let words: Vec<&str> = chunk.split('|').collect();

    let video_index = words.iter().position(|word| *word == "video")?;
    let scheme_index = video_index.checked_sub(1)?;
    let scheme = words[scheme_index];
    if scheme_index < 5 {
        return None;
    }
    // Yields `https://surrit.com/5-4-3-2-1/video.m3u8`. The format token must
    // follow the marker but is not a path segment.
    words.get(video_index + 1)?;

    let path = reversed_join(&words[0..5], "-");
    let host = reversed_join(&words[5..scheme_index], ".");
    let playlist = words[video_index];

    Some(format!("{scheme}://{host}/{path}/{playlist}.m3u8"))
}

fn from_generic_scan(markup: &str) -> Option<String> {
    let normalized = markup.replace("\\/", "/");
    let found = BARE_MANIFEST_REGEX.find(&normalized)?;
    Some(found.as_str().trim_end_matches('\\').trim().to_string())
}

fn reversed_join(parts: &[&str], separator: &str) -> String {
    parts
        .iter()
        .rev()
        .copied()
        .collect::<Vec<_>>()
        .join(separator)
}
