use once_cell::sync::Lazy;
use regex::Regex;

static MISSAV_URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://(?:www\.)?missav\.(?:ai|ws)/").unwrap());
static OG_TITLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+property=["']og:title["'][^>]+content=["']([^"']*)["']"#).unwrap()
});
static OG_DESCRIPTION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+property=["']og:description["'][^>]+content=["']([^"']*)["']"#)
        .unwrap()
});

/// Checked in order, only the first match is removed.
const TITLE_SUFFIXES: [&str; 3] = ["-uncensored-leak", "-uncensored", "-leak"];
const FALLBACK_TITLE: &str = "video";

pub fn is_missav_url(url: &str) -> bool {
    MISSAV_URL_REGEX.is_match(url.trim())
}

/// Display title for a MissAV page, taken from the last path segment:
/// `dm1/naac-032` gives `naac-032`, `ipzz-556-uncensored-leak` gives `ipzz-556`.
pub fn title_from_url(url: &str) -> String {
    let Some(path) = raw_path(url.trim()) else {
        return FALLBACK_TITLE.to_string();
    };

    let Some(segment) = path.split('/').rev().find(|part| !part.is_empty()) else {
        return FALLBACK_TITLE.to_string();
    };

    let mut segment = segment;
    if let Some(stripped) = TITLE_SUFFIXES
        .iter()
        .find_map(|suffix| segment.strip_suffix(suffix))
    {
        segment = stripped.trim_end_matches('-');
    }

    sanitize_filename(segment)
}

/// Path of `url` as written, without percent-encoding it. Query and fragment
/// are dropped.
fn raw_path(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    rest.find('/').map(|start| &rest[start..])
}

/// Replaces characters that are not allowed in file names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|character| match character {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();

    let trimmed = replaced.trim();
    if trimmed.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Best-effort `og:title` / `og:description` scrape. Empty values count as
/// absent.
pub fn social_meta(markup: &str) -> (Option<String>, Option<String>) {
    let capture = |regex: &Regex| {
        regex
            .captures(markup)
            .map(|caps| caps[1].trim().to_string())
            .filter(|value| !value.is_empty())
    };

    (capture(&OG_TITLE_REGEX), capture(&OG_DESCRIPTION_REGEX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missav_url_detection() {
        assert!(is_missav_url("https://missav.ai/dm1/naac-032"));
        assert!(is_missav_url("  http://www.missav.ws/abc "));
        assert!(is_missav_url("HTTPS://MISSAV.AI/abc"));
        assert!(!is_missav_url("https://missav.com/abc"));
        assert!(!is_missav_url("https://example.com/missav.ai/abc"));
        assert!(!is_missav_url("https://www.youtube.com/watch?v=abc"));
    }

    #[test]
    fn test_title_from_url() {
        assert_eq!(title_from_url("https://missav.ai/dm1/naac-032"), "naac-032");
        assert_eq!(title_from_url("https://missav.ai/110625_001"), "110625_001");
        assert_eq!(title_from_url("https://missav.ai/ipzz-556-uncensored-leak"), "ipzz-556");
        assert_eq!(title_from_url("https://missav.ai/abc-123-uncensored/"), "abc-123");
        assert_eq!(title_from_url("https://missav.ai/abc-123-leak"), "abc-123");
    }

    #[test]
    fn test_title_from_url_keeps_raw_characters() {
        assert_eq!(title_from_url("https://missav.ai/dm1/測試-001"), "測試-001");
        assert_eq!(title_from_url("https://missav.ai/dm1/測試-001-uncensored-leak"), "測試-001");
        assert_eq!(title_from_url("https://missav.ai/dm1/naac-032?ref=home#top"), "naac-032");
        assert_eq!(title_from_url("https://missav.ai?x=/abc"), "video");
    }

    #[test]
    fn test_title_from_url_only_first_suffix_removed() {
        assert_eq!(title_from_url("https://missav.ai/abc-leak-uncensored"), "abc-leak");
    }

    #[test]
    fn test_title_from_url_fallbacks() {
        assert_eq!(title_from_url("https://missav.ai/"), "video");
        assert_eq!(title_from_url("not a url"), "video");
        assert_eq!(title_from_url("https://missav.ai/-leak"), "video");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a<b>c:d\"e/f\\g|h?i*j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("   "), "video");
        assert_eq!(sanitize_filename(" My Clip "), "My Clip");
    }

    #[test]
    fn test_social_meta() {
        let page = r#"<head>
            <meta property="og:title" content=" NAAC-032 Title ">
            <meta property='og:description' content='Some description'>
        </head>"#;
        let (title, description) = social_meta(page);
        assert_eq!(title.as_deref(), Some("NAAC-032 Title"));
        assert_eq!(description.as_deref(), Some("Some description"));
    }

    #[test]
    fn test_social_meta_absent_or_empty() {
        let (title, description) = social_meta(r#"<meta property="og:title" content="">"#);
        assert!(title.is_none());
        assert!(description.is_none());
    }
}
