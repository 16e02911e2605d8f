//! Local manifest extraction for MissAV, whose pages the delegate cannot
//! resolve on its own.

mod extract;
mod meta;
mod unpack;

pub use extract::{Strategy, extract_manifest};
pub use meta::{is_missav_url, sanitize_filename, social_meta, title_from_url};
pub use unpack::unpack;

/// Everything recovered from a MissAV page that the orchestrator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub manifest_url: String,
    pub derived_title: String,
    pub social_title: Option<String>,
    pub social_description: Option<String>,
}

/// Returns `None` when no strategy recognises the page.
pub fn extract_page(markup: &str, page_url: &str) -> Option<ExtractionResult> {
    let manifest_url = extract_manifest(markup)?;
    let (social_title, social_description) = social_meta(markup);

    Some(ExtractionResult {
        manifest_url,
        derived_title: title_from_url(page_url),
        social_title,
        social_description,
    })
}
