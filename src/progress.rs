use once_cell::sync::Lazy;
use regex::Regex;

static PERCENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").unwrap());

pub const DOWNLOADING_MESSAGE: &str = "Downloading…";
pub const FINALIZING_MESSAGE: &str = "Merging files…";

/// Low-level transfer event reported by the delegate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProgressEvent {
    Downloading {
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
        fragment_index: Option<u64>,
        fragment_count: Option<u64>,
        percent_text: Option<String>,
    },
    Finished,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
}

/// Turns delegate events into a percentage that never goes backwards within
/// one job.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last_percent: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn percent(&self) -> u8 {
        self.last_percent
    }

    pub fn observe(&mut self, event: &ProgressEvent) -> Option<ProgressUpdate> {
        let (percent, message) = match event {
            ProgressEvent::Downloading {
                downloaded_bytes,
                total_bytes: Some(total),
                percent_text,
                ..
            } if *total > 0 => {
                let downloaded = downloaded_bytes.unwrap_or(0);
                let percent = (downloaded.saturating_mul(100) / total).min(100) as u8;
                let message = percent_text
                    .clone()
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| format!("{percent}%"));
                (Some(percent), message)
            }
            ProgressEvent::Downloading {
                fragment_index,
                fragment_count,
                percent_text,
                ..
            } => {
                let percent = percent_text
                    .as_deref()
                    .and_then(parse_percent)
                    .or_else(|| fragment_percent(*fragment_index, *fragment_count));
                let message = percent_text
                    .clone()
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| DOWNLOADING_MESSAGE.to_string());
                (percent, message)
            }
            ProgressEvent::Finished => (Some(100), FINALIZING_MESSAGE.to_string()),
            ProgressEvent::Other => return None,
        };

        if let Some(percent) = percent {
            self.last_percent = self.last_percent.max(percent);
        }

        Some(ProgressUpdate {
            percent: self.last_percent,
            message,
        })
    }
}

/// `" 45.6%"` gives 46.
pub fn parse_percent(text: &str) -> Option<u8> {
    let caps = PERCENT_REGEX.captures(text)?;
    let value: f64 = caps[1].parse().ok()?;
    Some((value + 0.5).min(100.0) as u8)
}

fn fragment_percent(index: Option<u64>, count: Option<u64>) -> Option<u8> {
    match (index, count) {
        (Some(index), Some(count)) if count > 0 => {
            Some((index.saturating_mul(100) / count).min(100) as u8)
        }
        _ => None,
    }
}
