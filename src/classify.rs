use std::path::{Path, PathBuf};

use tokio::io;

pub const MEDIA_EXTENSIONS: [&str; 7] = ["mp4", "mkv", "webm", "avi", "mov", "flv", "m4a"];
pub const SUBTITLE_EXTENSIONS: [&str; 4] = ["srt", "vtt", "ass", "ssa"];

/// Output of [`classify`]: at most one media file and every subtitle file,
/// both in path order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Classified {
    pub media: Option<PathBuf>,
    pub subtitles: Vec<PathBuf>,
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Picks the first media file by sorted path and collects all subtitle files.
/// Anything that is not a regular file, or matches neither extension set, is
/// ignored.
pub fn classify(files: &[PathBuf]) -> Classified {
    let mut sorted: Vec<&PathBuf> = files.iter().filter(|path| path.is_file()).collect();
    sorted.sort();

    let mut classified = Classified::default();
    for path in sorted {
        let Some(extension) = lowercase_extension(path) else {
            continue;
        };

        if MEDIA_EXTENSIONS.contains(&extension.as_str()) {
            if classified.media.is_none() {
                classified.media = Some(path.clone());
            }
        } else if SUBTITLE_EXTENSIONS.contains(&extension.as_str()) {
            classified.subtitles.push(path.clone());
        }
    }

    classified
}

/// Regular files directly inside `dir`, sorted by path.
pub async fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}
