use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::{OutputKind, Payload};
use crate::classify::classify;
use crate::error::{JobError, MissingOutput, PackagingError};

pub const ARCHIVE_EXTENSION: &str = "zip";

/// What the orchestrator hands to the result cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deliverable {
    pub filename: String,
    pub payload: Payload,
}

/// Applies the packaging policy for `kind` to the files produced in
/// `scratch_dir`.
pub async fn package_outputs(
    kind: OutputKind,
    scratch_dir: &Path,
    title: &str,
    files: &[PathBuf],
) -> Result<Deliverable, JobError> {
    let classified = classify(files);

    match kind {
        OutputKind::Media => {
            let media = classified
                .media
                .ok_or(JobError::NoOutput(MissingOutput::Media))?;
            let filename = match media.extension().and_then(|ext| ext.to_str()) {
                Some(extension) => format!("{title}.{extension}"),
                None => title.to_string(),
            };
            Ok(Deliverable {
                filename,
                payload: Payload::MediaFile(media),
            })
        }
        OutputKind::Subtitles => match classified.subtitles.as_slice() {
            [] => Err(JobError::NoOutput(MissingOutput::Subtitles)),
            [single] => Ok(Deliverable {
                filename: file_name(single),
                payload: Payload::SingleFile(single.clone()),
            }),
            many => {
                let filename = format!("{title}_subtitles.{ARCHIVE_EXTENSION}");
                let path = scratch_dir.join(&filename);
                let entries = write_archive(path.clone(), many.to_vec()).await?;
                Ok(Deliverable {
                    filename,
                    payload: Payload::Archive { path, entries },
                })
            }
        },
        OutputKind::Both => {
            let filename = format!("{title}.{ARCHIVE_EXTENSION}");
            let path = scratch_dir.join(&filename);
            let inputs: Vec<PathBuf> = files
                .iter()
                .filter(|file| **file != path && file.is_file())
                .cloned()
                .collect();
            let entries = write_archive(path.clone(), inputs).await?;
            Ok(Deliverable {
                filename,
                payload: Payload::Archive { path, entries },
            })
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string())
}

/// Writes a flat, deflated archive of `inputs` and returns the entry names
/// in write order.
pub async fn write_archive(
    archive_path: PathBuf,
    inputs: Vec<PathBuf>,
) -> Result<Vec<String>, PackagingError> {
    tokio::task::spawn_blocking(move || write_archive_blocking(&archive_path, &inputs)).await?
}

fn write_archive_blocking(
    archive_path: &Path,
    inputs: &[PathBuf],
) -> Result<Vec<String>, PackagingError> {
    let mut zip = ZipWriter::new(File::create(archive_path)?);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut entries = Vec::with_capacity(inputs.len());
    for input in inputs {
        let name = file_name(input);
        debug!("adding {:?} to {:?} as {name}", input, archive_path);
        zip.start_file(name.as_str(), options)?;
        let mut source = File::open(input)?;
        std::io::copy(&mut source, &mut zip)?;
        entries.push(name);
    }

    zip.finish()?;
    Ok(entries)
}
