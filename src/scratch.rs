//! Per-job scratch directories under the configured scratch root.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Creates the directory owned by job `id`.
pub async fn create_job_dir(root: &Path, id: Uuid) -> std::io::Result<PathBuf> {
    let dir = root.join(id.to_string());
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

/// Best-effort recursive removal.
pub async fn remove_job_dir(dir: &Path) {
    if let Err(error) = tokio::fs::remove_dir_all(dir).await
        && error.kind() != ErrorKind::NotFound
    {
        info!("could not remove scratch directory {:?}: {error}", dir);
    }
}

/// Removes `dir` once `delay` has passed, so a response still streaming from
/// it can finish.
pub fn schedule_removal(dir: PathBuf, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        remove_job_dir(&dir).await;
    });
}

/// Deletes every job directory under `root`, whatever its age. Entries whose
/// name is not a job id are left alone.
pub async fn remove_all_job_dirs(root: &Path) -> usize {
    let Some(mut entries) = open_root(root).await else {
        return 0;
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("could not iterate scratch root for cleanup: {error}");
                break;
            }
        };

        let is_job_dir = entry
            .file_name()
            .to_str()
            .is_some_and(|name| Uuid::parse_str(name).is_ok());
        let is_dir = entry.file_type().await.is_ok_and(|kind| kind.is_dir());
        if !is_job_dir || !is_dir {
            continue;
        }

        let path = entry.path();

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("could not remove job directory {:?}: {error}", path),
        }
    }

    removed
}

async fn open_root(root: &Path) -> Option<tokio::fs::ReadDir> {
    match tokio::fs::read_dir(root).await {
        Ok(entries) => Some(entries),
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("could not open scratch root for cleanup: {error}");
            }
            None
        }
    }
}

/// Deletes entries of `root` last modified more than `older_than` ago.
/// Returns how many entries were removed.
pub async fn sweep_stale(root: &Path, older_than: Duration) -> usize {
    if older_than.is_zero() {
        return 0;
    }

    let Some(mut entries) = open_root(root).await else {
        return 0;
    };

    let now = std::time::SystemTime::now();
    let mut removed = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("could not iterate scratch root for cleanup: {error}");
                break;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!("could not read metadata of {:?}: {error}", path);
                continue;
            }
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < older_than {
            continue;
        }

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("could not remove stale scratch entry {:?}: {error}", path),
        }
    }

    removed
}
