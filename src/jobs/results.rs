use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;
use uuid::Uuid;

use crate::scratch::remove_job_dir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    MediaFile(PathBuf),
    SingleFile(PathBuf),
    Archive { path: PathBuf, entries: Vec<String> },
}

impl Payload {
    pub fn path(&self) -> &Path {
        match self {
            Self::MediaFile(path) | Self::SingleFile(path) => path,
            Self::Archive { path, .. } => path,
        }
    }
}

/// A finished job's deliverable, waiting to be served once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub scratch_dir: PathBuf,
    pub display_title: String,
    /// Name the client should save the deliverable as.
    pub filename: String,
    pub payload: Payload,
}

/// Process-wide table of finished results. Entries leave it when served or
/// when the process shuts down.
#[derive(Clone, Default)]
pub struct ResultCache {
    entries: Arc<Mutex<HashMap<Uuid, JobResult>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: Uuid, result: JobResult) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, result);
    }

    /// Removes and returns the entry; a second call for the same job gets
    /// `None`.
    pub fn take(&self, id: Uuid) -> Option<JobResult> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry and deletes its scratch directory.
    pub async fn purge(&self) {
        let drained: Vec<JobResult> = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.drain().map(|(_, result)| result).collect()
        };

        if !drained.is_empty() {
            info!("purging {} unserved download result(s)", drained.len());
        }
        for result in drained {
            remove_job_dir(&result.scratch_dir).await;
        }
    }
}
