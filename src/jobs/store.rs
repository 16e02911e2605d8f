use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use uuid::Uuid;

use super::{DONE_MESSAGE, Job, JobStatus, PREPARING_MESSAGE};
use crate::error::JobError;

/// The only ways a job changes once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    Start,
    Progress {
        percent: u8,
        message: String,
    },
    Complete {
        page_title: String,
        social_title: Option<String>,
        social_description: Option<String>,
    },
    Fail {
        message: String,
    },
    RequestCancel,
}

/// Shared job table. Status pollers read snapshots; the job's background
/// unit is the single writer.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) -> Uuid {
        let id = job.id;
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, job);
        id
    }

    pub fn snapshot(&self, id: Uuid) -> Option<Job> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn is_cancel_requested(&self, id: Uuid) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .is_some_and(|job| job.cancel_requested)
    }

    /// Applies `update` to the job and reports whether anything changed.
    /// Terminal jobs never change again.
    pub fn apply(&self, id: Uuid, update: JobUpdate) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };
        if job.status.is_terminal() {
            return false;
        }

        match update {
            JobUpdate::Start => {
                if job.status != JobStatus::Pending {
                    return false;
                }
                job.status = JobStatus::Running;
                job.progress = 0;
                job.status_message = Some(PREPARING_MESSAGE.to_string());
            }
            JobUpdate::Progress { percent, message } => {
                if job.status != JobStatus::Running {
                    return false;
                }
                job.progress = job.progress.max(percent.min(100));
                job.status_message = Some(message);
            }
            JobUpdate::Complete {
                page_title,
                social_title,
                social_description,
            } => {
                job.status = JobStatus::Done;
                job.progress = 100;
                job.status_message = Some(DONE_MESSAGE.to_string());
                job.page_title = Some(page_title);
                if social_title.is_some() {
                    job.social_title = social_title;
                }
                if social_description.is_some() {
                    job.social_description = social_description;
                }
                job.completed_at = Some(Utc::now());
            }
            JobUpdate::Fail { message } => {
                job.status = JobStatus::Error;
                job.status_message = Some(message);
                job.completed_at = Some(Utc::now());
            }
            JobUpdate::RequestCancel => {
                if job.status == JobStatus::Pending {
                    // Never started, so nothing has to unwind.
                    job.status = JobStatus::Error;
                    job.status_message = Some(JobError::Cancelled.to_string());
                    job.completed_at = Some(Utc::now());
                } else {
                    job.cancel_requested = true;
                }
            }
        }

        true
    }
}
