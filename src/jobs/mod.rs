//! Download jobs: state, the transient result table, packaging and the
//! orchestrator that drives one attempt to a terminal state.

mod orchestrator;
mod package;
mod results;
mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use orchestrator::{CancelPredicate, Orchestrator, OrchestratorSettings};
pub use package::{Deliverable, package_outputs};
pub use results::{JobResult, Payload, ResultCache};
pub use store::{JobStore, JobUpdate};

pub const QUEUED_MESSAGE: &str = "Queued";
pub const PREPARING_MESSAGE: &str = "Preparing download…";
pub const DONE_MESSAGE: &str = "Done";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    #[serde(rename = "video", alias = "media")]
    Media,
    #[serde(rename = "subs", alias = "subtitles")]
    Subtitles,
    #[serde(rename = "both")]
    Both,
}

impl OutputKind {
    /// Accepts the wire names and their aliases regardless of case and
    /// surrounding whitespace.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "video" | "media" => Some(Self::Media),
            "subs" | "subtitles" => Some(Self::Subtitles),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub source_url: String,
    pub desired_container: String,
    pub output_kind: OutputKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "downloading")]
    Running,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "error")]
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub source_url: String,
    pub output_kind: OutputKind,
    pub status: JobStatus,
    pub progress: u8,
    pub status_message: Option<String>,
    pub page_title: Option<String>,
    pub social_title: Option<String>,
    pub social_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub cancel_requested: bool,
}

impl Job {
    pub fn new(request: &DownloadRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_url: request.source_url.clone(),
            output_kind: request.output_kind,
            status: JobStatus::Pending,
            progress: 0,
            status_message: Some(QUEUED_MESSAGE.to_string()),
            page_title: None,
            social_title: None,
            social_description: None,
            created_at: Utc::now(),
            completed_at: None,
            cancel_requested: false,
        }
    }
}
