use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::package::{Deliverable, package_outputs};
use super::{DownloadRequest, Job, JobResult, JobStore, JobUpdate, ResultCache};
use crate::classify::list_files;
use crate::delegate::{DownloadOptions, Downloader};
use crate::error::{Cancelled, JobError, MissingOutput, PackagingError};
use crate::fetch::{PageSource, browser_headers};
use crate::missav::{ExtractionResult, extract_page, is_missav_url, sanitize_filename};
use crate::progress::{ProgressEvent, ProgressTracker};
use crate::scratch::{create_job_dir, remove_job_dir};

pub const MISSAV_FORMAT_SELECTOR: &str = "best/bestvideo+bestaudio";
pub const DELEGATE_FORMAT_SELECTOR: &str = "bestvideo+bestaudio/best";
pub const SUBTITLE_LANGUAGES: [&str; 6] = ["zh", "zh-TW", "zh-CN", "en", "en-US", "en-GB"];
pub const SUBTITLE_FORMAT: &str = "srt";
const FALLBACK_TITLE: &str = "video";
const INTERNAL_ERROR_MESSAGE: &str = "internal error while processing download";

/// Polled before every progress event; `true` stops the transfer.
pub type CancelPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub scratch_root: PathBuf,
    /// Used when a request names no container.
    pub default_container: String,
    /// Only used on the delegate path, and only when it exists.
    pub cookie_file: Option<PathBuf>,
    pub max_concurrent_downloads: usize,
}

struct Finished {
    title: String,
    social_title: Option<String>,
    social_description: Option<String>,
    deliverable: Deliverable,
}

/// Owns download attempts from dispatch to a terminal job state.
#[derive(Clone)]
pub struct Orchestrator {
    store: JobStore,
    results: ResultCache,
    downloader: Arc<dyn Downloader>,
    pages: Arc<dyn PageSource>,
    settings: Arc<OrchestratorSettings>,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        store: JobStore,
        results: ResultCache,
        downloader: Arc<dyn Downloader>,
        pages: Arc<dyn PageSource>,
        settings: OrchestratorSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_downloads.max(1)));
        Self {
            store,
            results,
            downloader,
            pages,
            settings: Arc::new(settings),
            permits,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn results(&self) -> &ResultCache {
        &self.results
    }

    /// Records a PENDING job and starts it in the background.
    pub fn create(&self, request: DownloadRequest) -> Uuid {
        let id = self.store.insert(Job::new(&request));
        info!(job_id = %id, "queued download for {}", request.source_url);
        self.dispatch(id, request);
        id
    }

    pub fn cancel(&self, id: Uuid) -> bool {
        self.store.apply(id, JobUpdate::RequestCancel)
    }

    /// Runs the job in the background, cancelled through the job store.
    pub fn dispatch(&self, id: Uuid, request: DownloadRequest) -> JoinHandle<()> {
        let store = self.store.clone();
        let cancel: CancelPredicate = Arc::new(move || store.is_cancel_requested(id));
        self.dispatch_with(id, request, cancel)
    }

    /// Like [`Orchestrator::dispatch`] with a caller-supplied cancellation
    /// predicate. A panic inside the job becomes a job error.
    pub fn dispatch_with(
        &self,
        id: Uuid,
        request: DownloadRequest,
        cancel: CancelPredicate,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let worker = {
                let this = this.clone();
                tokio::spawn(async move { this.run(id, request, cancel).await })
            };

            if let Err(error) = worker.await {
                warn!(job_id = %id, "download task aborted: {error}");
                this.store.apply(
                    id,
                    JobUpdate::Fail {
                        message: INTERNAL_ERROR_MESSAGE.to_string(),
                    },
                );
                remove_job_dir(&this.settings.scratch_root.join(id.to_string())).await;
            }
        })
    }

    /// Drives one job to DONE or ERROR. Does nothing unless the job is still
    /// PENDING once a download slot is free.
    pub async fn run(&self, id: Uuid, request: DownloadRequest, cancel: CancelPredicate) {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            self.store.apply(
                id,
                JobUpdate::Fail {
                    message: INTERNAL_ERROR_MESSAGE.to_string(),
                },
            );
            return;
        };

        if !self.store.apply(id, JobUpdate::Start) {
            debug!(job_id = %id, "job is no longer pending, not starting it");
            return;
        }
        info!(job_id = %id, "download started");

        let scratch_dir = match create_job_dir(&self.settings.scratch_root, id).await {
            Ok(dir) => dir,
            Err(error) => {
                warn!(job_id = %id, "could not create scratch directory: {error}");
                self.store.apply(
                    id,
                    JobUpdate::Fail {
                        message: format!("could not prepare download directory: {error}"),
                    },
                );
                return;
            }
        };

        match self.execute(id, &request, &scratch_dir, cancel).await {
            Ok(finished) => {
                info!(
                    job_id = %id,
                    "download finished as {}",
                    finished.deliverable.filename
                );
                self.results.insert(
                    id,
                    JobResult {
                        scratch_dir,
                        display_title: finished.title.clone(),
                        filename: finished.deliverable.filename,
                        payload: finished.deliverable.payload,
                    },
                );
                self.store.apply(
                    id,
                    JobUpdate::Complete {
                        page_title: finished.title,
                        social_title: finished.social_title,
                        social_description: finished.social_description,
                    },
                );
            }
            Err(error) => {
                warn!(job_id = %id, "download failed: {error}");
                self.store.apply(
                    id,
                    JobUpdate::Fail {
                        message: error.to_string(),
                    },
                );
                remove_job_dir(&scratch_dir).await;
            }
        }
    }

    async fn execute(
        &self,
        id: Uuid,
        request: &DownloadRequest,
        scratch_dir: &Path,
        cancel: CancelPredicate,
    ) -> Result<Finished, JobError> {
        let source_url = request.source_url.trim();
        let container = match request.desired_container.trim() {
            "" => self.settings.default_container.clone(),
            container => container.to_string(),
        };
        let headers = browser_headers(source_url);

        let (target_url, options, extraction) = if is_missav_url(source_url) {
            let markup = self.pages.fetch(source_url, &headers).await?;
            let extraction: ExtractionResult =
                extract_page(&markup, source_url).ok_or(JobError::ExtractionNotFound)?;
            debug!(job_id = %id, "manifest url {}", extraction.manifest_url);

            let options = DownloadOptions {
                format_selector: MISSAV_FORMAT_SELECTOR.to_string(),
                merge_container: container,
                output_template: output_template(scratch_dir, &extraction.derived_title),
                subtitle_languages: Vec::new(),
                subtitle_format: None,
                http_headers: headers,
                cookie_file: None,
            };
            (extraction.manifest_url.clone(), options, Some(extraction))
        } else {
            let options = DownloadOptions {
                format_selector: DELEGATE_FORMAT_SELECTOR.to_string(),
                merge_container: container,
                output_template: output_template(scratch_dir, "%(title)s"),
                subtitle_languages: SUBTITLE_LANGUAGES.iter().map(ToString::to_string).collect(),
                subtitle_format: Some(SUBTITLE_FORMAT.to_string()),
                http_headers: headers,
                cookie_file: self
                    .settings
                    .cookie_file
                    .clone()
                    .filter(|path| path.is_file()),
            };
            (source_url.to_string(), options, None)
        };

        let store = self.store.clone();
        let mut tracker = ProgressTracker::new();
        let mut hook = move |event: &ProgressEvent| -> Result<(), Cancelled> {
            if cancel() {
                return Err(Cancelled);
            }
            if let Some(update) = tracker.observe(event) {
                store.apply(
                    id,
                    JobUpdate::Progress {
                        percent: update.percent,
                        message: update.message,
                    },
                );
            }
            Ok(())
        };

        let outcome = self
            .downloader
            .download(&target_url, &options, &mut hook)
            .await?;

        let files = list_files(scratch_dir).await.map_err(PackagingError::from)?;
        if files.is_empty() {
            return Err(JobError::NoOutput(MissingOutput::Files));
        }

        let (title, social_title, social_description) = match extraction {
            Some(extraction) => (
                extraction.derived_title,
                extraction.social_title,
                extraction.social_description,
            ),
            None => (
                outcome
                    .title
                    .as_deref()
                    .map(sanitize_filename)
                    .unwrap_or_else(|| FALLBACK_TITLE.to_string()),
                outcome.title,
                outcome.description,
            ),
        };

        let deliverable =
            package_outputs(request.output_kind, scratch_dir, &title, &files).await?;

        Ok(Finished {
            title,
            social_title,
            social_description,
            deliverable,
        })
    }
}

fn output_template(scratch_dir: &Path, stem: &str) -> String {
    scratch_dir
        .join(format!("{stem}.%(ext)s"))
        .to_string_lossy()
        .to_string()
}
