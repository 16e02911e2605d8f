use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stream_downloader::delegate::{DelegateOutcome, DownloadOptions, Downloader, ProgressHook};
use stream_downloader::error::{DelegateError, FetchError};
use stream_downloader::fetch::PageSource;
use stream_downloader::jobs::{
    CancelPredicate, DownloadRequest, Job, JobStatus, JobStore, Orchestrator,
    OrchestratorSettings, OutputKind, Payload, ResultCache,
};
use stream_downloader::progress::ProgressEvent;
use tempfile::TempDir;
use uuid::Uuid;

const LEGACY_PAGE: &str = r#"<html><head>
<meta property="og:title" content="NAAC-032 Some Title">
<meta property="og:description" content="A description">
</head><body><script>eval(function(p,a,c,k,e,d){}('m3u8|1|2|3|4|5|com|surrit|https|video|ts|playlist|source'))</script></body></html>"#;

#[derive(Default)]
struct FakeDownloader {
    files: Vec<&'static str>,
    events: Vec<ProgressEvent>,
    title: Option<&'static str>,
    description: Option<&'static str>,
    failure: Option<&'static str>,
    panic: bool,
    calls: Mutex<Vec<(String, DownloadOptions)>>,
    accepted_events: AtomicUsize,
}

impl FakeDownloader {
    fn calls(&self) -> Vec<(String, DownloadOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(
        &self,
        url: &str,
        options: &DownloadOptions,
        hook: &mut ProgressHook<'_>,
    ) -> Result<DelegateOutcome, DelegateError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), options.clone()));

        if self.panic {
            panic!("delegate blew up");
        }

        for event in &self.events {
            hook(event).map_err(|_| DelegateError::Cancelled)?;
            self.accepted_events.fetch_add(1, Ordering::SeqCst);
        }

        if let Some(message) = self.failure {
            return Err(DelegateError::Failed(message.to_string()));
        }

        let dir = Path::new(&options.output_template)
            .parent()
            .expect("template has a directory");
        for name in &self.files {
            std::fs::write(dir.join(name), name.as_bytes()).unwrap();
        }

        Ok(DelegateOutcome {
            title: self.title.map(ToString::to_string),
            description: self.description.map(ToString::to_string),
        })
    }
}

enum FakePage {
    Markup(&'static str),
    Status(u16),
}

struct FakePages {
    page: FakePage,
    requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl FakePages {
    fn new(page: FakePage) -> Self {
        Self {
            page,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PageSource for FakePages {
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<String, FetchError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), headers.to_vec()));
        match self.page {
            FakePage::Markup(markup) => Ok(markup.to_string()),
            FakePage::Status(code) => Err(FetchError::Status(
                reqwest::StatusCode::from_u16(code).unwrap(),
            )),
        }
    }
}

struct Harness {
    scratch: TempDir,
    orchestrator: Orchestrator,
    downloader: Arc<FakeDownloader>,
    pages: Arc<FakePages>,
}

impl Harness {
    fn new(downloader: FakeDownloader, page: FakePage) -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let downloader = Arc::new(downloader);
        let pages = Arc::new(FakePages::new(page));
        let orchestrator = Orchestrator::new(
            JobStore::new(),
            ResultCache::new(),
            downloader.clone(),
            pages.clone(),
            OrchestratorSettings {
                scratch_root: scratch.path().to_path_buf(),
                default_container: "mkv".to_string(),
                cookie_file: None,
                max_concurrent_downloads: 2,
            },
        );
        Self {
            scratch,
            orchestrator,
            downloader,
            pages,
        }
    }

    fn job_dir(&self, id: Uuid) -> PathBuf {
        self.scratch.path().join(id.to_string())
    }

    fn enqueue(&self, url: &str, kind: OutputKind) -> (Uuid, DownloadRequest) {
        let request = DownloadRequest {
            source_url: url.to_string(),
            desired_container: String::new(),
            output_kind: kind,
        };
        let id = self.orchestrator.store().insert(Job::new(&request));
        (id, request)
    }

    async fn run(&self, url: &str, kind: OutputKind) -> (Uuid, Job) {
        let (id, request) = self.enqueue(url, kind);
        self.orchestrator.dispatch(id, request).await.unwrap();
        (id, self.orchestrator.store().snapshot(id).unwrap())
    }
}

fn downloading(index: u64, count: u64) -> ProgressEvent {
    ProgressEvent::Downloading {
        downloaded_bytes: None,
        total_bytes: None,
        fragment_index: Some(index),
        fragment_count: Some(count),
        percent_text: None,
    }
}

fn archive_entries(path: &Path) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|index| archive.by_index(index).unwrap().name().to_string())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn media_download_through_delegate() {
    let harness = Harness::new(
        FakeDownloader {
            files: vec!["My Clip_ Part 1.webm", "My Clip_ Part 1.en.srt"],
            events: vec![downloading(1, 4), downloading(4, 4), ProgressEvent::Finished],
            title: Some("My Clip: Part 1"),
            description: Some("desc"),
            ..FakeDownloader::default()
        },
        FakePage::Status(500),
    );

    let (id, job) = harness
        .run("https://example.com/watch?v=1", OutputKind::Media)
        .await;

    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.progress, 100);
    assert_eq!(job.page_title.as_deref(), Some("My Clip_ Part 1"));
    assert_eq!(job.social_title.as_deref(), Some("My Clip: Part 1"));
    assert_eq!(job.social_description.as_deref(), Some("desc"));
    assert!(job.completed_at.is_some());

    let calls = harness.downloader.calls();
    assert_eq!(calls.len(), 1);
    let (url, options) = &calls[0];
    assert_eq!(url, "https://example.com/watch?v=1");
    assert_eq!(options.format_selector, "bestvideo+bestaudio/best");
    assert_eq!(options.merge_container, "mkv");
    assert!(options.output_template.ends_with("%(title)s.%(ext)s"));
    assert_eq!(options.subtitle_languages.len(), 6);
    assert_eq!(options.subtitle_format.as_deref(), Some("srt"));
    assert!(
        options
            .http_headers
            .iter()
            .any(|(name, value)| name == "Referer" && value == "https://example.com/")
    );
    assert!(harness.pages.requests.lock().unwrap().is_empty());

    let result = harness.orchestrator.results().take(id).unwrap();
    assert_eq!(result.filename, "My Clip_ Part 1.webm");
    assert_eq!(
        result.payload,
        Payload::MediaFile(harness.job_dir(id).join("My Clip_ Part 1.webm"))
    );
    assert!(harness.orchestrator.results().take(id).is_none());
}

#[tokio::test]
async fn requested_container_is_passed_to_delegate() {
    let harness = Harness::new(
        FakeDownloader {
            files: vec!["clip.mp4"],
            title: Some("clip"),
            ..FakeDownloader::default()
        },
        FakePage::Status(500),
    );
    let request = DownloadRequest {
        source_url: "https://example.com/v".to_string(),
        desired_container: "mp4".to_string(),
        output_kind: OutputKind::Media,
    };
    let id = harness.orchestrator.store().insert(Job::new(&request));
    harness.orchestrator.dispatch(id, request).await.unwrap();

    assert_eq!(harness.downloader.calls()[0].1.merge_container, "mp4");
}

#[tokio::test]
async fn missav_page_resolves_manifest_before_delegating() {
    let harness = Harness::new(
        FakeDownloader {
            files: vec!["naac-032.mp4"],
            title: Some("video"),
            ..FakeDownloader::default()
        },
        FakePage::Markup(LEGACY_PAGE),
    );

    let (id, job) = harness
        .run("https://missav.ai/dm1/naac-032", OutputKind::Media)
        .await;

    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.page_title.as_deref(), Some("naac-032"));
    assert_eq!(job.social_title.as_deref(), Some("NAAC-032 Some Title"));
    assert_eq!(job.social_description.as_deref(), Some("A description"));

    let requests = harness.pages.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "https://missav.ai/dm1/naac-032");

    let calls = harness.downloader.calls();
    let (url, options) = &calls[0];
    assert_eq!(url, "https://surrit.com/5-4-3-2-1/video.m3u8");
    assert_eq!(options.format_selector, "best/bestvideo+bestaudio");
    assert!(options.output_template.ends_with("naac-032.%(ext)s"));
    assert!(options.subtitle_languages.is_empty());

    let result = harness.orchestrator.results().take(id).unwrap();
    assert_eq!(result.filename, "naac-032.mp4");
    assert_eq!(result.display_title, "naac-032");
}

#[tokio::test]
async fn missav_page_without_manifest_is_not_found() {
    let harness = Harness::new(
        FakeDownloader::default(),
        FakePage::Markup("<html><body>nothing here</body></html>"),
    );

    let (id, job) = harness
        .run("https://missav.ws/en/abc-123", OutputKind::Media)
        .await;

    assert_eq!(job.status, JobStatus::Error);
    assert!(
        job.status_message
            .unwrap()
            .contains("could not find a stream manifest")
    );
    assert!(harness.downloader.calls().is_empty());
    assert!(!harness.job_dir(id).exists());
}

#[tokio::test]
async fn missav_fetch_failure_is_distinct_from_not_found() {
    let harness = Harness::new(FakeDownloader::default(), FakePage::Status(403));

    let (_, job) = harness
        .run("https://missav.ai/dm1/naac-032", OutputKind::Media)
        .await;

    let message = job.status_message.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(message.starts_with("could not load page"));
    assert!(message.contains("403"));
}

#[tokio::test]
async fn several_subtitles_are_bundled() {
    let harness = Harness::new(
        FakeDownloader {
            files: vec![
                "Clip.mkv",
                "Clip.en.srt",
                "Clip.zh-TW.srt",
                "Clip.zh-CN.srt",
            ],
            title: Some("Clip"),
            ..FakeDownloader::default()
        },
        FakePage::Status(500),
    );

    let (id, job) = harness
        .run("https://example.com/v/2", OutputKind::Subtitles)
        .await;
    assert_eq!(job.status, JobStatus::Done);

    let result = harness.orchestrator.results().take(id).unwrap();
    assert_eq!(result.filename, "Clip_subtitles.zip");
    let Payload::Archive { path, entries } = result.payload else {
        panic!("expected an archive");
    };
    assert_eq!(entries.len(), 3);
    assert_eq!(
        archive_entries(&path),
        vec!["Clip.en.srt", "Clip.zh-CN.srt", "Clip.zh-TW.srt"]
    );
}

#[tokio::test]
async fn missing_subtitles_fail_the_job() {
    let harness = Harness::new(
        FakeDownloader {
            files: vec!["Clip.mkv"],
            title: Some("Clip"),
            ..FakeDownloader::default()
        },
        FakePage::Status(500),
    );

    let (id, job) = harness
        .run("https://example.com/v/3", OutputKind::Subtitles)
        .await;

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.status_message.as_deref(), Some("no subtitles produced"));
    assert!(harness.orchestrator.results().take(id).is_none());
}

#[tokio::test]
async fn both_bundles_every_file() {
    let harness = Harness::new(
        FakeDownloader {
            files: vec!["Clip.mkv", "Clip.en.srt", "Clip.jpg"],
            title: Some("Clip"),
            ..FakeDownloader::default()
        },
        FakePage::Status(500),
    );

    let (id, _) = harness.run("https://example.com/v/4", OutputKind::Both).await;

    let result = harness.orchestrator.results().take(id).unwrap();
    assert_eq!(result.filename, "Clip.zip");
    assert_eq!(
        archive_entries(result.payload.path()),
        vec!["Clip.en.srt", "Clip.jpg", "Clip.mkv"]
    );
}

#[tokio::test]
async fn empty_output_is_an_error() {
    let harness = Harness::new(
        FakeDownloader {
            title: Some("Clip"),
            ..FakeDownloader::default()
        },
        FakePage::Status(500),
    );

    let (_, job) = harness.run("https://example.com/v/5", OutputKind::Both).await;

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.status_message.as_deref(), Some("no files produced"));
}

#[tokio::test]
async fn transfer_error_is_reported_verbatim() {
    let harness = Harness::new(
        FakeDownloader {
            events: vec![downloading(1, 10)],
            failure: Some("ERROR: [generic] Unsupported URL: https://example.com/v/6"),
            ..FakeDownloader::default()
        },
        FakePage::Status(500),
    );

    let (id, job) = harness.run("https://example.com/v/6", OutputKind::Media).await;

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(
        job.status_message.as_deref(),
        Some("ERROR: [generic] Unsupported URL: https://example.com/v/6")
    );
    assert!(job.completed_at.is_some());
    assert!(!harness.job_dir(id).exists());
}

#[tokio::test]
async fn cancellation_stops_before_the_third_event() {
    let harness = Harness::new(
        FakeDownloader {
            files: vec!["Clip.mkv"],
            events: vec![downloading(1, 10), downloading(2, 10), downloading(3, 10)],
            ..FakeDownloader::default()
        },
        FakePage::Status(500),
    );

    let checks = Arc::new(AtomicUsize::new(0));
    let cancel: CancelPredicate = {
        let checks = checks.clone();
        Arc::new(move || checks.fetch_add(1, Ordering::SeqCst) + 1 >= 2)
    };

    let (id, request) = harness.enqueue("https://example.com/v/7", OutputKind::Media);
    harness
        .orchestrator
        .dispatch_with(id, request, cancel)
        .await
        .unwrap();

    let job = harness.orchestrator.store().snapshot(id).unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.status_message.unwrap().contains("cancelled by user"));
    assert_eq!(job.progress, 10);
    assert_eq!(checks.load(Ordering::SeqCst), 2);
    assert_eq!(harness.downloader.accepted_events.load(Ordering::SeqCst), 1);
    assert!(harness.orchestrator.results().take(id).is_none());
}

#[tokio::test]
async fn cancel_through_the_store_before_start() {
    let harness = Harness::new(FakeDownloader::default(), FakePage::Status(500));

    let (id, request) = harness.enqueue("https://example.com/v/8", OutputKind::Media);
    assert!(harness.orchestrator.cancel(id));
    harness.orchestrator.dispatch(id, request).await.unwrap();

    let job = harness.orchestrator.store().snapshot(id).unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(harness.downloader.calls().is_empty());
}

#[tokio::test]
async fn duplicate_dispatch_runs_once() {
    let harness = Harness::new(
        FakeDownloader {
            files: vec!["Clip.mkv"],
            title: Some("Clip"),
            ..FakeDownloader::default()
        },
        FakePage::Status(500),
    );

    let (id, request) = harness.enqueue("https://example.com/v/9", OutputKind::Media);
    let first = harness.orchestrator.dispatch(id, request.clone());
    let second = harness.orchestrator.dispatch(id, request);
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(harness.downloader.calls().len(), 1);
    assert_eq!(
        harness.orchestrator.store().snapshot(id).unwrap().status,
        JobStatus::Done
    );
}

#[tokio::test]
async fn panicking_delegate_becomes_job_error() {
    let harness = Harness::new(
        FakeDownloader {
            panic: true,
            ..FakeDownloader::default()
        },
        FakePage::Status(500),
    );

    let (id, job) = harness.run("https://example.com/v/10", OutputKind::Media).await;

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(
        job.status_message.as_deref(),
        Some("internal error while processing download")
    );
    assert!(!harness.job_dir(id).exists());
}

#[tokio::test]
async fn create_dispatches_in_background() {
    let harness = Harness::new(
        FakeDownloader {
            files: vec!["Clip.mkv"],
            title: Some("Clip"),
            ..FakeDownloader::default()
        },
        FakePage::Status(500),
    );

    let id = harness.orchestrator.create(DownloadRequest {
        source_url: "https://example.com/v/11".to_string(),
        desired_container: String::new(),
        output_kind: OutputKind::Media,
    });

    let mut status = JobStatus::Pending;
    for _ in 0..200 {
        status = harness.orchestrator.store().snapshot(id).unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(status, JobStatus::Done);
    assert!(harness.orchestrator.results().contains(id));
}
