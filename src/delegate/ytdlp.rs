use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{DelegateOutcome, DownloadOptions, Downloader, ProgressHook};
use crate::error::DelegateError;
use crate::progress::ProgressEvent;

const PROGRESS_PREFIX: &str = "__progress__";
const TITLE_PREFIX: &str = "__title__";
const DESCRIPTION_PREFIX: &str = "__description__";

const PROGRESS_TEMPLATE: &str = "download:__progress__ %(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.fragment_index)s|%(progress.fragment_count)s|%(progress._percent_str)s";
const TITLE_PRINT: &str = "before_dl:__title__%(title)j";
const DESCRIPTION_PRINT: &str = "before_dl:__description__%(description)j";

/// Runs the `yt-dlp` binary as the delegate.
pub struct YtDlp {
    binary: PathBuf,
}

/// A classified line of yt-dlp output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Progress(ProgressEvent),
    Title(String),
    Description(String),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn build_args(url: &str, options: &DownloadOptions) -> Vec<String> {
        let mut args: Vec<String> = [
            "--no-playlist",
            "--no-warnings",
            "--no-colors",
            "--newline",
            "--progress",
            "--no-simulate",
            "--progress-template",
            PROGRESS_TEMPLATE,
            "--print",
            TITLE_PRINT,
            "--print",
            DESCRIPTION_PRINT,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        args.push("-f".to_string());
        args.push(options.format_selector.clone());
        if !options.merge_container.is_empty() {
            args.push("--merge-output-format".to_string());
            args.push(options.merge_container.clone());
        }
        args.push("-o".to_string());
        args.push(options.output_template.clone());

        for (name, value) in &options.http_headers {
            args.push("--add-headers".to_string());
            args.push(format!("{name}:{value}"));
        }

        if !options.subtitle_languages.is_empty() {
            args.push("--write-subs".to_string());
            args.push("--write-auto-subs".to_string());
            args.push("--sub-langs".to_string());
            args.push(options.subtitle_languages.join(","));
            if let Some(format) = &options.subtitle_format {
                args.push("--sub-format".to_string());
                args.push(format.clone());
            }
        }

        if let Some(cookie_file) = &options.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookie_file.to_string_lossy().to_string());
        }

        args.push(url.to_string());
        args
    }
}

#[async_trait]
impl Downloader for YtDlp {
    async fn download(
        &self,
        url: &str,
        options: &DownloadOptions,
        hook: &mut ProgressHook<'_>,
    ) -> Result<DelegateOutcome, DelegateError> {
        let args = Self::build_args(url, options);
        info!("starting yt-dlp for {url}");
        debug!("yt-dlp args: {:?}", args);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    DelegateError::NotInstalled
                } else {
                    DelegateError::Spawn(error)
                }
            })?;

        // With --print yt-dlp runs quiet and reports progress on stderr, so
        // both pipes feed one loop.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let readers = [
            child.stdout.take().map(|pipe| forward_lines(pipe, Stream::Stdout, tx.clone())),
            child.stderr.take().map(|pipe| forward_lines(pipe, Stream::Stderr, tx.clone())),
        ];
        drop(tx);

        let mut outcome = DelegateOutcome::default();
        let mut stderr_lines = Vec::new();

        while let Some((stream, line)) = rx.recv().await {
            match parse_output_line(&line) {
                OutputLine::Progress(event) => {
                    if hook(&event).is_err() {
                        info!("cancelling yt-dlp for {url}");
                        if let Err(error) = child.kill().await {
                            warn!("could not stop yt-dlp: {error}");
                        }
                        for reader in readers.into_iter().flatten() {
                            reader.abort();
                        }
                        return Err(DelegateError::Cancelled);
                    }
                }
                OutputLine::Title(title) => outcome.title = Some(title),
                OutputLine::Description(description) => outcome.description = Some(description),
                OutputLine::Other => {
                    if stream == Stream::Stderr {
                        stderr_lines.push(line);
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|error| DelegateError::Failed(format!("yt-dlp process failed: {error}")))?;

        if !status.success() {
            return Err(DelegateError::Failed(run_error_message(&stderr_lines)));
        }

        Ok(outcome)
    }
}

fn forward_lines<R>(
    pipe: R,
    stream: Stream,
    tx: mpsc::UnboundedSender<(Stream, String)>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((stream, line)).is_err() {
                break;
            }
        }
    })
}

fn run_error_message(stderr_lines: &[String]) -> String {
    stderr_lines
        .iter()
        .map(|line| line.trim())
        .rfind(|line| !line.is_empty())
        .unwrap_or("yt-dlp could not complete the download")
        .to_string()
}

pub fn parse_output_line(line: &str) -> OutputLine {
    let line = line.trim();

    if let Some(fields) = line.strip_prefix(PROGRESS_PREFIX) {
        return OutputLine::Progress(parse_progress_fields(fields.trim_start()));
    }
    if let Some(value) = line.strip_prefix(TITLE_PREFIX) {
        return parse_printed(value).map_or(OutputLine::Other, OutputLine::Title);
    }
    if let Some(value) = line.strip_prefix(DESCRIPTION_PREFIX) {
        return parse_printed(value).map_or(OutputLine::Other, OutputLine::Description);
    }
    if line.starts_with("[Merger]") {
        return OutputLine::Progress(ProgressEvent::Finished);
    }

    OutputLine::Other
}

fn parse_progress_fields(fields: &str) -> ProgressEvent {
    let mut parts = fields.splitn(6, '|');
    let status = parts.next().unwrap_or_default().trim();
    let downloaded_bytes = parts.next().and_then(parse_number);
    let total_bytes = parts.next().and_then(parse_number);
    let fragment_index = parts.next().and_then(parse_number);
    let fragment_count = parts.next().and_then(parse_number);
    let percent_text = parts
        .next()
        .map(str::trim)
        .filter(|text| !text.is_empty() && *text != "NA")
        .map(ToString::to_string);

    match status {
        "downloading" => ProgressEvent::Downloading {
            downloaded_bytes,
            total_bytes,
            fragment_index,
            fragment_count,
            percent_text,
        },
        "finished" => ProgressEvent::Finished,
        _ => ProgressEvent::Other,
    }
}

fn parse_number(field: &str) -> Option<u64> {
    let field = field.trim();
    field.parse::<u64>().ok().or_else(|| {
        field
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite() && *value >= 0.0)
            .map(|value| value as u64)
    })
}

/// Values are printed with the `j` conversion, so they arrive JSON-quoted.
fn parse_printed(value: &str) -> Option<String> {
    serde_json::from_str::<Option<String>>(value.trim())
        .ok()
        .flatten()
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
