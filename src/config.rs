use std::path::PathBuf;

use tokio::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
pub const DEFAULT_MERGE_FORMAT: &str = "mkv";
pub const DEFAULT_YT_DLP_PATH: &str = "yt-dlp";
pub const STALE_SCRATCH_SECONDS: u64 = 2 * 60 * 60;
pub const RESULT_RETENTION_SECONDS: u64 = 60;
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];

/// Settings read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Empty means the development defaults apply.
    pub allowed_origins: Vec<String>,
    pub max_concurrent_downloads: usize,
    pub scratch_dir: PathBuf,
    pub yt_dlp_path: PathBuf,
    pub cookie_file: Option<PathBuf>,
    pub merge_format: String,
    pub opensubtitles_api_key: Option<String>,
    pub stale_scratch_after: Duration,
    /// How long a served result's scratch directory is kept for the
    /// response to finish streaming.
    pub result_retention: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: resolve_bind_addr(),
            allowed_origins: read_list_env("ALLOWED_ORIGINS"),
            max_concurrent_downloads: read_usize_env("MAX_CONCURRENT_DOWNLOADS")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS),
            scratch_dir: read_string_env("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("stream-downloader")),
            yt_dlp_path: read_string_env("YT_DLP_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_YT_DLP_PATH)),
            cookie_file: read_string_env("YTDLP_COOKIES").map(PathBuf::from),
            merge_format: read_string_env("MERGE_FORMAT")
                .unwrap_or_else(|| DEFAULT_MERGE_FORMAT.to_string()),
            opensubtitles_api_key: read_string_env("OPENSUBTITLES_API_KEY"),
            stale_scratch_after: Duration::from_secs(
                read_u64_env("STALE_SCRATCH_SECONDS").unwrap_or(STALE_SCRATCH_SECONDS),
            ),
            result_retention: Duration::from_secs(RESULT_RETENTION_SECONDS),
        }
    }

    pub fn origins(&self) -> Vec<String> {
        if self.allowed_origins.is_empty() {
            DEFAULT_ALLOWED_ORIGINS.iter().map(ToString::to_string).collect()
        } else {
            self.allowed_origins.clone()
        }
    }
}

fn read_usize_env(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
}

fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
}

fn read_list_env(name: &str) -> Vec<String> {
    std::env::var(name)
        .ok()
        .map(|value| split_list(&value))
        .unwrap_or_default()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = read_string_env("APP_ADDR") {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
