use std::collections::HashSet;
use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tokio_util::io::ReaderStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::non_empty;
use crate::jobs::{DownloadRequest, JobStatus, Orchestrator, OutputKind};
use crate::scratch::{remove_job_dir, schedule_removal};
use crate::subtitles::{SubtitleCandidate, SubtitleSearch, SubtitleSource};

const FILENAME_HEADER: &str = "x-download-filename";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub subtitles: Arc<SubtitleSearch>,
    pub result_retention: Duration,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: None,
        }
    }

    fn job_not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "Download job not found.".to_string(),
            code: Some("JOB_NOT_FOUND"),
        }
    }

    fn result_expired() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "The file has expired, start the download again.".to_string(),
            code: Some("RESULT_EXPIRED"),
        }
    }

    fn subtitle_unavailable() -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: "Could not get the subtitle file (check OPENSUBTITLES_API_KEY for OpenSubtitles, or that the Subtitle Cat page has that language).".to_string(),
            code: Some("SUBTITLE_UNAVAILABLE"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct StartDownloadBody {
    pub url: String,
    #[serde(default)]
    pub download_type: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
}

/// A missing or blank type means video.
fn resolve_download_type(value: Option<&str>) -> Result<OutputKind, ApiError> {
    let Some(name) = value.and_then(non_empty) else {
        return Ok(OutputKind::Media);
    };
    OutputKind::from_name(name)
        .ok_or_else(|| ApiError::bad_request("download_type must be video, subs or both."))
}

#[derive(Debug, Serialize)]
pub struct StartDownloadResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub title: Option<String>,
    pub social_title: Option<String>,
    pub social_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SubtitleSearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub lang: String,
}

#[derive(Debug, Serialize)]
pub struct SubtitleSearchResponse {
    pub data: Vec<SubtitleCandidate>,
}

#[derive(Debug, Deserialize)]
pub struct SubtitleDownloadQuery {
    pub source: SubtitleSource,
    #[serde(default)]
    pub locator: String,
    #[serde(default)]
    pub lang: String,
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/download", post(start_download))
        .route("/api/download/status/{job_id}", get(download_status))
        .route("/api/download/{job_id}/cancel", post(cancel_download))
        .route("/api/download/result/{job_id}", get(download_result))
        .route("/api/subs/search", get(search_subtitles))
        .route("/api/subs/download", get(download_subtitle))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn start_download(
    State(state): State<AppState>,
    Json(payload): Json<StartDownloadBody>,
) -> Result<Json<StartDownloadResponse>, ApiError> {
    let url = payload.url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("Enter a URL before downloading."));
    }
    if !is_http_url(url) {
        return Err(ApiError::bad_request("Only http and https URLs can be downloaded."));
    }

    let output_kind = resolve_download_type(payload.download_type.as_deref())?;

    let job_id = state.orchestrator.create(DownloadRequest {
        source_url: url.to_string(),
        desired_container: payload
            .container
            .as_deref()
            .and_then(non_empty)
            .unwrap_or_default()
            .to_string(),
        output_kind,
    });

    Ok(Json(StartDownloadResponse { job_id }))
}

pub async fn download_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .orchestrator
        .store()
        .snapshot(job_id)
        .ok_or_else(ApiError::job_not_found)?;

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status,
        progress: job.progress,
        message: job.status_message,
        title: job.page_title,
        social_title: job.social_title,
        social_description: job.social_description,
        created_at: job.created_at,
        completed_at: job.completed_at,
    }))
}

pub async fn cancel_download(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.orchestrator.store().snapshot(job_id).is_none() {
        return Err(ApiError::job_not_found());
    }
    if !state.orchestrator.cancel(job_id) {
        return Err(ApiError::bad_request("The download has already finished."));
    }

    info!(job_id = %job_id, "cancellation requested");
    Ok(Json(serde_json::json!({"job_id": job_id, "cancel_requested": true})))
}

pub async fn download_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let job = state
        .orchestrator
        .store()
        .snapshot(job_id)
        .ok_or_else(ApiError::job_not_found)?;
    if job.status != JobStatus::Done {
        return Err(ApiError::bad_request("The download has not finished or it failed."));
    }

    let result = state
        .orchestrator
        .results()
        .take(job_id)
        .ok_or_else(ApiError::result_expired)?;

    let path = result.payload.path().to_path_buf();
    let opened = async {
        let file = tokio::fs::File::open(&path).await?;
        let metadata = file.metadata().await?;
        Ok::<_, std::io::Error>((file, metadata.len()))
    }
    .await;
    let (file, content_length) = match opened {
        Ok(opened) => opened,
        Err(error) => {
            warn!(job_id = %job_id, "could not open result {:?}: {error}", path);
            remove_job_dir(&result.scratch_dir).await;
            return Err(ApiError::result_expired());
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&result.filename)),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&result.filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );
    headers.insert(
        HeaderName::from_static(FILENAME_HEADER),
        HeaderValue::from_str(&sanitize_ascii_filename(&result.filename))
            .map_err(|_| ApiError::internal("Could not build the file name header."))?,
    );

    debug!(job_id = %job_id, "serving {} ({content_length} bytes)", result.filename);
    schedule_removal(result.scratch_dir, state.result_retention);

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

pub async fn search_subtitles(
    State(state): State<AppState>,
    Query(query): Query<SubtitleSearchQuery>,
) -> Json<SubtitleSearchResponse> {
    let data = state.subtitles.search(&query.q, &query.lang).await;
    Json(SubtitleSearchResponse { data })
}

pub async fn download_subtitle(
    State(state): State<AppState>,
    Query(query): Query<SubtitleDownloadQuery>,
) -> Result<Response, ApiError> {
    let locator = non_empty(&query.locator)
        .ok_or_else(|| ApiError::bad_request("Provide the subtitle locator to download."))?;

    let file = state
        .subtitles
        .fetch(query.source, locator, &query.lang)
        .await
        .ok_or_else(ApiError::subtitle_unavailable)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&file.filename)),
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&file.filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );

    Ok((headers, file.bytes).into_response())
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

pub fn build_cors_layer(origins: &[String]) -> Result<CorsLayer, ApiError> {
    let normalized_origins = origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    let allowed_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate({
        let allowed_origins = Arc::clone(&allowed_origins);
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!(
                "CORS origin check raw={:?} normalized={:?} allowed={}",
                origin, normalized, allowed
            );
            allowed
        }
    });
    info!("CORS allow-list has {} origin(s)", allowed_origins.len());

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION, HeaderName::from_static(FILENAME_HEADER)]))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = FsPath::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "flv" => "video/x-flv",
        "m4a" => "audio/mp4",
        "zip" => "application/zip",
        "srt" => "application/x-subrip",
        "vtt" => "text/vtt",
        "ass" | "ssa" => "text/x-ssa",
        _ => "application/octet-stream",
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}
