use std::sync::Arc;

use stream_downloader::{
    api::{self, ApiError, AppState},
    config::Config,
    delegate::YtDlp,
    fetch::{HttpPageFetcher, PAGE_FETCH_TIMEOUT_SECONDS},
    jobs::{JobStore, Orchestrator, OrchestratorSettings, ResultCache},
    scratch,
    subtitles::SubtitleSearch,
};
use tokio::{net::TcpListener, time::Duration};
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "stream_downloader=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env();

    tokio::fs::create_dir_all(&config.scratch_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create the scratch directory {:?}: {error}",
                config.scratch_dir
            ))
        })?;
    let orphaned = scratch::remove_all_job_dirs(&config.scratch_dir).await;
    if orphaned > 0 {
        info!("removed {orphaned} job directories left by a previous run");
    }
    let swept = scratch::sweep_stale(&config.scratch_dir, config.stale_scratch_after).await;
    if swept > 0 {
        info!("removed {swept} stale scratch entries");
    }

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(PAGE_FETCH_TIMEOUT_SECONDS))
        .build()
        .map_err(|error| ApiError::internal(format!("Could not create HTTP client: {error}")))?;

    if let Some(cookie_file) = &config.cookie_file
        && !cookie_file.is_file()
    {
        warn!("YTDLP_COOKIES points to {:?}, which is not a file; it will be ignored", cookie_file);
    }

    let results = ResultCache::new();
    let orchestrator = Orchestrator::new(
        JobStore::new(),
        results.clone(),
        Arc::new(YtDlp::new(config.yt_dlp_path.clone())),
        Arc::new(HttpPageFetcher::with_client(http_client.clone())),
        OrchestratorSettings {
            scratch_root: config.scratch_dir.clone(),
            default_container: config.merge_format.clone(),
            cookie_file: config.cookie_file.clone(),
            max_concurrent_downloads: config.max_concurrent_downloads,
        },
    );
    let state = AppState {
        orchestrator,
        subtitles: Arc::new(SubtitleSearch::with_defaults(
            http_client,
            config.opensubtitles_api_key.clone(),
        )),
        result_retention: config.result_retention,
    };

    let cors = api::build_cors_layer(&config.origins())?;
    let app = api::router(state, cors);

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
    })?;
    info!("Backend ready on http://{}", config.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")));

    results.purge().await;
    let removed = scratch::remove_all_job_dirs(&config.scratch_dir).await;
    if removed > 0 {
        info!("removed {removed} job directories on shutdown");
    }
    served
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!("could not listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
