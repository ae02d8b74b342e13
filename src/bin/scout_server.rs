#![forbid(unsafe_code)]

//! HTTP front end for the acquisition pipeline and the downloader.
//!
//! `POST /scrape` turns product descriptions into ranked TikTok video URLs.
//! `POST /download_videos` takes that same mapping back and stores the videos
//! under the download root, one directory per product.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use clap::Parser;
use reelscout::{
    config::{SettingsOverrides, resolve_settings},
    download::DownloadManager,
    downloads_from_settings,
    logging::{LogFormat, init_logging},
    model::{AcquisitionResult, DownloadOutcome, ProductQuery},
    pipeline::{AcquisitionPipeline, DEFAULT_VIDEOS_PER_QUERY},
    pipeline_from_settings,
};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

const DOWNLOAD_SUCCESS_MESSAGE: &str = "Videos downloaded successfully";

#[derive(Debug, Parser)]
#[command(name = "scout_server", about = "Serve the video scouting pipeline over HTTP")]
struct ServerArgs {
    /// Listen address (overrides SCOUT_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Listen port (overrides SCOUT_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Base directory for downloaded videos (overrides DOWNLOAD_ROOT).
    #[arg(long)]
    download_root: Option<PathBuf>,
    /// Worker pool size for lookups and downloads (overrides SCOUT_WORKERS).
    #[arg(long)]
    workers: Option<usize>,
    /// Path of the dotenv file to read.
    #[arg(long)]
    env_file: Option<PathBuf>,
    /// `pretty` or `json` (overrides LOG_FORMAT).
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl ServerArgs {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            download_root: self.download_root.clone(),
            scout_port: self.port,
            scout_host: self.host.clone(),
            workers: self.workers,
            env_path: self.env_file.clone(),
        }
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/SCOUT_HOST")
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<AcquisitionPipeline>,
    downloads: Arc<DownloadManager>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Body of `POST /scrape`. Queries arrive as `[[[name, description], ...]]`;
/// only the first batch is processed.
#[derive(Debug, Deserialize)]
struct ScrapeRequest {
    app_descriptions: Vec<Vec<Vec<String>>>,
    #[serde(default)]
    num_vids_each: Option<usize>,
}

impl ScrapeRequest {
    fn into_queries(self) -> ApiResult<(Vec<ProductQuery>, usize)> {
        let count = self.num_vids_each.unwrap_or(DEFAULT_VIDEOS_PER_QUERY);
        if count == 0 {
            return Err(ApiError::bad_request("num_vids_each must be at least 1"));
        }

        let mut batches = self.app_descriptions.into_iter();
        let batch = batches
            .next()
            .ok_or_else(|| ApiError::bad_request("app_descriptions must contain a batch"))?;
        let ignored = batches.count();
        if ignored > 0 {
            warn!(ignored, "only the first app_descriptions batch is processed");
        }

        let queries = batch
            .into_iter()
            .enumerate()
            .map(|(index, entry)| match <[String; 2]>::try_from(entry) {
                Ok([name, description]) if !name.trim().is_empty() => {
                    Ok(ProductQuery::new(name, description))
                }
                _ => Err(ApiError::bad_request(format!(
                    "app_descriptions entry {index} must be [name, description] with a non-empty name"
                ))),
            })
            .collect::<ApiResult<Vec<_>>>()?;
        Ok((queries, count))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DownloadResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    outcomes: Vec<DownloadOutcome>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    init_logging(args.log_format.unwrap_or_else(LogFormat::from_env))?;

    let settings = resolve_settings(args.overrides())?;
    let host = parse_host_arg(&settings.scout_host)?;

    let state = AppState {
        pipeline: Arc::new(pipeline_from_settings(&settings)),
        downloads: Arc::new(downloads_from_settings(&settings)),
    };

    let addr = SocketAddr::new(host, settings.scout_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        %addr,
        download_root = %settings.download_root.display(),
        workers = settings.workers,
        "scout server listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running scout server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/scrape", post(scrape))
        .route("/download_videos", post(download_videos))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still terminates.
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn scrape(
    State(state): State<AppState>,
    payload: Result<Json<ScrapeRequest>, JsonRejection>,
) -> ApiResult<Json<AcquisitionResult>> {
    let Json(payload) = payload?;
    let (queries, count) = payload.into_queries()?;
    info!(queries = queries.len(), count, "scrape requested");
    let result = state.pipeline.run(&queries, count).await;
    Ok(Json(result))
}

async fn download_videos(
    State(state): State<AppState>,
    payload: Result<Json<AcquisitionResult>, JsonRejection>,
) -> Response {
    let batch = match payload {
        Ok(Json(batch)) => batch,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };
    info!(
        categories = batch.len(),
        urls = batch.total_urls(),
        "download requested"
    );
    let report = state.downloads.download_all(&batch).await;

    let error = report.first_failure().map(|failed| {
        failed
            .error
            .clone()
            .unwrap_or_else(|| format!("download failed for {}", failed.url))
    });
    let (status, message) = if error.is_some() {
        (StatusCode::INTERNAL_SERVER_ERROR, None)
    } else {
        (StatusCode::OK, Some(DOWNLOAD_SUCCESS_MESSAGE.to_string()))
    };
    let body = DownloadResponse {
        message,
        error,
        outcomes: report.outcomes,
    };
    (status, Json(body)).into_response()
}
