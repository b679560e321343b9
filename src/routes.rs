//! The HTTP surface: four routes plus a health probe.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::client::{StreamQuery, VideoClient, VideoInfo};
use crate::download::download_video;
use crate::error::ApiError;
use crate::watch_url::is_valid_watch_url;

/// Everything a handler needs, constructed once at startup and injected
/// through axum's `State`.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<dyn VideoClient>,
    pub download_root: PathBuf,
    pub trust_proxy_headers: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/files/{video_id}/{filename}", get(serve_file))
        .route("/download/{resolution}", post(download_by_resolution))
        .route("/video_info", post(video_info))
        .route("/available_resolutions", post(available_resolutions))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct VideoRequest {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    message: String,
    file: String,
    download_url: String,
}

#[derive(Debug, Serialize)]
struct ResolutionsResponse {
    progressive: Vec<String>,
    all: Vec<String>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn download_by_resolution(
    State(state): State<AppState>,
    Path(resolution): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<VideoRequest>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let url = require_valid_url(&payload, "Missing 'url' parameter.")?;

    let outcome =
        download_video(state.client.as_ref(), &state.download_root, &url, &resolution).await?;

    let download_url = format!(
        "{}/files/{}/{}",
        request_base_url(&state, &headers),
        outcome.video_id,
        outcome.file_name
    );

    Ok(Json(DownloadResponse {
        message: "Video downloaded successfully.".to_string(),
        file: outcome.file_name,
        download_url,
    }))
}

async fn video_info(
    State(state): State<AppState>,
    Json(payload): Json<VideoRequest>,
) -> Result<Json<VideoInfo>, ApiError> {
    let url = require_valid_url(&payload, "Missing 'url' parameter in the request body.")?;
    let handle = state.client.open(&url).await?;
    Ok(Json(handle.info))
}

async fn available_resolutions(
    State(state): State<AppState>,
    Json(payload): Json<VideoRequest>,
) -> Result<Json<ResolutionsResponse>, ApiError> {
    let url = require_valid_url(&payload, "Missing 'url' parameter in the request body.")?;
    let handle = state.client.open(&url).await?;

    let progressive: BTreeSet<String> = handle
        .streams(&StreamQuery::progressive_mp4())
        .filter_map(|stream| stream.resolution())
        .collect();
    let all: BTreeSet<String> = handle
        .streams(&StreamQuery::mp4())
        .filter_map(|stream| stream.resolution())
        .collect();

    Ok(Json(ResolutionsResponse {
        progressive: progressive.into_iter().collect(),
        all: all.into_iter().collect(),
    }))
}

async fn serve_file(
    State(state): State<AppState>,
    Path((video_id, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let candidate = state.download_root.join(&video_id).join(&filename);
    let resolved = resolve_served_path(&state.download_root, &candidate).await?;

    let metadata = tokio::fs::metadata(&resolved).await.map_err(|error| {
        ApiError::internal(format!("could not stat {}: {error}", resolved.display()))
    })?;
    let file = tokio::fs::File::open(&resolved).await.map_err(|error| {
        ApiError::internal(format!("could not open {}: {error}", resolved.display()))
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&filename)),
    );
    headers.insert(
        CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.len().to_string())
            .map_err(|_| ApiError::internal("could not build the download size header"))?,
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&attachment_disposition(&filename))
            .map_err(|_| ApiError::internal("could not build the download header"))?,
    );

    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

fn require_valid_url(payload: &VideoRequest, missing_message: &str) -> Result<String, ApiError> {
    let url = payload
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::bad_request(missing_message))?;

    if !is_valid_watch_url(url) {
        return Err(ApiError::bad_request("Invalid YouTube URL."));
    }

    Ok(url.to_string())
}

/// Base URL of the running service as the caller reached it, so the
/// returned download link resolves from the caller's side.
fn request_base_url(state: &AppState, headers: &HeaderMap) -> String {
    let header = |key: &str| {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    let host = if state.trust_proxy_headers {
        header("x-forwarded-host").or_else(|| header("host"))
    } else {
        header("host")
    }
    .unwrap_or_else(|| "localhost".to_string());

    let scheme = if state.trust_proxy_headers {
        header("x-forwarded-proto").unwrap_or_else(|| "http".to_string())
    } else {
        "http".to_string()
    };

    format!("{scheme}://{host}")
}

async fn resolve_served_path(
    root: &std::path::Path,
    candidate: &std::path::Path,
) -> Result<PathBuf, ApiError> {
    let canonical_root = tokio::fs::canonicalize(root)
        .await
        .map_err(|_| ApiError::not_found("File not found."))?;

    let canonical = match tokio::fs::canonicalize(candidate).await {
        Ok(path) => path,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found."));
        }
        Err(error) => {
            return Err(ApiError::internal(format!(
                "could not resolve {}: {error}",
                candidate.display()
            )));
        }
    };

    if !canonical.starts_with(&canonical_root) {
        warn!(path = %canonical.display(), "refused to serve a file outside the download root");
        return Err(ApiError::not_found("File not found."));
    }

    let metadata = tokio::fs::metadata(&canonical).await.map_err(|error| {
        ApiError::internal(format!("could not stat {}: {error}", canonical.display()))
    })?;
    if !metadata.is_file() {
        return Err(ApiError::not_found("File not found."));
    }

    Ok(canonical)
}

fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("m4a") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

fn attachment_disposition(filename: &str) -> String {
    let ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_' | ' ') {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "video.mp4".to_string()
    } else {
        compact.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_cover_the_produced_containers() {
        assert_eq!(content_type_for_filename("clip.mp4"), "video/mp4");
        assert_eq!(content_type_for_filename("clip.MP4"), "video/mp4");
        assert_eq!(
            content_type_for_filename("notes.txt"),
            "application/octet-stream"
        );
    }

    #[test]
    fn dispositions_quote_an_ascii_fallback() {
        let value = attachment_disposition("amélie.mp4");
        assert!(value.starts_with("attachment; filename=\"am_lie.mp4\""));
        assert!(value.contains("filename*=UTF-8''am%C3%A9lie.mp4"));
    }
}
