//! Route-level tests driving the router with a stub video client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::NaiveDate;
use serde_json::{Value, json};
use tower::ServiceExt;

use tubeserve::client::{ClientError, StreamFormat, VideoClient, VideoHandle, VideoInfo};
use tubeserve::routes::{AppState, router};

struct StubClient {
    formats: Vec<StreamFormat>,
}

#[async_trait]
impl VideoClient for StubClient {
    async fn open(&self, url: &str) -> Result<VideoHandle, ClientError> {
        let info = VideoInfo {
            title: "Test Video".to_string(),
            author: Some("Test Channel".to_string()),
            length: 212,
            views: Some(1_000_000),
            description: Some("A clip used in tests.".to_string()),
            publish_date: NaiveDate::from_ymd_opt(2024, 3, 15),
        };
        Ok(VideoHandle::new(url, info, self.formats.clone()))
    }

    async fn download(
        &self,
        _handle: &VideoHandle,
        _stream: &StreamFormat,
        dest_dir: &Path,
    ) -> Result<PathBuf, ClientError> {
        let path = dest_dir.join("Test Video.mp4");
        tokio::fs::write(&path, b"not really an mp4")
            .await
            .map_err(|error| ClientError::Filesystem(error.to_string()))?;
        Ok(path)
    }
}

fn progressive(format_id: &str, height: u32) -> StreamFormat {
    StreamFormat {
        format_id: format_id.to_string(),
        container: "mp4".to_string(),
        has_video: true,
        has_audio: true,
        height: Some(height),
    }
}

fn video_only(format_id: &str, height: u32) -> StreamFormat {
    StreamFormat {
        format_id: format_id.to_string(),
        container: "mp4".to_string(),
        has_video: true,
        has_audio: false,
        height: Some(height),
    }
}

fn test_app(root: &Path, formats: Vec<StreamFormat>) -> Router {
    router(AppState {
        client: Arc::new(StubClient { formats }),
        download_root: root.to_path_buf(),
        trust_proxy_headers: false,
    })
}

async fn post_json(app: Router, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn download_returns_a_fully_qualified_file_url() {
    let root = tempfile::tempdir().unwrap();
    let app = test_app(root.path(), vec![progressive("22", 720)]);

    let (status, body) = post_json(
        app,
        "/download/720p",
        json!({"url": "https://www.youtube.com/watch?v=abc123"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Video downloaded successfully.");
    assert_eq!(body["file"], "test-video.mp4");
    let download_url = body["download_url"].as_str().unwrap();
    assert!(
        download_url.ends_with("/files/abc123/test-video.mp4"),
        "unexpected download_url {download_url}"
    );
    assert!(root.path().join("abc123/test-video.mp4").is_file());
}

#[tokio::test]
async fn download_without_a_matching_stream_is_a_server_error() {
    let root = tempfile::tempdir().unwrap();
    let app = test_app(
        root.path(),
        vec![progressive("18", 360), video_only("137", 1080)],
    );

    let (status, body) = post_json(
        app,
        "/download/1080p",
        json!({"url": "https://www.youtube.com/watch?v=abc123"}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "NO_MATCHING_STREAM");
}

#[tokio::test]
async fn download_requires_a_url() {
    let root = tempfile::tempdir().unwrap();
    let app = test_app(root.path(), vec![progressive("22", 720)]);

    let (status, body) = post_json(app, "/download/720p", json!({})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing 'url' parameter.");
}

#[tokio::test]
async fn video_info_requires_a_url() {
    let root = tempfile::tempdir().unwrap();
    let app = test_app(root.path(), vec![]);

    let (status, body) = post_json(app, "/video_info", json!({})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Missing 'url' parameter in the request body."
    );
}

#[tokio::test]
async fn short_links_are_rejected() {
    let root = tempfile::tempdir().unwrap();
    let app = test_app(root.path(), vec![]);

    let (status, body) = post_json(
        app,
        "/video_info",
        json!({"url": "https://youtu.be/abc123"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid YouTube URL.");
}

#[tokio::test]
async fn video_info_returns_the_client_metadata() {
    let root = tempfile::tempdir().unwrap();
    let app = test_app(root.path(), vec![progressive("22", 720)]);

    let (status, body) = post_json(
        app,
        "/video_info",
        json!({"url": "https://www.youtube.com/watch?v=abc123"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Test Video");
    assert_eq!(body["author"], "Test Channel");
    assert_eq!(body["length"], 212);
    assert_eq!(body["views"], 1_000_000);
    assert_eq!(body["publish_date"], "2024-03-15");
}

#[tokio::test]
async fn available_resolutions_are_deduplicated_and_sorted_as_strings() {
    let root = tempfile::tempdir().unwrap();
    let app = test_app(
        root.path(),
        vec![
            progressive("22", 720),
            progressive("18", 360),
            progressive("22-alt", 720),
            video_only("137", 1080),
            video_only("160", 144),
        ],
    );

    let (status, body) = post_json(
        app,
        "/available_resolutions",
        json!({"url": "https://www.youtube.com/watch?v=abc123"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progressive"], json!(["360p", "720p"]));
    // String order, so "1080p" sorts before "144p".
    assert_eq!(body["all"], json!(["1080p", "144p", "360p", "720p"]));
}

#[tokio::test]
async fn files_are_served_as_attachments() {
    let root = tempfile::tempdir().unwrap();
    tokio::fs::create_dir_all(root.path().join("vid1"))
        .await
        .unwrap();
    tokio::fs::write(root.path().join("vid1/clip.mp4"), b"clip bytes")
        .await
        .unwrap();
    let app = test_app(root.path(), vec![]);

    let request = Request::builder()
        .uri("/files/vid1/clip.mp4")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains("clip.mp4"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"clip bytes");
}

#[tokio::test]
async fn missing_files_are_not_found() {
    let root = tempfile::tempdir().unwrap();
    let app = test_app(root.path(), vec![]);

    let request = Request::builder()
        .uri("/files/vid1/nothing.mp4")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn files_outside_the_download_root_are_hidden() {
    let base = tempfile::tempdir().unwrap();
    let root = base.path().join("downloads");
    tokio::fs::create_dir_all(&root).await.unwrap();
    tokio::fs::write(base.path().join("secret.mp4"), b"secret")
        .await
        .unwrap();
    let app = test_app(&root, vec![]);

    let request = Request::builder()
        .uri("/files/../secret.mp4")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_ok() {
    let root = tempfile::tempdir().unwrap();
    let app = test_app(root.path(), vec![]);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
}
