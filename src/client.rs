//! Boundary to the external video client.
//!
//! Everything YouTube-specific (stream manifests, signatures, throttling,
//! token handling) lives in the `yt-dlp` executable. This module owns the
//! call boundary: spawning the process with a timeout, parsing its JSON
//! output into stream descriptors and classifying its failures.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

const CLIENT_TIMEOUT_SECONDS: u64 = 180;

/// What the video client can report, so routes can pick status codes
/// deliberately instead of collapsing everything into one failure.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no stream matches the requested filters")]
    NoMatchingStream,
    #[error("network failure talking to the video platform: {0}")]
    Network(String),
    #[error("the video platform rejected the client's credentials: {0}")]
    Auth(String),
    #[error("filesystem failure: {0}")]
    Filesystem(String),
    #[error("yt-dlp is not installed or not on PATH")]
    ClientMissing,
    #[error("video client failure: {0}")]
    Upstream(String),
}

impl ClientError {
    /// Stable machine-readable code carried in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoMatchingStream => "NO_MATCHING_STREAM",
            Self::Network(_) => "NETWORK_FAILURE",
            Self::Auth(_) => "AUTH_FAILURE",
            Self::Filesystem(_) => "FILESYSTEM_FAILURE",
            Self::ClientMissing => "CLIENT_MISSING",
            Self::Upstream(_) => "UPSTREAM_FAILURE",
        }
    }
}

/// OAuth settings handed to the client process. The token cache lives
/// wherever `cache_dir` points instead of in hidden process-global state.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub use_oauth: bool,
    pub cache_dir: Option<PathBuf>,
}

/// Read-only metadata projection for a video.
#[derive(Debug, Clone, Serialize)]
pub struct VideoInfo {
    pub title: String,
    pub author: Option<String>,
    pub length: u64,
    pub views: Option<u64>,
    pub description: Option<String>,
    pub publish_date: Option<NaiveDate>,
}

/// One downloadable stream as reported by the client.
#[derive(Debug, Clone)]
pub struct StreamFormat {
    pub format_id: String,
    pub container: String,
    pub has_video: bool,
    pub has_audio: bool,
    pub height: Option<u32>,
}

impl StreamFormat {
    /// A single file carrying both tracks, as opposed to adaptive streams.
    pub fn is_progressive(&self) -> bool {
        self.has_video && self.has_audio
    }

    /// Resolution label in the `"720p"` form, if the stream has video.
    pub fn resolution(&self) -> Option<String> {
        self.height.map(|height| format!("{height}p"))
    }
}

/// Filter set for stream listing: progressive-only, container, resolution.
#[derive(Debug, Clone, Default)]
pub struct StreamQuery {
    pub progressive: Option<bool>,
    pub container: Option<String>,
    pub resolution: Option<String>,
}

impl StreamQuery {
    /// Progressive mp4 streams, the only kind the orchestrator downloads.
    pub fn progressive_mp4() -> Self {
        Self {
            progressive: Some(true),
            container: Some("mp4".to_string()),
            resolution: None,
        }
    }

    /// All mp4 streams regardless of track layout.
    pub fn mp4() -> Self {
        Self {
            container: Some("mp4".to_string()),
            ..Self::default()
        }
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn matches(&self, stream: &StreamFormat) -> bool {
        if self
            .progressive
            .is_some_and(|wanted| stream.is_progressive() != wanted)
        {
            return false;
        }
        if self
            .container
            .as_deref()
            .is_some_and(|wanted| stream.container != wanted)
        {
            return false;
        }
        if self.resolution.is_some() && stream.resolution() != self.resolution {
            return false;
        }
        true
    }
}

/// An opened video: metadata plus the stream manifest.
#[derive(Debug, Clone)]
pub struct VideoHandle {
    url: String,
    pub info: VideoInfo,
    formats: Vec<StreamFormat>,
}

impl VideoHandle {
    pub fn new(url: impl Into<String>, info: VideoInfo, formats: Vec<StreamFormat>) -> Self {
        Self {
            url: url.into(),
            info,
            formats,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn streams<'a, 'q>(
        &'a self,
        query: &'q StreamQuery,
    ) -> impl Iterator<Item = &'a StreamFormat> + use<'a, 'q> {
        self.formats.iter().filter(move |stream| query.matches(stream))
    }

    pub fn first_stream(&self, query: &StreamQuery) -> Option<&StreamFormat> {
        self.streams(query).next()
    }
}

/// Call boundary to the video platform.
#[async_trait]
pub trait VideoClient: Send + Sync {
    /// Fetch metadata and the stream manifest for a watch URL.
    async fn open(&self, url: &str) -> Result<VideoHandle, ClientError>;

    /// Download `stream` into `dest_dir` under the client's own file name
    /// and return the path of the produced file.
    async fn download(
        &self,
        handle: &VideoHandle,
        stream: &StreamFormat,
        dest_dir: &Path,
    ) -> Result<PathBuf, ClientError>;
}

/// Production client driving the `yt-dlp` executable.
pub struct YtDlpClient {
    auth: AuthConfig,
    timeout: Duration,
}

impl YtDlpClient {
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            auth,
            timeout: Duration::from_secs(CLIENT_TIMEOUT_SECONDS),
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["--no-playlist".to_string(), "--no-warnings".to_string()];
        if self.auth.use_oauth {
            args.push("--username".to_string());
            args.push("oauth2".to_string());
            args.push("--password".to_string());
            args.push(String::new());
        }
        if let Some(cache_dir) = &self.auth.cache_dir {
            args.push("--cache-dir".to_string());
            args.push(cache_dir.to_string_lossy().into_owned());
        }
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<Output, ClientError> {
        let command = Command::new("yt-dlp").args(args).output();
        let output = timeout(self.timeout, command)
            .await
            .map_err(|_| ClientError::Network("the video client timed out".to_string()))?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ClientError::ClientMissing
                } else {
                    ClientError::Upstream(format!("could not spawn yt-dlp: {error}"))
                }
            })?;

        if !output.status.success() {
            return Err(classify_failure(&output.stderr));
        }

        Ok(output)
    }
}

#[async_trait]
impl VideoClient for YtDlpClient {
    async fn open(&self, url: &str) -> Result<VideoHandle, ClientError> {
        let mut args = self.base_args();
        args.push("-J".to_string());
        args.push(url.to_string());

        let output = self.run(args).await?;
        handle_from_json(url, &output.stdout)
    }

    async fn download(
        &self,
        handle: &VideoHandle,
        stream: &StreamFormat,
        dest_dir: &Path,
    ) -> Result<PathBuf, ClientError> {
        let template = format!("{}/%(title).140B.%(ext)s", dest_dir.to_string_lossy());

        let mut args = self.base_args();
        args.extend([
            "--newline".to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "-f".to_string(),
            stream.format_id.clone(),
            "-o".to_string(),
            template,
            handle.url.clone(),
        ]);

        let output = self.run(args).await?;
        let printed = printed_path(&output.stdout);
        resolve_downloaded_file(dest_dir, printed.as_deref()).await
    }
}

#[derive(Debug, Deserialize)]
struct RawVideoInfo {
    title: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    description: Option<String>,
    upload_date: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: String,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
}

fn handle_from_json(url: &str, stdout: &[u8]) -> Result<VideoHandle, ClientError> {
    let raw: RawVideoInfo = serde_json::from_slice(stdout)
        .map_err(|error| ClientError::Upstream(format!("could not parse client metadata: {error}")))?;

    let info = VideoInfo {
        title: raw
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| "Untitled".to_string()),
        author: raw.uploader,
        length: raw.duration.unwrap_or(0.0).round() as u64,
        views: raw.view_count,
        description: raw.description,
        publish_date: raw
            .upload_date
            .as_deref()
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y%m%d").ok()),
    };

    let formats = raw
        .formats
        .into_iter()
        .map(|format| StreamFormat {
            container: format.ext.unwrap_or_default(),
            has_video: track_present(format.vcodec.as_deref()),
            has_audio: track_present(format.acodec.as_deref()),
            height: format.height,
            format_id: format.format_id,
        })
        .collect();

    Ok(VideoHandle::new(url, info, formats))
}

fn track_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(value) if value != "none")
}

/// Last non-empty stderr line, mapped onto the error taxonomy.
fn classify_failure(stderr: &[u8]) -> ClientError {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp failed without output")
        .to_string();
    let lower = message.to_ascii_lowercase();

    if lower.contains("format is not available") {
        ClientError::NoMatchingStream
    } else if lower.contains("sign in")
        || lower.contains("login")
        || lower.contains("oauth")
        || lower.contains("authorization")
    {
        ClientError::Auth(message)
    } else if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("unable to download")
    {
        ClientError::Network(message)
    } else {
        ClientError::Upstream(message)
    }
}

fn printed_path(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}

/// Locate the file the client produced inside `dest_dir`.
///
/// The printed path is authoritative; if it is unusable the newest regular
/// file in the directory is taken instead, since the directory may already
/// hold files from earlier downloads of the same video.
async fn resolve_downloaded_file(
    dest_dir: &Path,
    printed: Option<&str>,
) -> Result<PathBuf, ClientError> {
    let canonical_dir = tokio::fs::canonicalize(dest_dir).await.map_err(|error| {
        ClientError::Filesystem(format!("could not resolve {}: {error}", dest_dir.display()))
    })?;

    if let Some(path) = printed
        && let Some(found) = candidate_within(&canonical_dir, Path::new(path)).await?
    {
        return Ok(found);
    }

    let mut entries = tokio::fs::read_dir(dest_dir).await.map_err(|error| {
        ClientError::Filesystem(format!("could not read {}: {error}", dest_dir.display()))
    })?;

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|error| ClientError::Filesystem(error.to_string()))?
    {
        let Some(valid) = candidate_within(&canonical_dir, &entry.path()).await? else {
            continue;
        };
        let modified = entry
            .metadata()
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().is_none_or(|(time, _)| modified > *time) {
            newest = Some((modified, valid));
        }
    }

    newest.map(|(_, path)| path).ok_or_else(|| {
        ClientError::Upstream("the client reported success but produced no file".to_string())
    })
}

async fn candidate_within(
    canonical_dir: &Path,
    candidate: &Path,
) -> Result<Option<PathBuf>, ClientError> {
    let metadata = match tokio::fs::metadata(candidate).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(ClientError::Filesystem(format!(
                "could not stat {}: {error}",
                candidate.display()
            )));
        }
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical = tokio::fs::canonicalize(candidate).await.map_err(|error| {
        ClientError::Filesystem(format!("could not resolve {}: {error}", candidate.display()))
    })?;

    if !canonical.starts_with(canonical_dir) {
        warn!(path = %canonical.display(), "client produced a file outside its directory");
        return Ok(None);
    }

    Ok(Some(canonical))
}
