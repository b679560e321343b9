//! Orchestration of a single download request.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::client::{ClientError, StreamQuery, VideoClient};
use crate::slug::slugify;
use crate::watch_url::extract_video_id;

/// Result of a completed download, consumed once by the route layer.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub file_path: PathBuf,
    pub file_name: String,
    pub video_id: String,
}

/// Open the video, pick the first progressive mp4 stream at `resolution`,
/// download it into `<root>/<video_id>/` and rename it to the slugified
/// title. Re-downloading the same video overwrites the previous file; two
/// concurrent requests for the same id race without coordination.
pub async fn download_video(
    client: &dyn VideoClient,
    download_root: &Path,
    url: &str,
    resolution: &str,
) -> Result<DownloadOutcome, ClientError> {
    let handle = client.open(url).await?;

    let query = StreamQuery::progressive_mp4().with_resolution(resolution);
    let stream = handle
        .first_stream(&query)
        .ok_or(ClientError::NoMatchingStream)?
        .clone();

    // The validator guarantees a v= parameter upstream; the split itself
    // stays naive and is not re-checked here.
    let video_id = extract_video_id(url)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ClientError::Upstream(format!("no video id in {url}")))?
        .to_string();

    let out_dir = download_root.join(&video_id);
    tokio::fs::create_dir_all(&out_dir).await.map_err(|error| {
        ClientError::Filesystem(format!("could not create {}: {error}", out_dir.display()))
    })?;

    let downloaded = client.download(&handle, &stream, &out_dir).await?;

    let file_name = format!("{}.mp4", slugify(&handle.info.title));
    let file_path = out_dir.join(&file_name);
    tokio::fs::rename(&downloaded, &file_path)
        .await
        .map_err(|error| {
            ClientError::Filesystem(format!(
                "could not rename {} to {}: {error}",
                downloaded.display(),
                file_path.display()
            ))
        })?;

    info!(video_id, file = %file_path.display(), "video downloaded");

    Ok(DownloadOutcome {
        file_path,
        file_name,
        video_id,
    })
}
