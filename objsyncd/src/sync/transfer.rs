use std::io;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Hidden directory under the mirror root holding downloads in progress.
/// The root scan only indexes regular files, so nothing in here is mistaken
/// for a mirrored object, and no base name can land inside it.
pub const STAGING_DIR: &str = ".objsync-staging";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("body stream failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Request(err) => err.is_timeout() || err.is_connect() || err.is_body(),
            TransferError::Io(_) => false,
        }
    }
}

/// Streams a media response into `target`.
///
/// Bytes land in the staging directory next to `target` and are renamed over
/// it only after the body completes, so `target` never holds a truncated
/// object.
pub async fn write_response_to_path(
    response: reqwest::Response,
    target: &Path,
) -> Result<u64, TransferError> {
    let staged = staging_path(target);
    if let Some(staging_dir) = staged.parent() {
        tokio::fs::create_dir_all(staging_dir).await?;
    }
    let result = match stream_into(response, &staged).await {
        Ok(written) => tokio::fs::rename(&staged, target)
            .await
            .map(|()| written)
            .map_err(TransferError::from),
        Err(err) => Err(err),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(&staged).await;
    }
    result
}

async fn stream_into(response: reqwest::Response, staged: &Path) -> Result<u64, TransferError> {
    let mut file = tokio::fs::File::create(staged).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

pub fn staging_path(target: &Path) -> PathBuf {
    let parent = target.parent().unwrap_or_else(|| Path::new(""));
    let name = target.file_name().unwrap_or_default();
    parent.join(STAGING_DIR).join(name)
}

/// Removes whatever an interrupted run left in `root`'s staging directory.
pub async fn clear_staging(root: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(root.join(STAGING_DIR)).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
