//! HTTP download of feed archives.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use std::path::Path;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::FetchError;

/// Streams the body at `url` into a new file at `path`, chunk by chunk.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Fails on an unparseable URL, a transport error, a non-success status or
/// a local write error. A partially written file is left for the caller's
/// scoped directory to clean up.
pub async fn download_to_file<C: HttpClient>(
    client: &C,
    url: &str,
    path: &Path,
) -> Result<u64, FetchError> {
    let parsed = url
        .parse()
        .map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
    let req = reqwest::Request::new(reqwest::Method::GET, parsed);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }

    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = resp.bytes_stream();
    let mut total_bytes: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        total_bytes += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    debug!(total_bytes, path = %path.display(), "Feed archive written");
    Ok(total_bytes)
}
