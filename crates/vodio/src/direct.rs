//! Single-file download with byte-range resume.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::{Client, StatusCode, header};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::DownloadError;

const KNOWN_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "avi", "mov", "m4v", "ts", "flv"];

/// What a finished direct download left in the job directory.
#[derive(Debug)]
pub struct FileArtifact {
    pub file_path: PathBuf,
    pub bytes_total: u64,
}

/// Downloads `url` into `job_dir` as a single resumable transfer.
///
/// A partial file from an earlier attempt is resumed with a `Range` request:
/// a 206 appends to it, a 200 means the server ignored the range and the
/// transfer restarts from zero. `on_progress` is called per chunk with
/// `(bytes_done, total)`; the total is `None` when the server does not report
/// one, and the caller must treat that as indeterminate.
pub async fn download_file(
    client: &Client,
    url: &Url,
    job_dir: &Path,
    token: &CancellationToken,
    mut on_progress: impl FnMut(u64, Option<u64>),
) -> Result<FileArtifact, DownloadError> {
    tokio::fs::create_dir_all(job_dir).await?;
    let file_path = job_dir.join(file_name_for(url));

    let existing_len = match tokio::fs::metadata(&file_path).await {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
        Err(err) => return Err(err.into()),
    };

    let mut request = client.get(url.clone());
    if existing_len > 0 {
        debug!(from = existing_len, "resuming partial file");
        request = request.header(header::RANGE, format!("bytes={existing_len}-"));
    }

    let response = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(DownloadError::Cancelled),
        response = request.send() => response?,
    };

    let status = response.status();
    let total = response
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_range_total)
        .or_else(|| match (status, response.content_length()) {
            (StatusCode::PARTIAL_CONTENT, Some(len)) => Some(existing_len + len),
            (_, Some(len)) => Some(len),
            _ => None,
        });

    // A range starting exactly at the end of a fully transferred file is not
    // satisfiable; the bytes are already on disk.
    if status == StatusCode::RANGE_NOT_SATISFIABLE && existing_len > 0 {
        debug!(len = existing_len, "range not satisfiable, file already complete");
        on_progress(existing_len, Some(existing_len));
        return Ok(FileArtifact {
            file_path,
            bytes_total: existing_len,
        });
    }

    let (mut file, resumed_from) = match status {
        StatusCode::PARTIAL_CONTENT => {
            let file = tokio::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&file_path)
                .await?;
            (file, existing_len)
        }
        StatusCode::OK => {
            if existing_len > 0 {
                warn!(%url, "server ignored the range request, restarting from zero");
            }
            (tokio::fs::File::create(&file_path).await?, 0)
        }
        status => {
            return Err(DownloadError::http_status(
                status,
                url.as_str(),
                "file fetch",
            ));
        }
    };

    let mut done = resumed_from;
    on_progress(done, total);

    let mut body = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            chunk = body.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        done += chunk.len() as u64;
        on_progress(done, total);
    }
    file.flush().await?;

    debug!(file = %file_path.display(), bytes = done, "file download finished");
    Ok(FileArtifact {
        file_path,
        bytes_total: done,
    })
}

/// `media.<ext>` with the extension taken from the URL path when it is a
/// known media extension, `mp4` otherwise.
fn file_name_for(url: &Url) -> String {
    let ext = Path::new(url.path())
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| KNOWN_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| "mp4".to_string());
    format!("media.{ext}")
}

/// Total size out of a `Content-Range: bytes <start>-<end>/<total>` header.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_follows_the_url_extension() {
        let mkv = Url::parse("https://cdn.example/v/movie.mkv?token=abc").unwrap();
        assert_eq!(file_name_for(&mkv), "media.mkv");

        let upper = Url::parse("https://cdn.example/v/MOVIE.MP4").unwrap();
        assert_eq!(file_name_for(&upper), "media.mp4");

        let opaque = Url::parse("https://cdn.example/stream/98172").unwrap();
        assert_eq!(file_name_for(&opaque), "media.mp4");

        let odd = Url::parse("https://cdn.example/v/page.php").unwrap();
        assert_eq!(file_name_for(&odd), "media.mp4");
    }

    #[test]
    fn content_range_totals_parse() {
        assert_eq!(
            parse_content_range_total("bytes 1000-9999/10000"),
            Some(10000)
        );
        assert_eq!(parse_content_range_total("bytes */4096"), Some(4096));
        assert_eq!(parse_content_range_total("bytes 0-99/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }
}
