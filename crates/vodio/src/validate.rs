use std::path::Path;

use tokio::io::AsyncReadExt;

use crate::error::DownloadError;

/// Leading byte sequences that identify an error page masquerading as media.
const MARKUP_SIGNATURES: &[&str] = &["<!doctype", "<html", "<?xml", "<head", "<body", "<script"];

const SNIFF_LEN: usize = 512;

/// Returns true when `bytes` start with a markup signature, tolerating a BOM
/// and leading whitespace.
pub fn looks_like_markup(bytes: &[u8]) -> bool {
    let mut rest = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    while let Some((first, tail)) = rest.split_first() {
        if !first.is_ascii_whitespace() {
            break;
        }
        rest = tail;
    }
    MARKUP_SIGNATURES
        .iter()
        .any(|sig| rest.len() >= sig.len() && rest[..sig.len()].eq_ignore_ascii_case(sig.as_bytes()))
}

/// Checks a finished artifact on disk, returning its size.
///
/// Files at or above `min_media_bytes` are taken at face value. Smaller files
/// get their leading bytes sniffed: providers answer some requests with an
/// HTML or XML error page behind an HTTP 200, and those must not reach the
/// library.
pub async fn validate_artifact(path: &Path, min_media_bytes: u64) -> Result<u64, DownloadError> {
    let len = tokio::fs::metadata(path).await?.len();
    if len == 0 {
        return Err(DownloadError::validation(format!(
            "artifact {} is empty",
            path.display()
        )));
    }
    if len >= min_media_bytes {
        return Ok(len);
    }

    let mut head = vec![0u8; SNIFF_LEN.min(len as usize)];
    let mut file = tokio::fs::File::open(path).await?;
    file.read_exact(&mut head).await?;

    if looks_like_markup(&head) {
        return Err(DownloadError::validation(format!(
            "artifact {} ({len} bytes) looks like a markup error page",
            path.display()
        )));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_detection_is_case_insensitive_and_bom_tolerant() {
        assert!(looks_like_markup(b"<!DOCTYPE html><html>"));
        assert!(looks_like_markup(b"  \n\t<HTML lang=\"en\">"));
        assert!(looks_like_markup(b"\xEF\xBB\xBF<?xml version=\"1.0\"?>"));
        assert!(looks_like_markup(b"<script>window.location"));
    }

    #[test]
    fn media_bytes_are_not_markup() {
        // MP4 ftyp box and an MPEG-TS sync byte.
        assert!(!looks_like_markup(b"\x00\x00\x00\x20ftypisom"));
        assert!(!looks_like_markup(b"\x47\x40\x11\x10\x00"));
        assert!(!looks_like_markup(b""));
        assert!(!looks_like_markup(b"WEBVTT\n\n00:00.000"));
    }

    #[tokio::test]
    async fn small_markup_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media.mp4");
        tokio::fs::write(&path, b"<!doctype html><html><body>404</body></html>")
            .await
            .unwrap();

        let err = validate_artifact(&path, 256 * 1024).await.unwrap_err();
        assert!(matches!(err, DownloadError::Validation { .. }));
    }

    #[tokio::test]
    async fn small_binary_artifact_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg_00000.ts");
        tokio::fs::write(&path, vec![0x47u8; 188]).await.unwrap();

        let len = validate_artifact(&path, 256 * 1024).await.unwrap();
        assert_eq!(len, 188);
    }

    #[tokio::test]
    async fn large_artifact_skips_the_sniff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media.mp4");
        // Starts like markup but is too large to be an error page.
        let mut bytes = b"<html>".to_vec();
        bytes.resize(1024, 0u8);
        tokio::fs::write(&path, bytes).await.unwrap();

        assert!(validate_artifact(&path, 512).await.is_ok());
    }

    #[tokio::test]
    async fn empty_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media.mp4");
        tokio::fs::write(&path, b"").await.unwrap();

        let err = validate_artifact(&path, 256 * 1024).await.unwrap_err();
        assert!(matches!(err, DownloadError::Validation { .. }));
    }
}
