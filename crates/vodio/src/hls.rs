//! Segmented playlist download.
//!
//! Fetches every segment of a media playlist into a per-job directory, then
//! rewrites the playlist so each reference points at its local file. The
//! result is self-contained: a player pointed at `index.m3u8` never touches
//! the network.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use m3u8_rs::{KeyMethod, Map, MediaPlaylist, Playlist};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::DownloadError;
use crate::planner::resolve_url;

/// File name of the rewritten local playlist.
pub const PLAYLIST_FILE: &str = "index.m3u8";

const INIT_FILE: &str = "init.mp4";
const SEGMENT_ATTEMPTS: u32 = 2;
const SEGMENT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// What a finished playlist download left in the job directory.
#[derive(Debug)]
pub struct PlaylistArtifact {
    pub playlist_path: PathBuf,
    pub segments_total: u32,
    pub bytes_written: u64,
    /// First media segment, the representative file for validation.
    pub first_segment: PathBuf,
}

#[derive(Debug)]
struct SegmentPlan {
    segment_urls: Vec<Url>,
    init_url: Option<Url>,
}

/// Downloads the media playlist at `variant_url` into `job_dir`.
///
/// `on_progress` is called with `(segments_done, segments_total)`: once with
/// zero before the first transfer and once per segment written. Segments
/// fetch concurrently up to `max_concurrent`, each with one retry on a
/// retryable failure.
pub async fn download_playlist(
    client: &Client,
    variant_url: &Url,
    job_dir: &Path,
    max_concurrent: usize,
    token: &CancellationToken,
    mut on_progress: impl FnMut(u32, u32),
) -> Result<PlaylistArtifact, DownloadError> {
    let (manifest, base_url) = fetch_manifest(client, variant_url).await?;
    let mut playlist = match m3u8_rs::parse_playlist_res(manifest.as_bytes()) {
        Ok(Playlist::MediaPlaylist(playlist)) => playlist,
        Ok(Playlist::MasterPlaylist(_)) => {
            return Err(DownloadError::manifest(
                "variant URL served a master playlist instead of a media playlist",
            ));
        }
        Err(err) => {
            return Err(DownloadError::manifest(format!(
                "failed to parse media playlist: {err}"
            )));
        }
    };

    let plan = plan_segments(&playlist, &base_url)?;
    let total = plan.segment_urls.len() as u32;
    tokio::fs::create_dir_all(job_dir).await?;

    let mut bytes_written = 0u64;
    if let Some(init_url) = &plan.init_url {
        debug!(%init_url, "fetching init segment");
        bytes_written += fetch_segment(client, init_url, &job_dir.join(INIT_FILE), token).await?;
    }

    on_progress(0, total);
    // A closure taking `(usize, &Url)` here trips rustc's "implementation of
    // `FnOnce` is not general enough" limitation once the future crosses
    // `tokio::spawn`; building the futures in a loop sidesteps it.
    let mut fetches = Vec::with_capacity(plan.segment_urls.len());
    for (index, url) in plan.segment_urls.iter().enumerate() {
        let path = job_dir.join(segment_file_name(index));
        fetches.push(async move { fetch_segment(client, url, &path, token).await });
    }
    let mut transfers = stream::iter(fetches).buffer_unordered(max_concurrent.max(1));
    let mut done = 0u32;
    while let Some(result) = transfers.next().await {
        bytes_written += result?;
        done += 1;
        on_progress(done, total);
    }

    rewrite_local(&mut playlist, plan.init_url.is_some());
    let mut out = Vec::new();
    playlist.write_to(&mut out)?;
    let playlist_path = job_dir.join(PLAYLIST_FILE);
    tokio::fs::write(&playlist_path, out).await?;

    debug!(
        playlist = %playlist_path.display(),
        segments = total,
        bytes = bytes_written,
        "playlist download finished"
    );
    Ok(PlaylistArtifact {
        playlist_path,
        segments_total: total,
        bytes_written,
        first_segment: job_dir.join(segment_file_name(0)),
    })
}

/// Fetches a manifest body, returning it together with the post-redirect URL
/// that relative references must resolve against.
pub(crate) async fn fetch_manifest(
    client: &Client,
    url: &Url,
) -> Result<(String, Url), DownloadError> {
    let response = client.get(url.clone()).send().await?;
    let final_url = response.url().clone();
    if !response.status().is_success() {
        return Err(DownloadError::http_status(
            response.status(),
            final_url.as_str(),
            "manifest fetch",
        ));
    }
    Ok((response.text().await?, final_url))
}

/// Resolves every segment reference and rejects playlist features the
/// transfer path cannot honor: encryption, byte-range segments and init
/// segments that switch mid-stream.
fn plan_segments(playlist: &MediaPlaylist, base_url: &Url) -> Result<SegmentPlan, DownloadError> {
    if playlist.segments.is_empty() {
        return Err(DownloadError::manifest("media playlist has no segments"));
    }
    if playlist.unknown_tags.iter().any(|tag| tag.tag == "X-KEY") {
        return Err(DownloadError::manifest(
            "encrypted playlists are not supported",
        ));
    }

    let mut init_url: Option<Url> = None;
    if let Some((uri, has_byte_range)) = playlist_level_map(playlist) {
        if has_byte_range {
            return Err(DownloadError::manifest(
                "byte-range init segments are not supported",
            ));
        }
        init_url = Some(resolve_url(base_url, &uri)?);
    }

    let mut segment_urls = Vec::with_capacity(playlist.segments.len());
    for segment in &playlist.segments {
        if let Some(key) = &segment.key
            && !matches!(key.method, KeyMethod::None)
        {
            return Err(DownloadError::manifest(
                "encrypted playlists are not supported",
            ));
        }
        if segment.byte_range.is_some() {
            return Err(DownloadError::manifest(
                "byte-range segments are not supported",
            ));
        }
        if let Some(map) = &segment.map {
            if map.byte_range.is_some() {
                return Err(DownloadError::manifest(
                    "byte-range init segments are not supported",
                ));
            }
            let resolved = resolve_url(base_url, &map.uri)?;
            if let Some(existing) = &init_url
                && *existing != resolved
            {
                return Err(DownloadError::manifest(
                    "playlist switches init segments mid-stream",
                ));
            }
            init_url = Some(resolved);
        }
        segment_urls.push(resolve_url(base_url, &segment.uri)?);
    }

    Ok(SegmentPlan {
        segment_urls,
        init_url,
    })
}

/// Pulls an `EXT-X-MAP` that m3u8-rs left in `unknown_tags`.
///
/// The parser only attaches the tag to a [`m3u8_rs::MediaSegment`] when it
/// appears in the segment-scoped region; ahead of the first segment it lands
/// in the playlist's unknown tags as `X-MAP`.
fn playlist_level_map(playlist: &MediaPlaylist) -> Option<(String, bool)> {
    let tag = playlist.unknown_tags.iter().rev().find(|t| t.tag == "X-MAP")?;
    let rest = tag.rest.as_deref()?;
    let has_byte_range = rest.to_ascii_uppercase().contains("BYTERANGE");
    let start = rest.find("URI=\"")?;
    let value = &rest[start + 5..];
    let end = value.find('"')?;
    Some((value[..end].to_string(), has_byte_range))
}

/// Points every reference in the playlist at its local file and marks the
/// playlist final.
fn rewrite_local(playlist: &mut MediaPlaylist, has_init: bool) {
    for (index, segment) in playlist.segments.iter_mut().enumerate() {
        segment.uri = segment_file_name(index);
        if let Some(map) = &mut segment.map {
            map.uri = INIT_FILE.to_string();
        }
    }

    // A playlist-level map would serialize with its remote URI (or not at
    // all), so re-attach it to the first segment instead.
    playlist.unknown_tags.retain(|tag| tag.tag != "X-MAP");
    if has_init
        && let Some(first) = playlist.segments.first_mut()
        && first.map.is_none()
    {
        first.map = Some(Map {
            uri: INIT_FILE.to_string(),
            byte_range: None,
            other_attributes: HashMap::new(),
        });
    }

    playlist.end_list = true;
}

async fn fetch_segment(
    client: &Client,
    url: &Url,
    path: &Path,
    token: &CancellationToken,
) -> Result<u64, DownloadError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => Err(DownloadError::Cancelled),
            result = fetch_once(client, url, path) => result,
        };
        match fetched {
            Ok(bytes) => return Ok(bytes),
            Err(err) if err.is_retryable() && attempt < SEGMENT_ATTEMPTS => {
                warn!(%url, attempt, %err, "segment fetch failed, retrying");
                tokio::time::sleep(SEGMENT_RETRY_DELAY).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn fetch_once(client: &Client, url: &Url, path: &Path) -> Result<u64, DownloadError> {
    let response = client.get(url.clone()).send().await?;
    if !response.status().is_success() {
        return Err(DownloadError::http_status(
            response.status(),
            url.as_str(),
            "segment fetch",
        ));
    }
    let bytes = response.bytes().await?;
    tokio::fs::write(path, &bytes).await?;
    Ok(bytes.len() as u64)
}

fn segment_file_name(index: usize) -> String {
    format!("seg_{index:05}.ts")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_media(manifest: &str) -> MediaPlaylist {
        match m3u8_rs::parse_playlist_res(manifest.as_bytes()).unwrap() {
            Playlist::MediaPlaylist(playlist) => playlist,
            Playlist::MasterPlaylist(_) => panic!("expected media playlist"),
        }
    }

    fn base() -> Url {
        Url::parse("https://cdn.example/v/720/index.m3u8").unwrap()
    }

    #[test]
    fn segment_names_are_zero_padded() {
        assert_eq!(segment_file_name(0), "seg_00000.ts");
        assert_eq!(segment_file_name(42), "seg_00042.ts");
        assert_eq!(segment_file_name(12345), "seg_12345.ts");
    }

    #[test]
    fn plan_resolves_relative_and_absolute_references() {
        let playlist = parse_media(
            "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXTINF:6.0,\n\
seg0.ts\n\
#EXTINF:6.0,\n\
https://other.cdn.example/seg1.ts\n\
#EXT-X-ENDLIST\n",
        );
        let plan = plan_segments(&playlist, &base()).unwrap();
        assert_eq!(plan.segment_urls.len(), 2);
        assert_eq!(
            plan.segment_urls[0].as_str(),
            "https://cdn.example/v/720/seg0.ts"
        );
        assert_eq!(
            plan.segment_urls[1].as_str(),
            "https://other.cdn.example/seg1.ts"
        );
        assert!(plan.init_url.is_none());
    }

    #[test]
    fn encrypted_playlists_are_rejected() {
        let playlist = parse_media(
            "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x00000000000000000000000000000000\n\
#EXTINF:6.0,\n\
seg0.ts\n\
#EXT-X-ENDLIST\n",
        );
        let err = plan_segments(&playlist, &base()).unwrap_err();
        assert!(matches!(err, DownloadError::Manifest { .. }));
        assert!(err.to_string().contains("encrypted"));
    }

    #[test]
    fn method_none_key_is_not_encryption() {
        let playlist = parse_media(
            "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-KEY:METHOD=NONE\n\
#EXTINF:6.0,\n\
seg0.ts\n\
#EXT-X-ENDLIST\n",
        );
        assert!(plan_segments(&playlist, &base()).is_ok());
    }

    #[test]
    fn byte_range_segments_are_rejected() {
        let playlist = parse_media(
            "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXTINF:6.0,\n\
#EXT-X-BYTERANGE:75232@0\n\
seg0.ts\n\
#EXT-X-ENDLIST\n",
        );
        let err = plan_segments(&playlist, &base()).unwrap_err();
        assert!(err.to_string().contains("byte-range"));
    }

    #[test]
    fn empty_playlists_are_rejected() {
        let playlist = parse_media("#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-ENDLIST\n");
        let err = plan_segments(&playlist, &base()).unwrap_err();
        assert!(err.to_string().contains("no segments"));
    }

    #[test]
    fn init_segment_is_planned_wherever_the_parser_put_it() {
        // EXT-X-MAP ahead of the first segment may land in `unknown_tags`
        // rather than on the segment; the plan must find it either way.
        let playlist = parse_media(
            "#EXTM3U\n\
#EXT-X-TARGETDURATION:4\n\
#EXT-X-MAP:URI=\"init_720.mp4\"\n\
#EXTINF:4.0,\n\
seg0.m4s\n\
#EXT-X-ENDLIST\n",
        );
        let plan = plan_segments(&playlist, &base()).unwrap();
        assert_eq!(
            plan.init_url.as_ref().map(Url::as_str),
            Some("https://cdn.example/v/720/init_720.mp4")
        );
    }

    #[test]
    fn rewrite_leaves_no_remote_references() {
        let mut playlist = parse_media(
            "#EXTM3U\n\
#EXT-X-TARGETDURATION:4\n\
#EXT-X-MAP:URI=\"init_720.mp4\"\n\
#EXTINF:4.0,\n\
https://cdn.example/v/720/seg0.m4s\n\
#EXTINF:4.0,\n\
seg1.m4s\n",
        );
        rewrite_local(&mut playlist, true);

        let mut out = Vec::new();
        playlist.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(!text.contains("http"), "remote reference survived:\n{text}");
        assert!(!text.contains("seg0.m4s"));
        assert!(text.contains("seg_00000.ts"));
        assert!(text.contains("seg_00001.ts"));
        assert!(text.contains("URI=\"init.mp4\""));
        assert!(text.contains("#EXT-X-ENDLIST"));
    }
}
