use m3u8_rs::{Playlist, QuotedOrUnquoted, VariantStream};
use providers_resolver::extractor::utils::{is_hdr_label, parse_resolution_token};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::DownloadError;

/// Content types that identify an adaptive manifest.
pub const MANIFEST_CONTENT_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "audio/mpegurl",
    "audio/x-mpegurl",
];

/// How a resolved URL should be transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamKind {
    /// Segmented manifest, downloaded segment by segment.
    Adaptive,
    /// Single media file, downloaded as one resumable transfer.
    Single,
}

/// Variant selection policy for adaptive manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityPreference {
    /// Highest rendition regardless of dynamic range.
    #[default]
    Highest,
    /// Highest rendition that is not HDR; falls back to the overall highest
    /// when everything is HDR.
    HighestSdr,
    /// Highest rendition whose height fits under the ceiling; falls back to
    /// the lowest rendition when nothing fits.
    Cap(u32),
}

/// Variant picked out of a master playlist.
#[derive(Debug, Clone)]
pub struct ChosenVariant {
    pub url: Url,
    pub label: Option<String>,
    pub height: Option<u32>,
    pub bandwidth: Option<u64>,
}

struct Candidate {
    url: Url,
    label: Option<String>,
    height: Option<u32>,
    bandwidth: u64,
    hdr: bool,
}

/// Classifies a resolved URL without downloading its body.
///
/// Path markers win outright; otherwise a HEAD probe checks the content type,
/// then the post-redirect URL. Classification never fails: anything that
/// cannot be shown to be a manifest is treated as a single file, which at
/// worst costs one wasted direct transfer instead of a wrong playlist parse.
pub async fn classify(client: &Client, url: &Url) -> StreamKind {
    if has_manifest_markers(url) {
        debug!(%url, "classified as adaptive from path markers");
        return StreamKind::Adaptive;
    }

    match client.head(url.clone()).send().await {
        Ok(response) => {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("");
            if is_manifest_content_type(content_type) {
                debug!(%url, content_type, "classified as adaptive from content type");
                return StreamKind::Adaptive;
            }
            if response.url() != url && has_manifest_markers(response.url()) {
                debug!(%url, final_url = %response.url(), "classified as adaptive after redirect");
                return StreamKind::Adaptive;
            }
        }
        Err(err) => {
            debug!(%url, %err, "probe failed, assuming single file");
        }
    }

    StreamKind::Single
}

/// Parses `manifest` and picks one variant according to `preference`.
///
/// A media playlist passes through unchanged: the manifest itself is the only
/// rendition. Ties within a preference are broken by manifest order.
pub fn select_variant(
    manifest: &str,
    manifest_url: &Url,
    preference: QualityPreference,
) -> Result<ChosenVariant, DownloadError> {
    let playlist = m3u8_rs::parse_playlist_res(manifest.as_bytes())
        .map_err(|err| DownloadError::manifest(format!("failed to parse manifest: {err}")))?;

    let master = match playlist {
        Playlist::MediaPlaylist(_) => {
            return Ok(ChosenVariant {
                url: manifest_url.clone(),
                label: None,
                height: None,
                bandwidth: None,
            });
        }
        Playlist::MasterPlaylist(master) => master,
    };

    let mut candidates = Vec::with_capacity(master.variants.len());
    for variant in &master.variants {
        let url = resolve_url(manifest_url, &variant.uri)?;
        let label = variant_name(variant);
        let height = variant
            .resolution
            .map(|res| res.height as u32)
            .or_else(|| label.as_deref().and_then(parse_resolution_token));
        let hdr = variant_is_hdr(variant, label.as_deref());
        candidates.push(Candidate {
            url,
            label,
            height,
            bandwidth: variant.bandwidth,
            hdr,
        });
    }
    if candidates.is_empty() {
        return Err(DownloadError::manifest("master playlist lists no variants"));
    }

    let all: Vec<&Candidate> = candidates.iter().collect();
    let chosen = match preference {
        QualityPreference::Highest => pick_highest(&all),
        QualityPreference::HighestSdr => {
            let sdr: Vec<&Candidate> = candidates.iter().filter(|c| !c.hdr).collect();
            if sdr.is_empty() {
                debug!("every variant is HDR, ignoring the SDR preference");
                pick_highest(&all)
            } else {
                pick_highest(&sdr)
            }
        }
        QualityPreference::Cap(max_height) => {
            let capped: Vec<&Candidate> = candidates
                .iter()
                .filter(|c| c.height.is_some_and(|h| h <= max_height))
                .collect();
            if capped.is_empty() {
                debug!(max_height, "no variant fits under the cap, taking the lowest");
                pick_lowest(&all)
            } else {
                pick_highest(&capped)
            }
        }
    };

    Ok(ChosenVariant {
        url: chosen.url.clone(),
        label: chosen
            .label
            .clone()
            .or_else(|| chosen.height.map(|h| format!("{h}p"))),
        height: chosen.height,
        bandwidth: Some(chosen.bandwidth),
    })
}

/// Resolves a manifest reference against its enclosing playlist URL.
pub(crate) fn resolve_url(base: &Url, reference: &str) -> Result<Url, DownloadError> {
    if let Ok(absolute) = Url::parse(reference) {
        return Ok(absolute);
    }
    base.join(reference).map_err(|err| {
        DownloadError::manifest(format!("unresolvable reference `{reference}`: {err}"))
    })
}

fn has_manifest_markers(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        return true;
    }
    path.split('/')
        .any(|segment| segment == "playlist" || segment == "hls")
}

fn is_manifest_content_type(value: &str) -> bool {
    let essence = value
        .split(';')
        .next()
        .unwrap_or(value)
        .trim()
        .to_ascii_lowercase();
    MANIFEST_CONTENT_TYPES.contains(&essence.as_str())
}

fn attr_str(value: &QuotedOrUnquoted) -> &str {
    match value {
        QuotedOrUnquoted::Quoted(s) | QuotedOrUnquoted::Unquoted(s) => s,
    }
}

fn variant_name(variant: &VariantStream) -> Option<String> {
    let attrs = variant.other_attributes.as_ref()?;
    attrs.get("NAME").map(attr_str).map(str::to_owned)
}

fn variant_is_hdr(variant: &VariantStream, label: Option<&str>) -> bool {
    if let Some(attrs) = &variant.other_attributes
        && let Some(range) = attrs.get("VIDEO-RANGE")
    {
        let range = attr_str(range);
        if range.eq_ignore_ascii_case("PQ") || range.eq_ignore_ascii_case("HLG") {
            return true;
        }
    }
    label.is_some_and(is_hdr_label)
}

fn pick_highest<'a>(candidates: &[&'a Candidate]) -> &'a Candidate {
    let mut best = candidates[0];
    for candidate in &candidates[1..] {
        let better = match (candidate.height.unwrap_or(0), best.height.unwrap_or(0)) {
            (a, b) if a != b => a > b,
            _ => candidate.bandwidth > best.bandwidth,
        };
        if better {
            best = candidate;
        }
    }
    best
}

fn pick_lowest<'a>(candidates: &[&'a Candidate]) -> &'a Candidate {
    let mut best = candidates[0];
    for candidate in &candidates[1..] {
        let better = match (
            candidate.height.unwrap_or(u32::MAX),
            best.height.unwrap_or(u32::MAX),
        ) {
            (a, b) if a != b => a < b,
            _ => candidate.bandwidth < best.bandwidth,
        };
        if better {
            best = candidate;
        }
    }
    best
}
