//! `embedo` hides its streams behind a redirect chain (api -> embed page ->
//! iframe). A companion catalog, `streamnest`, indexes many of the same
//! titles with subtitle tracks attached, so both are queried concurrently
//! and raced.

use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use url::Url;

use crate::extractor::error::ExtractorError;
use crate::extractor::extractor::{Extractor, ProviderExtractor};
use crate::extractor::factory::{ProviderEndpoints, ProviderKind};
use crate::extractor::race::first_subtitled_or_first;
use crate::extractor::utils::{capture_group_1, unescape_json_slashes};
use crate::media::{MediaRef, StreamDescriptor, SubtitleTrack};
use crate::metadata::MetadataProvider;

static IFRAME_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<iframe[^>]+src\s*=\s*["']([^"']+)["']"#).unwrap());

static FILE_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""file"\s*:\s*["']([^"']+)["']"#).unwrap());

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embed_url: String,
}

#[derive(Debug, Deserialize)]
struct StreamnestCandidate {
    url: String,
    #[serde(default)]
    subtitles: Vec<StreamnestSubtitle>,
}

#[derive(Debug, Deserialize)]
struct StreamnestSubtitle {
    lang: String,
    url: String,
}

pub struct Embedo {
    extractor: Extractor,
    base: String,
    streamnest_base: String,
}

impl Embedo {
    pub fn new(
        client: Client,
        _metadata: Arc<dyn MetadataProvider>,
        endpoints: &ProviderEndpoints,
    ) -> Self {
        let base = endpoints.embedo_base.trim_end_matches('/').to_string();
        let mut extractor = Extractor::new(ProviderKind::Embedo.to_string(), client);
        extractor.set_origin_and_referer(&base);
        Self {
            extractor,
            base,
            streamnest_base: endpoints.streamnest_base.trim_end_matches('/').to_string(),
        }
    }

    /// Race the redirect chain against the companion catalog. Both run as
    /// detached tasks; whatever arrives after a winner is picked is dropped
    /// with the channel.
    async fn resolve_race(
        &self,
        media: &MediaRef,
        season_episode: Option<(u32, u32)>,
    ) -> Result<StreamDescriptor, ExtractorError> {
        let (tx, rx) = mpsc::channel(8);

        {
            let extractor = self.extractor.clone();
            let base = self.base.clone();
            let id = media.id.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = chain_candidate(&extractor, &base, &id, season_episode).await;
                let _ = tx.send(result).await;
            });
        }

        {
            let extractor = self.extractor.clone();
            let base = self.streamnest_base.clone();
            let id = media.id.clone();
            tokio::spawn(async move {
                match streamnest_candidates(&extractor, &base, &id, season_episode).await {
                    Ok(candidates) if candidates.is_empty() => {
                        let _ = tx.send(Err(ExtractorError::NotFound)).await;
                    }
                    Ok(candidates) => {
                        for candidate in candidates {
                            if tx.send(Ok(candidate)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                    }
                }
            });
        }

        first_subtitled_or_first(rx).await
    }
}

async fn chain_candidate(
    extractor: &Extractor,
    base: &str,
    id: &str,
    season_episode: Option<(u32, u32)>,
) -> Result<StreamDescriptor, ExtractorError> {
    let mut api_url = format!("{base}/api/embed?id={}", urlencoding::encode(id));
    if let Some((season, episode)) = season_episode {
        api_url.push_str(&format!("&s={season}&e={episode}"));
    }

    let embed: EmbedResponse = extractor.get_json(&api_url).await?;
    if embed.embed_url.is_empty() {
        return Err(ExtractorError::NotFound);
    }

    let page = extractor.get_text(&embed.embed_url).await?;
    let iframe_src = capture_group_1(&IFRAME_SRC, &page)
        .ok_or_else(|| ExtractorError::decode("embed page carries no iframe"))?;
    let iframe_url = absolutize(&embed.embed_url, iframe_src)?;

    let player = extractor.get_text(&iframe_url).await?;
    let stream_url = capture_group_1(&FILE_FIELD, &player)
        .map(unescape_json_slashes)
        .ok_or(ExtractorError::NotFound)?;

    Ok(StreamDescriptor::new(ProviderKind::Embedo, stream_url)
        .with_servers(candidate_servers(), Some("embedo".to_string()))
        .with_headers(extractor.headers_map()))
}

async fn streamnest_candidates(
    extractor: &Extractor,
    base: &str,
    id: &str,
    season_episode: Option<(u32, u32)>,
) -> Result<Vec<StreamDescriptor>, ExtractorError> {
    let mut url = format!("{base}/v2/sources?id={}", urlencoding::encode(id));
    if let Some((season, episode)) = season_episode {
        url.push_str(&format!("&s={season}&e={episode}"));
    }

    let rows: Vec<StreamnestCandidate> = extractor.get_json(&url).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let subtitles = row
                .subtitles
                .into_iter()
                .map(|sub| SubtitleTrack::new(sub.lang, sub.url))
                .collect();
            StreamDescriptor::new(ProviderKind::Embedo, row.url)
                .with_subtitles(subtitles)
                .with_servers(candidate_servers(), Some("streamnest".to_string()))
                .with_headers(extractor.headers_map())
        })
        .collect())
}

fn candidate_servers() -> Vec<String> {
    vec!["embedo".to_string(), "streamnest".to_string()]
}

fn absolutize(page_url: &str, href: &str) -> Result<String, ExtractorError> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Ok(href.to_string());
    }
    let base = Url::parse(page_url)
        .map_err(|err| ExtractorError::decode(format!("invalid embed page url: {err}")))?;
    let joined = base
        .join(href)
        .map_err(|err| ExtractorError::decode(format!("invalid iframe src {href:?}: {err}")))?;
    Ok(joined.to_string())
}

#[async_trait]
impl ProviderExtractor for Embedo {
    fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    async fn resolve_movie(&self, media: &MediaRef) -> Result<StreamDescriptor, ExtractorError> {
        self.resolve_race(media, None).await
    }

    async fn resolve_episode(
        &self,
        media: &MediaRef,
        season: u32,
        episode: u32,
    ) -> Result<StreamDescriptor, ExtractorError> {
        self.resolve_race(media, Some((season, episode))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::default_client;
    use crate::metadata::StaticMetadata;

    #[test]
    fn iframe_src_extraction() {
        let page = r#"<body><iframe width="100%" src="/player/abc123?autoplay=1" allowfullscreen></iframe></body>"#;
        assert_eq!(
            capture_group_1(&IFRAME_SRC, page),
            Some("/player/abc123?autoplay=1")
        );
    }

    #[test]
    fn relative_iframe_src_joins_against_the_page_url() {
        let absolute = absolutize("https://embedo.cc/e/42", "/player/abc").unwrap();
        assert_eq!(absolute, "https://embedo.cc/player/abc");

        let scheme_relative = absolutize("https://embedo.cc/e/42", "//cdn.example/p/1").unwrap();
        assert_eq!(scheme_relative, "https://cdn.example/p/1");

        let already_absolute = absolutize("https://embedo.cc/e/42", "https://x.example/p").unwrap();
        assert_eq!(already_absolute, "https://x.example/p");
    }

    #[test]
    fn file_field_tolerates_escaped_urls() {
        let player = r#"jwplayer("p").setup({"file": "https:\/\/cdn.example\/v.m3u8"});"#;
        let url = capture_group_1(&FILE_FIELD, player)
            .map(unescape_json_slashes)
            .unwrap();
        assert_eq!(url, "https://cdn.example/v.m3u8");
    }

    #[tokio::test]
    #[ignore]
    async fn resolves_a_live_movie() {
        let embedo = Embedo::new(
            default_client(),
            Arc::new(StaticMetadata::new()),
            &ProviderEndpoints::default(),
        );
        let descriptor = embedo.resolve_movie(&MediaRef::movie("603")).await.unwrap();
        assert!(descriptor.stream_url.starts_with("http"));
    }
}
