//! `moonbox` is keyed by the external cross-reference id rather than the
//! catalog id, and hands out encrypted payloads that a separate worker
//! service decrypts.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extractor::error::ExtractorError;
use crate::extractor::extractor::{Extractor, ProviderExtractor, ensure_success};
use crate::extractor::factory::{ProviderEndpoints, ProviderKind};
use crate::extractor::utils::{is_hdr_label, parse_resolution_token};
use crate::media::{MediaRef, StreamDescriptor};
use crate::metadata::{MetadataError, MetadataProvider};

#[derive(Debug, Deserialize)]
struct IndexResponse {
    payload: String,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    payload: &'a str,
    #[serde(rename = "ref")]
    reference: &'a str,
}

#[derive(Debug, Deserialize)]
struct DecryptResponse {
    #[serde(default)]
    sources: Vec<DecryptedSource>,
}

#[derive(Debug, Clone, Deserialize)]
struct DecryptedSource {
    label: String,
    url: String,
}

pub struct Moonbox {
    extractor: Extractor,
    index_base: String,
    decrypt_url: String,
    metadata: Arc<dyn MetadataProvider>,
}

impl Moonbox {
    pub fn new(
        client: Client,
        metadata: Arc<dyn MetadataProvider>,
        endpoints: &ProviderEndpoints,
    ) -> Self {
        let extractor = Extractor::new(ProviderKind::Moonbox.to_string(), client);
        Self {
            extractor,
            index_base: endpoints.moonbox_index_base.trim_end_matches('/').to_string(),
            decrypt_url: endpoints.moonbox_decrypt_url.clone(),
            metadata,
        }
    }

    async fn external_id(&self, media: &MediaRef) -> Result<String, ExtractorError> {
        let details = self
            .metadata
            .details(&media.id, media.media_type())
            .await
            .map_err(|err| match err {
                MetadataError::TitleNotFound { .. } => ExtractorError::NotFound,
                other => ExtractorError::Other(other.to_string()),
            })?;
        details.external_id.ok_or(ExtractorError::MissingCrossReference)
    }

    async fn resolve(
        &self,
        media: &MediaRef,
        season_episode: Option<(u32, u32)>,
    ) -> Result<StreamDescriptor, ExtractorError> {
        let external = self.external_id(media).await?;

        // A season listing, when the metadata has one, rules out episodes
        // the index cannot know about before any request goes out.
        if let Some((season, episode)) = season_episode
            && let Ok(listing) = self.metadata.episodes(&media.id, season).await
            && !listing.iter().any(|e| e.number == episode)
        {
            debug!(season, episode, "episode absent from season listing");
            return Err(ExtractorError::NotFound);
        }

        let mut index_url = format!(
            "{}/index/{}",
            self.index_base,
            urlencoding::encode(&external)
        );
        if let Some((season, episode)) = season_episode {
            index_url.push_str(&format!("/{season}/{episode}"));
        }

        let index: IndexResponse = self.extractor.get_json(&index_url).await?;
        if index.payload.is_empty() {
            return Err(ExtractorError::decode("index returned an empty payload"));
        }

        let request = DecryptRequest {
            payload: &index.payload,
            reference: &external,
        };
        let response = ensure_success(
            self.extractor
                .post(&self.decrypt_url)
                .json(&request)
                .send()
                .await?,
        )?;
        let decrypted: DecryptResponse = response.json().await?;

        let (best, labels) =
            best_sdr_source(decrypted.sources).ok_or(ExtractorError::NotFound)?;
        debug!(label = %best.label, "selected moonbox source");

        Ok(StreamDescriptor::new(ProviderKind::Moonbox, best.url)
            .with_servers(vec!["moonbox".to_string()], Some("moonbox".to_string()))
            .with_quality_variants(labels)
            .with_headers(self.extractor.headers_map()))
    }
}

/// Drop HDR renditions, then pick the highest resolution among the rest.
/// Labels without a parsable token rank lowest; ties keep the first entry.
fn best_sdr_source(sources: Vec<DecryptedSource>) -> Option<(DecryptedSource, Vec<String>)> {
    let mut kept: Vec<DecryptedSource> = sources
        .into_iter()
        .filter(|source| !is_hdr_label(&source.label))
        .collect();
    if kept.is_empty() {
        return None;
    }

    let labels: Vec<String> = kept.iter().map(|source| source.label.clone()).collect();

    let mut best_index = 0;
    let mut best_height = parse_resolution_token(&kept[0].label).unwrap_or(0);
    for (index, source) in kept.iter().enumerate().skip(1) {
        let height = parse_resolution_token(&source.label).unwrap_or(0);
        if height > best_height {
            best_index = index;
            best_height = height;
        }
    }

    Some((kept.swap_remove(best_index), labels))
}

#[async_trait]
impl ProviderExtractor for Moonbox {
    fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    async fn resolve_movie(&self, media: &MediaRef) -> Result<StreamDescriptor, ExtractorError> {
        self.resolve(media, None).await
    }

    async fn resolve_episode(
        &self,
        media: &MediaRef,
        season: u32,
        episode: u32,
    ) -> Result<StreamDescriptor, ExtractorError> {
        self.resolve(media, Some((season, episode))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::default_client;
    use crate::metadata::{StaticMetadata, TitleDetails};

    fn source(label: &str) -> DecryptedSource {
        DecryptedSource {
            label: label.to_string(),
            url: format!("https://cdn.example/{label}.mp4"),
        }
    }

    #[test]
    fn hdr_sources_are_filtered_before_selection() {
        let (best, labels) = best_sdr_source(vec![
            source("720p"),
            source("2160p HDR"),
            source("1080p"),
        ])
        .unwrap();
        assert_eq!(best.label, "1080p");
        assert_eq!(labels, vec!["720p", "1080p"]);
    }

    #[test]
    fn ties_and_unparsable_labels_keep_first_entry() {
        let (best, _) = best_sdr_source(vec![source("1080p x264"), source("1080p x265")]).unwrap();
        assert_eq!(best.label, "1080p x264");

        let (best, _) = best_sdr_source(vec![source("auto"), source("src2")]).unwrap();
        assert_eq!(best.label, "auto");
    }

    #[test]
    fn all_hdr_means_nothing_playable() {
        assert!(best_sdr_source(vec![source("2160p HDR"), source("1080p DV")]).is_none());
        assert!(best_sdr_source(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn missing_cross_reference_is_reported() {
        let metadata = StaticMetadata::new().with_title(
            "42",
            TitleDetails {
                title: "No External".to_string(),
                year: None,
                external_id: None,
            },
        );
        let moonbox = Moonbox::new(
            default_client(),
            Arc::new(metadata),
            &ProviderEndpoints::default(),
        );

        let err = moonbox
            .external_id(&MediaRef::movie("42"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::MissingCrossReference));

        let err = moonbox
            .external_id(&MediaRef::movie("unknown"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::NotFound));
    }

    #[tokio::test]
    #[ignore]
    async fn resolves_a_live_title() {
        let metadata = StaticMetadata::new().with_title(
            "603",
            TitleDetails {
                title: "The Matrix".to_string(),
                year: Some(1999),
                external_id: Some("tt0133093".to_string()),
            },
        );
        let moonbox = Moonbox::new(
            default_client(),
            Arc::new(metadata),
            &ProviderEndpoints::default(),
        );
        let descriptor = moonbox
            .resolve_movie(&MediaRef::movie("603"))
            .await
            .unwrap();
        assert!(descriptor.stream_url.starts_with("http"));
    }
}
