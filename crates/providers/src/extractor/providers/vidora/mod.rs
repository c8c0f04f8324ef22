//! `vidora` serves plain embed pages; the stream URL hides somewhere in the
//! markup and moves around between deployments, hence the rule table.

mod rules;

use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::extractor::error::ExtractorError;
use crate::extractor::extractor::{Extractor, ProviderExtractor};
use crate::extractor::factory::{ProviderEndpoints, ProviderKind};
use crate::media::{MediaRef, StreamDescriptor, SubtitleTrack};
use crate::metadata::MetadataProvider;
use async_trait::async_trait;

#[derive(Debug, Deserialize)]
struct SubtitleRow {
    lang: String,
    url: String,
}

pub struct Vidora {
    extractor: Extractor,
    base: String,
}

impl Vidora {
    pub fn new(
        client: Client,
        _metadata: Arc<dyn MetadataProvider>,
        endpoints: &ProviderEndpoints,
    ) -> Self {
        let base = endpoints.vidora_base.trim_end_matches('/').to_string();
        let mut extractor = Extractor::new(ProviderKind::Vidora.to_string(), client);
        extractor.set_origin_and_referer(&base);
        Self { extractor, base }
    }

    async fn resolve_embed(
        &self,
        media: &MediaRef,
        embed_path: String,
        season_episode: Option<(u32, u32)>,
    ) -> Result<StreamDescriptor, ExtractorError> {
        let url = format!("{}{embed_path}", self.base);
        let html = self.extractor.get_text(&url).await?;

        let (rule, stream_url) = rules::scan_markup(&html).ok_or(ExtractorError::NotFound)?;
        debug!(rule, url = %stream_url, "markup scan matched");

        // Subtitle search is best-effort; the stream stands on its own.
        let subtitles = match self.search_subtitles(media, season_episode).await {
            Ok(tracks) => tracks,
            Err(err) => {
                debug!(error = %err, "subtitle search failed");
                Vec::new()
            }
        };

        Ok(StreamDescriptor::new(ProviderKind::Vidora, stream_url)
            .with_subtitles(subtitles)
            .with_headers(self.extractor.headers_map()))
    }

    async fn search_subtitles(
        &self,
        media: &MediaRef,
        season_episode: Option<(u32, u32)>,
    ) -> Result<Vec<SubtitleTrack>, ExtractorError> {
        let mut url = format!(
            "{}/subs/search?tmdb={}",
            self.base,
            urlencoding::encode(&media.id)
        );
        if let Some((season, episode)) = season_episode {
            url.push_str(&format!("&s={season}&e={episode}"));
        }

        let rows: Vec<SubtitleRow> = self
            .extractor
            .get_json(&url)
            .await
            .map_err(|err| ExtractorError::Subtitles(err.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| SubtitleTrack::new(row.lang, row.url))
            .collect())
    }
}

#[async_trait]
impl ProviderExtractor for Vidora {
    fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    async fn resolve_movie(&self, media: &MediaRef) -> Result<StreamDescriptor, ExtractorError> {
        let path = format!("/embed/movie/{}", urlencoding::encode(&media.id));
        self.resolve_embed(media, path, None).await
    }

    async fn resolve_episode(
        &self,
        media: &MediaRef,
        season: u32,
        episode: u32,
    ) -> Result<StreamDescriptor, ExtractorError> {
        let path = format!(
            "/embed/tv/{}/{season}/{episode}",
            urlencoding::encode(&media.id)
        );
        self.resolve_embed(media, path, Some((season, episode))).await
    }
}
