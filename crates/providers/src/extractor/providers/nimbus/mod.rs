//! `nimbus` gates its API behind a token derived from cipher material it
//! publishes out-of-band. Delivery servers are enumerated first, then raced.

mod cipher;
mod models;

use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tokio::sync::{OnceCell, mpsc};
use tracing::debug;

use self::cipher::TokenCipher;
use self::models::{DeliveryServer, SourcePayload, TrackEntry};
use crate::extractor::error::ExtractorError;
use crate::extractor::extractor::{Extractor, ProviderExtractor};
use crate::extractor::factory::{ProviderEndpoints, ProviderKind};
use crate::extractor::race::first_subtitled_or_first;
use crate::extractor::utils::capture_group_1;
use crate::media::{MediaRef, StreamDescriptor, SubtitleTrack};
use crate::metadata::MetadataProvider;

static CIPHER_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-cipher\s*=\s*"([^"]+)""#).unwrap());

static CIPHER_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"window\.__ctx\s*=\s*"([^"]+)""#).unwrap());

pub struct Nimbus {
    extractor: Extractor,
    base: String,
    config_url: String,
    cipher: OnceCell<TokenCipher>,
}

impl Nimbus {
    pub fn new(
        client: Client,
        _metadata: Arc<dyn MetadataProvider>,
        endpoints: &ProviderEndpoints,
    ) -> Self {
        let base = endpoints.nimbus_base.trim_end_matches('/').to_string();
        let mut extractor = Extractor::new(ProviderKind::Nimbus.to_string(), client);
        extractor.set_origin_and_referer(&base);
        Self {
            extractor,
            base,
            config_url: endpoints.nimbus_config_url.clone(),
            cipher: OnceCell::new(),
        }
    }

    /// Cipher material is fetched once and reused for the extractor's
    /// lifetime; the upstream rotates it rarely.
    async fn cipher(&self) -> Result<&TokenCipher, ExtractorError> {
        self.cipher
            .get_or_try_init(|| async {
                debug!(url = %self.config_url, "fetching cipher config");
                let config: models::CipherConfig =
                    self.extractor.get_json(&self.config_url).await?;
                TokenCipher::from_config(&config)
            })
            .await
    }

    async fn resolve_path(&self, embed_path: String) -> Result<StreamDescriptor, ExtractorError> {
        let page = self
            .extractor
            .get_text(&format!("{}{embed_path}", self.base))
            .await?;
        let fragment = capture_group_1(&CIPHER_ATTR, &page)
            .or_else(|| capture_group_1(&CIPHER_VAR, &page))
            .ok_or_else(|| ExtractorError::decode("page carries no cipher fragment"))?;

        let token = self.cipher().await?.derive_token(fragment)?;

        let servers: Vec<DeliveryServer> = self
            .extractor
            .get_json(&format!("{}/api/servers/{token}", self.base))
            .await?;
        if servers.is_empty() {
            return Err(ExtractorError::NotFound);
        }
        debug!(count = servers.len(), "racing delivery servers");

        let names: Vec<String> = servers.iter().map(|s| s.name.clone()).collect();
        let (tx, rx) = mpsc::channel(servers.len());
        for server in servers {
            let extractor = self.extractor.clone();
            let base = self.base.clone();
            let names = names.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = fetch_source(&extractor, &base, server, names).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        first_subtitled_or_first(rx).await
    }
}

async fn fetch_source(
    extractor: &Extractor,
    base: &str,
    server: DeliveryServer,
    names: Vec<String>,
) -> Result<StreamDescriptor, ExtractorError> {
    let payload: SourcePayload = extractor
        .get_json(&format!("{base}/api/source/{}", server.hash))
        .await?;

    let Some(primary) = payload.sources.first() else {
        return Err(ExtractorError::NotFound);
    };

    let quality_variants = payload
        .sources
        .iter()
        .filter_map(|source| source.label.clone())
        .collect();
    let subtitles = payload
        .tracks
        .iter()
        .filter(|track| is_text_track(track))
        .map(|track| {
            SubtitleTrack::new(
                track.label.clone().unwrap_or_else(|| "und".to_string()),
                track.file.clone(),
            )
        })
        .collect();

    Ok(StreamDescriptor::new(ProviderKind::Nimbus, primary.file.clone())
        .with_subtitles(subtitles)
        .with_servers(names, Some(server.name))
        .with_quality_variants(quality_variants)
        .with_headers(extractor.headers_map()))
}

fn is_text_track(track: &TrackEntry) -> bool {
    matches!(track.kind.as_deref(), Some("captions") | Some("subtitles"))
}

#[async_trait]
impl ProviderExtractor for Nimbus {
    fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    async fn resolve_movie(&self, media: &MediaRef) -> Result<StreamDescriptor, ExtractorError> {
        self.resolve_path(format!("/v3/e/{}", urlencoding::encode(&media.id)))
            .await
    }

    async fn resolve_episode(
        &self,
        media: &MediaRef,
        season: u32,
        episode: u32,
    ) -> Result<StreamDescriptor, ExtractorError> {
        self.resolve_path(format!(
            "/v3/e/{}/{season}/{episode}",
            urlencoding::encode(&media.id)
        ))
        .await
    }
}
