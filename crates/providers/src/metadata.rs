use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::MediaType;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("no metadata for title {id}")]
    TitleNotFound { id: String },
    #[error("no episode listing for title {id} season {season}")]
    SeasonNotFound { id: String, season: u32 },
    #[error("metadata lookup failed: {0}")]
    Other(String),
}

/// Canonical details for a catalog title.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleDetails {
    pub title: String,
    pub year: Option<u16>,
    /// Identifier for the same title in the external cross-reference
    /// numbering some providers are keyed by. Absent for obscure titles.
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub number: u32,
    pub title: Option<String>,
}

/// Read-only catalog metadata the extractors consult for titles, years,
/// cross-reference ids and episode listings.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn details(
        &self,
        id: &str,
        media_type: MediaType,
    ) -> Result<TitleDetails, MetadataError>;

    async fn episodes(&self, id: &str, season: u32) -> Result<Vec<EpisodeInfo>, MetadataError>;
}

/// An in-memory [`MetadataProvider`] populated up front.
///
/// The CLI builds one from command-line flags; tests build one from
/// fixtures.
#[derive(Debug, Default)]
pub struct StaticMetadata {
    titles: HashMap<String, TitleDetails>,
    episodes: HashMap<(String, u32), Vec<EpisodeInfo>>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, id: impl Into<String>, details: TitleDetails) -> Self {
        self.titles.insert(id.into(), details);
        self
    }

    pub fn with_episodes(
        mut self,
        id: impl Into<String>,
        season: u32,
        episodes: Vec<EpisodeInfo>,
    ) -> Self {
        self.episodes.insert((id.into(), season), episodes);
        self
    }
}

#[async_trait]
impl MetadataProvider for StaticMetadata {
    async fn details(
        &self,
        id: &str,
        _media_type: MediaType,
    ) -> Result<TitleDetails, MetadataError> {
        self.titles
            .get(id)
            .cloned()
            .ok_or_else(|| MetadataError::TitleNotFound { id: id.to_string() })
    }

    async fn episodes(&self, id: &str, season: u32) -> Result<Vec<EpisodeInfo>, MetadataError> {
        self.episodes
            .get(&(id.to_string(), season))
            .cloned()
            .ok_or_else(|| MetadataError::SeasonNotFound {
                id: id.to_string(),
                season,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_metadata_serves_inserted_titles() {
        let metadata = StaticMetadata::new()
            .with_title(
                "tt100",
                TitleDetails {
                    title: "Example".to_string(),
                    year: Some(2011),
                    external_id: Some("731".to_string()),
                },
            )
            .with_episodes(
                "tt100",
                2,
                vec![EpisodeInfo {
                    number: 4,
                    title: None,
                }],
            );

        let details = metadata.details("tt100", MediaType::Show).await.unwrap();
        assert_eq!(details.external_id.as_deref(), Some("731"));

        let episodes = metadata.episodes("tt100", 2).await.unwrap();
        assert_eq!(episodes[0].number, 4);

        assert!(matches!(
            metadata.details("missing", MediaType::Movie).await,
            Err(MetadataError::TitleNotFound { .. })
        ));
        assert!(matches!(
            metadata.episodes("tt100", 9).await,
            Err(MetadataError::SeasonNotFound { season: 9, .. })
        ));
    }
}
