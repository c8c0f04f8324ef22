use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::extractor::factory::ProviderKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub language: String,
    pub url: String,
}

impl SubtitleTrack {
    pub fn new(language: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            url: url.into(),
        }
    }
}

/// Normalized result of resolving a catalog reference against one provider.
///
/// Produced fresh on every resolution call and handed to the playback or
/// download layer; never persisted directly. `headers` carries any
/// referer/origin requirements of the winning host so the transfer layer can
/// replay them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub stream_url: String,
    pub subtitles: Vec<SubtitleTrack>,
    pub server_candidates: Vec<String>,
    pub selected_server: Option<String>,
    pub quality_variants: Vec<String>,
    pub provider: ProviderKind,
    pub headers: Option<FxHashMap<String, String>>,
}

impl StreamDescriptor {
    pub fn new(provider: ProviderKind, stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            subtitles: Vec::new(),
            server_candidates: Vec::new(),
            selected_server: None,
            quality_variants: Vec::new(),
            provider,
            headers: None,
        }
    }

    pub fn with_subtitles(mut self, subtitles: Vec<SubtitleTrack>) -> Self {
        self.subtitles = subtitles;
        self
    }

    pub fn with_servers(
        mut self,
        candidates: Vec<String>,
        selected: Option<String>,
    ) -> Self {
        self.server_candidates = candidates;
        self.selected_server = selected;
        self
    }

    pub fn with_quality_variants(mut self, variants: Vec<String>) -> Self {
        self.quality_variants = variants;
        self
    }

    pub fn with_headers(mut self, headers: FxHashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn has_subtitles(&self) -> bool {
        !self.subtitles.is_empty()
    }
}
