use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse media classification used by the metadata collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Show,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Movie => write!(f, "movie"),
            MediaType::Show => write!(f, "show"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum MediaKind {
    Movie,
    Episode { season: u32, episode: u32 },
}

/// A reference into the catalog: a movie, or one episode of a show.
///
/// The `id` is the catalog identifier the upstream providers are indexed by.
/// Providers that need a second canonical identifier (the cross-reference id)
/// obtain it through the metadata collaborator, not from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: String,
    pub kind: MediaKind,
}

impl MediaRef {
    pub fn movie(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: MediaKind::Movie,
        }
    }

    pub fn episode(id: impl Into<String>, season: u32, episode: u32) -> Self {
        Self {
            id: id.into(),
            kind: MediaKind::Episode { season, episode },
        }
    }

    pub fn is_episode(&self) -> bool {
        matches!(self.kind, MediaKind::Episode { .. })
    }

    pub fn media_type(&self) -> MediaType {
        match self.kind {
            MediaKind::Movie => MediaType::Movie,
            MediaKind::Episode { .. } => MediaType::Show,
        }
    }

    /// Canonical identity string, shared with the download registry and the
    /// durable stores. One media reference maps to exactly one key.
    pub fn job_key(&self) -> String {
        match self.kind {
            MediaKind::Movie => format!("movie:{}", self.id),
            MediaKind::Episode { season, episode } => {
                format!("show:{}:s{:02}e{:02}", self.id, season, episode)
            }
        }
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.job_key())
    }
}
