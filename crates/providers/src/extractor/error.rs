use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("provider has nothing for this reference")]
    NotFound,
    #[error("provider returned http {status}")]
    Protocol { status: StatusCode },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no cross-reference id available for this title")]
    MissingCrossReference,
    #[error("subtitle lookup failed: {0}")]
    Subtitles(String),
    #[error("{0}")]
    Other(String),
}

impl ExtractorError {
    pub fn protocol(status: StatusCode) -> Self {
        Self::Protocol { status }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode(reason.into())
    }

    /// A 404/403 from a provider is the one signal the orchestrator turns
    /// into a hop to the designated secondary provider instead of a plain
    /// advance along the fallback chain.
    pub fn is_fallback_trigger(&self) -> bool {
        matches!(
            self,
            Self::Protocol { status }
                if *status == StatusCode::NOT_FOUND || *status == StatusCode::FORBIDDEN
        )
    }
}
