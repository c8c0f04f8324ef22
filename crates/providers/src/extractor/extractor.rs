use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, Response};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::ExtractorError;
use crate::media::{MediaRef, StreamDescriptor};

/// Shared HTTP plumbing for provider extractors.
///
/// Holds the provider name, the shared [`Client`] and the headers every
/// request to that provider must carry. Providers never use cookies; any
/// state a provider needs is carried in URLs or request bodies.
#[derive(Clone)]
pub struct Extractor {
    pub provider_name: String,
    pub client: Client,
    provider_headers: HeaderMap,
    pub provider_params: FxHashMap<String, String>,
}

impl Extractor {
    pub fn new(provider_name: impl Into<String>, client: Client) -> Self {
        let mut provider_headers = HeaderMap::new();
        provider_headers.insert(USER_AGENT, HeaderValue::from_static(super::default::DEFAULT_UA));
        Self {
            provider_name: provider_name.into(),
            client,
            provider_headers,
            provider_params: FxHashMap::default(),
        }
    }

    pub fn add_header_str(&mut self, key: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.provider_headers.insert(name, value);
        } else {
            debug!(provider = %self.provider_name, key, "skipping invalid header");
        }
    }

    /// Most embed hosts refuse requests without their own origin/referer.
    pub fn set_origin_and_referer(&mut self, origin: &str) {
        if let Ok(value) = HeaderValue::from_str(origin) {
            self.provider_headers.insert(ORIGIN, value.clone());
            self.provider_headers.insert(REFERER, value);
        }
    }

    pub fn add_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.provider_params.insert(key.into(), value.into());
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .headers(self.provider_headers.clone())
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// GET a page body, mapping non-2xx statuses to [`ExtractorError::Protocol`].
    pub async fn get_text(&self, url: &str) -> Result<String, ExtractorError> {
        debug!(provider = %self.provider_name, url = %url, "fetching page");
        let response = ensure_success(self.get(url).send().await?)?;
        Ok(response.text().await?)
    }

    /// GET and deserialize a JSON body, mapping non-2xx statuses to
    /// [`ExtractorError::Protocol`].
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ExtractorError> {
        debug!(provider = %self.provider_name, url = %url, "fetching json");
        let response = ensure_success(self.get(url).send().await?)?;
        Ok(response.json().await?)
    }

    /// The provider headers as a plain map, for callers that need to replay
    /// them against the media host (playlist and segment fetches).
    pub fn headers_map(&self) -> FxHashMap<String, String> {
        self.provider_headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect()
    }
}

pub(crate) fn ensure_success(response: Response) -> Result<Response, ExtractorError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ExtractorError::Protocol { status })
    }
}

/// A catalog-to-stream resolver for one upstream provider.
///
/// Implementations turn a [`MediaRef`] into a [`StreamDescriptor`]. They
/// never retry and never fall back on their own; ordering and fallback
/// policy live in the orchestrator.
#[async_trait]
pub trait ProviderExtractor: Send + Sync {
    fn extractor(&self) -> &Extractor;

    fn provider_name(&self) -> &str {
        &self.extractor().provider_name
    }

    async fn resolve_movie(&self, media: &MediaRef) -> Result<StreamDescriptor, ExtractorError>;

    async fn resolve_episode(
        &self,
        media: &MediaRef,
        season: u32,
        episode: u32,
    ) -> Result<StreamDescriptor, ExtractorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_map_reflects_added_headers() {
        // A bare `Client::new()` under reqwest's no-provider TLS feature
        // needs a process-global crypto provider.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let mut extractor = Extractor::new("test", Client::new());
        extractor.set_origin_and_referer("https://embed.example");
        let map = extractor.headers_map();
        assert_eq!(
            map.get("referer").map(String::as_str),
            Some("https://embed.example")
        );
        assert_eq!(
            map.get("origin").map(String::as_str),
            Some("https://embed.example")
        );
        assert!(map.contains_key("user-agent"));
    }
}
