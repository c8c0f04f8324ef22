use std::path::PathBuf;
use std::time::Duration;

use reqwest::{
    Client,
    header::{HeaderMap, HeaderName, HeaderValue},
    redirect::Policy,
};
use rustls::crypto::aws_lc_rs;
use rustls_platform_verifier::BuilderVerifierExt;

use crate::error::DownloadError;

/// Default user agent used when none is configured.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36";

/// Configuration for the download engine.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall request timeout. `Duration::ZERO` disables it, which is the
    /// default because segment and file transfers have no sane upper bound.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read timeout between successive body chunks.
    pub read_timeout: Duration,
    /// Whether to follow redirects (capped at 10 hops).
    pub follow_redirects: bool,
    /// User agent to present on every request.
    pub user_agent: String,
    /// Extra headers applied to every request.
    pub headers: Option<HeaderMap>,
    /// Maximum number of playlist segments fetched concurrently.
    pub max_concurrent_segments: usize,
    /// Artifacts smaller than this are sniffed for markup before being
    /// accepted as media.
    pub min_media_bytes: u64,
    /// How long a completed job stays visible in the registry.
    pub completed_linger: Duration,
    /// How long a failed job stays visible in the registry.
    pub failed_linger: Duration,
    /// Root directory under which per-job directories are created.
    pub output_root: PathBuf,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: Some(get_default_headers()),
            max_concurrent_segments: 4,
            min_media_bytes: 256 * 1024,
            completed_linger: Duration::from_secs(5),
            failed_linger: Duration::from_secs(60),
            output_root: PathBuf::from("downloads"),
        }
    }
}

impl DownloaderConfig {
    pub fn builder() -> DownloaderConfigBuilder {
        DownloaderConfigBuilder::new()
    }
}

/// Default headers for media endpoints.
pub fn get_default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_static("video/*, application/vnd.apple.mpegurl, application/x-mpegurl, */*"),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers
}

/// Builder for [`DownloaderConfig`].
#[derive(Debug, Default)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: DownloaderConfig::default(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.config
            .headers
            .get_or_insert_with(HeaderMap::new)
            .insert(name, value);
        self
    }

    pub fn max_concurrent_segments(mut self, max: usize) -> Self {
        self.config.max_concurrent_segments = max.max(1);
        self
    }

    pub fn min_media_bytes(mut self, min: u64) -> Self {
        self.config.min_media_bytes = min;
        self
    }

    pub fn completed_linger(mut self, linger: Duration) -> Self {
        self.config.completed_linger = linger;
        self
    }

    pub fn failed_linger(mut self, linger: Duration) -> Self {
        self.config.failed_linger = linger;
        self
    }

    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.output_root = root.into();
        self
    }

    pub fn build(self) -> DownloaderConfig {
        self.config
    }
}

/// Builds the shared HTTP client from a [`DownloaderConfig`].
///
/// TLS goes through the platform verifier so corporate proxies and OS trust
/// stores behave the same way they do for a browser.
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let tls = rustls::ClientConfig::builder_with_provider(aws_lc_rs::default_provider().into())
        .with_safe_default_protocol_versions()
        .expect("Failed to set TLS protocol versions")
        .with_platform_verifier()
        .expect("Failed to set platform verifier")
        .with_no_client_auth();

    let mut builder = Client::builder()
        .pool_max_idle_per_host(config.max_concurrent_segments.max(4))
        .user_agent(config.user_agent.clone())
        .use_preconfigured_tls(tls)
        .redirect(if config.follow_redirects {
            Policy::limited(10)
        } else {
            Policy::none()
        });

    if let Some(headers) = &config.headers {
        builder = builder.default_headers(headers.clone());
    }
    if !config.timeout.is_zero() {
        builder = builder.timeout(config.timeout);
    }
    if !config.connect_timeout.is_zero() {
        builder = builder.connect_timeout(config.connect_timeout);
    }
    if !config.read_timeout.is_zero() {
        builder = builder.read_timeout(config.read_timeout);
    }

    builder.build().map_err(DownloadError::from)
}
