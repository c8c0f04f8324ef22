//! Download manager.
//!
//! The facade the rest of the system talks to: it takes a resolved
//! [`StreamDescriptor`], classifies the stream, runs the transfer as a
//! detached background task and walks the job through its phases in the
//! registry. Completion writes the library record; that write is the one
//! storage failure that fails a job.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use providers_resolver::{MediaRef, StreamDescriptor, SubtitleTrack};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{DownloaderConfig, create_client};
use crate::direct;
use crate::error::DownloadError;
use crate::hls;
use crate::library::DownloadLibrary;
use crate::model::{JobKey, JobPhase, JobSnapshot, PersistedDownload, SavedKind, SavedSubtitle};
use crate::planner::{self, QualityPreference, StreamKind};
use crate::progress::WatchProgressStore;
use crate::registry::JobRegistry;
use crate::store::KvStore;
use crate::validate::validate_artifact;

/// Live handle to a running download job.
pub struct JobHandle {
    pub key: JobKey,
    /// Receives every published snapshot; `borrow` holds the latest.
    pub snapshots: watch::Receiver<JobSnapshot>,
    token: CancellationToken,
}

impl JobHandle {
    /// Requests cooperative cancellation of the job.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// Result of asking for a download.
pub enum StartOutcome {
    /// A job was registered and runs in the background.
    Started(JobHandle),
    /// The library already holds this media; nothing was started.
    AlreadySaved(PersistedDownload),
}

struct TransferOutcome {
    kind: SavedKind,
    local_path: PathBuf,
    /// File whose contents stand in for the whole artifact during validation.
    representative: PathBuf,
    bytes: u64,
    quality_label: Option<String>,
}

struct ManagerInner {
    client: Client,
    config: DownloaderConfig,
    registry: JobRegistry,
    library: DownloadLibrary,
    watch_progress: WatchProgressStore,
}

/// Facade over classification, transfer, validation and persistence.
///
/// Cheap to clone; every clone shares the registry, the HTTP client and the
/// stores.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
}

impl DownloadManager {
    pub fn new(config: DownloaderConfig, store: Arc<dyn KvStore>) -> Result<Self, DownloadError> {
        let client = create_client(&config)?;
        let registry = JobRegistry::new(config.completed_linger, config.failed_linger);
        Ok(Self {
            inner: Arc::new(ManagerInner {
                client,
                registry,
                library: DownloadLibrary::new(store.clone()),
                watch_progress: WatchProgressStore::new(store),
                config,
            }),
        })
    }

    pub fn library(&self) -> &DownloadLibrary {
        &self.inner.library
    }

    pub fn watch_progress(&self) -> &WatchProgressStore {
        &self.inner.watch_progress
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.inner.config
    }

    /// Directory all artifacts of `key` live under.
    pub fn job_dir(&self, key: &str) -> PathBuf {
        self.inner.config.output_root.join(key.replace(':', "-"))
    }

    /// Starts a background download for `media` from a resolved descriptor.
    ///
    /// Returns [`StartOutcome::AlreadySaved`] without registering anything
    /// when the library already holds a record for the key. Fails with
    /// [`DownloadError::AlreadyActive`] while another job runs under it.
    pub async fn start_download(
        &self,
        media: &MediaRef,
        title: impl Into<String>,
        descriptor: &StreamDescriptor,
        preference: QualityPreference,
    ) -> Result<StartOutcome, DownloadError> {
        let key = media.job_key();
        if let Some(existing) = self.inner.library.get(&key).await? {
            debug!(key, "already in the library, not starting a job");
            return Ok(StartOutcome::AlreadySaved(existing));
        }

        let (snapshots, token) = self.inner.registry.begin(&key)?;
        info!(key, provider = %descriptor.provider, "download job registered");

        let manager = self.clone();
        let job_key = key.clone();
        let job_title = title.into();
        let job_descriptor = descriptor.clone();
        let job_token = token.clone();
        tokio::spawn(async move {
            manager
                .run_job(job_key, job_title, job_descriptor, preference, job_token)
                .await;
        });

        Ok(StartOutcome::Started(JobHandle {
            key,
            snapshots,
            token,
        }))
    }

    pub fn query(&self, key: &str) -> Option<JobSnapshot> {
        self.inner.registry.snapshot(key)
    }

    pub fn subscribe(&self, key: &str) -> Option<watch::Receiver<JobSnapshot>> {
        self.inner.registry.subscribe(key)
    }

    /// Snapshots of every registered job, lingering terminal ones included.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.inner.registry.jobs()
    }

    /// Cancels the job under `key`, if any. The key frees immediately.
    pub fn cancel(&self, key: &str) -> bool {
        self.inner.registry.cancel(key)
    }

    /// Removes a completed download: the library record and its artifacts.
    pub async fn remove_download(
        &self,
        key: &str,
    ) -> Result<Option<PersistedDownload>, DownloadError> {
        self.inner.library.remove(key).await
    }

    async fn run_job(
        self,
        key: JobKey,
        title: String,
        descriptor: StreamDescriptor,
        preference: QualityPreference,
        token: CancellationToken,
    ) {
        match self
            .execute(&key, &title, &descriptor, preference, &token)
            .await
        {
            Ok(()) => info!(key, "download completed"),
            Err(DownloadError::Cancelled) => {
                // No-op when `cancel` already evicted the entry; publishes
                // the final snapshot when the handle tripped the token.
                self.inner.registry.cancel(&key);
                info!(key, "download cancelled");
            }
            Err(err) => {
                error!(key, %err, "download failed");
                self.inner.registry.fail(&key, &err);
            }
        }
    }

    async fn execute(
        &self,
        key: &str,
        title: &str,
        descriptor: &StreamDescriptor,
        preference: QualityPreference,
        token: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let registry = &self.inner.registry;
        registry.set_phase(key, JobPhase::FetchingSource);

        let url = Url::parse(&descriptor.stream_url).map_err(|err| {
            DownloadError::manifest(format!(
                "descriptor carries an invalid stream URL `{}`: {err}",
                descriptor.stream_url
            ))
        })?;
        let client = self.client_for(descriptor)?;
        let job_dir = self.job_dir(key);

        let kind = planner::classify(&client, &url).await;
        info!(key, %url, %kind, "transfer starting");

        let outcome = match kind {
            StreamKind::Adaptive => {
                let (manifest, manifest_url) = hls::fetch_manifest(&client, &url).await?;
                let chosen = planner::select_variant(&manifest, &manifest_url, preference)?;
                if let Some(label) = chosen.label.as_deref() {
                    debug!(key, label, "variant selected");
                }
                registry.set_phase(key, JobPhase::Transferring);
                let artifact = hls::download_playlist(
                    &client,
                    &chosen.url,
                    &job_dir,
                    self.inner.config.max_concurrent_segments,
                    token,
                    |done, total| registry.update_segments(key, done, total),
                )
                .await?;
                TransferOutcome {
                    kind: SavedKind::Playlist,
                    local_path: artifact.playlist_path,
                    representative: artifact.first_segment,
                    bytes: artifact.bytes_written,
                    quality_label: chosen.label,
                }
            }
            StreamKind::Single => {
                registry.set_phase(key, JobPhase::Transferring);
                let artifact =
                    direct::download_file(&client, &url, &job_dir, token, |done, total| {
                        registry.update_bytes(key, done, total)
                    })
                    .await?;
                TransferOutcome {
                    kind: SavedKind::File,
                    representative: artifact.file_path.clone(),
                    local_path: artifact.file_path,
                    bytes: artifact.bytes_total,
                    quality_label: None,
                }
            }
        };

        registry.set_phase(key, JobPhase::Validating);
        if let Err(err) =
            validate_artifact(&outcome.representative, self.inner.config.min_media_bytes).await
        {
            if matches!(err, DownloadError::Validation { .. }) {
                // A failed sniff means an error page, not a resumable
                // partial; a retry must start clean.
                if let Err(cleanup) = tokio::fs::remove_dir_all(&job_dir).await {
                    warn!(key, %cleanup, "failed to delete invalid artifact");
                }
            }
            return Err(err);
        }

        let subtitle_paths = self
            .fetch_subtitles(&client, &descriptor.subtitles, &job_dir)
            .await;

        registry.set_phase(key, JobPhase::SavingMetadata);
        let record = PersistedDownload {
            key: key.to_string(),
            title: title.to_string(),
            kind: outcome.kind,
            local_path: outcome.local_path,
            original_url: descriptor.stream_url.clone(),
            subtitle_paths,
            quality_label: outcome.quality_label,
            total_bytes: Some(outcome.bytes),
            completed_at: Utc::now(),
        };
        self.inner.library.record(&record).await?;

        registry.complete(key);
        Ok(())
    }

    /// Client used for a job: the shared one, or a derived one carrying the
    /// descriptor's replay headers.
    fn client_for(&self, descriptor: &StreamDescriptor) -> Result<Client, DownloadError> {
        let extra = match &descriptor.headers {
            Some(extra) if !extra.is_empty() => extra,
            _ => return Ok(self.inner.client.clone()),
        };

        let mut config = self.inner.config.clone();
        let headers = config.headers.get_or_insert_with(HeaderMap::new);
        for (name, value) in extra {
            let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                warn!(header = %name, "skipping invalid header name");
                continue;
            };
            let Ok(header_value) = HeaderValue::from_str(value) else {
                warn!(header = %name, "skipping invalid header value");
                continue;
            };
            headers.insert(header_name, header_value);
        }
        create_client(&config)
    }

    /// Subtitles are side artifacts: a failed track is logged and skipped,
    /// never failing the job. Returns the tracks that did land on disk.
    async fn fetch_subtitles(
        &self,
        client: &Client,
        subtitles: &[SubtitleTrack],
        job_dir: &Path,
    ) -> Vec<SavedSubtitle> {
        let mut used = HashSet::new();
        let mut saved = Vec::new();
        for (index, track) in subtitles.iter().enumerate() {
            match fetch_subtitle(client, track, job_dir, index, &mut used).await {
                Ok(path) => {
                    debug!(language = %track.language, path = %path.display(), "subtitle saved");
                    saved.push(SavedSubtitle {
                        language: track.language.clone(),
                        path,
                    });
                }
                Err(err) => {
                    warn!(language = %track.language, url = %track.url, %err, "subtitle fetch failed")
                }
            }
        }
        saved
    }
}

async fn fetch_subtitle(
    client: &Client,
    track: &SubtitleTrack,
    job_dir: &Path,
    index: usize,
    used: &mut HashSet<String>,
) -> Result<PathBuf, DownloadError> {
    let url = Url::parse(&track.url).map_err(|err| {
        DownloadError::manifest(format!("invalid subtitle URL `{}`: {err}", track.url))
    })?;
    let response = client.get(url.clone()).send().await?;
    if !response.status().is_success() {
        return Err(DownloadError::http_status(
            response.status(),
            url.as_str(),
            "subtitle fetch",
        ));
    }
    let bytes = response.bytes().await?;

    let path = job_dir.join(subtitle_file_name(&track.language, &url, index, used));
    tokio::fs::write(&path, &bytes).await?;
    Ok(path)
}

/// `sub_<language>.<ext>`, falling back to an indexed name when two tracks
/// share a language.
fn subtitle_file_name(
    language: &str,
    url: &Url,
    index: usize,
    used: &mut HashSet<String>,
) -> String {
    let lang: String = language
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let ext = match Path::new(url.path()).extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("srt") => "srt",
        _ => "vtt",
    };
    let name = format!("sub_{lang}.{ext}");
    if used.insert(name.clone()) {
        name
    } else {
        format!("sub_{lang}_{index}.{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use providers_resolver::ProviderKind;

    fn manager() -> DownloadManager {
        let config = DownloaderConfig::builder().output_root("/tmp/none").build();
        DownloadManager::new(config, Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn job_dir_replaces_key_separators() {
        let manager = manager();
        assert_eq!(
            manager.job_dir("show:1396:s01e03"),
            PathBuf::from("/tmp/none/show-1396-s01e03")
        );
    }

    #[tokio::test]
    async fn saved_media_short_circuits_start() {
        let manager = manager();
        let media = MediaRef::movie("603");
        let record = PersistedDownload {
            key: media.job_key(),
            title: "The Matrix".to_string(),
            kind: SavedKind::File,
            local_path: PathBuf::from("/tmp/none/movie-603/media.mp4"),
            original_url: "https://cdn.example/v.mp4".to_string(),
            subtitle_paths: Vec::new(),
            quality_label: None,
            total_bytes: None,
            completed_at: Utc::now(),
        };
        manager.library().record(&record).await.unwrap();

        // The descriptor URL is never touched.
        let descriptor = StreamDescriptor::new(ProviderKind::Vidora, "https://unreachable.example/v.mp4");
        let outcome = manager
            .start_download(&media, "The Matrix", &descriptor, QualityPreference::Highest)
            .await
            .unwrap();

        match outcome {
            StartOutcome::AlreadySaved(saved) => assert_eq!(saved.title, "The Matrix"),
            StartOutcome::Started(_) => panic!("no job should start for saved media"),
        }
        assert!(manager.query(&media.job_key()).is_none());
    }

    #[test]
    fn invalid_descriptor_headers_are_skipped() {
        let manager = manager();
        let mut headers = rustc_hash::FxHashMap::default();
        headers.insert("Referer".to_string(), "https://embedo.cc/".to_string());
        headers.insert("bad name".to_string(), "value".to_string());
        headers.insert("X-Broken".to_string(), "line\nbreak".to_string());

        let descriptor = StreamDescriptor::new(ProviderKind::Embedo, "https://cdn.example/v.mp4")
            .with_headers(headers);
        assert!(manager.client_for(&descriptor).is_ok());
    }

    #[test]
    fn subtitle_names_stay_unique() {
        let mut used = HashSet::new();
        let vtt = Url::parse("https://subs.example/en.vtt").unwrap();
        let srt = Url::parse("https://subs.example/en.srt?v=2").unwrap();

        assert_eq!(subtitle_file_name("en", &vtt, 0, &mut used), "sub_en.vtt");
        assert_eq!(subtitle_file_name("pt BR", &vtt, 1, &mut used), "sub_pt_BR.vtt");
        assert_eq!(subtitle_file_name("en", &srt, 2, &mut used), "sub_en.srt");
        assert_eq!(subtitle_file_name("en", &vtt, 3, &mut used), "sub_en_3.vtt");
    }
}
