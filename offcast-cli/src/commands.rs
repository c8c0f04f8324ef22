use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use providers_resolver::{
    Orchestrator, OrchestratorConfig, ProviderFactory, StaticMetadata, StreamDescriptor,
    TitleDetails, default_client,
};
use vodio_engine::{
    DownloadManager, DownloaderConfig, JobHandle, JobPhase, JobSnapshot, JsonFileStore, KvStore,
    MemoryStore, QualityPreference, StartOutcome, WatchProgressStore,
};

use crate::cli::{MediaSelection, OutputFormat, ProgressAction};
use crate::output;

/// How often the download loop re-reads the job snapshot.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct CommandExecutor {
    state_dir: Option<PathBuf>,
    out_dir: PathBuf,
}

impl CommandExecutor {
    pub fn new(state_dir: Option<PathBuf>, out_dir: PathBuf) -> Self {
        Self { state_dir, out_dir }
    }

    /// Durable store when `--state-dir` was given, in-memory otherwise.
    fn open_store(&self) -> anyhow::Result<Arc<dyn KvStore>> {
        match &self.state_dir {
            Some(dir) => {
                let path = dir.join("offcast.json");
                let store = JsonFileStore::open(&path)
                    .with_context(|| format!("failed to open state file {}", path.display()))?;
                Ok(Arc::new(store))
            }
            None => Ok(Arc::new(MemoryStore::new())),
        }
    }

    fn manager(&self) -> anyhow::Result<DownloadManager> {
        let config = DownloaderConfig::builder()
            .output_root(&self.out_dir)
            .build();
        Ok(DownloadManager::new(config, self.open_store()?)?)
    }

    async fn resolve_stream(
        &self,
        selection: &MediaSelection,
    ) -> anyhow::Result<StreamDescriptor> {
        let metadata = build_metadata(selection);
        let factory = ProviderFactory::new(default_client(), metadata);
        let config = OrchestratorConfig {
            preferred: selection.provider,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(&factory, config)?;
        Ok(orchestrator.resolve(&selection.media_ref()).await?)
    }

    pub async fn resolve(
        &self,
        selection: MediaSelection,
        format: OutputFormat,
    ) -> anyhow::Result<()> {
        let descriptor = self.resolve_stream(&selection).await?;
        print!("{}", output::format_descriptor(&descriptor, format)?);
        Ok(())
    }

    pub async fn download(
        &self,
        selection: MediaSelection,
        quality: QualityPreference,
        format: OutputFormat,
    ) -> anyhow::Result<()> {
        let media = selection.media_ref();
        let descriptor = self.resolve_stream(&selection).await?;

        let manager = self.manager()?;
        let title = selection.title.clone().unwrap_or_else(|| selection.id.clone());
        let handle = match manager
            .start_download(&media, title, &descriptor, quality)
            .await?
        {
            StartOutcome::AlreadySaved(record) => {
                print!("{}", output::format_record(&record, format)?);
                return Ok(());
            }
            StartOutcome::Started(handle) => handle,
        };

        if format == OutputFormat::Pretty {
            println!(
                "Downloading `{}` to {}",
                handle.key,
                manager.job_dir(&handle.key).display()
            );
        }

        let snapshot = watch_job(&handle, format).await;
        match snapshot.phase {
            JobPhase::Completed => {
                let record = manager
                    .library()
                    .get(&handle.key)
                    .await?
                    .context("completed download is missing from the library")?;
                print!("{}", output::format_record(&record, format)?);
                Ok(())
            }
            JobPhase::Cancelled => {
                print!("{}", output::format_snapshot(&snapshot, format)?);
                Ok(())
            }
            _ => bail!(
                snapshot
                    .error
                    .unwrap_or_else(|| "download failed".to_string())
            ),
        }
    }

    pub async fn jobs(&self, format: OutputFormat) -> anyhow::Result<()> {
        let manager = self.manager()?;
        print!("{}", output::format_jobs(&manager.jobs(), format)?);
        Ok(())
    }

    pub async fn progress(&self, action: ProgressAction) -> anyhow::Result<()> {
        let store = WatchProgressStore::new(self.open_store()?);
        match action {
            ProgressAction::Get { key } => match store.get(&key).await? {
                Some(progress) => print!("{}", output::format_progress(&progress)),
                None => println!("no stored position for `{key}`"),
            },
            ProgressAction::Set {
                key,
                position,
                duration,
            } => match store.save(&key, position, duration).await? {
                Some(progress) => print!("{}", output::format_progress(&progress)),
                None => println!("`{key}` watched to completion, position cleared"),
            },
            ProgressAction::Clear { key } => match store.clear(&key).await? {
                Some(_) => println!("cleared stored position for `{key}`"),
                None => println!("no stored position for `{key}`"),
            },
        }
        Ok(())
    }
}

/// Polls the job until it reaches a terminal phase. Ctrl-C requests
/// cancellation and keeps polling for the final snapshot.
async fn watch_job(handle: &JobHandle, format: OutputFormat) -> JobSnapshot {
    let bar = match format {
        OutputFormat::Pretty => Some(output::progress_bar()),
        OutputFormat::Json => None,
    };

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let snapshot = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if let Some(bar) = &bar {
                    bar.set_message("cancelling");
                }
                handle.cancel();
            }
            _ = ticker.tick() => {
                let snapshot = handle.snapshots.borrow().clone();
                if let Some(bar) = &bar {
                    output::render_progress(bar, &snapshot);
                }
                if snapshot.phase.is_terminal() {
                    break snapshot;
                }
            }
        }
    };
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    snapshot
}

/// Metadata collaborator for the extractors, seeded entirely from the
/// command line.
fn build_metadata(selection: &MediaSelection) -> Arc<StaticMetadata> {
    let mut metadata = StaticMetadata::new();
    if let Some(title) = &selection.title {
        metadata = metadata.with_title(
            &selection.id,
            TitleDetails {
                title: title.clone(),
                year: selection.year,
                external_id: selection.external_id.clone(),
            },
        );
    }
    Arc::new(metadata)
}
