pub mod config;
pub mod direct;
pub mod error;
pub mod hls;
pub mod library;
pub mod manager;
pub mod model;
pub mod planner;
pub mod progress;
pub mod registry;
pub mod store;
pub mod validate;

pub use config::{DEFAULT_USER_AGENT, DownloaderConfig, DownloaderConfigBuilder, create_client};
pub use error::DownloadError;
pub use library::DownloadLibrary;
pub use manager::{DownloadManager, JobHandle, StartOutcome};
pub use model::{
    JobKey, JobPhase, JobSnapshot, PersistedDownload, SavedKind, SavedSubtitle, WatchProgress,
};
pub use planner::{ChosenVariant, QualityPreference, StreamKind};
pub use progress::{COMPLETION_FRACTION, WatchProgressStore};
pub use registry::JobRegistry;
pub use store::{JsonFileStore, KvStore, MemoryStore, StorageError};
