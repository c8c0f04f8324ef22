use std::sync::Arc;

use tracing::warn;

use crate::error::DownloadError;
use crate::model::PersistedDownload;
use crate::store::KvStore;

const KEY_PREFIX: &str = "download:";

/// Catalog of completed downloads, layered over a [`KvStore`].
///
/// Records are the durable source of truth; the artifact directory on disk is
/// derived state that gets cleaned up alongside the record.
#[derive(Clone)]
pub struct DownloadLibrary {
    store: Arc<dyn KvStore>,
}

impl DownloadLibrary {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn store_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    pub async fn get(&self, key: &str) -> Result<Option<PersistedDownload>, DownloadError> {
        let Some(value) = self.store.get(&Self::store_key(key)).await? else {
            return Ok(None);
        };
        let record = serde_json::from_value(value).map_err(|err| {
            DownloadError::storage(format!("corrupt library record for `{key}`: {err}"))
        })?;
        Ok(Some(record))
    }

    pub async fn record(&self, record: &PersistedDownload) -> Result<(), DownloadError> {
        let value = serde_json::to_value(record).map_err(|err| {
            DownloadError::storage(format!("failed to serialize library record: {err}"))
        })?;
        self.store.set(&Self::store_key(&record.key), value).await?;
        Ok(())
    }

    /// Removes the record and the per-job directory holding its artifacts.
    ///
    /// Returns the removed record, or `None` when nothing was stored. A
    /// failure to delete artifacts is logged but does not resurrect the
    /// record.
    pub async fn remove(&self, key: &str) -> Result<Option<PersistedDownload>, DownloadError> {
        let Some(record) = self.get(key).await? else {
            return Ok(None);
        };
        self.store.remove(&Self::store_key(key)).await?;

        if let Some(dir) = record.local_path.parent() {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(key, dir = %dir.display(), %err, "failed to remove download artifacts")
                }
            }
        }
        Ok(Some(record))
    }
}
