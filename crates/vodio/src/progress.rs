use std::sync::Arc;

use tracing::debug;

use crate::error::DownloadError;
use crate::model::WatchProgress;
use crate::store::KvStore;

const KEY_PREFIX: &str = "progress:";

/// Watched fraction at which a title counts as finished and its resume
/// position is dropped.
pub const COMPLETION_FRACTION: f64 = 0.9;

/// Resume positions, layered over a [`KvStore`].
#[derive(Clone)]
pub struct WatchProgressStore {
    store: Arc<dyn KvStore>,
}

impl WatchProgressStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn store_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    pub async fn get(&self, key: &str) -> Result<Option<WatchProgress>, DownloadError> {
        let Some(value) = self.store.get(&Self::store_key(key)).await? else {
            return Ok(None);
        };
        let progress = serde_json::from_value(value).map_err(|err| {
            DownloadError::storage(format!("corrupt progress record for `{key}`: {err}"))
        })?;
        Ok(Some(progress))
    }

    /// Records a playback position.
    ///
    /// Positions at or past [`COMPLETION_FRACTION`] of the duration mean the
    /// title was effectively watched to the end: any stored position is
    /// removed and `None` comes back, so the next playback starts fresh. An
    /// unknown (zero) duration can never cross the threshold.
    pub async fn save(
        &self,
        key: &str,
        position_ms: u64,
        duration_ms: u64,
    ) -> Result<Option<WatchProgress>, DownloadError> {
        let progress = WatchProgress::new(key, position_ms, duration_ms);

        if progress.fraction >= COMPLETION_FRACTION {
            debug!(key, position_ms, duration_ms, "watched to completion, pruning position");
            self.store.remove(&Self::store_key(key)).await?;
            return Ok(None);
        }

        let value = serde_json::to_value(&progress).map_err(|err| {
            DownloadError::storage(format!("failed to serialize progress record: {err}"))
        })?;
        self.store.set(&Self::store_key(key), value).await?;
        Ok(Some(progress))
    }

    /// Drops any stored position for `key`, returning it if one existed.
    pub async fn clear(&self, key: &str) -> Result<Option<WatchProgress>, DownloadError> {
        let Some(value) = self.store.remove(&Self::store_key(key)).await? else {
            return Ok(None);
        };
        let progress = serde_json::from_value(value).map_err(|err| {
            DownloadError::storage(format!("corrupt progress record for `{key}`: {err}"))
        })?;
        Ok(Some(progress))
    }
}
