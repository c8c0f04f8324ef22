use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity of a download job, e.g. `movie:603` or `show:1396:s01e03`.
///
/// Keys come from [`providers_resolver::MediaRef::job_key`] so the registry,
/// the library and the watch-progress store all agree on identity.
pub type JobKey = String;

/// Lifecycle phase of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobPhase {
    /// Registered, transfer not started yet.
    Queued,
    /// Resolving and fetching the source manifest or probing the file.
    FetchingSource,
    /// Moving media bytes.
    Transferring,
    /// Inspecting the artifact on disk.
    Validating,
    /// Writing the library record.
    SavingMetadata,
    Completed,
    Failed,
    Cancelled,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Point-in-time view of a job, published on every state change.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub key: JobKey,
    pub phase: JobPhase,
    /// Completed fraction in `0.0..=1.0`, `None` while indeterminate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments_done: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments_total: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_done: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn new(key: impl Into<JobKey>) -> Self {
        Self {
            key: key.into(),
            phase: JobPhase::Queued,
            progress: None,
            segments_done: None,
            segments_total: None,
            bytes_done: None,
            bytes_total: None,
            error: None,
        }
    }
}

/// What kind of artifact a completed download left on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SavedKind {
    /// Rewritten local playlist plus segment files.
    Playlist,
    /// Single media file.
    File,
}

/// A subtitle file saved alongside a download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSubtitle {
    pub language: String,
    pub path: PathBuf,
}

/// Library record for a finished download. Written once on completion,
/// never mutated afterward except for deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedDownload {
    pub key: JobKey,
    pub title: String,
    pub kind: SavedKind,
    /// Entry point for playback: the local playlist or the media file.
    pub local_path: PathBuf,
    /// Stream URL the artifact was fetched from.
    pub original_url: String,
    #[serde(default)]
    pub subtitle_paths: Vec<SavedSubtitle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    pub completed_at: DateTime<Utc>,
}

/// Resume position for a piece of media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchProgress {
    pub key: JobKey,
    pub position_ms: u64,
    pub duration_ms: u64,
    /// Watched fraction in `0.0..=1.0`; 0.0 when the duration is unknown.
    pub fraction: f64,
    pub last_watched: DateTime<Utc>,
}

impl WatchProgress {
    pub fn new(key: impl Into<JobKey>, position_ms: u64, duration_ms: u64) -> Self {
        let fraction = if duration_ms == 0 {
            0.0
        } else {
            (position_ms as f64 / duration_ms as f64).clamp(0.0, 1.0)
        };
        Self {
            key: key.into(),
            position_ms,
            duration_ms,
            fraction,
            last_watched: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases() {
        assert!(JobPhase::Completed.is_terminal());
        assert!(JobPhase::Failed.is_terminal());
        assert!(JobPhase::Cancelled.is_terminal());
        assert!(!JobPhase::Queued.is_terminal());
        assert!(!JobPhase::Transferring.is_terminal());
    }

    #[test]
    fn snapshot_serializes_without_absent_fields() {
        let snapshot = JobSnapshot::new("movie:603");
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["phase"], "queued");
        assert!(json.get("progress").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn fraction_handles_zero_duration() {
        let progress = WatchProgress::new("movie:603", 42_000, 0);
        assert_eq!(progress.fraction, 0.0);
    }

    #[test]
    fn fraction_clamps_past_the_end() {
        let progress = WatchProgress::new("movie:603", 7_300_000, 7_200_000);
        assert_eq!(progress.fraction, 1.0);
    }
}
