//! In-memory registry of download jobs.
//!
//! The registry is the only shared mutable state in the engine: every phase
//! and progress change goes through it, and it enforces the one-job-per-key
//! rule at [`JobRegistry::begin`] time. Terminal jobs linger for a grace
//! period so a final `completed`/`failed` observation can still be read, then
//! get evicted by a timer. A lingering failure never blocks a retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::DownloadError;
use crate::model::{JobKey, JobPhase, JobSnapshot};

struct ActiveJob {
    snapshot: JobSnapshot,
    tx: watch::Sender<JobSnapshot>,
    token: CancellationToken,
    /// Distinguishes this registration from later ones under the same key,
    /// so a stale eviction timer cannot remove a replacement job.
    epoch: u64,
}

#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    jobs: Mutex<HashMap<JobKey, ActiveJob>>,
    completed_linger: Duration,
    failed_linger: Duration,
    epoch: AtomicU64,
}

impl JobRegistry {
    pub fn new(completed_linger: Duration, failed_linger: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                jobs: Mutex::new(HashMap::new()),
                completed_linger,
                failed_linger,
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a new job under `key`.
    ///
    /// Fails with [`DownloadError::AlreadyActive`] while a non-terminal job
    /// holds the key and with [`DownloadError::AlreadyCompleted`] while a
    /// completed one lingers. A lingering failed or cancelled job is replaced
    /// as if the key were free.
    pub fn begin(
        &self,
        key: &str,
    ) -> Result<(watch::Receiver<JobSnapshot>, CancellationToken), DownloadError> {
        let mut jobs = self.inner.jobs.lock();
        if let Some(existing) = jobs.get(key) {
            match existing.snapshot.phase {
                JobPhase::Completed => return Err(DownloadError::already_completed(key)),
                phase if !phase.is_terminal() => {
                    return Err(DownloadError::already_active(key));
                }
                _ => debug!(key, "replacing lingering failed job"),
            }
        }

        let snapshot = JobSnapshot::new(key);
        let (tx, rx) = watch::channel(snapshot.clone());
        let token = CancellationToken::new();
        let epoch = self.inner.epoch.fetch_add(1, Ordering::Relaxed);
        jobs.insert(
            key.to_string(),
            ActiveJob {
                snapshot,
                tx,
                token: token.clone(),
                epoch,
            },
        );
        Ok((rx, token))
    }

    /// Moves a job to a non-terminal phase. Terminal transitions go through
    /// [`Self::complete`], [`Self::fail`] or [`Self::cancel`].
    pub fn set_phase(&self, key: &str, phase: JobPhase) {
        self.mutate(key, |snapshot| snapshot.phase = phase);
    }

    pub fn update_segments(&self, key: &str, done: u32, total: u32) {
        self.mutate(key, |snapshot| {
            snapshot.segments_done = Some(done);
            snapshot.segments_total = Some(total);
            if total > 0 {
                snapshot.progress = Some((done as f32 / total as f32).clamp(0.0, 1.0));
            }
        });
    }

    pub fn update_bytes(&self, key: &str, done: u64, total: Option<u64>) {
        self.mutate(key, |snapshot| {
            snapshot.bytes_done = Some(done);
            if total.is_some() {
                snapshot.bytes_total = total;
            }
            if let Some(total) = total.filter(|t| *t > 0) {
                snapshot.progress = Some((done as f64 / total as f64).clamp(0.0, 1.0) as f32);
            }
        });
    }

    pub fn complete(&self, key: &str) {
        let updated = self.mutate(key, |snapshot| {
            snapshot.phase = JobPhase::Completed;
            snapshot.progress = Some(1.0);
            snapshot.error = None;
        });
        if updated {
            self.schedule_eviction(key, self.inner.completed_linger);
        }
    }

    pub fn fail(&self, key: &str, error: &DownloadError) {
        let message = error.to_string();
        let updated = self.mutate(key, |snapshot| {
            snapshot.phase = JobPhase::Failed;
            snapshot.error = Some(message);
        });
        if updated {
            self.schedule_eviction(key, self.inner.failed_linger);
        }
    }

    /// Trips the job's cancellation token, publishes a final `cancelled`
    /// snapshot and frees the key immediately. Returns false when no job
    /// holds the key.
    pub fn cancel(&self, key: &str) -> bool {
        let mut jobs = self.inner.jobs.lock();
        let Some(mut job) = jobs.remove(key) else {
            return false;
        };
        job.token.cancel();
        job.snapshot.phase = JobPhase::Cancelled;
        job.tx.send_replace(job.snapshot.clone());
        debug!(key, "job cancelled and evicted");
        true
    }

    pub fn snapshot(&self, key: &str) -> Option<JobSnapshot> {
        self.inner
            .jobs
            .lock()
            .get(key)
            .map(|job| job.snapshot.clone())
    }

    pub fn subscribe(&self, key: &str) -> Option<watch::Receiver<JobSnapshot>> {
        self.inner.jobs.lock().get(key).map(|job| job.tx.subscribe())
    }

    /// Snapshots of every registered job, lingering terminal ones included,
    /// ordered by key.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<JobSnapshot> = self
            .inner
            .jobs
            .lock()
            .values()
            .map(|job| job.snapshot.clone())
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    /// Applies `apply` to the job's snapshot and publishes the result.
    ///
    /// Enforces the progress invariant at the single write point: the
    /// published fraction never decreases and never regresses from a known
    /// value back to indeterminate. Jobs in a terminal phase are frozen.
    fn mutate(&self, key: &str, apply: impl FnOnce(&mut JobSnapshot)) -> bool {
        let mut jobs = self.inner.jobs.lock();
        let Some(job) = jobs.get_mut(key) else {
            return false;
        };
        if job.snapshot.phase.is_terminal() {
            return false;
        }

        let previous = job.snapshot.progress;
        apply(&mut job.snapshot);
        match (previous, job.snapshot.progress) {
            (Some(prev), Some(next)) if next < prev => job.snapshot.progress = Some(prev),
            (Some(_), None) => job.snapshot.progress = previous,
            _ => {}
        }

        job.tx.send_replace(job.snapshot.clone());
        true
    }

    fn schedule_eviction(&self, key: &str, linger: Duration) {
        let epoch = {
            let jobs = self.inner.jobs.lock();
            match jobs.get(key) {
                Some(job) => job.epoch,
                None => return,
            }
        };
        let registry = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            let mut jobs = registry.inner.jobs.lock();
            if let Some(job) = jobs.get(&key)
                && job.epoch == epoch
            {
                jobs.remove(&key);
                debug!(key, "terminal job evicted");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> JobRegistry {
        JobRegistry::new(Duration::from_millis(50), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn second_begin_for_an_active_key_is_rejected() {
        let registry = registry();
        let _handle = registry.begin("movie:603").unwrap();

        let err = registry.begin("movie:603").unwrap_err();
        assert!(matches!(err, DownloadError::AlreadyActive { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_jobs_linger_then_evict() {
        let registry = registry();
        let _handle = registry.begin("movie:603").unwrap();
        registry.complete("movie:603");

        // Within the linger window the final state stays observable and the
        // key stays taken.
        let snapshot = registry.snapshot("movie:603").unwrap();
        assert_eq!(snapshot.phase, JobPhase::Completed);
        assert_eq!(snapshot.progress, Some(1.0));
        let err = registry.begin("movie:603").unwrap_err();
        assert!(matches!(err, DownloadError::AlreadyCompleted { .. }));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.snapshot("movie:603").is_none());
        assert!(registry.begin("movie:603").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn lingering_failure_does_not_block_retry() {
        let registry = registry();
        let _handle = registry.begin("movie:603").unwrap();
        registry.fail("movie:603", &DownloadError::validation("markup artifact"));

        let snapshot = registry.snapshot("movie:603").unwrap();
        assert_eq!(snapshot.phase, JobPhase::Failed);
        assert!(snapshot.error.as_deref().unwrap().contains("markup"));

        // Retry while the failure still lingers: treated as fresh.
        let _retry = registry.begin("movie:603").unwrap();
        let snapshot = registry.snapshot("movie:603").unwrap();
        assert_eq!(snapshot.phase, JobPhase::Queued);

        // The stale eviction timer from the failed run must not remove the
        // replacement job.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(registry.snapshot("movie:603").is_some());
    }

    #[tokio::test]
    async fn progress_never_decreases() {
        let registry = registry();
        let _handle = registry.begin("movie:603").unwrap();
        registry.set_phase("movie:603", JobPhase::Transferring);

        registry.update_segments("movie:603", 5, 10);
        assert_eq!(registry.snapshot("movie:603").unwrap().progress, Some(0.5));

        registry.update_segments("movie:603", 3, 10);
        let snapshot = registry.snapshot("movie:603").unwrap();
        assert_eq!(snapshot.progress, Some(0.5));
        assert_eq!(snapshot.segments_done, Some(3));
    }

    #[tokio::test]
    async fn terminal_jobs_are_frozen() {
        let registry = registry();
        let _handle = registry.begin("movie:603").unwrap();
        registry.complete("movie:603");
        registry.update_segments("movie:603", 1, 10);

        let snapshot = registry.snapshot("movie:603").unwrap();
        assert_eq!(snapshot.phase, JobPhase::Completed);
        assert_eq!(snapshot.progress, Some(1.0));
    }

    #[tokio::test]
    async fn cancel_trips_the_token_and_frees_the_key() {
        let registry = registry();
        let (rx, token) = registry.begin("movie:603").unwrap();

        assert!(registry.cancel("movie:603"));
        assert!(token.is_cancelled());
        assert_eq!(rx.borrow().phase, JobPhase::Cancelled);
        assert!(registry.snapshot("movie:603").is_none());
        assert!(registry.begin("movie:603").is_ok());

        assert!(!registry.cancel("movie:9999"));
    }

    #[tokio::test]
    async fn watchers_observe_published_updates() {
        let registry = registry();
        let (mut rx, _token) = registry.begin("movie:603").unwrap();

        registry.set_phase("movie:603", JobPhase::Transferring);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, JobPhase::Transferring);

        registry.update_bytes("movie:603", 512, Some(2048));
        rx.changed().await.unwrap();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.bytes_done, Some(512));
        assert_eq!(snapshot.progress, Some(0.25));
    }

    #[tokio::test]
    async fn unknown_total_keeps_progress_indeterminate() {
        let registry = registry();
        let _handle = registry.begin("movie:603").unwrap();

        registry.update_bytes("movie:603", 4096, None);
        let snapshot = registry.snapshot("movie:603").unwrap();
        assert_eq!(snapshot.bytes_done, Some(4096));
        assert!(snapshot.progress.is_none());
    }
}
