//! Per-task worker: runs one job via the backend and owns its record
//!
//! The worker is the only writer of its task's record. It translates backend
//! progress into store updates and broadcast events, and guarantees the task
//! ends in exactly one terminal state even when the backend errors or the
//! progress channel goes quiet. A failure inside a worker never propagates
//! beyond its task.

use crate::backend::{JobBackend, JobContext, ProgressSink, ProgressUpdate};
use crate::fetcher::TaskCounters;
use crate::store::TaskStore;
use crate::types::{Event, MediaFormat, TaskId, TaskRecord, TaskStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;

/// Parameters for spawning one job worker
pub(crate) struct JobParams {
    /// Task ID
    pub id: TaskId,
    /// Source media URL
    pub url: String,
    /// Requested output format
    pub format: MediaFormat,
    /// Task store (this worker is the record's sole writer)
    pub store: Arc<dyn TaskStore>,
    /// Backend performing the actual fetch
    pub backend: Arc<dyn JobBackend>,
    /// Lifecycle event broadcast sender
    pub event_tx: broadcast::Sender<Event>,
    /// Concurrency permits; the job waits here before transferring
    pub permits: Arc<tokio::sync::Semaphore>,
    /// Shared task counters
    pub counters: Arc<TaskCounters>,
    /// Artifact output directory
    pub output_dir: PathBuf,
    /// How long the terminal record stays in the store
    pub record_ttl: Duration,
}

/// Spawn the worker task for one job
pub(crate) fn spawn_job(params: JobParams) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let JobParams {
            id,
            url,
            format,
            store,
            backend,
            event_tx,
            permits,
            counters,
            output_dir,
            record_ttl,
        } = params;

        // Job stays in `starting` until a permit frees up. Permits are never
        // closed while workers exist, but a terminal record is written anyway
        // if that assumption ever breaks.
        let _permit = match permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                finish_error(&store, &event_tx, &counters, id, "worker pool closed".to_string(), 0.0);
                return;
            }
        };

        let (progress, mut progress_rx) = ProgressSink::channel();
        let ctx = JobContext {
            id,
            url,
            format,
            output_dir,
            progress,
        };

        let run = backend.run_job(ctx);
        tokio::pin!(run);

        let mut last_percent = 0.0f32;
        loop {
            tokio::select! {
                Some(update) = progress_rx.recv() => {
                    last_percent = apply_update(&store, &event_tx, id, update, last_percent);
                }
                result = &mut run => {
                    match result {
                        Ok(path) => {
                            tracing::info!(task_id = %id, path = %path.display(), "task finished");
                            let file_url = format!("/api/get-file/{id}");
                            store.put(id, TaskRecord::finished(file_url.clone()));
                            counters.finished.fetch_add(1, Ordering::Relaxed);
                            counters.active.fetch_sub(1, Ordering::Relaxed);
                            event_tx.send(Event::Finished { id, file_url }).ok();
                        }
                        Err(e) => {
                            finish_error(&store, &event_tx, &counters, id, e.to_string(), last_percent);
                        }
                    }
                    break;
                }
            }
        }

        schedule_record_cleanup(store, id, record_ttl);
    })
}

/// Write one progress update, enforcing non-decreasing percent
///
/// Backends occasionally re-report lower percentages (per-fragment restarts in
/// the extractor); the observed stream stays monotonic regardless.
fn apply_update(
    store: &Arc<dyn TaskStore>,
    event_tx: &broadcast::Sender<Event>,
    id: TaskId,
    update: ProgressUpdate,
    last_percent: f32,
) -> f32 {
    let percent = update.percent.clamp(0.0, 100.0).max(last_percent);
    let status = match update.status {
        TaskStatus::Processing => TaskStatus::Processing,
        _ => TaskStatus::Downloading,
    };

    store.put(
        id,
        TaskRecord {
            status,
            percent,
            file_url: None,
            error: None,
            speed_bps: update.speed_bps,
            eta_seconds: update.eta_seconds,
        },
    );
    event_tx
        .send(Event::Progress {
            id,
            status,
            percent,
            speed_bps: update.speed_bps,
            eta_seconds: update.eta_seconds,
        })
        .ok();

    percent
}

/// Write the terminal failure record, keeping the last observed percent
fn finish_error(
    store: &Arc<dyn TaskStore>,
    event_tx: &broadcast::Sender<Event>,
    counters: &Arc<TaskCounters>,
    id: TaskId,
    error: String,
    last_percent: f32,
) {
    tracing::warn!(task_id = %id, error = %error, "task failed");
    store.put(id, TaskRecord::failed(error.clone(), last_percent));
    counters.failed.fetch_add(1, Ordering::Relaxed);
    counters.active.fetch_sub(1, Ordering::Relaxed);
    event_tx.send(Event::Failed { id, error }).ok();
}

/// Remove the terminal record after a grace period
///
/// Keeps late progress-stream reconnects working shortly after completion
/// while bounding store growth. Fire-and-forget; if the process exits first
/// the store dies with it.
fn schedule_record_cleanup(store: Arc<dyn TaskStore>, id: TaskId, ttl: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        store.delete(id);
        tracing::debug!(task_id = %id, "terminal task record removed");
    });
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaskStore;

    fn setup() -> (
        Arc<dyn TaskStore>,
        broadcast::Sender<Event>,
        broadcast::Receiver<Event>,
    ) {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let (tx, rx) = broadcast::channel(64);
        (store, tx, rx)
    }

    #[test]
    fn apply_update_ignores_percent_regression() {
        let (store, tx, _rx) = setup();
        let id = TaskId::new();

        let last = apply_update(&store, &tx, id, ProgressUpdate::downloading(60.0), 0.0);
        assert_eq!(last, 60.0);

        // Backend re-reports a lower value; stored percent must not move back
        let last = apply_update(&store, &tx, id, ProgressUpdate::downloading(40.0), last);
        assert_eq!(last, 60.0);
        assert_eq!(store.get(id).percent, 60.0);
    }

    #[test]
    fn apply_update_clamps_out_of_range_percent() {
        let (store, tx, _rx) = setup();
        let id = TaskId::new();

        let last = apply_update(&store, &tx, id, ProgressUpdate::downloading(130.0), 0.0);
        assert_eq!(last, 100.0);
        assert_eq!(store.get(id).status, TaskStatus::Downloading);
    }

    #[test]
    fn processing_update_keeps_processing_status() {
        let (store, tx, _rx) = setup();
        let id = TaskId::new();

        apply_update(&store, &tx, id, ProgressUpdate::processing(), 80.0);
        let record = store.get(id);
        assert_eq!(record.status, TaskStatus::Processing);
        assert_eq!(record.percent, 100.0);
    }

    #[tokio::test]
    async fn record_cleanup_removes_after_ttl() {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let id = TaskId::new();
        store.put(id, TaskRecord::finished("/api/get-file/x".to_string()));

        schedule_record_cleanup(Arc::clone(&store), id, Duration::from_millis(50));

        assert_eq!(store.get(id).status, TaskStatus::Finished);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.get(id).status, TaskStatus::Waiting);
    }

    #[test]
    fn finish_error_writes_terminal_record_and_event() {
        let (store, tx, mut rx) = setup();
        let counters = Arc::new(TaskCounters::default());
        counters.active.fetch_add(1, Ordering::Relaxed);
        let id = TaskId::new();

        finish_error(&store, &tx, &counters, id, "upstream 403".to_string(), 0.0);

        let record = store.get(id);
        assert_eq!(record.status, TaskStatus::Error);
        assert_eq!(record.error.as_deref(), Some("upstream 403"));
        assert_eq!(counters.failed.load(Ordering::Relaxed), 1);
        assert_eq!(counters.active.load(Ordering::Relaxed), 0);
        assert!(matches!(rx.try_recv().unwrap(), Event::Failed { .. }));
    }

    #[test]
    fn finish_error_preserves_last_percent() {
        let (store, tx, _rx) = setup();
        let counters = Arc::new(TaskCounters::default());
        let id = TaskId::new();

        let last = apply_update(&store, &tx, id, ProgressUpdate::downloading(60.0), 0.0);
        finish_error(&store, &tx, &counters, id, "disk full".to_string(), last);

        // The error transition must not move progress backward
        let record = store.get(id);
        assert_eq!(record.status, TaskStatus::Error);
        assert_eq!(record.percent, 60.0);
    }
}
