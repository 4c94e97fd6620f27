//! Core fetch service (task submission, worker dispatch, retention)

use crate::backend::{JobBackend, RelayBackend, YtdlpBackend};
use crate::config::{BackendKind, Config};
use crate::error::{Error, Result};
use crate::store::{MemoryTaskStore, TaskStore};
use crate::types::{Event, MediaFormat, MediaInfo, TaskId, TaskRecord, TaskStats};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

pub(crate) mod sweeper;
pub(crate) mod worker;

/// Capacity of the lifecycle event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Name of the cookies file materialized from `COOKIES_CONTENT`
const COOKIES_FILE_NAME: &str = "cookies.txt";

/// Aggregate task counters shared between the fetcher and its workers
#[derive(Default)]
pub(crate) struct TaskCounters {
    pub submitted: AtomicU64,
    pub active: AtomicU64,
    pub finished: AtomicU64,
    pub failed: AtomicU64,
}

/// The fetch service: accepts task submissions, runs them on a bounded pool
/// of workers, publishes lifecycle events, and sweeps stale artifacts
///
/// Construct with [`VidFetcher::new`] for the configured backend and default
/// in-memory store, or [`VidFetcher::with_parts`] to inject either. Clone-free
/// sharing is done by wrapping in `Arc` at the embedding site; all methods
/// take `&self`.
pub struct VidFetcher {
    config: Config,
    store: Arc<dyn TaskStore>,
    backend: Arc<dyn JobBackend>,
    event_tx: broadcast::Sender<Event>,
    job_permits: Arc<Semaphore>,
    counters: Arc<TaskCounters>,
    shutting_down: AtomicBool,
    shutdown_token: CancellationToken,
    sweeper_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl VidFetcher {
    /// Create a fetcher with the configured backend and an in-memory store
    ///
    /// Validates the config, creates the artifact directory, materializes the
    /// cookies file from `COOKIES_CONTENT` when that variable is set, and
    /// starts the retention sweeper.
    pub fn new(mut config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.jobs.download_dir)?;
        materialize_cookies(&mut config)?;

        let backend: Arc<dyn JobBackend> = match config.jobs.backend {
            BackendKind::Ytdlp => Arc::new(YtdlpBackend::from_config(&config.extractor)?),
            BackendKind::Relay => Arc::new(RelayBackend::from_config(&config.relay)?),
        };

        Self::with_parts(config, Arc::new(MemoryTaskStore::new()), backend)
    }

    /// Create a fetcher with an injected store and backend
    ///
    /// The main seam for tests and for embedders wanting a persistent store.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn TaskStore>,
        backend: Arc<dyn JobBackend>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.jobs.download_dir)?;

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shutdown_token = CancellationToken::new();

        let sweeper_handle = sweeper::spawn_sweeper(
            config.jobs.download_dir.clone(),
            config.retention.clone(),
            shutdown_token.clone(),
        );

        tracing::info!(
            backend = backend.name(),
            download_dir = %config.jobs.download_dir.display(),
            max_concurrent_jobs = config.jobs.max_concurrent_jobs,
            "fetch service started"
        );

        Ok(Self {
            job_permits: Arc::new(Semaphore::new(config.jobs.max_concurrent_jobs)),
            config,
            store,
            backend,
            event_tx,
            counters: Arc::new(TaskCounters::default()),
            shutting_down: AtomicBool::new(false),
            shutdown_token,
            sweeper_handle: Mutex::new(Some(sweeper_handle)),
        })
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The task store backing this fetcher
    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Submit a fetch task; returns the new task id immediately
    ///
    /// The job itself runs on a background worker. The returned id is live in
    /// the store with status `starting` before this method returns, so a
    /// progress stream opened right away observes a valid record.
    pub fn submit(&self, url: &str, format: MediaFormat) -> Result<TaskId> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidUrl("URL must not be empty".to_string()));
        }

        let id = TaskId::new();
        self.store.put(id, TaskRecord::starting());
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        self.event_tx.send(Event::Submitted { id, format }).ok();

        tracing::info!(task_id = %id, format = %format, "task submitted");

        worker::spawn_job(worker::JobParams {
            id,
            url: url.to_string(),
            format,
            store: Arc::clone(&self.store),
            backend: Arc::clone(&self.backend),
            event_tx: self.event_tx.clone(),
            permits: Arc::clone(&self.job_permits),
            counters: Arc::clone(&self.counters),
            output_dir: self.config.jobs.download_dir.clone(),
            record_ttl: self.config.jobs.record_ttl(),
        });

        Ok(id)
    }

    /// Fetch metadata for a URL through the active backend
    pub async fn fetch_metadata(&self, url: &str) -> Result<MediaInfo> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidUrl("URL must not be empty".to_string()));
        }
        self.backend.fetch_metadata(url).await
    }

    /// Aggregate task counts since start
    pub fn stats(&self) -> TaskStats {
        TaskStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed),
            finished: self.counters.finished.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting submissions and halt background tasks
    ///
    /// In-flight jobs are not aborted; they run to a terminal state. The
    /// sweeper stops at its next tick.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("fetch service shutting down");

        self.event_tx.send(Event::Shutdown).ok();
        self.shutdown_token.cancel();

        if let Some(handle) = self.sweeper_handle.lock().await.take()
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "sweeper task did not stop cleanly");
        }
        Ok(())
    }
}

/// Write `COOKIES_CONTENT` to a cookies file under the download directory
///
/// No-op when the variable is unset (logged, since extraction then runs
/// without authenticated cookies) or when a cookies file is already
/// configured.
fn materialize_cookies(config: &mut Config) -> Result<()> {
    if config.extractor.cookies_file.is_some() {
        return Ok(());
    }
    match std::env::var("COOKIES_CONTENT") {
        Ok(content) if !content.is_empty() => {
            let path = config.jobs.download_dir.join(COOKIES_FILE_NAME);
            std::fs::write(&path, content)?;
            tracing::info!(path = %path.display(), "cookies file materialized from environment");
            config.extractor.cookies_file = Some(path);
        }
        _ => {
            tracing::warn!("COOKIES_CONTENT not set, extractor runs without session cookies");
        }
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{JobContext, ProgressUpdate};
    use crate::types::TaskStatus;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Scripted backend: writes a small artifact and reports two progress steps
    struct ScriptedBackend {
        fail_with: Option<String>,
        delay: Duration,
    }

    impl ScriptedBackend {
        fn succeeding() -> Self {
            Self {
                fail_with: None,
                delay: Duration::ZERO,
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                fail_with: Some(message.to_string()),
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                fail_with: None,
                delay,
            }
        }
    }

    #[async_trait]
    impl JobBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch_metadata(&self, _url: &str) -> crate::Result<crate::types::MediaInfo> {
            Ok(crate::types::MediaInfo {
                title: "Test Video".to_string(),
                thumbnail: None,
                duration: "1:00".to_string(),
                uploader: "tester".to_string(),
            })
        }

        async fn run_job(&self, ctx: JobContext) -> crate::Result<PathBuf> {
            tokio::time::sleep(self.delay).await;
            if let Some(message) = &self.fail_with {
                return Err(Error::Extractor(message.clone()));
            }
            ctx.progress.send(ProgressUpdate::downloading(50.0));
            ctx.progress.send(ProgressUpdate::downloading(100.0));
            let path = ctx
                .output_dir
                .join(format!("{}.{}", ctx.id, ctx.format.extension()));
            tokio::fs::write(&path, b"media-bytes").await?;
            Ok(path)
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.jobs.download_dir = dir.to_path_buf();
        config.jobs.record_ttl_secs = 1;
        config
    }

    fn fetcher_with(backend: ScriptedBackend, dir: &std::path::Path) -> VidFetcher {
        VidFetcher::with_parts(
            test_config(dir),
            Arc::new(MemoryTaskStore::new()),
            Arc::new(backend),
        )
        .unwrap()
    }

    async fn wait_terminal(fetcher: &VidFetcher, id: TaskId) -> crate::types::TaskRecord {
        for _ in 0..200 {
            let record = fetcher.store().get(id);
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn submit_returns_id_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher_with(ScriptedBackend::slow(Duration::from_secs(5)), dir.path());

        let started = std::time::Instant::now();
        let id = fetcher.submit("https://example.com/v", MediaFormat::Mp4).unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));

        let record = fetcher.store().get(id);
        assert_eq!(record.status, TaskStatus::Starting);
    }

    #[tokio::test]
    async fn empty_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher_with(ScriptedBackend::succeeding(), dir.path());
        assert!(matches!(
            fetcher.submit("   ", MediaFormat::Mp4),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn successful_job_finishes_with_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher_with(ScriptedBackend::succeeding(), dir.path());

        let id = fetcher.submit("https://example.com/v", MediaFormat::Mp3).unwrap();
        let record = wait_terminal(&fetcher, id).await;

        assert_eq!(record.status, TaskStatus::Finished);
        assert_eq!(record.percent, 100.0);
        assert_eq!(record.file_url, Some(format!("/api/get-file/{id}")));
        assert!(dir.path().join(format!("{id}.mp3")).exists());

        let stats = fetcher.stats();
        assert_eq!(stats.finished, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn failed_job_records_error_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher_with(ScriptedBackend::failing("ERROR: Video unavailable"), dir.path());

        let id = fetcher.submit("https://example.com/v", MediaFormat::Mp4).unwrap();
        let record = wait_terminal(&fetcher, id).await;

        assert_eq!(record.status, TaskStatus::Error);
        assert!(
            record.error.as_deref().unwrap().contains("ERROR: Video unavailable"),
            "upstream message must be surfaced: {:?}",
            record.error
        );
        assert_eq!(fetcher.stats().failed, 1);
    }

    #[tokio::test]
    async fn percent_is_monotonic_over_events() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher_with(ScriptedBackend::succeeding(), dir.path());
        let mut events = fetcher.subscribe();

        let id = fetcher.submit("https://example.com/v", MediaFormat::Mp4).unwrap();
        wait_terminal(&fetcher, id).await;

        let mut last = 0.0f32;
        let mut terminal_count = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                Event::Progress { percent, .. } => {
                    assert!(percent >= last, "percent decreased: {last} -> {percent}");
                    last = percent;
                }
                Event::Finished { .. } | Event::Failed { .. } => terminal_count += 1,
                _ => {}
            }
        }
        assert_eq!(terminal_count, 1, "exactly one terminal event");
    }

    #[tokio::test]
    async fn terminal_record_removed_after_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher_with(ScriptedBackend::succeeding(), dir.path());

        let id = fetcher.submit("https://example.com/v", MediaFormat::Mp4).unwrap();
        wait_terminal(&fetcher, id).await;

        // record_ttl is 1s in test config
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fetcher.store().get(id).status, TaskStatus::Waiting);
    }

    #[tokio::test]
    async fn concurrency_cap_holds_excess_jobs_in_starting() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.jobs.max_concurrent_jobs = 1;
        let fetcher = VidFetcher::with_parts(
            config,
            Arc::new(MemoryTaskStore::new()),
            Arc::new(ScriptedBackend::slow(Duration::from_millis(300))),
        )
        .unwrap();

        let first = fetcher.submit("https://example.com/a", MediaFormat::Mp4).unwrap();
        let second = fetcher.submit("https://example.com/b", MediaFormat::Mp4).unwrap();

        // Give the first job time to take the only permit
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fetcher.store().get(second).status, TaskStatus::Starting);

        wait_terminal(&fetcher, first).await;
        wait_terminal(&fetcher, second).await;
    }

    #[tokio::test]
    async fn shutdown_refuses_new_submissions() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher_with(ScriptedBackend::succeeding(), dir.path());

        fetcher.shutdown().await.unwrap();
        assert!(matches!(
            fetcher.submit("https://example.com/v", MediaFormat::Mp4),
            Err(Error::ShuttingDown)
        ));
        // Idempotent
        fetcher.shutdown().await.unwrap();
    }
}
