//! Job backends: pluggable strategies for performing one fetch task
//!
//! The worker is polymorphic over [`JobBackend`]. Two implementations ship
//! with the crate:
//! - [`YtdlpBackend`](ytdlp::YtdlpBackend) — direct extraction via the yt-dlp
//!   binary
//! - [`RelayBackend`](relay::RelayBackend) — a remote conversion service
//!   extracts the media and hands back a direct link, which we stream to disk
//!
//! Which one runs is selected by [`BackendKind`](crate::config::BackendKind)
//! in the configuration.

use crate::error::Result;
use crate::types::{MediaFormat, MediaInfo, TaskId, TaskStatus};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;

pub mod relay;
pub mod ytdlp;

pub use relay::RelayBackend;
pub use ytdlp::YtdlpBackend;

/// One progress observation from a running job
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressUpdate {
    /// Lifecycle status the job is in (`Downloading` or `Processing`)
    pub status: TaskStatus,
    /// Progress percentage (0.0 to 100.0)
    pub percent: f32,
    /// Current transfer speed in bytes per second, when known
    pub speed_bps: Option<u64>,
    /// Estimated seconds remaining, when known
    pub eta_seconds: Option<u64>,
}

impl ProgressUpdate {
    /// A plain downloading update with only a percentage
    pub fn downloading(percent: f32) -> Self {
        Self {
            status: TaskStatus::Downloading,
            percent,
            speed_bps: None,
            eta_seconds: None,
        }
    }

    /// A post-processing update (transfer done, output being assembled)
    pub fn processing() -> Self {
        Self {
            status: TaskStatus::Processing,
            percent: 100.0,
            speed_bps: None,
            eta_seconds: None,
        }
    }
}

/// Sink a backend pushes progress updates into
///
/// Backed by an unbounded channel to the worker. Sending never blocks; if the
/// worker is gone the update is silently dropped, since the job outcome is
/// what matters at that point.
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressSink {
    /// Wrap a channel sender
    pub fn new(tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self { tx }
    }

    /// Build a sink together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Push one update, ignoring a disconnected worker
    pub fn send(&self, update: ProgressUpdate) {
        self.tx.send(update).ok();
    }
}

/// Everything a backend needs to run one job
pub struct JobContext {
    /// Task identifier; the artifact filename stem
    pub id: TaskId,
    /// Source media URL
    pub url: String,
    /// Requested output format
    pub format: MediaFormat,
    /// Directory the artifact must be written into
    pub output_dir: PathBuf,
    /// Where progress updates go
    pub progress: ProgressSink,
}

/// A strategy that can fetch metadata for and perform one fetch job
///
/// `run_job` must either produce the artifact on disk and return its path, or
/// return an error with a message fit for showing to the submitting client.
/// Backends report progress through `ctx.progress`; the worker handles store
/// updates, event publication, and terminal-state bookkeeping.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Fetch title/thumbnail/duration/uploader without downloading
    async fn fetch_metadata(&self, url: &str) -> Result<MediaInfo>;

    /// Run one job end-to-end, returning the artifact path
    async fn run_job(&self, ctx: JobContext) -> Result<PathBuf>;
}

/// Locate the artifact for a task: the file in `dir` whose stem is the task id
///
/// Backends with format post-processing (audio extraction, container merges)
/// don't always know the final extension up front, so the lookup matches on
/// the stem alone. At most one artifact exists per task id.
pub fn find_artifact(dir: &std::path::Path, id: TaskId) -> Option<PathBuf> {
    let stem = id.to_string();
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s == stem)
        {
            return Some(path);
        }
    }
    None
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_artifact_matches_stem_only() {
        let dir = tempfile::tempdir().unwrap();
        let id = TaskId::new();
        let other = TaskId::new();

        std::fs::write(dir.path().join(format!("{id}.mp3")), b"audio").unwrap();
        std::fs::write(dir.path().join(format!("{other}.mp4")), b"video").unwrap();

        let found = find_artifact(dir.path(), id).unwrap();
        assert_eq!(found.extension().unwrap(), "mp3");
        assert!(found.to_string_lossy().contains(&id.to_string()));
    }

    #[test]
    fn find_artifact_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_artifact(dir.path(), TaskId::new()).is_none());
    }

    #[test]
    fn sink_drops_updates_without_receiver() {
        let (sink, rx) = ProgressSink::channel();
        drop(rx);
        // Must not panic or error
        sink.send(ProgressUpdate::downloading(50.0));
    }
}
