//! Core types for vid-dl

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Unique identifier for a fetch task
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random task identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Task status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, worker not yet transferring
    Starting,
    /// Media transfer in progress
    Downloading,
    /// Transfer done, post-processing (audio extraction, container merge)
    Processing,
    /// Successfully completed, artifact available
    Finished,
    /// Failed with error
    Error,
    /// Unknown task identifier (never stored, only synthesized on lookup)
    Waiting,
}

impl TaskStatus {
    /// Whether this status ends the task lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Error)
    }
}

/// Current state of one task, as served to progress stream clients
///
/// Written exclusively by the task's own worker, read concurrently by any
/// number of progress streams. `file_url` is set only once `status` is
/// `finished`; `error` only once `status` is `error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskRecord {
    /// Current lifecycle status
    pub status: TaskStatus,

    /// Progress percentage (0.0 to 100.0), non-decreasing within a task
    pub percent: f32,

    /// Retrieval path for the artifact, set on `finished`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,

    /// Upstream error message, set on `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Current transfer speed in bytes per second, while downloading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_bps: Option<u64>,

    /// Estimated seconds remaining, while downloading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
}

impl TaskRecord {
    /// Initial record inserted at submission time
    pub fn starting() -> Self {
        Self {
            status: TaskStatus::Starting,
            percent: 0.0,
            file_url: None,
            error: None,
            speed_bps: None,
            eta_seconds: None,
        }
    }

    /// Synthetic record returned for identifiers not present in the store
    pub fn waiting() -> Self {
        Self {
            status: TaskStatus::Waiting,
            percent: 0.0,
            file_url: None,
            error: None,
            speed_bps: None,
            eta_seconds: None,
        }
    }

    /// Terminal success record pointing at the retrieval endpoint
    pub fn finished(file_url: String) -> Self {
        Self {
            status: TaskStatus::Finished,
            percent: 100.0,
            file_url: Some(file_url),
            error: None,
            speed_bps: None,
            eta_seconds: None,
        }
    }

    /// Terminal failure record carrying the upstream message verbatim
    ///
    /// `percent` is the last value the worker reported before the failure, so
    /// a watching client never sees progress jump backward at the error
    /// transition.
    pub fn failed(error: String, percent: f32) -> Self {
        Self {
            status: TaskStatus::Error,
            percent,
            file_url: None,
            error: Some(error),
            speed_bps: None,
            eta_seconds: None,
        }
    }
}

/// Requested output format for a task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    /// Audio-only MP3
    Mp3,
    /// Video with audio, merged MP4
    #[default]
    Mp4,
}

impl MediaFormat {
    /// File extension for artifacts in this format
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Mp3 => "mp3",
            MediaFormat::Mp4 => "mp4",
        }
    }
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for MediaFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mp3" => Ok(MediaFormat::Mp3),
            "mp4" => Ok(MediaFormat::Mp4),
            other => Err(format!("unknown format: {other}")),
        }
    }
}

/// Metadata about a source URL, fetched without downloading
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MediaInfo {
    /// Media title
    pub title: String,

    /// Thumbnail image URL, if the source exposes one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,

    /// Human-readable duration (e.g. "3:42")
    pub duration: String,

    /// Channel or uploader name
    pub uploader: String,
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task created and queued for a worker
    Submitted {
        /// Task ID
        id: TaskId,
        /// Requested output format
        format: MediaFormat,
    },

    /// Progress update from the task's worker
    Progress {
        /// Task ID
        id: TaskId,
        /// Current lifecycle status
        status: TaskStatus,
        /// Progress percentage (0.0 to 100.0)
        percent: f32,
        /// Current speed in bytes per second
        #[serde(skip_serializing_if = "Option::is_none")]
        speed_bps: Option<u64>,
        /// Estimated seconds remaining
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_seconds: Option<u64>,
    },

    /// Task completed, artifact on disk
    Finished {
        /// Task ID
        id: TaskId,
        /// Retrieval path for the artifact
        file_url: String,
    },

    /// Task failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Upstream error message
        error: String,
    },

    /// Service shutting down
    Shutdown,
}

impl Event {
    /// The task this event concerns, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Event::Submitted { id, .. }
            | Event::Progress { id, .. }
            | Event::Finished { id, .. }
            | Event::Failed { id, .. } => Some(*id),
            Event::Shutdown => None,
        }
    }
}

/// Aggregate task counts since service start
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaskStats {
    /// Tasks submitted
    pub submitted: u64,
    /// Tasks currently running or queued for a permit
    pub active: u64,
    /// Tasks finished successfully
    pub finished: u64,
    /// Tasks that ended in error
    pub failed: u64,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_round_trips_through_string() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Downloading).unwrap(),
            "\"downloading\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::Finished).unwrap(),
            "\"finished\""
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Finished.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(!TaskStatus::Starting.is_terminal());
        assert!(!TaskStatus::Downloading.is_terminal());
        assert!(!TaskStatus::Waiting.is_terminal());
    }

    #[test]
    fn record_omits_unset_optionals() {
        let json = serde_json::to_value(TaskRecord::starting()).unwrap();
        assert_eq!(json["status"], "starting");
        assert_eq!(json["percent"], 0.0);
        assert!(json.get("file_url").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn finished_record_carries_file_url() {
        let rec = TaskRecord::finished("/api/get-file/abc".to_string());
        assert_eq!(rec.status, TaskStatus::Finished);
        assert_eq!(rec.percent, 100.0);
        assert_eq!(rec.file_url.as_deref(), Some("/api/get-file/abc"));
    }

    #[test]
    fn failed_record_keeps_reported_percent() {
        let rec = TaskRecord::failed("ERROR: 403".to_string(), 60.0);
        assert_eq!(rec.status, TaskStatus::Error);
        assert_eq!(rec.percent, 60.0);
        assert_eq!(rec.error.as_deref(), Some("ERROR: 403"));
    }

    #[test]
    fn format_parses_and_defaults() {
        assert_eq!("mp3".parse::<MediaFormat>().unwrap(), MediaFormat::Mp3);
        assert_eq!("mp4".parse::<MediaFormat>().unwrap(), MediaFormat::Mp4);
        assert!("flac".parse::<MediaFormat>().is_err());
        assert_eq!(MediaFormat::default(), MediaFormat::Mp4);
    }

    #[test]
    fn event_task_id_helper() {
        let id = TaskId::new();
        let ev = Event::Failed {
            id,
            error: "boom".to_string(),
        };
        assert_eq!(ev.task_id(), Some(id));
        assert_eq!(Event::Shutdown.task_id(), None);
    }
}
