//! Retention sweeper: periodic deletion of stale artifacts
//!
//! Runs until shutdown on a fixed interval, deleting any file in the storage
//! directory whose last-modified time is older than the configured threshold.
//! Individual failures (permission errors, races with concurrent deletion)
//! are logged and do not stop the loop.

use crate::config::RetentionConfig;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// Spawn the retention sweeper background task
pub(crate) fn spawn_sweeper(
    dir: PathBuf,
    config: RetentionConfig,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh start doesn't
        // sweep before any artifact could exist.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let deleted = sweep_once(&dir, config.max_age());
                    if deleted > 0 {
                        tracing::info!(deleted, dir = %dir.display(), "swept stale artifacts");
                    }
                }
                _ = cancel_token.cancelled() => {
                    tracing::debug!("retention sweeper stopped");
                    break;
                }
            }
        }
    })
}

/// One sweep pass: delete files older than `max_age`, returning the count
///
/// Directory entries that fail to stat or delete are logged and skipped, so a
/// single bad entry never aborts the pass.
pub(crate) fn sweep_once(dir: &Path, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "could not list storage directory");
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut deleted = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not stat artifact");
                continue;
            }
        };
        let age = match now.duration_since(modified) {
            Ok(age) => age,
            // Future mtime, treat as fresh
            Err(_) => continue,
        };
        if age < max_age {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), age_secs = age.as_secs(), "deleted stale artifact");
                deleted += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not delete stale artifact");
            }
        }
    }
    deleted
}
