//! # vid-dl
//!
//! Backend library for a media fetch and conversion web service.
//!
//! ## Design Philosophy
//!
//! vid-dl is designed to be:
//! - **Library-first** - The REST API is a bundled, optional surface over a plain Rust API
//! - **Prompt by contract** - Task submission always returns immediately; the work happens
//!   on bounded background workers
//! - **Event-driven** - Progress is broadcast per task, no polling loops required
//! - **Pluggable** - Extraction strategies and the task store are trait objects selected
//!   by configuration or injected by the embedder
//!
//! ## Quick Start
//!
//! ```no_run
//! use vid_dl::{Config, MediaFormat, VidFetcher};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let fetcher = Arc::new(VidFetcher::new(config)?);
//!
//!     // Subscribe to lifecycle events
//!     let mut events = fetcher.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let task_id = fetcher.submit("https://example.com/v", MediaFormat::Mp4)?;
//!     println!("submitted {task_id}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Job backends (direct extraction and relay conversion)
pub mod backend;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Core fetch service (task submission, workers, retention)
pub mod fetcher;
/// Task store abstraction and in-memory implementation
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use backend::{JobBackend, JobContext, ProgressSink, ProgressUpdate, RelayBackend, YtdlpBackend};
pub use config::{ApiConfig, BackendKind, Config, ExtractorConfig, JobConfig, RelayConfig, RetentionConfig};
pub use error::{Error, Result};
pub use fetcher::VidFetcher;
pub use store::{MemoryTaskStore, TaskStore};
pub use types::{Event, MediaFormat, MediaInfo, TaskId, TaskRecord, TaskStats, TaskStatus};

/// Helper function to run the fetch service with graceful signal handling.
///
/// Waits for a termination signal and then calls the fetcher's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use vid_dl::{VidFetcher, Config, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let fetcher = Arc::new(VidFetcher::new(Config::default())?);
///
///     // Run with automatic signal handling
///     run_with_shutdown(fetcher).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(fetcher: std::sync::Arc<VidFetcher>) -> Result<()> {
    wait_for_signal().await;
    fetcher.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
