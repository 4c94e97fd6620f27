//! Standalone server binary: the minimal embedder of the vid-dl library.
//!
//! Reads configuration from the process environment, starts the fetch
//! service and REST API, and shuts down cleanly on SIGTERM/SIGINT.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vid_dl::{Config, VidFetcher, api, run_with_shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::from_env()?);
    let fetcher = Arc::new(VidFetcher::new((*config).clone())?);

    tokio::select! {
        result = api::start_api_server(fetcher.clone(), config) => {
            result?;
        }
        result = run_with_shutdown(fetcher.clone()) => {
            result?;
        }
    }

    Ok(())
}
