//! Application state for the API server

use crate::{Config, VidFetcher};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// This struct is cloned for each request (cheap Arc clone) and provides
/// access to the fetch service and configuration.
#[derive(Clone)]
pub struct AppState {
    /// The main VidFetcher instance
    pub fetcher: Arc<VidFetcher>,

    /// Configuration (read access; the fetcher holds its own copy)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(fetcher: Arc<VidFetcher>, config: Arc<Config>) -> Self {
        Self { fetcher, config }
    }
}
