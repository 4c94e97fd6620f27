//! REST API server module
//!
//! Exposes the task lifecycle over HTTP: metadata lookup, task submission,
//! per-task SSE progress, artifact retrieval, and a global event feed.

use crate::{Config, Result, VidFetcher};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Tasks
/// - `POST /api/info` - Fetch media metadata
/// - `POST /api/download` - Submit a fetch task
/// - `GET /api/progress/:task_id` - Per-task SSE progress stream
/// - `GET /api/get-file/:task_id` - Retrieve the produced artifact
/// - `GET /api/stats` - Aggregate task counts
///
/// ## System
/// - `GET /` - HTML submission page
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive documentation (if enabled)
/// - `GET /api/events` - Global server-sent events stream
pub fn create_router(fetcher: Arc<VidFetcher>, config: Arc<Config>) -> Router {
    let state = AppState::new(fetcher, config.clone());

    let router = Router::new()
        .route("/", get(routes::index))
        .route("/api/info", post(routes::media_info))
        .route("/api/download", post(routes::submit_download))
        .route("/api/progress/:task_id", get(routes::progress_stream))
        .route("/api/get-file/:task_id", get(routes::get_file))
        .route("/api/stats", get(routes::task_stats))
        .route("/api/events", get(routes::event_stream))
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    // Merge Swagger UI routes if enabled in config (before applying state)
    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router
        .with_state(state)
        .layer(middleware::from_fn(log_requests));

    // Apply CORS middleware if enabled in config
    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Request logging middleware
///
/// Progress streams are long-lived and per-poll noisy; they are excluded, as
/// are static assets, matching the access-log behavior of the deployments
/// this service replaces.
async fn log_requests(
    request: axum::extract::Request,
    next: middleware::Next,
) -> axum::response::Response {
    let path = request.uri().path().to_string();
    let method = request.method().clone();
    if !path.starts_with("/api/progress") && !path.starts_with("/static") {
        tracing::info!(%method, %path, "request");
    }
    next.run(request).await
}

/// Build a CORS layer based on configured origins
///
/// Allows the specified origins (or any, when "*" is present or the list is
/// empty), all methods, and all headers.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Binds a TCP listener and serves the router until the process stops or the
/// listener fails.
///
/// # Example
///
/// ```no_run
/// use vid_dl::{VidFetcher, Config};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let fetcher = Arc::new(VidFetcher::new((*config).clone())?);
///
/// // Start API server (blocks until shutdown)
/// vid_dl::api::start_api_server(fetcher, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(fetcher: Arc<VidFetcher>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "starting API server");

    let app = create_router(fetcher, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}
