//! OpenAPI documentation aggregation

use utoipa::OpenApi;

/// OpenAPI specification for the vid-dl REST API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "vid-dl API",
        description = "Submit media URLs, watch fetch progress over SSE, and retrieve the produced files.",
        version = "0.1.0",
        license(name = "MIT OR Apache-2.0")
    ),
    paths(
        crate::api::routes::tasks::media_info,
        crate::api::routes::tasks::submit_download,
        crate::api::routes::tasks::progress_stream,
        crate::api::routes::tasks::get_file,
        crate::api::routes::tasks::task_stats,
        crate::api::routes::system::index,
        crate::api::routes::system::health_check,
        crate::api::routes::system::openapi_spec,
        crate::api::routes::system::event_stream,
    ),
    components(schemas(
        crate::types::TaskId,
        crate::types::TaskStatus,
        crate::types::TaskRecord,
        crate::types::MediaFormat,
        crate::types::MediaInfo,
        crate::types::TaskStats,
        crate::types::Event,
    )),
    tags(
        (name = "tasks", description = "Task submission, progress, and artifact retrieval"),
        (name = "system", description = "Health, documentation, and global events")
    )
)]
pub struct ApiDoc;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_includes_lifecycle_paths() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
        let paths = spec.paths.paths;
        assert!(paths.contains_key("/api/download"));
        assert!(paths.contains_key("/api/progress/{task_id}"));
        assert!(paths.contains_key("/api/get-file/{task_id}"));
        assert!(paths.contains_key("/api/info"));
    }
}
