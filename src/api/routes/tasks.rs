//! Task handlers: metadata, submission, progress streaming, artifact retrieval.

use crate::api::AppState;
use crate::backend::find_artifact;
use crate::error::Error;
use crate::types::{MediaFormat, TaskId};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::StreamExt;

/// POST /api/info - Fetch media metadata without downloading
#[utoipa::path(
    post,
    path = "/api/info",
    tag = "tasks",
    request_body(content = String, description = "JSON body with a `url` field"),
    responses(
        (status = 200, description = "Media metadata", body = crate::types::MediaInfo),
        (status = 400, description = "Missing or invalid URL"),
        (status = 500, description = "Upstream extraction failure")
    )
)]
pub async fn media_info(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Response {
    let url = match payload.get("url").and_then(|v| v.as_str()) {
        Some(url) => url,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": {"code": "missing_url", "message": "Missing required field: url"}})),
            )
                .into_response();
        }
    };

    match state.fetcher.fetch_metadata(url).await {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(Error::InvalidUrl(message)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": "invalid_url", "message": message}})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "metadata fetch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// POST /api/download - Submit a fetch task
#[utoipa::path(
    post,
    path = "/api/download",
    tag = "tasks",
    request_body(content = String, description = "JSON body with `url` and optional `format` (mp3|mp4, default mp4)"),
    responses(
        (status = 200, description = "Task created: JSON object with `task_id`"),
        (status = 400, description = "Missing URL or unknown format"),
        (status = 503, description = "Service shutting down")
    )
)]
pub async fn submit_download(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Response {
    let url = match payload.get("url").and_then(|v| v.as_str()) {
        Some(url) if !url.trim().is_empty() => url,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": {"code": "missing_url", "message": "Missing required field: url"}})),
            )
                .into_response();
        }
    };

    let format = match payload.get("format").and_then(|v| v.as_str()) {
        Some(raw) => match raw.parse::<MediaFormat>() {
            Ok(format) => format,
            Err(message) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": {"code": "invalid_format", "message": message}})),
                )
                    .into_response();
            }
        },
        None => MediaFormat::default(),
    };

    match state.fetcher.submit(url, format) {
        Ok(task_id) => (StatusCode::OK, Json(json!({"task_id": task_id}))).into_response(),
        Err(Error::InvalidUrl(message)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": "invalid_url", "message": message}})),
        )
            .into_response(),
        Err(Error::ShuttingDown) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": {"code": "shutting_down", "message": "service is shutting down"}})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "task submission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": {"code": "internal_error", "message": e.to_string()}})),
            )
                .into_response()
        }
    }
}

/// GET /api/progress/{task_id} - Server-sent progress stream for one task
///
/// Emits the current record immediately, then a record per lifecycle event
/// until the task reaches a terminal state, whose record is the last emission.
/// Unknown ids produce a single `waiting` record and an open stream kept
/// alive until the client disconnects.
#[utoipa::path(
    get,
    path = "/api/progress/{task_id}",
    tag = "tasks",
    params(("task_id" = String, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Server-sent progress events (text/event-stream)", content_type = "text/event-stream"),
        (status = 400, description = "Malformed task ID")
    )
)]
pub async fn progress_stream(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    let Ok(id) = task_id.parse::<TaskId>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": "invalid_task_id", "message": "task id is not a valid UUID"}})),
        )
            .into_response();
    };

    // Subscribe before reading the snapshot so no transition between the two
    // is lost.
    let events = state.fetcher.subscribe();
    let store = state.fetcher.store();
    let snapshot = store.get(id);

    // The stream has to end directly after yielding a terminal record. No
    // further broadcast event ever arrives for a terminal task, so this
    // cannot be a predicate over subsequent items; the unfold closes itself
    // on the iteration after the terminal emission.
    let records = futures::stream::unfold(
        (events, store, Some(snapshot), false),
        move |(mut events, store, pending, done)| async move {
            if done {
                return None;
            }
            let record = match pending {
                Some(snapshot) => snapshot,
                None => loop {
                    match events.recv().await {
                        Ok(event) if event.task_id() == Some(id) => break store.get(id),
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            // Re-read the store; the latest record subsumes
                            // whatever was missed
                            tracing::warn!(task_id = %id, skipped, "progress stream lagged");
                            break store.get(id);
                        }
                        Err(RecvError::Closed) => return None,
                    }
                },
            };
            let done = record.status.is_terminal();
            Some((record, (events, store, None, done)))
        },
    );

    let sse_stream = records.filter_map(|record| match serde_json::to_string(&record) {
        Ok(json_data) => Some(Ok::<SseEvent, Infallible>(
            SseEvent::default().event("progress").data(json_data),
        )),
        Err(e) => {
            tracing::warn!("failed to serialize task record to JSON: {}", e);
            None
        }
    });

    Sse::new(sse_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// GET /api/get-file/{task_id} - Stream the produced artifact as an attachment
#[utoipa::path(
    get,
    path = "/api/get-file/{task_id}",
    tag = "tasks",
    params(("task_id" = String, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Binary artifact attachment", content_type = "application/octet-stream"),
        (status = 404, description = "No artifact for this task ID")
    )
)]
pub async fn get_file(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"code": "not_found", "message": "no file for this task id"}})),
        )
            .into_response()
    };

    let Ok(id) = task_id.parse::<TaskId>() else {
        return not_found();
    };

    let Some(path) = find_artifact(state.config.download_dir(), id) else {
        return not_found();
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        // Deleted between scan and open (sweeper race) — treat as gone
        Err(e) => {
            tracing::warn!(task_id = %id, path = %path.display(), error = %e, "artifact vanished before open");
            return not_found();
        }
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{id}.bin"));
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let length = file.metadata().await.ok().map(|m| m.len());

    let stream = tokio_util::io::ReaderStream::new(file);
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        );
    if let Some(length) = length {
        response = response.header(header::CONTENT_LENGTH, length);
    }

    match response.body(Body::from_stream(stream)) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(task_id = %id, error = %e, "failed to build file response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": {"code": "internal_error", "message": e.to_string()}})),
            )
                .into_response()
        }
    }
}

/// GET /api/stats - Aggregate task counts
#[utoipa::path(
    get,
    path = "/api/stats",
    tag = "tasks",
    responses(
        (status = 200, description = "Task counts since service start", body = crate::types::TaskStats)
    )
)]
pub async fn task_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.fetcher.stats())
}
