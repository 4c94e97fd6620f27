//! System handlers: health, OpenAPI, global event stream, index page.

use crate::api::AppState;
use axum::{
    Json,
    extract::State,
    response::{
        Html, IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

/// Minimal submission page served at the root
const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>vid-dl</title></head>
<body>
  <h1>vid-dl</h1>
  <form onsubmit="submitTask(event)">
    <input id="url" type="url" placeholder="Media URL" size="60" required>
    <select id="format"><option>mp4</option><option>mp3</option></select>
    <button>Fetch</button>
  </form>
  <pre id="status"></pre>
  <script>
    async function submitTask(e) {
      e.preventDefault();
      const body = JSON.stringify({url: url.value, format: format.value});
      const res = await fetch('/api/download', {method: 'POST', headers: {'Content-Type': 'application/json'}, body});
      const {task_id} = await res.json();
      const events = new EventSource('/api/progress/' + task_id);
      events.addEventListener('progress', ev => {
        const rec = JSON.parse(ev.data);
        status.textContent = rec.status + ' ' + rec.percent.toFixed(1) + '%';
        if (rec.status === 'finished') { events.close(); window.location = rec.file_url; }
        if (rec.status === 'error') { events.close(); status.textContent = 'error: ' + rec.error; }
      });
    }
  </script>
</body>
</html>
"#;

/// GET / - HTML page
#[utoipa::path(
    get,
    path = "/",
    tag = "system",
    responses(
        (status = 200, description = "Submission page", content_type = "text/html")
    )
)]
pub async fn index() -> impl IntoResponse {
    Html(INDEX_HTML)
}

/// GET /health - Health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy")
    )
)]
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI 3.1 specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}

/// GET /api/events - Global server-sent event stream for all tasks
#[utoipa::path(
    get,
    path = "/api/events",
    tag = "system",
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream")
    )
)]
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = state.fetcher.subscribe();
    let stream = BroadcastStream::new(receiver);

    let sse_stream = stream.filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json_data) => {
                let event_type = match &event {
                    crate::types::Event::Submitted { .. } => "submitted",
                    crate::types::Event::Progress { .. } => "progress",
                    crate::types::Event::Finished { .. } => "finished",
                    crate::types::Event::Failed { .. } => "failed",
                    crate::types::Event::Shutdown => "shutdown",
                };
                Some(Ok(SseEvent::default().event(event_type).data(json_data)))
            }
            Err(e) => {
                tracing::warn!("failed to serialize event to JSON: {}", e);
                None
            }
        },
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!("SSE client lagged, skipped {} events", skipped);
            Some(Ok(SseEvent::default().event("error").data(format!(
                r#"{{"error":"lagged","skipped":{}}}"#,
                skipped
            ))))
        }
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}
