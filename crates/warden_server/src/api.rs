//! HTTP API surface.

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use warden_core::limits::Usage;
use warden_core::run::RunError;
use warden_core::{RunId, RunMode, RunRequest, RunState, RunStatus, Timestamp};
use warden_ingress::IngressService;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// The ingress service behind every route
    pub service: Arc<IngressService>,
}

/// Build the API router
#[must_use]
pub fn router(service: Arc<IngressService>) -> axum::Router {
    axum::Router::new()
        .route("/v1/runs", post(submit))
        .route("/v1/runs/{id}", get(status))
        .route("/v1/events", get(events))
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(AppState { service })
}

/// Wire error body: stable kind + reason, never internal detail
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: RunError,
}

/// Submission envelope: the run request plus its type discriminator
#[derive(Debug, serde::Deserialize)]
struct SubmissionEnvelope {
    #[serde(rename = "type", default = "default_submission_type")]
    kind: String,
    #[serde(flatten)]
    request: RunRequest,
}

fn default_submission_type() -> String {
    "wasm.run".to_string()
}

/// Status view of a run
#[derive(Debug, Serialize)]
struct StatusResponse {
    run_id: RunId,
    status: RunStatus,
    mode: RunMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RunError>,
    usage: Usage,
    created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<Timestamp>,
}

impl From<RunState> for StatusResponse {
    fn from(state: RunState) -> Self {
        Self {
            run_id: state.run_id,
            status: state.status,
            mode: state.mode,
            result: state.result,
            error: state.error,
            usage: state.usage,
            created_at: state.created_at,
            started_at: state.started_at,
            finished_at: state.finished_at,
        }
    }
}

async fn submit(
    State(state): State<AppState>,
    Json(envelope): Json<SubmissionEnvelope>,
) -> Response {
    if envelope.kind != "wasm.run" {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: RunError {
                    kind: warden_core::ErrorKind::Validation,
                    reason: "invalid type".to_string(),
                },
            }),
        )
            .into_response();
    }
    match state.service.submit(envelope.request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: RunError {
                    kind: err.kind(),
                    reason: err.public_reason(),
                },
            }),
        )
            .into_response(),
    }
}

async fn status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(run_id) = RunId::parse(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.service.get_status(run_id) {
        Some(run) => (StatusCode::OK, Json(StatusResponse::from(run))).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Newline-delimited JSON event stream, one lifecycle event per line
async fn events(State(state): State<AppState>) -> Response {
    let rx = state.service.event_stream();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let mut line = serde_json::to_vec(&event).unwrap_or_default();
                    line.push(b'\n');
                    return Some((Ok::<_, std::convert::Infallible>(Bytes::from(line)), rx));
                }
                // a lagged subscriber skips ahead, it never sees reorders
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn metrics(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.service.metrics().export_prometheus(),
    )
        .into_response()
}

async fn healthz() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_service;
    use warden_core::WardenConfig;

    fn app_state() -> AppState {
        AppState {
            service: build_service(WardenConfig::default()),
        }
    }

    #[tokio::test]
    async fn test_status_unknown_run_is_404() {
        let response = status(
            State(app_state()),
            Path(RunId::new().to_string()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_garbage_id_is_404() {
        let response = status(State(app_state()), Path("not-an-id".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_submit_validation_error_is_400() {
        let envelope: SubmissionEnvelope = serde_json::from_value(serde_json::json!({
            "locator": "ftp://bad/m.wasm",
            "checksum": "short",
            "module": "m"
        }))
        .unwrap();
        let response = submit(State(app_state()), Json(envelope)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submit_wrong_type_discriminator_is_400() {
        let envelope: SubmissionEnvelope = serde_json::from_value(serde_json::json!({
            "type": "signal.other",
            "locator": "file:///m.wasm",
            "checksum": "ab".repeat(32),
            "module": "m"
        }))
        .unwrap();
        let response = submit(State(app_state()), Json(envelope)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_healthz_ok() {
        let response = healthz().await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_renders_text() {
        let response = metrics(State(app_state())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_status_response_shape() {
        use warden_core::limits::LimitHints;
        use warden_core::run::RunRequest;

        let mut state = RunState::accepted(
            RunId::new(),
            RunRequest {
                locator: "file:///m.wasm".to_string(),
                checksum: "ab".repeat(32),
                module: "m".to_string(),
                entry: "_start".to_string(),
                args: vec![],
                capabilities: vec![],
                labels: vec![],
                idempotency_key: None,
                caller: None,
                limits: LimitHints::none(),
                signature_url: None,
            },
            RunMode::Live,
        );
        state
            .finish(Some(serde_json::json!(5)), Usage::empty())
            .unwrap();

        let view = StatusResponse::from(state);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "finished");
        assert_eq!(json["result"], 5);
        assert!(json.get("error").is_none());
        // the raw request (with its locator) is not echoed back
        assert!(json.get("request").is_none());
    }
}
