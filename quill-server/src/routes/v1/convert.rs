//! Document conversion endpoints: one-shot and plain event stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use quill_core::{ConversionRequest, ProgressEvent, RuntimeError};
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::convert::{ConvertFailure, ConvertRequest, ConvertResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(convert, convert_stream),
    components(schemas(ConvertRequest, ConvertResponse, ConvertFailure))
)]
pub struct ConvertApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/convert", post(convert))
        .route("/convert/stream", get(convert_stream))
}

/// Convert a document and wait for the result.
#[utoipa::path(
    post,
    path = "/v1/convert",
    tag = "convert",
    request_body = ConvertRequest,
    responses(
        (status = 200, description = "Conversion succeeded", body = ConvertResponse),
        (status = 400, description = "Invalid request"),
        (status = 500, description = "Conversion failed", body = ConvertFailure),
    )
)]
pub async fn convert(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConvertRequest>,
) -> Result<Response, ServerError> {
    let request = ConversionRequest::from(req).validate()?;

    match state.pool.convert(request).await {
        Ok(result) => Ok(Json(ConvertResponse {
            status: "success".to_owned(),
            result,
        })
        .into_response()),
        Err(RuntimeError::TaskFailed { message }) => Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ConvertFailure {
                status: "error".to_owned(),
                message,
            }),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

/// Convert a document, streaming `progress`, `complete`, `error` and
/// `heartbeat` events as SSE.
#[utoipa::path(
    get,
    path = "/v1/convert/stream",
    tag = "convert",
    params(ConvertRequest),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 400, description = "Invalid request"),
    )
)]
pub async fn convert_stream(
    State(state): State<Arc<AppState>>,
    Query(req): Query<ConvertRequest>,
) -> Result<Response, ServerError> {
    let request = ConversionRequest::from(req).validate()?;

    let stream = state
        .encoder
        .open(request, state.config.plain_stream_policy());
    info!(task_id = %stream.task_id(), "progress stream opened");

    let sse_stream = stream
        .into_stream()
        .map(|event| Ok::<Event, Infallible>(to_sse_event(&event)));

    Ok(Sse::new(sse_stream).into_response())
}

/// Event name is the kind, data is the JSON payload.
pub(crate) fn to_sse_event(event: &ProgressEvent) -> Event {
    Event::default()
        .event(event.event_name())
        .data(event.payload().to_string())
}
