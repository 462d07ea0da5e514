//! HTTP request handlers.

use super::AppState;
use super::error::{ApiError, ApiResult};
use crate::exec::validator;
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use boxexec_shared::constants::{media, messages};
use boxexec_shared::errors::BoxexecError;
use boxexec_shared::wire::{ErrorMessage, ExecCreateResponse, ExecInspectResponse};
use tokio_stream::wrappers::ReceiverStream;

/// Content-type gate shared by the POST endpoints.
fn check_json(state: &AppState, headers: &HeaderMap, body: &[u8]) -> ApiResult<()> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    match validator::check_content_type(content_type, body) {
        Ok(()) => Ok(()),
        Err(err @ BoxexecError::UnsupportedMediaType(_)) if state.strict_content_type => {
            Err(err.into())
        }
        Err(BoxexecError::UnsupportedMediaType(_)) => Err(ApiError::Misconfigured),
        Err(err) => Err(err.into()),
    }
}

/// `POST /containers/{name}/exec`
pub async fn create_exec(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<ExecCreateResponse>)> {
    check_json(&state, &headers, &body)?;
    let request = validator::parse_create_body(&body)?;
    let config = validator::validate_create(&name, request)?;
    let id = state.controller.create(config)?;

    Ok((
        StatusCode::CREATED,
        Json(ExecCreateResponse { id: id.to_string() }),
    ))
}

/// `POST /exec/{id}/start`
///
/// Detached starts answer with an empty 200. Attached starts stream the
/// process output until it closes stdout and stderr.
pub async fn start_exec(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    check_json(&state, &headers, &body)?;
    let request = validator::parse_start_body(&body)?;
    let started = state.controller.start(&id, request.detach).await?;

    let Some(output) = started.output else {
        return Ok(StatusCode::OK.into_response());
    };

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, media::RAW_STREAM)
        .body(Body::from_stream(ReceiverStream::new(output)))
        .map_err(|e| BoxexecError::Internal(format!("failed to build response: {}", e)))?;
    Ok(response)
}

/// `GET /exec/{id}/json`
pub async fn inspect_exec(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExecInspectResponse>> {
    Ok(Json(state.controller.inspect(&id)?))
}

/// `GET /_ping`
pub async fn ping() -> &'static str {
    messages::PING
}

/// Unknown routes.
pub async fn not_found() -> (StatusCode, Json<ErrorMessage>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorMessage {
            message: "page not found".to_string(),
        }),
    )
}
