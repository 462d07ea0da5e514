//! HTTP API.
//!
//! Exposes the exec endpoints of the Docker Engine API:
//! create, start and inspect, plus a liveness ping.

mod error;
mod handlers;

pub use error::{ApiError, ApiResult};

use crate::exec::ExecController;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: ExecController,
    /// Answer non-JSON requests with 415 instead of the generic 500.
    pub strict_content_type: bool,
}

impl AppState {
    pub fn new(controller: ExecController) -> Self {
        Self {
            controller,
            strict_content_type: false,
        }
    }

    pub fn with_strict_content_type(mut self, strict: bool) -> Self {
        self.strict_content_type = strict;
        self
    }
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/_ping", get(handlers::ping))
        .route("/containers/{name}/exec", post(handlers::create_exec))
        .route("/exec/{id}/start", post(handlers::start_exec))
        .route("/exec/{id}/json", get(handlers::inspect_exec))
        .fallback(handlers::not_found)
        .layer(trace_layer)
        .with_state(state)
}
