//! Shared fixtures for boxexec integration tests.
//!
//! [`TestApp`] wires a router to a host-process container table and the
//! host launcher, so tests exercise the full HTTP stack without needing
//! privileges to enter namespaces.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use boxexec::api::{AppState, create_router};
use boxexec::{ExecController, HostContainers, HostLauncher};
use boxexec_shared::wire::ExecInspectResponse;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Name of the container every [`TestApp`] starts with.
pub const CONTAINER: &str = "test-container";

const BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Response captured in full.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Router plus handles to the state behind it.
#[derive(Clone)]
pub struct TestApp {
    pub router: Router,
    pub controller: ExecController,
    pub containers: HostContainers,
}

impl TestApp {
    /// App with [`CONTAINER`] registered against the test process itself.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Same as [`TestApp::new`] with `strict_content_type` on.
    pub fn strict() -> Self {
        Self::build(true)
    }

    fn build(strict: bool) -> Self {
        let containers = HostContainers::new();
        containers.register(CONTAINER, std::process::id());

        let controller = ExecController::new(Arc::new(containers.clone()), Arc::new(HostLauncher));
        let state = AppState::new(controller.clone()).with_strict_content_type(strict);

        Self {
            router: create_router(state),
            controller,
            containers,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), BODY_LIMIT)
            .await
            .expect("read response body")
            .to_vec();

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// POST with an explicit content type (or none).
    pub async fn post_raw(&self, uri: &str, content_type: Option<&str>, body: &str) -> TestResponse {
        let mut builder = Request::builder().method(Method::POST).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let request = builder
            .body(Body::from(body.to_string()))
            .expect("valid request");
        self.send(request).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> TestResponse {
        self.post_raw(uri, Some("application/json"), &body.to_string())
            .await
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("valid request");
        self.send(request).await
    }

    /// Create an exec in [`CONTAINER`] and return its id.
    pub async fn create_exec(&self, cmd: &[&str]) -> String {
        let response = self
            .post_json(
                &format!("/containers/{}/exec", CONTAINER),
                serde_json::json!({ "Cmd": cmd }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.text());
        response.json()["Id"]
            .as_str()
            .expect("Id in create response")
            .to_string()
    }

    pub async fn start_detached(&self, id: &str) -> TestResponse {
        self.post_json(
            &format!("/exec/{}/start", id),
            serde_json::json!({ "Detach": true }),
        )
        .await
    }

    pub async fn inspect(&self, id: &str) -> ExecInspectResponse {
        let response = self.get(&format!("/exec/{}/json", id)).await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.text());
        serde_json::from_slice(&response.body).expect("inspect body")
    }

    /// Poll inspect until the exec is no longer running and has an exit code.
    pub async fn wait_exited(&self, id: &str, timeout: Duration) -> ExecInspectResponse {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let view = self.inspect(id).await;
            if !view.running && view.exit_code.is_some() {
                return view;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "exec {} still running after {:?}",
                id,
                timeout
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a non-TTY attached output body into `(stream, payload)` frames.
pub fn demux(mut body: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    while body.len() >= 8 {
        let stream = body[0];
        let len = u32::from_be_bytes([body[4], body[5], body[6], body[7]]) as usize;
        let end = (8 + len).min(body.len());
        frames.push((stream, body[8..end].to_vec()));
        body = &body[end..];
    }
    frames
}
