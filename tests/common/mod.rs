//! Shared fixtures for the pipeline and server tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::body::{Body, Bytes, to_bytes};
use axum::extract::{ConnectInfo, Path};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use governor::clock::FakeRelativeClock;
use request_shield::{AppError, AppResult, AppState, Config, build_router};
use serde_json::{Value, json};

/// Application routes mounted under the API prefix in tests.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/echo", post(echo))
        .route("/items/{id}", get(item))
        .route("/search", get(|| async { "ok" }))
        .route("/fail", get(fail))
        .route("/panic", get(panic_handler))
        .route("/bare-error", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/maintenance", get(maintenance))
}

async fn echo(body: Bytes) -> Bytes {
    body
}

async fn item(Path(id): Path<String>) -> Json<Value> {
    Json(json!({ "id": id }))
}

async fn fail() -> AppResult<&'static str> {
    Err(AppError::Internal("db connection refused".to_string()))
}

async fn maintenance() -> (StatusCode, Json<Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "down for maintenance" })),
    )
}

async fn panic_handler() -> &'static str {
    panic!("boom")
}

/// Config with metrics off and development defaults otherwise.
pub fn test_config() -> Config {
    Config {
        metrics_port: 0,
        ..Config::default()
    }
}

/// In-process application driven by a fake clock.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: FakeRelativeClock,
}

impl TestApp {
    pub fn new(config: Config) -> Self {
        let clock = FakeRelativeClock::default();
        let state = AppState::with_clock(config, clock.clone()).expect("valid test config");
        let router = build_router(state.clone(), api_routes());
        Self { router, state, clock }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        use tower::ServiceExt;
        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// Build a request as if it arrived over TCP from `peer`.
pub fn request(method: &str, uri: &str, peer: &str) -> Request<Body> {
    request_with_body(method, uri, peer, None, Body::empty())
}

pub fn json_request(uri: &str, peer: &str, body: &Value) -> Request<Body> {
    request_with_body(
        "POST",
        uri,
        peer,
        Some("application/json"),
        Body::from(body.to_string()),
    )
}

pub fn request_with_body(
    method: &str,
    uri: &str,
    peer: &str,
    content_type: Option<&str>,
    body: Body,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    let mut request = builder.body(body).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
    request
}

pub async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// Fresh directory under the system temp dir, removed and recreated.
pub fn temp_static_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("request-shield-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
