//! Tests against a real TCP server on an ephemeral port.
//!
//! These exercise what the in-process tests cannot: peer addresses supplied
//! by `into_make_service_with_connect_info` and forwarded headers arriving
//! from a trusted proxy.
//!
//! Run with: `cargo test --test server_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use request_shield::{AppState, Config, build_router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use common::{api_routes, test_config};

/// A running server plus the handles needed to stop it.
struct TestServer {
    base_url: String,
    client: Client,
    state: AppState,
    stop: CancellationToken,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to ephemeral port");
        let addr = listener.local_addr().expect("Failed to get local address");

        let state = AppState::new(config).expect("Failed to build state");
        let app = build_router(state.clone(), api_routes());
        let stop = CancellationToken::new();
        let shutdown = stop.clone();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .expect("Server failed");
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build client");

        Self {
            base_url: format!("http://{addr}"),
            client,
            state,
            stop,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn stop(self) {
        self.stop.cancel();
        self.state.shutdown().await;
    }
}

#[tokio::test]
async fn test_health_over_tcp() {
    let server = TestServer::start(test_config()).await;

    let response = server
        .client
        .get(server.url("/api/health"))
        .send()
        .await
        .expect("Health request failed");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("content-security-policy"));

    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "development");
    assert!(body.get("version").is_some());
    assert!(body.get("timestamp").is_some());

    server.stop().await;
}

#[tokio::test]
async fn test_rate_limit_keyed_on_peer_address() {
    let server = TestServer::start(Config {
        rate_limit_max_requests: 3,
        ..test_config()
    })
    .await;

    for _ in 0..3 {
        let response = server
            .client
            .get(server.url("/api/search?q=shoes"))
            .send()
            .await
            .expect("Request failed");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = server
        .client
        .get(server.url("/api/search?q=shoes"))
        .header("x-forwarded-for", "203.0.113.7")
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(
        response.headers().contains_key("retry-after"),
        "Rate limited response should include Retry-After header"
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "error": "Too many requests. Please try again later." })
    );

    server.stop().await;
}

#[tokio::test]
async fn test_trusted_proxy_forwarded_clients_are_isolated() {
    let server = TestServer::start(Config {
        rate_limit_max_requests: 2,
        trust_proxy: true,
        trusted_proxies: vec!["127.0.0.1/32".to_string()],
        ..test_config()
    })
    .await;

    let send_as = |client_ip: &'static str| {
        server
            .client
            .get(server.url("/api/health"))
            .header("x-forwarded-for", format!("{client_ip}, 10.1.1.1"))
            .send()
    };

    for _ in 0..2 {
        assert_eq!(send_as("198.51.100.1").await.unwrap().status(), StatusCode::OK);
    }
    assert_eq!(
        send_as("198.51.100.1").await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(send_as("198.51.100.2").await.unwrap().status(), StatusCode::OK);

    server.stop().await;
}

#[tokio::test]
async fn test_injection_blocked_over_tcp() {
    let server = TestServer::start(test_config()).await;

    let response = server
        .client
        .post(server.url("/api/echo"))
        .json(&json!({ "q": "1 UNION ALL SELECT password FROM users" }))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Invalid input format" }));

    server.stop().await;
}
