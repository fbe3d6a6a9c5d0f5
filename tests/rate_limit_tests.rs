//! Rate limiting through the full pipeline: quota enforcement at the HTTP
//! boundary, the 429 rejection shape, and per-class isolation.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, ResponseTemplate};

use gocart_gateway::core::config::GatewayConfig;
use gocart_gateway::gateway::GatewayServer;

async fn stubbed_config() -> GatewayConfig {
    let upstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;
    // The mock server lives as long as the process; leak it so the stub
    // stays up for the whole test
    let uri = upstream.uri();
    std::mem::forget(upstream);

    let mut config = GatewayConfig::default();
    config.auth.jwt_secret = "rate-limit-test-secret".to_string();
    for target in config.upstreams.values_mut() {
        target.base_url = uri.clone();
        target.retries = 0;
    }
    config
}

fn app(config: GatewayConfig) -> Router {
    GatewayServer::from_config(config).unwrap().app()
}

async fn send(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_quota_allows_n_then_rejects_n_plus_one() {
    let mut config = stubbed_config().await;
    config.rate_limits.general.limit = 3;

    let app = app(config);
    for i in 0..3 {
        let response = send(&app, "/api/products").await;
        assert_eq!(response.status(), StatusCode::OK, "request {}", i);
    }

    let response = send(&app, "/api/products").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    let body = body_json(response).await;
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["code"], json!("RATE_LIMIT_EXCEEDED"));
}

#[tokio::test]
async fn test_auth_class_has_its_own_tighter_quota() {
    let mut config = stubbed_config().await;
    config.rate_limits.auth.limit = 2;
    config.rate_limits.general.limit = 100;

    let app = app(config);
    assert_eq!(send(&app, "/auth/login").await.status(), StatusCode::OK);
    assert_eq!(send(&app, "/auth/login").await.status(), StatusCode::OK);
    assert_eq!(
        send(&app, "/auth/login").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    // The general class is untouched by the exhausted auth bucket
    assert_eq!(send(&app, "/api/products").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_quota_recovers_after_window() {
    let mut config = stubbed_config().await;
    config.rate_limits.general.limit = 1;
    config.rate_limits.general.window = Duration::from_millis(100);

    let app = app(config);
    assert_eq!(send(&app, "/api/products").await.status(), StatusCode::OK);
    assert_eq!(
        send(&app, "/api/products").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(send(&app, "/api/products").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rejections_do_not_reach_the_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = GatewayConfig::default();
    config.auth.jwt_secret = "rate-limit-test-secret".to_string();
    config.rate_limits.general.limit = 1;
    for target in config.upstreams.values_mut() {
        target.base_url = upstream.uri();
        target.retries = 0;
    }

    let app = app(config);
    assert_eq!(send(&app, "/api/products").await.status(), StatusCode::OK);
    assert_eq!(
        send(&app, "/api/products").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    // MockServer::verify on drop asserts the upstream saw exactly one call
}
