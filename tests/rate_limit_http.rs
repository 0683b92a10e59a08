//! HTTP-level rate limiting tests
//!
//! Drives a router assembled like the production one through
//! `tower::ServiceExt::oneshot` and verifies the throttle at the HTTP
//! boundary: 429 with a JSON body once the budget is spent, rejection before
//! any credential logic runs, and no limiting off the auth path.

use authgate_backend::auth::{
    api as auth_api, AuthState, JwtHandler, Notifier, RefreshTokenStore, UserStore,
};
use authgate_backend::middleware::{rate_limit_middleware, RateLimitConfig, RateLimiter};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tower::ServiceExt;

fn test_app(temp: &NamedTempFile) -> Router {
    let db_path = temp.path().to_str().unwrap();
    let users = Arc::new(UserStore::new(db_path).unwrap());
    let refresh_tokens = Arc::new(RefreshTokenStore::new(db_path).unwrap());
    let jwt_handler = Arc::new(JwtHandler::new("rate-limit-test-secret".to_string()));
    let notifier = Arc::new(Notifier::new("noreply@example.com"));
    let state = AuthState::new(users, refresh_tokens, jwt_handler, notifier);

    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));

    Router::new()
        .route("/api/auth/signin", post(auth_api::signin))
        .with_state(state)
        .route("/health", get(health))
        .layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build a request carrying the peer address the server would attach.
fn signin_request(forwarded_for: Option<&str>) -> Request<Body> {
    let body = serde_json::json!({
        "username_or_email": "nobody",
        "password": "wrong-password",
    });

    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/auth/signin")
        .header("content-type", "application/json");
    if let Some(client) = forwarded_for {
        builder = builder.header("X-Forwarded-For", client);
    }

    let mut request = builder.body(Body::from(body.to_string())).unwrap();
    let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

fn health_request() -> Request<Body> {
    let mut request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

#[tokio::test]
async fn test_auth_path_throttled_before_credential_check() {
    let temp = NamedTempFile::new().unwrap();
    let app = test_app(&temp);

    // The first 10 requests reach the handler: bad credentials answer 401,
    // proving credential logic ran.
    for _ in 0..10 {
        let response = app.clone().oneshot(signin_request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // The 11th is cut off at the limiter: 429, not 401
    let response = app.clone().oneshot(signin_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "rate_limited");
    assert!(body["message"].as_str().unwrap().contains("Too many requests"));
}

#[tokio::test]
async fn test_non_auth_path_bypasses_limiter() {
    let temp = NamedTempFile::new().unwrap();
    let app = test_app(&temp);

    // Exhaust the client's auth budget
    for _ in 0..11 {
        app.clone().oneshot(signin_request(None)).await.unwrap();
    }
    let response = app.clone().oneshot(signin_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Off the auth prefix the same client is never limited
    for _ in 0..20 {
        let response = app.clone().oneshot(health_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_clients_throttled_independently_over_http() {
    let temp = NamedTempFile::new().unwrap();
    let app = test_app(&temp);

    for _ in 0..10 {
        app.clone()
            .oneshot(signin_request(Some("1.2.3.4")))
            .await
            .unwrap();
    }
    let response = app
        .clone()
        .oneshot(signin_request(Some("1.2.3.4")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different forwarded client still reaches the handler
    let response = app
        .clone()
        .oneshot(signin_request(Some("5.6.7.8")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
