mod common;
mod http_helpers;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use common::{read_json, test_app, test_app_with, test_config};
use gatekeeper::chain::StageName;
use gatekeeper::config::RouteExclusion;
use http_helpers::{bearer_request, empty_request};
use std::net::SocketAddr;
use std::time::Duration;

fn from_addr(uri: &str, addr: &str) -> Request<Body> {
    let mut request = empty_request("GET", uri);
    let addr: SocketAddr = addr.parse().expect("addr");
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

#[tokio::test]
async fn preflight_is_answered_before_authentication() {
    let app = test_app().await;
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/v1/roles")
        .header(header::ORIGIN, "https://console.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .expect("request");
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .expect("allow origin"),
        "*"
    );
    assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_MAX_AGE).expect("max age"),
        "600"
    );
}

#[tokio::test]
async fn rejections_still_carry_cors_headers() {
    let app = test_app().await;
    let request = Request::builder()
        .uri("/api/v1/roles")
        .header(header::ORIGIN, "https://console.example")
        .body(Body::empty())
        .expect("request");
    let response = app.send(request).await;
    assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    let body = read_json(response).await;
    assert_eq!(body["code"], 401);
}

#[tokio::test]
async fn health_needs_no_token() {
    let app = test_app().await;
    let response = app.send(empty_request("GET", "/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["revocation_backend"], "memory");
    assert_eq!(body["data"]["rate_limit_backend"], "memory");
}

#[tokio::test]
async fn role_without_grant_is_forbidden_in_band() {
    let app = test_app().await;
    app.state.policies.add_role("viewer").await.expect("role");
    let token = app.token_for("vic", "viewer");
    let response = app.send(bearer_request("GET", "/api/v1/roles", &token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["code"], 403);
    assert_eq!(body["msg"], "forbidden");
}

#[tokio::test]
async fn unknown_role_is_forbidden() {
    let app = test_app().await;
    let token = app.token_for("ghost", "nobody-registered-this");
    let body = read_json(app.send(bearer_request("GET", "/api/v1/roles", &token)).await).await;
    assert_eq!(body["code"], 403);
}

#[tokio::test]
async fn granted_role_reaches_the_handler() {
    let app = test_app().await;
    let token = app.token_for("root", "admin");
    let body = read_json(app.send(bearer_request("GET", "/api/v1/roles", &token)).await).await;
    assert_eq!(body["code"], 0);
    let roles = body["data"].as_array().expect("roles");
    assert!(roles.iter().any(|summary| summary["role"] == "admin"));
}

#[tokio::test]
async fn rate_limit_runs_before_authentication() {
    let mut config = test_config();
    config.rate_limit.limit = 3;
    config.rate_limit.window_secs = 10;
    let app = test_app_with(config).await;

    for _ in 0..3 {
        let body =
            read_json(app.send(from_addr("/api/v1/roles", "10.0.0.1:5000")).await).await;
        assert_eq!(body["code"], 401);
    }
    let response = app.send(from_addr("/api/v1/roles", "10.0.0.1:5001")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .expect("retry-after")
        .to_str()
        .expect("ascii")
        .parse()
        .expect("seconds");
    assert!((1..=10).contains(&retry_after));
    let body = read_json(response).await;
    assert_eq!(body["code"], 429);

    // Another address has its own window.
    let body = read_json(app.send(from_addr("/health", "10.0.0.2:5000")).await).await;
    assert_eq!(body["code"], 0);
}

#[tokio::test]
async fn rate_window_slides_with_the_clock() {
    let mut config = test_config();
    config.rate_limit.limit = 2;
    config.rate_limit.window_secs = 10;
    let app = test_app_with(config).await;

    for _ in 0..2 {
        let response = app.send(from_addr("/health", "10.0.0.1:5000")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.send(from_addr("/health", "10.0.0.1:5000")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    app.clock.advance(Duration::from_secs(11));
    let response = app.send(from_addr("/health", "10.0.0.1:5000")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn configured_exclusion_skips_rate_limiting() {
    let mut config = test_config();
    config.rate_limit.limit = 1;
    config.chain.exclusions.push(RouteExclusion {
        method: Some("get".to_string()),
        path: "/health".to_string(),
        skip: vec![StageName::RateLimit],
    });
    let app = test_app_with(config).await;

    for _ in 0..5 {
        let response = app.send(empty_request("GET", "/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn chain_without_authorization_admits_any_authenticated_caller() {
    let mut config = test_config();
    config.chain.order = vec![StageName::RequestLog, StageName::Authn];
    let app = test_app_with(config).await;
    assert_eq!(
        app.state.chain.stage_names(),
        vec![StageName::RequestLog, StageName::Authn]
    );

    let token = app.token_for("vic", "viewer");
    let body = read_json(app.send(bearer_request("GET", "/api/v1/roles", &token)).await).await;
    assert_eq!(body["code"], 0);

    let body = read_json(app.send(empty_request("GET", "/api/v1/roles")).await).await;
    assert_eq!(body["code"], 401);
}
